//! socket-probe: a TCP test client for a companion test server
//!
//! One run does the following:
//! - Listens locally for connections back from the server
//! - Opens a batch of outbound connections to the server
//! - Sends numbered data rounds on every outbound connection
//! - Reads one reply per connection
//! - Sends a stop message and waits for the server to stop the accept loop
//!
//! Configuration via positional CLI arguments plus an optional TOML file.

mod client;
mod config;
mod listener;
mod message;
mod session;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        target_addr = %config.target,
        listen_addr = %config.listen,
        test_id = config.test_id,
        connections = config.connections,
        rounds = config.rounds,
        "Starting socket-probe"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let summary = runtime.block_on(session::run(&config))?;

    info!(
        connected = summary.connected,
        failed_connects = summary.failed_connects,
        rounds = summary.rounds_sent,
        payloads = summary.payloads_sent,
        replies = summary.replies,
        echoes = summary.echoes,
        stop_sent = summary.stop_sent,
        stop = ?summary.stop,
        aborted = summary.aborted,
        "Run complete"
    );

    Ok(())
}
