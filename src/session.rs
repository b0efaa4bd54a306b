//! One complete test run against the companion server.

use crate::client::{self, Reply};
use crate::config::Config;
use crate::listener::{self, StopReason};
use crate::message::Identity;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Counters describing a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub connected: usize,
    pub failed_connects: usize,
    /// Rounds in which at least one payload went out.
    pub rounds_sent: u32,
    /// Round payloads written across all rounds and sockets.
    pub payloads_sent: usize,
    /// Outbound sockets that produced a reply.
    pub replies: usize,
    /// Inbound connections that echoed the greeting.
    pub echoes: usize,
    pub stop_sent: bool,
    /// `None` when the accept loop did not return on its own.
    pub stop: Option<StopReason>,
    /// The accept loop outlived the join timeout and was aborted.
    pub aborted: bool,
}

/// Errors that prevent a run from starting.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

/// Drive the listener and the outbound connections through one run.
///
/// The accept loop runs on its own task while the outbound side works
/// serially. The settle delay gives the server time to answer before replies
/// are read; reads and the final join are both bounded so a silent server
/// cannot hang the run.
pub async fn run(config: &Config) -> Result<SessionSummary, SessionError> {
    let listener =
        listener::bind(config.listen, config.backlog).map_err(|source| SessionError::Bind {
            addr: config.listen,
            source,
        })?;

    // Port 0 asks the OS to pick; advertise what we actually got.
    let listen_port = listener
        .local_addr()
        .map(|addr| addr.port())
        .unwrap_or(config.listen.port());
    info!(addr = %config.listen, port = listen_port, "Listening");

    let identity = Identity {
        tag: config.tag.clone(),
        advertise_host: config.advertise_host.clone(),
        listen_port,
        test_id: config.test_id,
    };

    let mut connections = client::open_connections(config.target, config.connections).await;

    let echoes = Arc::new(AtomicUsize::new(0));
    let mut accept_task = tokio::spawn(listener::accept_loop(
        listener,
        identity.greeting(),
        Arc::clone(&echoes),
    ));

    let mut rounds_sent = 0;
    let mut payloads_sent = 0;
    for round in 1..=config.rounds {
        let sent = client::send_round(&mut connections.streams, &identity, round).await;
        if sent > 0 {
            rounds_sent += 1;
        }
        payloads_sent += sent;
    }

    tokio::time::sleep(config.settle).await;

    let replies = client::read_replies(&mut connections.streams, config.read_timeout).await;
    let replies = replies
        .iter()
        .filter(|reply| matches!(reply, Reply::Data(_)))
        .count();

    let stop_sent = client::send_stop(&mut connections.streams, &identity).await;

    let (stop, aborted) = match tokio::time::timeout(config.join_timeout, &mut accept_task).await {
        Ok(Ok(stop)) => (Some(stop), false),
        Ok(Err(e)) => {
            warn!(error = %e, "Accept task failed");
            (None, false)
        }
        Err(_) => {
            warn!(timeout = ?config.join_timeout, "Accept loop did not stop in time, aborting");
            accept_task.abort();
            (None, true)
        }
    };

    let connected = connections.streams.len();
    info!(count = connected, "Exiting, closing all socket connections");
    drop(connections.streams);

    Ok(SessionSummary {
        connected,
        failed_connects: connections.failed,
        rounds_sent,
        payloads_sent,
        replies,
        echoes: echoes.load(Ordering::Relaxed),
        stop_sent,
        stop,
        aborted,
    })
}
