//! Configuration module for socket-probe.
//!
//! The four positional arguments name the target and the test run. Tunables
//! come from an optional TOML file and can be overridden by flags.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the test client
#[derive(Parser, Debug)]
#[command(name = "socket-probe")]
#[command(author = "socket-probe authors")]
#[command(version = "0.1.0")]
#[command(about = "TCP connect/send/accept test client", long_about = None)]
pub struct CliArgs {
    /// Target server IP or hostname
    pub target_ip: String,

    /// Target server port
    pub target_port: u16,

    /// Local port to accept the server's connections on
    pub listen_port: u16,

    /// Numeric test id embedded in every payload
    pub test_id: u32,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of outbound connections to open
    #[arg(short = 'n', long)]
    pub connections: Option<usize>,

    /// Number of payload rounds to send
    #[arg(short = 'r', long)]
    pub rounds: Option<u32>,

    /// Delay between the last round and reading replies, in milliseconds
    #[arg(long)]
    pub settle_ms: Option<u64>,

    /// Per-socket reply read timeout, in milliseconds
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,

    /// How long to wait for the accept loop to stop, in milliseconds
    #[arg(long)]
    pub join_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Outbound side configuration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_connections")]
    pub connections: usize,
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Prefix identifying this client in payloads
    #[serde(default = "default_tag")]
    pub tag: String,
    /// Address advertised to the server as our listen host
    #[serde(default = "default_advertise_host")]
    pub advertise_host: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connections: default_connections(),
            rounds: default_rounds(),
            settle_ms: default_settle_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            tag: default_tag(),
            advertise_host: default_advertise_host(),
        }
    }
}

/// Inbound side configuration
#[derive(Debug, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_listen_host")]
    pub host: String,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: default_listen_host(),
            backlog: default_backlog(),
            join_timeout_ms: default_join_timeout_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_connections() -> usize {
    23
}

fn default_rounds() -> u32 {
    2
}

fn default_settle_ms() -> u64 {
    1000
}

fn default_read_timeout_ms() -> u64 {
    5000
}

fn default_join_timeout_ms() -> u64 {
    10_000
}

fn default_tag() -> String {
    "rs".to_string()
}

fn default_advertise_host() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_host() -> String {
    "127.0.0.1".to_string()
}

fn default_backlog() -> i32 {
    12
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub target: SocketAddr,
    /// Local address the accept loop listens on
    pub listen: SocketAddr,
    pub backlog: i32,
    pub test_id: u32,
    pub connections: usize,
    pub rounds: u32,
    pub settle: Duration,
    pub read_timeout: Duration,
    pub join_timeout: Duration,
    pub tag: String,
    pub advertise_host: String,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at, if any.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents)
                .map_err(|source| ConfigError::TomlParse {
                    path: config_path.clone(),
                    source,
                })?
        } else {
            TomlConfig::default()
        };

        let target = resolve(&cli.target_ip, cli.target_port)?;
        let listen = resolve(&toml_config.listener.host, cli.listen_port)?;

        let config = Config {
            target,
            listen,
            backlog: toml_config.listener.backlog,
            test_id: cli.test_id,
            connections: cli.connections.unwrap_or(toml_config.client.connections),
            rounds: cli.rounds.unwrap_or(toml_config.client.rounds),
            settle: Duration::from_millis(cli.settle_ms.unwrap_or(toml_config.client.settle_ms)),
            read_timeout: Duration::from_millis(
                cli.read_timeout_ms
                    .unwrap_or(toml_config.client.read_timeout_ms),
            ),
            join_timeout: Duration::from_millis(
                cli.join_timeout_ms
                    .unwrap_or(toml_config.listener.join_timeout_ms),
            ),
            tag: toml_config.client.tag,
            advertise_host: toml_config.client.advertise_host,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.connections == 0 {
            return Err(ConfigError::Invalid("connections must be at least 1"));
        }
        if self.rounds == 0 {
            return Err(ConfigError::Invalid("rounds must be at least 1"));
        }
        if self.backlog < 1 {
            return Err(ConfigError::Invalid("backlog must be at least 1"));
        }
        Ok(())
    }
}

/// Resolve `host:port` up front so nothing blocks on DNS once the runtime
/// is running.
fn resolve(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    let name = format!("{host}:{port}");
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ConfigError::Resolve {
            name: name.clone(),
            source,
        })?;
    first_address(name, addrs)
}

fn first_address(
    name: String,
    mut addrs: impl Iterator<Item = SocketAddr>,
) -> Result<SocketAddr, ConfigError> {
    addrs.next().ok_or(ConfigError::NoAddress(name))
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),

    #[error("Failed to resolve '{name}': {source}")]
    Resolve {
        name: String,
        source: std::io::Error,
    },

    #[error("'{0}' resolved to no addresses")]
    NoAddress(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        let mut argv = vec!["socket-probe"];
        argv.extend_from_slice(args);
        CliArgs::try_parse_from(argv).unwrap()
    }

    fn write_config(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "socket-probe-{}-{name}.toml",
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.client.connections, 23);
        assert_eq!(config.client.rounds, 2);
        assert_eq!(config.client.settle_ms, 1000);
        assert_eq!(config.listener.backlog, 12);
        assert_eq!(config.listener.host, "127.0.0.1");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [client]
            connections = 4
            rounds = 3
            tag = "probe"

            [listener]
            backlog = 32

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.client.connections, 4);
        assert_eq!(config.client.rounds, 3);
        assert_eq!(config.client.tag, "probe");
        assert_eq!(config.client.settle_ms, 1000);
        assert_eq!(config.listener.backlog, 32);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_positionals() {
        let config = Config::from_cli(cli(&["127.0.0.1", "9000", "9001", "7"])).unwrap();
        assert_eq!(config.target, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.listen, "127.0.0.1:9001".parse().unwrap());
        assert_eq!(config.test_id, 7);
        assert_eq!(config.connections, 23);
        assert_eq!(config.settle, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_positional_rejected() {
        let result = CliArgs::try_parse_from(["socket-probe", "127.0.0.1", "9000", "9001"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let path = write_config("overrides", "[client]\nconnections = 4\nrounds = 5\n");

        let path_str = path.to_str().unwrap();
        let config = Config::from_cli(cli(&[
            "127.0.0.1", "9000", "9001", "1", "--config", path_str, "-n", "2",
        ]))
        .unwrap();
        assert_eq!(config.connections, 2);
        assert_eq!(config.rounds, 5);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_zero_connections_rejected() {
        let err = Config::from_cli(cli(&["127.0.0.1", "9000", "9001", "1", "-n", "0"])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_missing_config_file() {
        let err = Config::from_cli(cli(&[
            "127.0.0.1",
            "9000",
            "9001",
            "1",
            "--config",
            "/nonexistent/socket-probe.toml",
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn test_zero_rounds_rejected() {
        let err = Config::from_cli(cli(&["127.0.0.1", "9000", "9001", "1", "-r", "0"])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("rounds")));
    }

    #[test]
    fn test_zero_backlog_rejected() {
        let path = write_config("backlog", "[listener]\nbacklog = 0\n");
        let path_str = path.to_str().unwrap();
        let err = Config::from_cli(cli(&["127.0.0.1", "9000", "9001", "1", "--config", path_str]))
            .unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("backlog")));
    }

    #[test]
    fn test_unresolvable_target() {
        // An interior NUL is rejected before any lookup happens.
        let err = Config::from_cli(cli(&["bad\0host", "9000", "9001", "1"])).unwrap_err();
        assert!(matches!(err, ConfigError::Resolve { .. }));
    }

    #[test]
    fn test_no_address() {
        let err = first_address("empty:1".to_string(), std::iter::empty()).unwrap_err();
        assert!(matches!(err, ConfigError::NoAddress(ref name) if name == "empty:1"));

        let addr: SocketAddr = "10.0.0.1:1".parse().unwrap();
        assert_eq!(first_address("one:1".to_string(), std::iter::once(addr)).unwrap(), addr);
    }

    #[test]
    fn test_log_level_from_file_when_cli_default() {
        let path = write_config("level-file", "[logging]\nlevel = \"debug\"\n");
        let path_str = path.to_str().unwrap();
        let config =
            Config::from_cli(cli(&["127.0.0.1", "9000", "9001", "1", "--config", path_str]))
                .unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_log_level_cli_overrides_file() {
        let path = write_config("level-cli", "[logging]\nlevel = \"debug\"\n");
        let path_str = path.to_str().unwrap();
        let config = Config::from_cli(cli(&[
            "127.0.0.1",
            "9000",
            "9001",
            "1",
            "--config",
            path_str,
            "--log-level",
            "trace",
        ]))
        .unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.log_level, "trace");
    }
}
