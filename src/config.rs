//! Node configuration, read from a TOML file.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [replication]
//! reconnect_timeout_ms = 1000
//! queue_order = "fifo"
//! peers = [{ host = "10.0.0.2", port = 8080 }]
//!
//! [log]
//! level = "info"
//! ```
//!
//! Every section and key is optional.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::channel::{ChannelOptions, QueueOrder};

/// Error loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Listening socket.
    pub server: ServerConfig,
    /// Replica peers and channel tuning.
    pub replication: ReplicationConfig,
    /// Logging.
    pub log: LogConfig,
}

/// Address the node listens on for clients and peers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// `host:port`, suitable for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Static replica set and channel tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplicationConfig {
    /// Peers to replicate with.
    pub peers: Vec<PeerConfig>,
    /// Fixed pause between reconnect attempts, in milliseconds.
    pub reconnect_timeout_ms: u64,
    /// Flush order of envelopes queued while a peer is unreachable.
    pub queue_order: QueueOrder,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            reconnect_timeout_ms: 1000,
            queue_order: QueueOrder::Fifo,
        }
    }
}

impl ReplicationConfig {
    /// Channel options for every peer channel.
    pub fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            reconnect_interval: Duration::from_millis(self.reconnect_timeout_ms),
            queue_order: self.queue_order,
        }
    }
}

/// One replica peer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeerConfig {
    /// Peer host name or address.
    pub host: String,
    /// Peer port.
    pub port: u16,
}

impl fmt::Display for PeerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for PeerConfig {
    type Err = ConfigError;

    /// Parse `host:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::Invalid(format!("peer `{s}` is not host:port")))?;
        let port = port
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("peer `{s}` has an invalid port")))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Default filter directive, used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Read and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        contents.parse()
    }

    /// Check values that parse but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replication.reconnect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "replication.reconnect_timeout_ms must be positive".into(),
            ));
        }
        for peer in &self.replication.peers {
            if peer.host.trim().is_empty() {
                return Err(ConfigError::Invalid("peer host must not be empty".into()));
            }
            if peer.port == 0 {
                return Err(ConfigError::Invalid(format!("peer {peer} has port 0")));
            }
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = "".parse().unwrap();
        assert_eq!(config.server.bind_addr(), "127.0.0.1:8080");
        assert!(config.replication.peers.is_empty());
        assert_eq!(
            config.replication.channel_options().reconnect_interval,
            Duration::from_millis(1000)
        );
        assert_eq!(config.replication.queue_order, QueueOrder::Fifo);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn parses_full_file() {
        let config: Config = r#"
            [server]
            host = "0.0.0.0"
            port = 9000

            [replication]
            reconnect_timeout_ms = 250
            queue_order = "lifo"
            peers = [
                { host = "10.0.0.2", port = 9000 },
                { host = "10.0.0.3", port = 9001 },
            ]

            [log]
            level = "formsync=debug"
        "#
        .parse()
        .unwrap();

        assert_eq!(config.server.bind_addr(), "0.0.0.0:9000");
        assert_eq!(config.replication.peers.len(), 2);
        assert_eq!(config.replication.peers[1].to_string(), "10.0.0.3:9001");
        assert_eq!(config.replication.queue_order, QueueOrder::Lifo);
        assert_eq!(config.log.level, "formsync=debug");
    }

    #[test]
    fn rejects_zero_interval_and_bad_peers() {
        assert!(matches!(
            "[replication]\nreconnect_timeout_ms = 0".parse::<Config>(),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            "[replication]\npeers = [{ host = \"\", port = 1 }]".parse::<Config>(),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            "[replication]\npeers = [{ host = \"a\", port = 0 }]".parse::<Config>(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(matches!(
            "[server]\nhots = \"x\"".parse::<Config>(),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn peer_from_str() {
        let peer: PeerConfig = "node-2.local:8081".parse().unwrap();
        assert_eq!(peer, PeerConfig { host: "node-2.local".into(), port: 8081 });
        assert!("nope".parse::<PeerConfig>().is_err());
        assert!("host:port".parse::<PeerConfig>().is_err());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Config::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
