//! Infrastructure configuration - the peer endpoint and logging.

use serde::{Deserialize, Serialize};

/// Where the remote control surface lives and which ports we use.
///
/// The peer listens on `send_port` and replies to `receive_port` on the
/// host that sent the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Peer host name or IP.
    /// Default: 127.0.0.1
    #[serde(default = "PeerConfig::default_host")]
    pub host: String,

    /// UDP port the peer listens on.
    /// Default: 11000
    #[serde(default = "PeerConfig::default_send_port")]
    pub send_port: u16,

    /// Local UDP port the peer replies to.
    /// Default: 11001
    #[serde(default = "PeerConfig::default_receive_port")]
    pub receive_port: u16,
}

impl PeerConfig {
    fn default_host() -> String {
        "127.0.0.1".to_string()
    }

    fn default_send_port() -> u16 {
        11000
    }

    fn default_receive_port() -> u16 {
        11001
    }

    /// `host:send_port`, for logging and socket resolution.
    pub fn remote_addr(&self) -> String {
        format!("{}:{}", self.host, self.send_port)
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            send_port: Self::default_send_port(),
            receive_port: Self::default_receive_port(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter directive (trace, debug, info, warn, error, or a full
    /// `EnvFilter` string).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
