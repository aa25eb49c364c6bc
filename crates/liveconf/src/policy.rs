//! Request policy - timeouts, retries, and how the peer reports errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Timeout and retry settings for correlated requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Per-attempt response timeout in milliseconds.
    #[serde(default = "RequestConfig::default_timeout_ms")]
    pub timeout_ms: u64,

    /// Extra attempts for idempotent (read-only) requests.
    #[serde(default = "RequestConfig::default_max_retries")]
    pub max_retries: u32,

    /// First retry delay in milliseconds; doubles per attempt.
    #[serde(default = "RequestConfig::default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound on the retry delay in milliseconds.
    #[serde(default = "RequestConfig::default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl RequestConfig {
    fn default_timeout_ms() -> u64 {
        2_000
    }

    fn default_max_retries() -> u32 {
        2
    }

    fn default_backoff_base_ms() -> u64 {
        100
    }

    fn default_backoff_max_ms() -> u64 {
        2_000
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
            max_retries: Self::default_max_retries(),
            backoff_base_ms: Self::default_backoff_base_ms(),
            backoff_max_ms: Self::default_backoff_max_ms(),
        }
    }
}

/// How the peer signals a failed command.
///
/// Some peers answer a bad track index with an error message on a fixed
/// address; others stay silent and the only signal is a missing reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerErrorMode {
    /// Peer sends an error message (e.g. `/live/error`).
    #[default]
    Explicit,
    /// Peer never reports errors; a timeout is the only failure signal.
    TimeoutOnly,
}

impl PeerErrorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerErrorMode::Explicit => "explicit",
            PeerErrorMode::TimeoutOnly => "timeout_only",
        }
    }
}

impl fmt::Display for PeerErrorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeerErrorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "explicit" => Ok(PeerErrorMode::Explicit),
            "timeout_only" | "timeout" => Ok(PeerErrorMode::TimeoutOnly),
            other => Err(format!("unknown peer error mode: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req = RequestConfig::default();
        assert_eq!(req.timeout(), Duration::from_secs(2));
        assert_eq!(req.max_retries, 2);
        assert_eq!(req.backoff_base(), Duration::from_millis(100));
    }

    #[test]
    fn test_peer_error_mode_parse() {
        assert_eq!("explicit".parse::<PeerErrorMode>(), Ok(PeerErrorMode::Explicit));
        assert_eq!("timeout-only".parse::<PeerErrorMode>(), Ok(PeerErrorMode::TimeoutOnly));
        assert_eq!("TIMEOUT".parse::<PeerErrorMode>(), Ok(PeerErrorMode::TimeoutOnly));
        assert!("sometimes".parse::<PeerErrorMode>().is_err());
    }
}
