//! Minimal configuration loading for livebridge.
//!
//! # Configuration Philosophy
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`PeerConfig`, `TelemetryConfig`): where the peer
//!   lives, which ports we bind, how loudly we log.
//!
//! - **Policy** (`RequestConfig`, `PeerErrorMode`): how long to wait for a
//!   reply, how often to retry reads, and how the peer reports failures.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/livebridge/config.toml` (system)
//! 2. `~/.config/livebridge/config.toml` (user)
//! 3. `./livebridge.toml` (local override, or a `--config` path)
//! 4. Environment variables (`LIVEBRIDGE_*`)
//!
//! # Example Config
//!
//! ```toml
//! peer_errors = "explicit"
//!
//! [peer]
//! host = "192.168.1.20"
//! send_port = 11000
//! receive_port = 11001
//!
//! [requests]
//! timeout_ms = 1500
//! max_retries = 2
//!
//! [telemetry]
//! log_level = "debug"
//! ```

pub mod infra;
pub mod loader;
pub mod policy;

pub use infra::{PeerConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};
pub use policy::{PeerErrorMode, RequestConfig};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete livebridge configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LiveConfig {
    #[serde(default)]
    pub peer: PeerConfig,

    #[serde(default)]
    pub requests: RequestConfig,

    #[serde(default)]
    pub peer_errors: PeerErrorMode,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl LiveConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/livebridge/config.toml`
    /// 3. `~/.config/livebridge/config.toml`
    /// 4. `./livebridge.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an explicit file taking the place of
    /// `./livebridge.toml`, then apply env overrides.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = LiveConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::apply_file(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        // Built by hand so the section order matches the docs above
        let mut output = String::new();

        output.push_str("# livebridge configuration\n\n");
        output.push_str(&format!("peer_errors = \"{}\"\n", self.peer_errors));

        output.push_str("\n[peer]\n");
        output.push_str(&format!("host = \"{}\"\n", self.peer.host));
        output.push_str(&format!("send_port = {}\n", self.peer.send_port));
        output.push_str(&format!("receive_port = {}\n", self.peer.receive_port));

        output.push_str("\n[requests]\n");
        output.push_str(&format!("timeout_ms = {}\n", self.requests.timeout_ms));
        output.push_str(&format!("max_retries = {}\n", self.requests.max_retries));
        output.push_str(&format!("backoff_base_ms = {}\n", self.requests.backoff_base_ms));
        output.push_str(&format!("backoff_max_ms = {}\n", self.requests.backoff_max_ms));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output
    }
}
