//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, LiveConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/livebridge/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("livebridge/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("livebridge.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file and overlay the values it sets onto `config`.
pub fn apply_file(config: &mut LiveConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    apply_toml(config, &contents, path)
}

/// Overlay the keys present in `contents`; absent keys keep their value.
fn apply_toml(config: &mut LiveConfig, contents: &str, path: &Path) -> Result<(), ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let parse_err = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    if let Some(v) = table.get("peer_errors").and_then(|v| v.as_str()) {
        config.peer_errors = v.parse().map_err(parse_err)?;
    }

    if let Some(peer) = table.get("peer").and_then(|v| v.as_table()) {
        if let Some(v) = peer.get("host").and_then(|v| v.as_str()) {
            config.peer.host = v.to_string();
        }
        if let Some(v) = peer.get("send_port").and_then(|v| v.as_integer()) {
            config.peer.send_port = port_from(v).ok_or_else(|| parse_err(format!("send_port out of range: {v}")))?;
        }
        if let Some(v) = peer.get("receive_port").and_then(|v| v.as_integer()) {
            config.peer.receive_port = port_from(v).ok_or_else(|| parse_err(format!("receive_port out of range: {v}")))?;
        }
    }

    if let Some(requests) = table.get("requests").and_then(|v| v.as_table()) {
        if let Some(v) = requests.get("timeout_ms").and_then(|v| v.as_integer()) {
            config.requests.timeout_ms = v.max(0) as u64;
        }
        if let Some(v) = requests.get("max_retries").and_then(|v| v.as_integer()) {
            config.requests.max_retries = v.clamp(0, u32::MAX as i64) as u32;
        }
        if let Some(v) = requests.get("backoff_base_ms").and_then(|v| v.as_integer()) {
            config.requests.backoff_base_ms = v.max(0) as u64;
        }
        if let Some(v) = requests.get("backoff_max_ms").and_then(|v| v.as_integer()) {
            config.requests.backoff_max_ms = v.max(0) as u64;
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.telemetry.log_level = v.to_string();
        }
    }

    Ok(())
}

fn port_from(v: i64) -> Option<u16> {
    u16::try_from(v).ok()
}

/// Variables read by [`apply_env_overrides`].
pub const ENV_KEYS: &[&str] = &[
    "LIVEBRIDGE_HOST",
    "LIVEBRIDGE_SEND_PORT",
    "LIVEBRIDGE_RECEIVE_PORT",
    "LIVEBRIDGE_TIMEOUT_MS",
    "LIVEBRIDGE_MAX_RETRIES",
    "LIVEBRIDGE_PEER_ERRORS",
    "LIVEBRIDGE_LOG_LEVEL",
    "RUST_LOG",
];

/// Apply environment variable overrides to config.
///
/// Only the known keys are looked up. Values that are not valid UTF-8 are
/// skipped, and so is everything else in the environment.
pub fn apply_env_overrides(config: &mut LiveConfig, sources: &mut ConfigSources) {
    let vars = ENV_KEYS
        .iter()
        .filter_map(|key| env::var(key).ok().map(|value| (key.to_string(), value)));
    apply_overrides_from(config, sources, vars);
}

/// Apply overrides from an explicit variable list (the process env in
/// production, a fixed list in tests).
pub fn apply_overrides_from<I>(config: &mut LiveConfig, sources: &mut ConfigSources, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut rust_log = None;

    for (key, value) in vars {
        let applied = match key.as_str() {
            "LIVEBRIDGE_HOST" => {
                config.peer.host = value;
                true
            }
            "LIVEBRIDGE_SEND_PORT" => value
                .parse()
                .map(|port| config.peer.send_port = port)
                .is_ok(),
            "LIVEBRIDGE_RECEIVE_PORT" => value
                .parse()
                .map(|port| config.peer.receive_port = port)
                .is_ok(),
            "LIVEBRIDGE_TIMEOUT_MS" => value
                .parse()
                .map(|ms| config.requests.timeout_ms = ms)
                .is_ok(),
            "LIVEBRIDGE_MAX_RETRIES" => value
                .parse()
                .map(|n| config.requests.max_retries = n)
                .is_ok(),
            "LIVEBRIDGE_PEER_ERRORS" => value
                .parse()
                .map(|mode| config.peer_errors = mode)
                .is_ok(),
            "LIVEBRIDGE_LOG_LEVEL" => {
                config.telemetry.log_level = value;
                true
            }
            "RUST_LOG" => {
                // Applied last so it beats LIVEBRIDGE_LOG_LEVEL regardless of env order
                rust_log = Some(value);
                false
            }
            _ => false,
        };

        if applied {
            sources.env_overrides.push(key);
        }
    }

    if let Some(v) = rust_log {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}
