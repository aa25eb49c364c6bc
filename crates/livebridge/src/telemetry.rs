//! Logging setup for the livebridge binary.
//!
//! Log lines go to stderr so command output on stdout stays valid JSON.

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter from a configured directive string (`info`,
/// `livebridge=debug,liveproto=trace`, ...). An unparsable directive falls
/// back to `info` rather than silencing everything.
pub fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// `RUST_LOG` is already folded into `log_level` by config loading, so the
/// configured value is authoritative here.
pub fn init(log_level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .try_init()?;
    Ok(())
}
