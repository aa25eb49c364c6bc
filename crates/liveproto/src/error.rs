use std::io;

use thiserror::Error;

/// Frame-level failures from the OSC codec.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("malformed OSC packet: {0}")]
    Malformed(String),

    #[error("failed to encode {address}: {reason}")]
    Encode { address: String, reason: String },
}

/// Socket-level failures from the UDP transport.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to resolve peer {addr}: {reason}")]
    Resolve { addr: String, reason: String },

    #[error("send to {addr} failed: {source}")]
    Send {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("channel is closed")]
    Closed,
}

/// Outcome of a correlated request that produced no response message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    #[error("no response on {address} within {timeout_ms}ms")]
    Timeout { address: String, timeout_ms: u64 },

    #[error("request on {address} was cancelled")]
    Cancelled { address: String },

    #[error("correlator is disconnected")]
    Disconnected,

    #[error("peer reported an error: {0}")]
    Peer(String),

    #[error("send failed: {0}")]
    Send(String),
}

impl CorrelationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CorrelationError::Timeout { .. })
    }
}
