use liveconf::PeerErrorMode;
use liveproto::{ChannelError, CorrelationError};
use music_theory::TheoryError;
use thiserror::Error;

/// Every way a bridge operation can fail.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    /// Socket bind/resolve/send failure; reconnecting may help
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("no reply on {address} within {timeout_ms}ms")]
    Timeout { address: String, timeout_ms: u64 },

    #[error("unexpected reply on {address}: expected {expected}, got {actual}")]
    ShapeMismatch {
        address: String,
        expected: String,
        actual: String,
    },

    #[error("{entity} not found: {detail}")]
    EntityNotFound { entity: String, detail: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("bridge is disconnected")]
    Disconnected,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("peer error: {0}")]
    Peer(String),

    #[error(transparent)]
    Theory(#[from] TheoryError),
}

impl BridgeError {
    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::ConnectionFailed(_) | BridgeError::Timeout { .. } | BridgeError::Cancelled
        )
    }

    /// Map a correlation failure, attributing it to `entity` where the query
    /// was about one specific track or clip.
    pub(crate) fn from_correlation(err: CorrelationError, entity: Option<&str>, mode: PeerErrorMode) -> Self {
        match (err, entity) {
            (CorrelationError::Timeout { address, timeout_ms }, Some(entity))
                if mode == PeerErrorMode::TimeoutOnly =>
            {
                BridgeError::EntityNotFound {
                    entity: entity.to_string(),
                    detail: format!("no reply on {} within {}ms", address, timeout_ms),
                }
            }
            (CorrelationError::Timeout { address, timeout_ms }, _) => BridgeError::Timeout { address, timeout_ms },
            (CorrelationError::Peer(detail), Some(entity)) => BridgeError::EntityNotFound {
                entity: entity.to_string(),
                detail,
            },
            (CorrelationError::Peer(detail), None) => BridgeError::Peer(detail),
            (CorrelationError::Cancelled { .. }, _) => BridgeError::Cancelled,
            (CorrelationError::Disconnected, _) => BridgeError::Disconnected,
            (CorrelationError::Send(reason), _) => BridgeError::ConnectionFailed(reason),
        }
    }
}

impl From<ChannelError> for BridgeError {
    fn from(err: ChannelError) -> Self {
        BridgeError::ConnectionFailed(err.to_string())
    }
}
