use thiserror::Error;

/// Errors from note validation and theory generators.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TheoryError {
    #[error("pitch {0} is outside the MIDI range 0-127")]
    PitchOutOfRange(i32),

    #[error("velocity {0} is outside the MIDI range 0-127")]
    VelocityOutOfRange(i32),

    #[error("root pitch class {0} is outside 0-11")]
    InvalidRoot(i32),

    #[error("scale degree must be 1 or greater, got {0}")]
    InvalidDegree(i32),

    #[error("invalid timing: {0}")]
    InvalidTiming(String),

    #[error("grid resolution must be positive and finite, got {0}")]
    InvalidGrid(f64),

    #[error("unknown {kind}: {value:?}")]
    Unknown { kind: &'static str, value: String },

    #[error("{slots} progression slots but {durations} durations")]
    DurationCountMismatch { slots: usize, durations: usize },
}
