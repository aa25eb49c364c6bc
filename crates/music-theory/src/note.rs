use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::pitch::checked_pitch;
use crate::TheoryError;

/// A note in a clip, timed in beats.
///
/// Fields are public so notes can be deserialized from tool arguments;
/// call [`Note::validate`] before trusting one that did not come from
/// [`Note::new`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Note {
    /// MIDI pitch 0-127
    pub pitch: u8,
    /// Start time in beats from the clip start (>= 0)
    pub start: f64,
    /// Length in beats (> 0)
    pub duration: f64,
    /// MIDI velocity 0-127
    #[serde(default = "default_velocity")]
    pub velocity: u8,
    #[serde(default)]
    pub mute: bool,
}

fn default_velocity() -> u8 {
    100
}

impl Note {
    pub fn new(pitch: i32, start: f64, duration: f64, velocity: i32) -> Result<Self, TheoryError> {
        let note = Self {
            pitch: checked_pitch(pitch)?,
            start,
            duration,
            velocity: u8::try_from(velocity)
                .ok()
                .filter(|v| *v <= 127)
                .ok_or(TheoryError::VelocityOutOfRange(velocity))?,
            mute: false,
        };
        note.validate()?;
        Ok(note)
    }

    pub fn muted(mut self, mute: bool) -> Self {
        self.mute = mute;
        self
    }

    /// End time in beats.
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    pub fn validate(&self) -> Result<(), TheoryError> {
        checked_pitch(self.pitch as i32)?;
        if self.velocity > 127 {
            return Err(TheoryError::VelocityOutOfRange(self.velocity as i32));
        }
        if !self.start.is_finite() || self.start < 0.0 {
            return Err(TheoryError::InvalidTiming(format!(
                "start must be a non-negative beat position, got {}",
                self.start
            )));
        }
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(TheoryError::InvalidTiming(format!(
                "duration must be positive, got {}",
                self.duration
            )));
        }
        Ok(())
    }

    /// Shift by `semitones`, failing if the result leaves the MIDI range.
    pub fn transposed(&self, semitones: i32) -> Result<Self, TheoryError> {
        Ok(Self {
            pitch: checked_pitch((self.pitch as i32).saturating_add(semitones))?,
            ..*self
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_validates_ranges() {
        assert!(Note::new(60, 0.0, 1.0, 100).is_ok());
        assert_eq!(Note::new(128, 0.0, 1.0, 100), Err(TheoryError::PitchOutOfRange(128)));
        assert_eq!(Note::new(60, 0.0, 1.0, 200), Err(TheoryError::VelocityOutOfRange(200)));
        assert!(matches!(Note::new(60, -0.5, 1.0, 100), Err(TheoryError::InvalidTiming(_))));
        assert!(matches!(Note::new(60, 0.0, 0.0, 100), Err(TheoryError::InvalidTiming(_))));
        assert!(matches!(Note::new(60, f64::NAN, 1.0, 100), Err(TheoryError::InvalidTiming(_))));
    }

    #[test]
    fn validate_catches_deserialized_garbage() {
        let note: Note = serde_json::from_str(r#"{"pitch": 200, "start": 0, "duration": 1}"#).unwrap();
        assert_eq!(note.velocity, 100);
        assert!(!note.mute);
        assert_eq!(note.validate(), Err(TheoryError::PitchOutOfRange(200)));
    }

    #[test]
    fn transpose_keeps_timing() {
        let note = Note::new(60, 1.5, 0.5, 90).unwrap().muted(true);
        let up = note.transposed(7).unwrap();
        assert_eq!(up.pitch, 67);
        assert_eq!(up.start, 1.5);
        assert!(up.mute);
        assert!(note.transposed(-61).is_err());
        assert_eq!(note.end(), 2.0);
    }

    #[test]
    fn transpose_extreme_offsets_fail_cleanly() {
        let note = Note::new(60, 0.0, 1.0, 100).unwrap();
        assert_eq!(note.transposed(i32::MAX), Err(TheoryError::PitchOutOfRange(i32::MAX)));
        assert!(note.transposed(i32::MIN).is_err());
    }
}
