//! Pure music theory: key detection, scales, chords, progressions and
//! quantization over [`Note`]s timed in beats.
//!
//! Everything here is deterministic and free of I/O, so the bridge can run
//! it on notes read from the DAW or on notes it is about to write.

pub mod chord;
pub mod error;
pub mod key;
pub mod note;
pub mod pitch;
pub mod progression;
pub mod quantize;
pub mod scale;

pub use chord::{Chord, ChordQuality};
pub use error::TheoryError;
pub use key::{detect_key, detect_key_from_notes, Key, KeyCandidate, KeyMode};
pub use note::Note;
pub use pitch::{note_name, parse_pitch_class, pitch_class, root_name};
pub use progression::{parse_progression, ChordSize, Degree, Progression, ProgressionChord, ProgressionOptions};
pub use quantize::{quantize_note, quantize_notes, quantize_time};
pub use scale::{Scale, ScaleKind};
