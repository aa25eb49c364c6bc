//! Pitch classes and note names.

use crate::TheoryError;

const NOTE_NAMES_SHARP: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];
const NOTE_NAMES_FLAT: [&str; 12] = [
    "C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B",
];

/// Pitch classes conventionally spelled with flats.
pub static FLAT_KEY_ROOTS: [u8; 6] = [1, 3, 5, 6, 8, 10]; // Db, Eb, F, Gb, Ab, Bb

/// Highest MIDI pitch.
pub const MAX_PITCH: u8 = 127;

/// Pitch class (0-11) of a MIDI pitch.
pub fn pitch_class(pitch: u8) -> u8 {
    pitch % 12
}

pub fn note_name(pitch_class: u8, use_flats: bool) -> &'static str {
    let idx = (pitch_class % 12) as usize;
    if use_flats {
        NOTE_NAMES_FLAT[idx]
    } else {
        NOTE_NAMES_SHARP[idx]
    }
}

/// Name a root using the spelling a key signature on that root would use.
pub fn root_name(pitch_class: u8) -> &'static str {
    note_name(pitch_class, FLAT_KEY_ROOTS.contains(&(pitch_class % 12)))
}

/// Parse a note name ("C", "f#", "Bb", "E♭") into a pitch class.
pub fn parse_pitch_class(name: &str) -> Result<u8, TheoryError> {
    let unknown = || TheoryError::Unknown {
        kind: "note name",
        value: name.to_string(),
    };

    let mut chars = name.trim().chars();
    let letter = chars.next().ok_or_else(unknown)?;
    let base: i32 = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return Err(unknown()),
    };

    let mut shift = 0i32;
    for accidental in chars {
        match accidental {
            '#' | '♯' => shift += 1,
            'b' | '♭' => shift -= 1,
            _ => return Err(unknown()),
        }
    }

    Ok((base + shift).rem_euclid(12) as u8)
}

/// Check that an absolute pitch fits the MIDI range.
pub fn checked_pitch(pitch: i32) -> Result<u8, TheoryError> {
    u8::try_from(pitch)
        .ok()
        .filter(|p| *p <= MAX_PITCH)
        .ok_or(TheoryError::PitchOutOfRange(pitch))
}
