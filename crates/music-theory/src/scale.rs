//! Scale formulas and scale-degree arithmetic.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::pitch::{checked_pitch, root_name};
use crate::TheoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScaleKind {
    Major,
    NaturalMinor,
    HarmonicMinor,
    MelodicMinor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
    MajorPentatonic,
    MinorPentatonic,
    Blues,
    WholeTone,
    /// Whole-half octatonic
    Diminished,
    Chromatic,
}

impl ScaleKind {
    pub const ALL: [ScaleKind; 15] = [
        ScaleKind::Major,
        ScaleKind::NaturalMinor,
        ScaleKind::HarmonicMinor,
        ScaleKind::MelodicMinor,
        ScaleKind::Dorian,
        ScaleKind::Phrygian,
        ScaleKind::Lydian,
        ScaleKind::Mixolydian,
        ScaleKind::Locrian,
        ScaleKind::MajorPentatonic,
        ScaleKind::MinorPentatonic,
        ScaleKind::Blues,
        ScaleKind::WholeTone,
        ScaleKind::Diminished,
        ScaleKind::Chromatic,
    ];

    /// Semitone offsets from the root, ascending, starting at 0.
    pub fn formula(&self) -> &'static [u8] {
        match self {
            ScaleKind::Major => &[0, 2, 4, 5, 7, 9, 11],
            ScaleKind::NaturalMinor => &[0, 2, 3, 5, 7, 8, 10],
            ScaleKind::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11],
            ScaleKind::MelodicMinor => &[0, 2, 3, 5, 7, 9, 11],
            ScaleKind::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            ScaleKind::Phrygian => &[0, 1, 3, 5, 7, 8, 10],
            ScaleKind::Lydian => &[0, 2, 4, 6, 7, 9, 11],
            ScaleKind::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
            ScaleKind::Locrian => &[0, 1, 3, 5, 6, 8, 10],
            ScaleKind::MajorPentatonic => &[0, 2, 4, 7, 9],
            ScaleKind::MinorPentatonic => &[0, 3, 5, 7, 10],
            ScaleKind::Blues => &[0, 3, 5, 6, 7, 10],
            ScaleKind::WholeTone => &[0, 2, 4, 6, 8, 10],
            ScaleKind::Diminished => &[0, 2, 3, 5, 6, 8, 9, 11],
            ScaleKind::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleKind::Major => "major",
            ScaleKind::NaturalMinor => "natural_minor",
            ScaleKind::HarmonicMinor => "harmonic_minor",
            ScaleKind::MelodicMinor => "melodic_minor",
            ScaleKind::Dorian => "dorian",
            ScaleKind::Phrygian => "phrygian",
            ScaleKind::Lydian => "lydian",
            ScaleKind::Mixolydian => "mixolydian",
            ScaleKind::Locrian => "locrian",
            ScaleKind::MajorPentatonic => "major_pentatonic",
            ScaleKind::MinorPentatonic => "minor_pentatonic",
            ScaleKind::Blues => "blues",
            ScaleKind::WholeTone => "whole_tone",
            ScaleKind::Diminished => "diminished",
            ScaleKind::Chromatic => "chromatic",
        }
    }
}

impl fmt::Display for ScaleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScaleKind {
    type Err = TheoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        let kind = match normalized.as_str() {
            "major" | "ionian" => ScaleKind::Major,
            "minor" | "natural_minor" | "aeolian" => ScaleKind::NaturalMinor,
            "harmonic_minor" => ScaleKind::HarmonicMinor,
            "melodic_minor" => ScaleKind::MelodicMinor,
            "dorian" => ScaleKind::Dorian,
            "phrygian" => ScaleKind::Phrygian,
            "lydian" => ScaleKind::Lydian,
            "mixolydian" => ScaleKind::Mixolydian,
            "locrian" => ScaleKind::Locrian,
            "major_pentatonic" | "pentatonic" => ScaleKind::MajorPentatonic,
            "minor_pentatonic" => ScaleKind::MinorPentatonic,
            "blues" => ScaleKind::Blues,
            "whole_tone" => ScaleKind::WholeTone,
            "diminished" | "octatonic" => ScaleKind::Diminished,
            "chromatic" => ScaleKind::Chromatic,
            _ => {
                return Err(TheoryError::Unknown {
                    kind: "scale",
                    value: s.to_string(),
                })
            }
        };
        Ok(kind)
    }
}

/// Offset of a 1-based degree within `formula`, adding 12 for every time
/// the degree runs past the end of the scale.
pub(crate) fn wrap_degree(formula: &[u8], degree: usize) -> i32 {
    let idx = degree.saturating_sub(1);
    let octave = (idx / formula.len()) as i32;
    formula[idx % formula.len()] as i32 + 12 * octave
}

/// A scale rooted on a pitch class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Scale {
    pub root: u8,
    pub kind: ScaleKind,
}

impl Scale {
    pub fn new(root: u8, kind: ScaleKind) -> Result<Self, TheoryError> {
        if root > 11 {
            return Err(TheoryError::InvalidRoot(root as i32));
        }
        Ok(Self { root, kind })
    }

    pub fn len(&self) -> usize {
        self.kind.formula().len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn offsets(&self) -> &'static [u8] {
        self.kind.formula()
    }

    /// Semitones above the root for a 1-based degree; degree 8 of a
    /// seven-note scale is the octave (12).
    pub fn degree(&self, degree: usize) -> Result<i32, TheoryError> {
        if degree == 0 {
            return Err(TheoryError::InvalidDegree(0));
        }
        Ok(wrap_degree(self.kind.formula(), degree))
    }

    /// Absolute pitch of a degree, with the root placed at `root + octave * 12`.
    pub fn degree_pitch(&self, degree: usize, octave: u8) -> Result<u8, TheoryError> {
        let base = self.root as i32 + octave as i32 * 12;
        checked_pitch(base + self.degree(degree)?)
    }

    /// One octave of absolute pitches: `root + octave * 12 + offset` for
    /// every offset in the formula.
    pub fn pitches(&self, octave: u8) -> Result<Vec<u8>, TheoryError> {
        let base = self.root as i32 + octave as i32 * 12;
        self.offsets()
            .iter()
            .map(|&offset| checked_pitch(base + offset as i32))
            .collect()
    }

    pub fn contains(&self, pitch: u8) -> bool {
        let interval = (pitch as i32 - self.root as i32).rem_euclid(12) as u8;
        self.offsets().contains(&interval)
    }

    /// Nearest in-scale pitch; equidistant candidates resolve downward.
    pub fn snap(&self, pitch: u8) -> u8 {
        if self.contains(pitch) {
            return pitch;
        }
        for distance in 1..=6i32 {
            for candidate in [pitch as i32 - distance, pitch as i32 + distance] {
                if let Ok(p) = checked_pitch(candidate) {
                    if self.contains(p) {
                        return p;
                    }
                }
            }
        }
        pitch
    }

    /// "D dorian", "Bb major".
    pub fn name(&self) -> String {
        format!("{} {}", root_name(self.root), self.kind)
    }
}
