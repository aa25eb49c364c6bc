//! Diatonic chord progressions from scale-degree sequences.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::chord::{Chord, ChordQuality};
use crate::key::{Key, KeyMode};
use crate::{Note, TheoryError};

const MAJOR_TRIADS: [ChordQuality; 7] = [
    ChordQuality::Major,
    ChordQuality::Minor,
    ChordQuality::Minor,
    ChordQuality::Major,
    ChordQuality::Major,
    ChordQuality::Minor,
    ChordQuality::Diminished,
];

const MAJOR_SEVENTHS: [ChordQuality; 7] = [
    ChordQuality::Major7,
    ChordQuality::Minor7,
    ChordQuality::Minor7,
    ChordQuality::Major7,
    ChordQuality::Dominant7,
    ChordQuality::Minor7,
    ChordQuality::HalfDiminished7,
];

const MINOR_TRIADS: [ChordQuality; 7] = [
    ChordQuality::Minor,
    ChordQuality::Diminished,
    ChordQuality::Major,
    ChordQuality::Minor,
    ChordQuality::Minor,
    ChordQuality::Major,
    ChordQuality::Major,
];

const MINOR_SEVENTHS: [ChordQuality; 7] = [
    ChordQuality::Minor7,
    ChordQuality::HalfDiminished7,
    ChordQuality::Major7,
    ChordQuality::Minor7,
    ChordQuality::Minor7,
    ChordQuality::Major7,
    ChordQuality::Dominant7,
];

const NUMERALS: [&str; 7] = ["I", "II", "III", "IV", "V", "VI", "VII"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChordSize {
    #[default]
    Triad,
    Seventh,
}

/// One slot of a progression: a scale degree 1-7, optionally forced to a
/// seventh chord ("V7").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "RawDegree")]
pub struct Degree {
    #[schemars(range(min = 1, max = 7))]
    pub value: u8,
    #[serde(default)]
    pub seventh: bool,
}

/// Wire shape of [`Degree`] before range checking.
#[derive(Deserialize, JsonSchema)]
struct RawDegree {
    value: u8,
    #[serde(default)]
    seventh: bool,
}

impl TryFrom<RawDegree> for Degree {
    type Error = TheoryError;

    fn try_from(raw: RawDegree) -> Result<Self, Self::Error> {
        Ok(Self {
            seventh: raw.seventh,
            ..Degree::new(raw.value)?
        })
    }
}

impl Degree {
    pub fn new(value: u8) -> Result<Self, TheoryError> {
        if !(1..=7).contains(&value) {
            return Err(TheoryError::InvalidDegree(value as i32));
        }
        Ok(Self { value, seventh: false })
    }
}

impl FromStr for Degree {
    type Err = TheoryError;

    /// Accepts "1".."7" or roman numerals in either case, with an optional
    /// trailing "7". Numeral case is not significant; quality comes from the key.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || TheoryError::Unknown {
            kind: "scale degree",
            value: s.to_string(),
        };

        let trimmed = s.trim();
        if let Ok(n) = trimmed.parse::<u8>() {
            return Degree::new(n);
        }

        let (body, seventh) = match trimmed.strip_suffix('7') {
            Some(body) => (body, true),
            None => (trimmed, false),
        };
        let upper = body.to_ascii_uppercase();
        let index = NUMERALS.iter().position(|n| *n == upper).ok_or_else(unknown)?;
        Ok(Self {
            value: index as u8 + 1,
            seventh,
        })
    }
}

/// Parse "I-vi-IV-V", "1 5 6 4" or "ii7,V7,I" into degrees.
pub fn parse_progression(text: &str) -> Result<Vec<Degree>, TheoryError> {
    text.split(['-', ' ', ','])
        .filter(|part| !part.is_empty())
        .map(str::parse)
        .collect()
}

/// The diatonic chord quality for a degree of a key.
pub fn diatonic_quality(mode: KeyMode, degree: u8, size: ChordSize) -> Result<ChordQuality, TheoryError> {
    if !(1..=7).contains(&degree) {
        return Err(TheoryError::InvalidDegree(degree as i32));
    }
    let table = match (mode, size) {
        (KeyMode::Major, ChordSize::Triad) => &MAJOR_TRIADS,
        (KeyMode::Major, ChordSize::Seventh) => &MAJOR_SEVENTHS,
        (KeyMode::Minor, ChordSize::Triad) => &MINOR_TRIADS,
        (KeyMode::Minor, ChordSize::Seventh) => &MINOR_SEVENTHS,
    };
    Ok(table[degree as usize - 1])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressionOptions {
    #[serde(default)]
    pub size: ChordSize,
    /// Length of each slot when `durations` is not given
    #[serde(default = "default_slot_beats")]
    pub slot_beats: f64,
    /// Per-slot lengths in beats; must have one entry per degree
    #[serde(default)]
    pub durations: Option<Vec<f64>>,
    /// Octave of the key root; the root sits at `root + octave * 12`, so the
    /// default 4 puts C at MIDI 48
    #[serde(default = "default_octave")]
    pub octave: u8,
}

fn default_slot_beats() -> f64 {
    4.0
}

fn default_octave() -> u8 {
    4
}

impl Default for ProgressionOptions {
    fn default() -> Self {
        Self {
            size: ChordSize::default(),
            slot_beats: default_slot_beats(),
            durations: None,
            octave: default_octave(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressionChord {
    pub degree: Degree,
    /// Roman numeral, lower-case for minor-third chords ("vi", "V7", "vii")
    pub numeral: String,
    pub chord: Chord,
    pub pitches: Vec<u8>,
    pub start: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Progression {
    pub key: Key,
    pub chords: Vec<ProgressionChord>,
}

impl Progression {
    /// Build a progression in `key`, one chord per degree, laid end to end.
    pub fn generate(key: Key, degrees: &[Degree], options: &ProgressionOptions) -> Result<Self, TheoryError> {
        let durations = match &options.durations {
            Some(d) if d.len() != degrees.len() => {
                return Err(TheoryError::DurationCountMismatch {
                    slots: degrees.len(),
                    durations: d.len(),
                })
            }
            Some(d) => d.clone(),
            None => vec![options.slot_beats; degrees.len()],
        };
        if let Some(bad) = durations.iter().find(|d| !d.is_finite() || **d <= 0.0) {
            return Err(TheoryError::InvalidTiming(format!(
                "progression slot length must be positive, got {}",
                bad
            )));
        }

        let scale = key.scale();
        let mut start = 0.0;
        let mut chords = Vec::with_capacity(degrees.len());
        for (degree, duration) in degrees.iter().zip(durations) {
            let size = if degree.seventh { ChordSize::Seventh } else { options.size };
            let quality = diatonic_quality(key.mode, degree.value, size)?;
            let chord = Chord::on_degree(&scale, degree.value as usize, quality)?;

            // Keep chord roots above the key root
            let offset = scale.degree(degree.value as usize)?;
            let base = key.root as i32 + options.octave as i32 * 12 + offset;
            let pitches = chord
                .offsets()
                .into_iter()
                .map(|o| crate::pitch::checked_pitch(base + o))
                .collect::<Result<Vec<u8>, _>>()?;

            chords.push(ProgressionChord {
                degree: *degree,
                numeral: numeral(degree.value, quality, size),
                chord,
                pitches,
                start,
                duration,
            });
            start += duration;
        }

        Ok(Self { key, chords })
    }

    pub fn total_beats(&self) -> f64 {
        self.chords.iter().map(|c| c.duration).sum()
    }

    /// Flatten into block-chord notes, each lasting its slot.
    pub fn to_notes(&self, velocity: u8) -> Vec<Note> {
        self.chords
            .iter()
            .flat_map(|c| {
                c.pitches.iter().map(move |&pitch| Note {
                    pitch,
                    start: c.start,
                    duration: c.duration,
                    velocity: velocity.min(127),
                    mute: false,
                })
            })
            .collect()
    }
}

fn numeral(degree: u8, quality: ChordQuality, size: ChordSize) -> String {
    let base = NUMERALS[degree as usize - 1];
    let mut text = if quality.is_minor_like() {
        base.to_lowercase()
    } else {
        base.to_string()
    };
    if size == ChordSize::Seventh {
        text.push('7');
    }
    text
}
