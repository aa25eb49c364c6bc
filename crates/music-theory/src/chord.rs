//! Chord qualities built from scale degrees, plus pitch-set identification.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::pitch::{checked_pitch, root_name};
use crate::scale::{wrap_degree, Scale, ScaleKind};
use crate::TheoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChordQuality {
    Major,
    Minor,
    Diminished,
    Augmented,
    Suspended2,
    Suspended4,
    Power,
    Major6,
    Minor6,
    Dominant7,
    Major7,
    Minor7,
    MinorMajor7,
    Diminished7,
    HalfDiminished7,
    Add9,
    Dominant9,
    Major9,
    Minor9,
    Dominant11,
    Minor11,
    Dominant13,
    Major13,
}

impl ChordQuality {
    pub const ALL: [ChordQuality; 23] = [
        ChordQuality::Major,
        ChordQuality::Minor,
        ChordQuality::Diminished,
        ChordQuality::Augmented,
        ChordQuality::Suspended2,
        ChordQuality::Suspended4,
        ChordQuality::Power,
        ChordQuality::Major6,
        ChordQuality::Minor6,
        ChordQuality::Dominant7,
        ChordQuality::Major7,
        ChordQuality::Minor7,
        ChordQuality::MinorMajor7,
        ChordQuality::Diminished7,
        ChordQuality::HalfDiminished7,
        ChordQuality::Add9,
        ChordQuality::Dominant9,
        ChordQuality::Major9,
        ChordQuality::Minor9,
        ChordQuality::Dominant11,
        ChordQuality::Minor11,
        ChordQuality::Dominant13,
        ChordQuality::Major13,
    ];

    /// The reference scale and the 1-based degrees of it that make up the
    /// chord. Degrees past the scale length land in the next octave.
    pub fn formula(&self) -> (ScaleKind, &'static [u8]) {
        match self {
            ChordQuality::Major => (ScaleKind::Major, &[1, 3, 5]),
            ChordQuality::Minor => (ScaleKind::NaturalMinor, &[1, 3, 5]),
            ChordQuality::Diminished => (ScaleKind::Locrian, &[1, 3, 5]),
            ChordQuality::Augmented => (ScaleKind::WholeTone, &[1, 3, 5]),
            ChordQuality::Suspended2 => (ScaleKind::Major, &[1, 2, 5]),
            ChordQuality::Suspended4 => (ScaleKind::Major, &[1, 4, 5]),
            ChordQuality::Power => (ScaleKind::Major, &[1, 5]),
            ChordQuality::Major6 => (ScaleKind::Major, &[1, 3, 5, 6]),
            ChordQuality::Minor6 => (ScaleKind::Dorian, &[1, 3, 5, 6]),
            ChordQuality::Dominant7 => (ScaleKind::Mixolydian, &[1, 3, 5, 7]),
            ChordQuality::Major7 => (ScaleKind::Major, &[1, 3, 5, 7]),
            ChordQuality::Minor7 => (ScaleKind::Dorian, &[1, 3, 5, 7]),
            ChordQuality::MinorMajor7 => (ScaleKind::MelodicMinor, &[1, 3, 5, 7]),
            ChordQuality::Diminished7 => (ScaleKind::Diminished, &[1, 3, 5, 7]),
            ChordQuality::HalfDiminished7 => (ScaleKind::Locrian, &[1, 3, 5, 7]),
            ChordQuality::Add9 => (ScaleKind::Major, &[1, 3, 5, 9]),
            ChordQuality::Dominant9 => (ScaleKind::Mixolydian, &[1, 3, 5, 7, 9]),
            ChordQuality::Major9 => (ScaleKind::Major, &[1, 3, 5, 7, 9]),
            ChordQuality::Minor9 => (ScaleKind::Dorian, &[1, 3, 5, 7, 9]),
            ChordQuality::Dominant11 => (ScaleKind::Mixolydian, &[1, 3, 5, 7, 9, 11]),
            ChordQuality::Minor11 => (ScaleKind::Dorian, &[1, 3, 5, 7, 9, 11]),
            ChordQuality::Dominant13 => (ScaleKind::Mixolydian, &[1, 3, 5, 7, 9, 11, 13]),
            ChordQuality::Major13 => (ScaleKind::Major, &[1, 3, 5, 7, 9, 13]),
        }
    }

    /// Semitone offsets above the chord root.
    pub fn offsets(&self) -> Vec<i32> {
        let (kind, degrees) = self.formula();
        degrees
            .iter()
            .map(|&d| wrap_degree(kind.formula(), d as usize))
            .collect()
    }

    /// Suffix for chord symbol display
    pub fn suffix(&self) -> &'static str {
        match self {
            ChordQuality::Major => "",
            ChordQuality::Minor => "m",
            ChordQuality::Diminished => "dim",
            ChordQuality::Augmented => "aug",
            ChordQuality::Suspended2 => "sus2",
            ChordQuality::Suspended4 => "sus4",
            ChordQuality::Power => "5",
            ChordQuality::Major6 => "6",
            ChordQuality::Minor6 => "m6",
            ChordQuality::Dominant7 => "7",
            ChordQuality::Major7 => "maj7",
            ChordQuality::Minor7 => "m7",
            ChordQuality::MinorMajor7 => "m(maj7)",
            ChordQuality::Diminished7 => "dim7",
            ChordQuality::HalfDiminished7 => "m7b5",
            ChordQuality::Add9 => "add9",
            ChordQuality::Dominant9 => "9",
            ChordQuality::Major9 => "maj9",
            ChordQuality::Minor9 => "m9",
            ChordQuality::Dominant11 => "11",
            ChordQuality::Minor11 => "m11",
            ChordQuality::Dominant13 => "13",
            ChordQuality::Major13 => "maj13",
        }
    }

    /// Minor-third qualities get lower-case roman numerals.
    pub fn is_minor_like(&self) -> bool {
        self.offsets().get(1) == Some(&3)
    }
}

impl FromStr for ChordQuality {
    type Err = TheoryError;

    /// Accepts symbol suffixes ("m7", "maj7", "") and snake_case names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(q) = ChordQuality::ALL.iter().find(|q| q.suffix() == trimmed) {
            return Ok(*q);
        }
        let normalized = trimmed.to_lowercase().replace([' ', '-'], "_");
        let quality = match normalized.as_str() {
            "major" | "maj" => ChordQuality::Major,
            "minor" | "min" => ChordQuality::Minor,
            "diminished" => ChordQuality::Diminished,
            "augmented" => ChordQuality::Augmented,
            "suspended2" | "sus2" => ChordQuality::Suspended2,
            "suspended4" | "sus4" | "sus" => ChordQuality::Suspended4,
            "power" => ChordQuality::Power,
            "major6" => ChordQuality::Major6,
            "minor6" => ChordQuality::Minor6,
            "dominant7" | "dom7" => ChordQuality::Dominant7,
            "major7" => ChordQuality::Major7,
            "minor7" | "min7" => ChordQuality::Minor7,
            "minor_major7" | "minormajor7" => ChordQuality::MinorMajor7,
            "diminished7" => ChordQuality::Diminished7,
            "half_diminished7" | "halfdiminished7" | "m7b5" => ChordQuality::HalfDiminished7,
            "dominant9" => ChordQuality::Dominant9,
            "major9" => ChordQuality::Major9,
            "minor9" => ChordQuality::Minor9,
            "dominant11" => ChordQuality::Dominant11,
            "minor11" => ChordQuality::Minor11,
            "dominant13" => ChordQuality::Dominant13,
            "major13" => ChordQuality::Major13,
            _ => {
                return Err(TheoryError::Unknown {
                    kind: "chord quality",
                    value: s.to_string(),
                })
            }
        };
        Ok(quality)
    }
}

/// A chord: a root pitch class and a quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Chord {
    pub root: u8,
    pub quality: ChordQuality,
}

impl Chord {
    pub fn new(root: u8, quality: ChordQuality) -> Result<Self, TheoryError> {
        if root > 11 {
            return Err(TheoryError::InvalidRoot(root as i32));
        }
        Ok(Self { root, quality })
    }

    /// Build `quality` on a 1-based degree of `scale`.
    pub fn on_degree(scale: &Scale, degree: usize, quality: ChordQuality) -> Result<Self, TheoryError> {
        let offset = scale.degree(degree)?;
        Ok(Self {
            root: ((scale.root as i32 + offset) % 12) as u8,
            quality,
        })
    }

    pub fn offsets(&self) -> Vec<i32> {
        self.quality.offsets()
    }

    /// Absolute pitches with the root at `root + octave * 12`.
    pub fn pitches(&self, octave: u8) -> Result<Vec<u8>, TheoryError> {
        let base = self.root as i32 + octave as i32 * 12;
        self.offsets()
            .into_iter()
            .map(|offset| checked_pitch(base + offset))
            .collect()
    }

    /// "Cmaj7", "Bbm", "F#dim".
    pub fn symbol(&self) -> String {
        format!("{}{}", root_name(self.root), self.quality.suffix())
    }

    /// Identify a chord from sounding pitches.
    ///
    /// Tries every root and quality whose pitch-class set equals the input
    /// set exactly; the lowest sounding pitch is preferred as root, then
    /// smaller chords. Returns `None` for sets no template covers.
    pub fn identify(pitches: &[u8]) -> Option<Chord> {
        let mask = pitches.iter().fold(0u16, |m, p| m | 1u16 << (p % 12));
        if mask.count_ones() < 2 {
            return None;
        }
        let bass = pitches.iter().min().map(|p| p % 12);

        let mut best: Option<(bool, usize, Chord)> = None;
        for root in 0..12u8 {
            for quality in ChordQuality::ALL {
                let template = quality
                    .offsets()
                    .iter()
                    .fold(0u16, |m, o| m | 1u16 << ((root as i32 + o) % 12));
                if template != mask {
                    continue;
                }
                let candidate = (bass == Some(root), quality.offsets().len(), Chord { root, quality });
                let better = match &best {
                    None => true,
                    Some((best_bass, best_len, _)) => {
                        (candidate.0 && !best_bass) || (candidate.0 == *best_bass && candidate.1 < *best_len)
                    }
                };
                if better {
                    best = Some(candidate);
                }
            }
        }
        best.map(|(_, _, chord)| chord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn dominant_seventh_on_degree_one() {
        let scale = Scale::new(0, ScaleKind::Major).unwrap();
        let chord = Chord::on_degree(&scale, 1, ChordQuality::Dominant7).unwrap();
        assert_eq!(chord.offsets(), vec![0, 4, 7, 10]);
        assert_eq!(chord.symbol(), "C7");
        assert_eq!(chord.pitches(4).unwrap(), vec![48, 52, 55, 58]);
    }

    #[test]
    fn core_quality_offsets() {
        assert_eq!(ChordQuality::Major.offsets(), vec![0, 4, 7]);
        assert_eq!(ChordQuality::Minor.offsets(), vec![0, 3, 7]);
        assert_eq!(ChordQuality::Diminished.offsets(), vec![0, 3, 6]);
        assert_eq!(ChordQuality::Augmented.offsets(), vec![0, 4, 8]);
        assert_eq!(ChordQuality::Suspended4.offsets(), vec![0, 5, 7]);
        assert_eq!(ChordQuality::Major7.offsets(), vec![0, 4, 7, 11]);
        assert_eq!(ChordQuality::Minor7.offsets(), vec![0, 3, 7, 10]);
        assert_eq!(ChordQuality::Diminished7.offsets(), vec![0, 3, 6, 9]);
        assert_eq!(ChordQuality::HalfDiminished7.offsets(), vec![0, 3, 6, 10]);
        assert_eq!(ChordQuality::MinorMajor7.offsets(), vec![0, 3, 7, 11]);
    }

    #[test]
    fn extended_chords_wrap_past_the_octave() {
        assert_eq!(ChordQuality::Add9.offsets(), vec![0, 4, 7, 14]);
        assert_eq!(ChordQuality::Dominant11.offsets(), vec![0, 4, 7, 10, 14, 17]);
        assert_eq!(ChordQuality::Dominant13.offsets(), vec![0, 4, 7, 10, 14, 17, 21]);
    }

    #[test]
    fn chord_on_upper_degree() {
        // ii of D major is E minor
        let scale = Scale::new(2, ScaleKind::Major).unwrap();
        let chord = Chord::on_degree(&scale, 2, ChordQuality::Minor).unwrap();
        assert_eq!(chord.root, 4);
        assert_eq!(chord.symbol(), "Em");
        assert!(Chord::on_degree(&scale, 0, ChordQuality::Minor).is_err());
    }

    #[test]
    fn pitches_out_of_range() {
        let chord = Chord::new(11, ChordQuality::Dominant13).unwrap();
        assert!(chord.pitches(9).is_err());
        assert!(Chord::new(12, ChordQuality::Major).is_err());
    }

    #[test]
    fn identify_common_chords() {
        assert_eq!(
            Chord::identify(&[60, 64, 67]),
            Some(Chord { root: 0, quality: ChordQuality::Major })
        );
        assert_eq!(
            Chord::identify(&[62, 65, 69]),
            Some(Chord { root: 2, quality: ChordQuality::Minor })
        );
        assert_eq!(
            Chord::identify(&[55, 59, 62, 65]),
            Some(Chord { root: 7, quality: ChordQuality::Dominant7 })
        );
        // Am7 voiced with C in the bass reads as C6
        assert_eq!(
            Chord::identify(&[48, 57, 64, 67]),
            Some(Chord { root: 0, quality: ChordQuality::Major6 })
        );
        assert_eq!(Chord::identify(&[60]), None);
        assert_eq!(Chord::identify(&[60, 61, 62]), None);
    }

    #[test]
    fn parse_quality() {
        assert_eq!("m7".parse::<ChordQuality>(), Ok(ChordQuality::Minor7));
        assert_eq!("".parse::<ChordQuality>(), Ok(ChordQuality::Major));
        assert_eq!("dominant7".parse::<ChordQuality>(), Ok(ChordQuality::Dominant7));
        assert_eq!("Half-Diminished7".parse::<ChordQuality>(), Ok(ChordQuality::HalfDiminished7));
        assert!("mystery".parse::<ChordQuality>().is_err());
    }

    #[test]
    fn minor_like() {
        assert!(ChordQuality::Minor7.is_minor_like());
        assert!(ChordQuality::Diminished.is_minor_like());
        assert!(!ChordQuality::Dominant7.is_minor_like());
        assert!(!ChordQuality::Suspended2.is_minor_like());
    }
}
