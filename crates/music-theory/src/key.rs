use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::pitch::root_name;
use crate::scale::{Scale, ScaleKind};
use crate::{Note, TheoryError};

/// Krumhansl-Kessler major key profile (duration-weighted perception studies).
const MAJOR_PROFILE: [f64; 12] = [6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88];

/// Krumhansl-Kessler minor key profile.
const MINOR_PROFILE: [f64; 12] = [6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17];

/// Scores closer than this are treated as equal for ranking.
const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    Major,
    Minor,
}

impl KeyMode {
    /// The scale a key in this mode is built on.
    pub fn scale_kind(&self) -> ScaleKind {
        match self {
            KeyMode::Major => ScaleKind::Major,
            KeyMode::Minor => ScaleKind::NaturalMinor,
        }
    }
}

impl fmt::Display for KeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMode::Major => write!(f, "major"),
            KeyMode::Minor => write!(f, "minor"),
        }
    }
}

impl std::str::FromStr for KeyMode {
    type Err = TheoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "major" | "maj" | "ionian" => Ok(KeyMode::Major),
            "minor" | "min" | "aeolian" => Ok(KeyMode::Minor),
            _ => Err(TheoryError::Unknown {
                kind: "key mode",
                value: s.to_string(),
            }),
        }
    }
}

/// A tonal center: root pitch class plus major/minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Key {
    pub root: u8,
    pub mode: KeyMode,
}

impl Key {
    pub fn new(root: u8, mode: KeyMode) -> Result<Self, TheoryError> {
        if root > 11 {
            return Err(TheoryError::InvalidRoot(root as i32));
        }
        Ok(Self { root, mode })
    }

    pub fn scale(&self) -> Scale {
        Scale {
            root: self.root,
            kind: self.mode.scale_kind(),
        }
    }

    /// "Eb major", "F# minor"
    pub fn name(&self) -> String {
        format!("{} {}", root_name(self.root), self.mode)
    }
}

/// One of the 24 keys with its correlation score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct KeyCandidate {
    pub key: Key,
    /// Display name: "C major", "Bb minor"
    pub name: String,
    /// Correlation with the rotated key profile, -1.0 to 1.0
    pub score: f64,
}

/// Rank all 24 major/minor keys against weighted pitch observations.
///
/// Uses the Krumhansl-Schmuckler algorithm: builds a weighted pitch-class
/// histogram and correlates it against both key profiles at every rotation.
/// The returned list is sorted best first; equal scores prefer the lower
/// root, then major. Negative or non-finite weights count as zero.
pub fn detect_key(observations: &[(u8, f64)]) -> Vec<KeyCandidate> {
    let mut histogram = [0.0_f64; 12];
    for &(pitch, weight) in observations {
        if weight.is_finite() && weight > 0.0 {
            histogram[(pitch % 12) as usize] += weight;
        }
    }

    let total: f64 = histogram.iter().sum();
    if total > 0.0 {
        for h in &mut histogram {
            *h /= total;
        }
    }

    let mut candidates = Vec::with_capacity(24);
    for root in 0..12u8 {
        // Rotate histogram so root = index 0
        let mut rotated = [0.0; 12];
        for (i, slot) in rotated.iter_mut().enumerate() {
            *slot = histogram[(i + root as usize) % 12];
        }

        for (mode, profile) in [(KeyMode::Major, &MAJOR_PROFILE), (KeyMode::Minor, &MINOR_PROFILE)] {
            let key = Key { root, mode };
            candidates.push(KeyCandidate {
                name: key.name(),
                key,
                score: pearson(&rotated, profile),
            });
        }
    }

    candidates.sort_by(rank_order);
    candidates
}

/// Key detection over notes, weighting each pitch by its duration.
/// Muted notes are ignored.
pub fn detect_key_from_notes(notes: &[Note]) -> Vec<KeyCandidate> {
    let observations: Vec<(u8, f64)> = notes
        .iter()
        .filter(|n| !n.mute)
        .map(|n| (n.pitch, n.duration))
        .collect();
    detect_key(&observations)
}

fn rank_order(a: &KeyCandidate, b: &KeyCandidate) -> Ordering {
    if (a.score - b.score).abs() > SCORE_EPSILON {
        return b.score.total_cmp(&a.score);
    }
    a.key
        .root
        .cmp(&b.key.root)
        .then_with(|| mode_rank(a.key.mode).cmp(&mode_rank(b.key.mode)))
}

fn mode_rank(mode: KeyMode) -> u8 {
    match mode {
        KeyMode::Major => 0,
        KeyMode::Minor => 1,
    }
}

/// Pearson correlation coefficient between two 12-element arrays.
///
/// Equivalent to the dot product of the two vectors after centering each
/// on its mean and scaling to unit length.
fn pearson(x: &[f64; 12], y: &[f64; 12]) -> f64 {
    let x_mean: f64 = x.iter().sum::<f64>() / 12.0;
    let y_mean: f64 = y.iter().sum::<f64>() / 12.0;

    let mut num = 0.0;
    let mut x_sq = 0.0;
    let mut y_sq = 0.0;

    for i in 0..12 {
        let xd = x[i] - x_mean;
        let yd = y[i] - y_mean;
        num += xd * yd;
        x_sq += xd * xd;
        y_sq += yd * yd;
    }

    let denom = (x_sq * y_sq).sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    num / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale_observations(root: u8, kind: ScaleKind, weight: impl Fn(usize) -> f64) -> Vec<(u8, f64)> {
        kind.formula()
            .iter()
            .enumerate()
            .map(|(i, &offset)| (60 + root + offset, weight(i)))
            .collect()
    }

    #[test]
    fn every_major_scale_detected() {
        for root in 0..12u8 {
            let obs = scale_observations(root, ScaleKind::Major, |_| 1.0);
            let ranked = detect_key(&obs);
            assert_eq!(ranked.len(), 24);
            assert_eq!(ranked[0].key, Key { root, mode: KeyMode::Major }, "root {}", root);
        }
    }

    #[test]
    fn tonic_weighted_major_scale_detected() {
        // Tonic and dominant count double
        for root in 0..12u8 {
            let obs = scale_observations(root, ScaleKind::Major, |i| if i == 0 || i == 4 { 2.0 } else { 1.0 });
            let best = &detect_key(&obs)[0];
            assert_eq!(best.key.root, root);
            assert_eq!(best.key.mode, KeyMode::Major);
            assert!(best.score > 0.7, "score {} should be > 0.7", best.score);
        }
    }

    #[test]
    fn harmonic_minor_detected_as_minor() {
        // A harmonic minor: the raised seventh separates it from C major
        let obs = scale_observations(9, ScaleKind::HarmonicMinor, |i| if i == 0 { 3.0 } else { 1.0 });
        let best = &detect_key(&obs)[0];
        assert_eq!(best.key, Key { root: 9, mode: KeyMode::Minor });
        assert_eq!(best.name, "A minor");
    }

    #[test]
    fn ranking_is_sorted() {
        let obs = scale_observations(7, ScaleKind::Major, |_| 1.0);
        let ranked = detect_key(&obs);
        assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score - SCORE_EPSILON));
    }

    #[test]
    fn empty_input_ties_resolve_to_c_major() {
        let ranked = detect_key(&[]);
        assert_eq!(ranked.len(), 24);
        assert_eq!(ranked[0].key, Key { root: 0, mode: KeyMode::Major });
        assert_eq!(ranked[1].key, Key { root: 0, mode: KeyMode::Minor });
        assert_eq!(ranked[2].key, Key { root: 1, mode: KeyMode::Major });
        assert!(ranked.iter().all(|c| c.score == 0.0));
    }

    #[test]
    fn bad_weights_are_ignored() {
        let mut obs = scale_observations(2, ScaleKind::Major, |_| 1.0);
        obs.push((61, f64::NAN));
        obs.push((63, -5.0));
        assert_eq!(detect_key(&obs)[0].key, Key { root: 2, mode: KeyMode::Major });
    }

    #[test]
    fn notes_weighted_by_duration_and_mute_skipped() {
        let mut notes: Vec<Note> = ScaleKind::Major
            .formula()
            .iter()
            .enumerate()
            .map(|(i, &o)| Note::new(65 + o as i32, i as f64, 1.0, 100).unwrap())
            .collect();
        notes.push(Note::new(66, 0.0, 50.0, 100).unwrap().muted(true));

        let best = &detect_key_from_notes(&notes)[0];
        assert_eq!(best.key, Key { root: 5, mode: KeyMode::Major });
    }

    #[test]
    fn pearson_identical_arrays() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let r = pearson(&a, &a);
        assert!((r - 1.0).abs() < 1e-10, "self-correlation should be 1.0, got {}", r);
    }

    #[test]
    fn key_names_and_scales() {
        let key = Key::new(3, KeyMode::Major).unwrap();
        assert_eq!(key.name(), "Eb major");
        assert_eq!(key.scale().kind, ScaleKind::Major);
        assert_eq!(Key::new(6, KeyMode::Minor).unwrap().name(), "Gb minor");
        assert!(Key::new(12, KeyMode::Minor).is_err());
        assert_eq!("Minor".parse::<KeyMode>(), Ok(KeyMode::Minor));
    }
}
