//! Grid quantization for note timing.

use crate::{Note, TheoryError};

/// Common grid resolutions in beats.
pub mod grid {
    pub const WHOLE: f64 = 4.0;
    pub const HALF: f64 = 2.0;
    pub const QUARTER: f64 = 1.0;
    pub const EIGHTH: f64 = 0.5;
    pub const SIXTEENTH: f64 = 0.25;
    pub const THIRTY_SECOND: f64 = 0.125;
    pub const EIGHTH_TRIPLET: f64 = 1.0 / 3.0;
    pub const SIXTEENTH_TRIPLET: f64 = 1.0 / 6.0;
}

/// Index of the grid line nearest `t`; halfway points go to the later line.
fn grid_index(t: f64, resolution: f64) -> i64 {
    ((t / resolution + 0.5).floor() as i64).max(0)
}

fn check_grid(resolution: f64) -> Result<(), TheoryError> {
    if !resolution.is_finite() || resolution <= 0.0 {
        return Err(TheoryError::InvalidGrid(resolution));
    }
    Ok(())
}

/// Snap a single beat position to the grid.
pub fn quantize_time(t: f64, resolution: f64) -> Result<f64, TheoryError> {
    check_grid(resolution)?;
    Ok(grid_index(t, resolution) as f64 * resolution)
}

/// Snap a note's start to the grid.
///
/// Duration is kept unless `snap_duration` is set, in which case the end is
/// snapped on its own and the note spans at least one grid step.
pub fn quantize_note(note: &Note, resolution: f64, snap_duration: bool) -> Result<Note, TheoryError> {
    check_grid(resolution)?;
    let start_idx = grid_index(note.start, resolution);
    let start = start_idx as f64 * resolution;

    let duration = if snap_duration {
        let end_idx = grid_index(note.end(), resolution);
        (end_idx - start_idx).max(1) as f64 * resolution
    } else {
        note.duration
    };

    Ok(Note {
        start,
        duration,
        ..*note
    })
}

pub fn quantize_notes(notes: &[Note], resolution: f64, snap_duration: bool) -> Result<Vec<Note>, TheoryError> {
    notes
        .iter()
        .map(|n| quantize_note(n, resolution, snap_duration))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn note(start: f64, duration: f64) -> Note {
        Note::new(60, start, duration, 100).unwrap()
    }

    #[test]
    fn snaps_to_nearest_sixteenth() {
        let q = quantize_note(&note(0.26, 0.5), grid::SIXTEENTH, false).unwrap();
        assert_eq!(q.start, 0.25);
        assert_eq!(q.duration, 0.5);
        assert_eq!(quantize_time(0.37, grid::SIXTEENTH).unwrap(), 0.25);
        assert_eq!(quantize_time(0.38, grid::SIXTEENTH).unwrap(), 0.5);
    }

    #[test]
    fn halfway_goes_later() {
        assert_eq!(quantize_time(0.125, grid::SIXTEENTH).unwrap(), 0.25);
        assert_eq!(quantize_time(0.5, grid::QUARTER).unwrap(), 1.0);
    }

    #[test]
    fn idempotent() {
        let grids = [grid::SIXTEENTH, grid::EIGHTH_TRIPLET, 0.1, grid::QUARTER];
        let starts = [0.0, 0.07, 0.33, 1.49, 3.999, 17.3];
        for &g in &grids {
            for &s in &starts {
                for snap in [false, true] {
                    let once = quantize_note(&note(s, 0.3), g, snap).unwrap();
                    let twice = quantize_note(&once, g, snap).unwrap();
                    assert_eq!(once, twice, "grid {g} start {s} snap {snap}");
                }
            }
        }
    }

    #[test]
    fn snapped_duration_is_at_least_one_step() {
        // 0.3..0.35 collapses onto one line; keep a single step
        let q = quantize_note(&note(0.3, 0.05), grid::SIXTEENTH, true).unwrap();
        assert_eq!(q.start, 0.25);
        assert_eq!(q.duration, 0.25);

        // End 1.1 snaps to 1.0 independently of the start
        let q = quantize_note(&note(0.26, 0.84), grid::SIXTEENTH, true).unwrap();
        assert_eq!(q.start, 0.25);
        assert_eq!(q.duration, 0.75);
    }

    #[test]
    fn rejects_bad_grids() {
        assert_eq!(quantize_time(1.0, 0.0), Err(TheoryError::InvalidGrid(0.0)));
        assert!(quantize_time(1.0, -0.25).is_err());
        assert!(quantize_note(&note(0.0, 1.0), f64::NAN, false).is_err());
        assert!(quantize_notes(&[note(0.0, 1.0)], f64::INFINITY, true).is_err());
    }

    #[test]
    fn keeps_pitch_and_velocity() {
        let n = Note::new(72, 1.1, 0.5, 64).unwrap().muted(true);
        let q = quantize_note(&n, grid::QUARTER, false).unwrap();
        assert_eq!((q.pitch, q.velocity, q.mute), (72, 64, true));
        assert_eq!(q.start, 1.0);
    }
}
