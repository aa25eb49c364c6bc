//! Structured results for bridge operations.
//!
//! These are what a tool-calling client sees; every type derives
//! `JsonSchema` so the calling surface can publish output schemas.

use music_theory::Note;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PingResponse {
    /// What the peer answered with (AbletonOSC says "ok")
    pub reply: String,
    pub round_trip_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TransportResponse {
    pub is_playing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TempoResponse {
    pub bpm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SongInfo {
    pub tempo: f64,
    pub is_playing: bool,
    pub num_tracks: i32,
    pub signature_numerator: i32,
    pub signature_denominator: i32,
    pub track_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TrackInfo {
    pub track: i32,
    pub name: String,
    /// 0.0 to 1.0 (0.85 is 0 dB)
    pub volume: f64,
    /// -1.0 (left) to 1.0 (right)
    pub panning: f64,
    pub mute: bool,
    pub solo: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TrackCreated {
    /// Index of the new track
    pub index: i32,
    pub num_tracks: i32,
}

/// Read-back of a track switch after setting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TrackSwitch {
    pub track: i32,
    /// "mute" or "solo"
    pub property: String,
    pub enabled: bool,
}

/// Read-back of a continuous track control after setting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TrackLevel {
    pub track: i32,
    /// "volume" or "panning"
    pub property: String,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ClipResponse {
    pub track: i32,
    pub slot: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_clip: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NotesResponse {
    pub track: i32,
    pub slot: i32,
    pub notes: Vec<Note>,
}

impl NotesResponse {
    pub fn count(&self) -> usize {
        self.notes.len()
    }
}

/// The region `remove_notes` clears. Everything when omitted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NoteRange {
    pub pitch_start: u8,
    pub pitch_span: u8,
    /// Beats from clip start
    pub time_start: f64,
    /// Length in beats
    pub time_span: f64,
}

/// One beat tick pushed by the peer while listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BeatEvent {
    pub beat: i32,
}
