//! livebridge - typed control of a live DAW session over AbletonOSC
//!
//! `LiveBridge` turns fire-and-forget OSC into request/response operations:
//! every mutation is followed by a read-back, every reply is shape-checked,
//! and every call ends in either a structured result or a `BridgeError`.
//!
//! ```no_run
//! # async fn demo() -> Result<(), livebridge::BridgeError> {
//! let config = liveconf::LiveConfig::default();
//! let bridge = livebridge::LiveBridge::connect(&config).await?;
//! let tempo = bridge.set_tempo(96.0).await?;
//! println!("now at {} bpm", tempo.bpm);
//! bridge.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! The music theory helpers (`music_theory`) are re-exported so callers can
//! generate progressions and push them straight into a clip.

pub mod dispatcher;
pub mod error;
pub mod results;
pub mod shape;
pub mod telemetry;

pub use dispatcher::{BeatStream, LiveBridge, MAX_TEMPO, MIN_TEMPO};
pub use error::BridgeError;
pub use results::{
    BeatEvent, ClipResponse, NoteRange, NotesResponse, PingResponse, SongInfo, TempoResponse, TrackCreated,
    TrackInfo, TrackLevel, TrackSwitch, TransportResponse,
};
pub use shape::{expect_prefix_then_repeating, expect_shape, ArgKind, Reply};

pub use liveconf::LiveConfig;
pub use music_theory;
