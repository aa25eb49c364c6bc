//! Domain operations on top of the correlator.
//!
//! Each operation validates its arguments, sends the AbletonOSC command(s),
//! and reads state back so the caller gets what the DAW actually did rather
//! than what was asked for. Reads are idempotent and retried; mutations go
//! out exactly once. A peer error caused by a mutation is reported as that
//! mutation's failure, even when its read-back succeeds.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::Stream;
use liveconf::{LiveConfig, PeerErrorMode};
use liveproto::{
    Arg, CommandOutcome, Correlator, CorrelatorOptions, Message, ResponseKey, RetryPolicy, Subscription, Transport,
};
use music_theory::Note;
use tracing::{debug, info, warn};

use crate::error::BridgeError;
use crate::results::{
    BeatEvent, ClipResponse, NoteRange, NotesResponse, PingResponse, SongInfo, TempoResponse, TrackCreated,
    TrackInfo, TrackLevel, TrackSwitch, TransportResponse,
};
use crate::shape::{expect_prefix_then_repeating, ArgKind, Reply};

pub const MIN_TEMPO: f64 = 20.0;
pub const MAX_TEMPO: f64 = 999.0;

const NOTE_GROUP: [ArgKind; 5] = [ArgKind::Int, ArgKind::Number, ArgKind::Number, ArgKind::Int, ArgKind::Bool];

const BEAT_ADDRESS: &str = "/live/song/get/beat";

fn check_index(what: &str, value: i32) -> Result<(), BridgeError> {
    if value < 0 {
        return Err(BridgeError::InvalidArgument(format!(
            "{} index must be >= 0, got {}",
            what, value
        )));
    }
    Ok(())
}

fn check_range(what: &str, value: f64, min: f64, max: f64) -> Result<(), BridgeError> {
    if !value.is_finite() || value < min || value > max {
        return Err(BridgeError::InvalidArgument(format!(
            "{} must be between {} and {}, got {}",
            what, min, max, value
        )));
    }
    Ok(())
}

fn track_entity(track: i32) -> String {
    format!("track {}", track)
}

fn clip_entity(track: i32, slot: i32) -> String {
    format!("clip {}/{}", track, slot)
}

/// Beat ticks from the peer. Ends when the bridge closes.
pub struct BeatStream {
    inner: Subscription,
}

impl Stream for BeatStream {
    type Item = BeatEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<BeatEvent>> {
        loop {
            match futures::ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                Some(msg) => match Reply::checked(&msg, &[ArgKind::Int]).and_then(|r| r.int(0)) {
                    Ok(beat) => return Poll::Ready(Some(BeatEvent { beat })),
                    Err(e) => warn!("ignoring beat update: {}", e),
                },
                None => return Poll::Ready(None),
            }
        }
    }
}

/// A connection to one DAW.
#[derive(Clone)]
pub struct LiveBridge {
    correlator: Correlator,
    policy: RetryPolicy,
    peer_errors: PeerErrorMode,
}

impl LiveBridge {
    /// Open the channel, start the correlator and ping the peer.
    ///
    /// A failed ping is only logged: the DAW may be started after the
    /// bridge, and every later call reports its own failure.
    pub async fn connect(config: &LiveConfig) -> Result<Self, BridgeError> {
        let correlator = Correlator::connect(config).await?;
        let bridge = Self::with_correlator(correlator, config);

        match bridge.ping().await {
            Ok(pong) => info!(
                "peer at {} answered in {:.1}ms",
                config.peer.remote_addr(),
                pong.round_trip_ms
            ),
            Err(e) => warn!("peer at {} is not answering yet: {}", config.peer.remote_addr(), e),
        }
        Ok(bridge)
    }

    /// Run over an existing transport (tests, alternative sockets).
    pub fn with_transport<T: Transport>(transport: T, config: &LiveConfig) -> Self {
        let correlator = Correlator::spawn(
            transport,
            CorrelatorOptions {
                peer_errors: config.peer_errors,
                ..Default::default()
            },
        );
        Self::with_correlator(correlator, config)
    }

    pub fn with_correlator(correlator: Correlator, config: &LiveConfig) -> Self {
        Self {
            correlator,
            policy: RetryPolicy::from(&config.requests),
            peer_errors: config.peer_errors,
        }
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    /// Cancel everything in flight and release the sockets.
    pub async fn close(&self) {
        self.correlator.close().await;
    }

    /// Idempotent read: the reply comes back on the request's own address,
    /// starting with `token`.
    async fn query(&self, outbound: Message, token: Vec<Arg>, entity: Option<&str>) -> Result<Message, BridgeError> {
        let key = ResponseKey::with_token(outbound.address.clone(), token);
        self.correlator
            .request_with_retry(outbound, key, &self.policy)
            .await
            .map_err(|e| BridgeError::from_correlation(e, entity, self.peer_errors))
    }

    /// Mutation: sent exactly once, no reply expected. The outcome carries
    /// any peer error it causes within one request timeout.
    async fn command(&self, outbound: Message) -> Result<CommandOutcome, BridgeError> {
        debug!("command {}", outbound);
        self.correlator
            .command(outbound, self.policy.timeout)
            .await
            .map_err(|e| BridgeError::from_correlation(e, None, self.peer_errors))
    }

    async fn confirm(&self, outcome: CommandOutcome, entity: Option<&str>) -> Result<(), BridgeError> {
        outcome
            .confirmed()
            .await
            .map_err(|e| BridgeError::from_correlation(e, entity, self.peer_errors))
    }

    async fn song_value(&self, property: &str, kind: ArgKind) -> Result<Message, BridgeError> {
        let msg = self
            .query(Message::new(format!("/live/song/get/{}", property)), Vec::new(), None)
            .await?;
        Reply::checked(&msg, &[kind])?;
        Ok(msg)
    }

    async fn track_value(&self, track: i32, property: &str, kind: ArgKind) -> Result<Message, BridgeError> {
        let entity = track_entity(track);
        let msg = self
            .query(
                Message::new(format!("/live/track/get/{}", property)).arg(track),
                vec![Arg::Int(track)],
                Some(&entity),
            )
            .await?;
        Reply::checked(&msg, &[ArgKind::Int, kind])?;
        Ok(msg)
    }

    async fn clip_value(&self, track: i32, slot: i32, address: &str) -> Result<bool, BridgeError> {
        let entity = clip_entity(track, slot);
        let msg = self
            .query(
                Message::new(address).arg(track).arg(slot),
                vec![Arg::Int(track), Arg::Int(slot)],
                Some(&entity),
            )
            .await?;
        Reply::checked(&msg, &[ArgKind::Int, ArgKind::Int, ArgKind::Bool])?.bool(2)
    }

    // --- Session ---------------------------------------------------------

    pub async fn ping(&self) -> Result<PingResponse, BridgeError> {
        let started = Instant::now();
        let msg = self.query(Message::new("/live/test"), Vec::new(), None).await?;
        let reply = Reply::checked(&msg, &[ArgKind::Str])?.str(0)?.to_string();
        Ok(PingResponse {
            reply,
            round_trip_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    // --- Transport -------------------------------------------------------

    async fn transport_command(&self, address: &str) -> Result<TransportResponse, BridgeError> {
        let outcome = self.command(Message::new(address)).await?;
        let state = self.is_playing().await;
        self.confirm(outcome, None).await?;
        state
    }

    pub async fn is_playing(&self) -> Result<TransportResponse, BridgeError> {
        let msg = self.song_value("is_playing", ArgKind::Bool).await?;
        Ok(TransportResponse {
            is_playing: Reply::unchecked(&msg).bool(0)?,
        })
    }

    pub async fn play(&self) -> Result<TransportResponse, BridgeError> {
        self.transport_command("/live/song/start_playing").await
    }

    pub async fn stop(&self) -> Result<TransportResponse, BridgeError> {
        self.transport_command("/live/song/stop_playing").await
    }

    pub async fn continue_playing(&self) -> Result<TransportResponse, BridgeError> {
        self.transport_command("/live/song/continue_playing").await
    }

    pub async fn get_tempo(&self) -> Result<TempoResponse, BridgeError> {
        let msg = self.song_value("tempo", ArgKind::Number).await?;
        Ok(TempoResponse {
            bpm: Reply::unchecked(&msg).number(0)?,
        })
    }

    pub async fn set_tempo(&self, bpm: f64) -> Result<TempoResponse, BridgeError> {
        check_range("tempo", bpm, MIN_TEMPO, MAX_TEMPO)?;
        let outcome = self.command(Message::new("/live/song/set/tempo").arg(bpm as f32)).await?;
        let tempo = self.get_tempo().await;
        self.confirm(outcome, None).await?;
        tempo
    }

    /// Tempo, transport, track count, time signature and track names, read
    /// concurrently.
    pub async fn song_info(&self) -> Result<SongInfo, BridgeError> {
        let (tempo, playing, tracks, numerator, denominator, names) = futures::try_join!(
            self.song_value("tempo", ArgKind::Number),
            self.song_value("is_playing", ArgKind::Bool),
            self.song_value("num_tracks", ArgKind::Int),
            self.song_value("signature_numerator", ArgKind::Int),
            self.song_value("signature_denominator", ArgKind::Int),
            self.query(Message::new("/live/song/get/track_names"), Vec::new(), None),
        )?;

        expect_prefix_then_repeating(&names, &[], &[ArgKind::Str])?;
        let track_names = names
            .args
            .iter()
            .filter_map(|a| a.as_str().map(str::to_string))
            .collect();

        Ok(SongInfo {
            tempo: Reply::unchecked(&tempo).number(0)?,
            is_playing: Reply::unchecked(&playing).bool(0)?,
            num_tracks: Reply::unchecked(&tracks).int(0)?,
            signature_numerator: Reply::unchecked(&numerator).int(0)?,
            signature_denominator: Reply::unchecked(&denominator).int(0)?,
            track_names,
        })
    }

    // --- Tracks ----------------------------------------------------------

    async fn num_tracks(&self) -> Result<i32, BridgeError> {
        let msg = self.song_value("num_tracks", ArgKind::Int).await?;
        Reply::unchecked(&msg).int(0)
    }

    async fn create_track(&self, kind: &str, index: Option<i32>) -> Result<TrackCreated, BridgeError> {
        if let Some(i) = index {
            check_index("track", i)?;
        }
        // AbletonOSC appends at -1
        let wire_index = index.unwrap_or(-1);
        let outcome = self
            .command(Message::new(format!("/live/song/create_{}_track", kind)).arg(wire_index))
            .await?;
        let num_tracks = self.num_tracks().await;
        self.confirm(outcome, None).await?;
        let num_tracks = num_tracks?;
        Ok(TrackCreated {
            index: index.unwrap_or(num_tracks - 1),
            num_tracks,
        })
    }

    /// Insert a MIDI track at `index`, or append when `None`.
    pub async fn create_midi_track(&self, index: Option<i32>) -> Result<TrackCreated, BridgeError> {
        self.create_track("midi", index).await
    }

    pub async fn create_audio_track(&self, index: Option<i32>) -> Result<TrackCreated, BridgeError> {
        self.create_track("audio", index).await
    }

    pub async fn track_info(&self, track: i32) -> Result<TrackInfo, BridgeError> {
        check_index("track", track)?;
        let (name, volume, panning, mute, solo) = futures::try_join!(
            self.track_value(track, "name", ArgKind::Str),
            self.track_value(track, "volume", ArgKind::Number),
            self.track_value(track, "panning", ArgKind::Number),
            self.track_value(track, "mute", ArgKind::Bool),
            self.track_value(track, "solo", ArgKind::Bool),
        )?;

        Ok(TrackInfo {
            track,
            name: Reply::unchecked(&name).str(1)?.to_string(),
            volume: Reply::unchecked(&volume).number(1)?,
            panning: Reply::unchecked(&panning).number(1)?,
            mute: Reply::unchecked(&mute).bool(1)?,
            solo: Reply::unchecked(&solo).bool(1)?,
        })
    }

    async fn set_track_switch(&self, track: i32, property: &str, enabled: bool) -> Result<TrackSwitch, BridgeError> {
        check_index("track", track)?;
        let outcome = self
            .command(Message::new(format!("/live/track/set/{}", property)).arg(track).arg(enabled))
            .await?;
        let msg = self.track_value(track, property, ArgKind::Bool).await;
        self.confirm(outcome, Some(&track_entity(track))).await?;
        let msg = msg?;
        Ok(TrackSwitch {
            track,
            property: property.to_string(),
            enabled: Reply::unchecked(&msg).bool(1)?,
        })
    }

    async fn set_track_level(&self, track: i32, property: &str, value: f64) -> Result<TrackLevel, BridgeError> {
        let outcome = self
            .command(
                Message::new(format!("/live/track/set/{}", property))
                    .arg(track)
                    .arg(value as f32),
            )
            .await?;
        let msg = self.track_value(track, property, ArgKind::Number).await;
        self.confirm(outcome, Some(&track_entity(track))).await?;
        let msg = msg?;
        Ok(TrackLevel {
            track,
            property: property.to_string(),
            value: Reply::unchecked(&msg).number(1)?,
        })
    }

    pub async fn set_track_mute(&self, track: i32, mute: bool) -> Result<TrackSwitch, BridgeError> {
        self.set_track_switch(track, "mute", mute).await
    }

    pub async fn set_track_solo(&self, track: i32, solo: bool) -> Result<TrackSwitch, BridgeError> {
        self.set_track_switch(track, "solo", solo).await
    }

    pub async fn set_track_volume(&self, track: i32, volume: f64) -> Result<TrackLevel, BridgeError> {
        check_index("track", track)?;
        check_range("volume", volume, 0.0, 1.0)?;
        self.set_track_level(track, "volume", volume).await
    }

    pub async fn set_track_pan(&self, track: i32, pan: f64) -> Result<TrackLevel, BridgeError> {
        check_index("track", track)?;
        check_range("pan", pan, -1.0, 1.0)?;
        self.set_track_level(track, "panning", pan).await
    }

    // --- Clips -----------------------------------------------------------

    /// Create an empty MIDI clip `length` beats long.
    pub async fn create_clip(&self, track: i32, slot: i32, length: f64) -> Result<ClipResponse, BridgeError> {
        check_index("track", track)?;
        check_index("slot", slot)?;
        if !length.is_finite() || length <= 0.0 {
            return Err(BridgeError::InvalidArgument(format!(
                "clip length must be positive, got {}",
                length
            )));
        }
        let outcome = self
            .command(
                Message::new("/live/clip_slot/create_clip")
                    .arg(track)
                    .arg(slot)
                    .arg(length as f32),
            )
            .await?;
        let has_clip = self.clip_value(track, slot, "/live/clip_slot/get/has_clip").await;
        self.confirm(outcome, Some(&clip_entity(track, slot))).await?;
        let has_clip = has_clip?;
        Ok(ClipResponse {
            track,
            slot,
            has_clip: Some(has_clip),
            is_playing: None,
        })
    }

    pub async fn fire_clip(&self, track: i32, slot: i32) -> Result<ClipResponse, BridgeError> {
        self.clip_transport(track, slot, "/live/clip/fire").await
    }

    pub async fn stop_clip(&self, track: i32, slot: i32) -> Result<ClipResponse, BridgeError> {
        self.clip_transport(track, slot, "/live/clip/stop").await
    }

    async fn clip_transport(&self, track: i32, slot: i32, address: &str) -> Result<ClipResponse, BridgeError> {
        check_index("track", track)?;
        check_index("slot", slot)?;
        let outcome = self.command(Message::new(address).arg(track).arg(slot)).await?;
        let is_playing = self.clip_value(track, slot, "/live/clip/get/is_playing").await;
        self.confirm(outcome, Some(&clip_entity(track, slot))).await?;
        let is_playing = is_playing?;
        Ok(ClipResponse {
            track,
            slot,
            has_clip: None,
            is_playing: Some(is_playing),
        })
    }

    /// Write all `notes` in one message, then read the clip back.
    pub async fn add_notes(&self, track: i32, slot: i32, notes: &[Note]) -> Result<NotesResponse, BridgeError> {
        check_index("track", track)?;
        check_index("slot", slot)?;
        if notes.is_empty() {
            return Err(BridgeError::InvalidArgument("no notes to add".to_string()));
        }
        for note in notes {
            note.validate()?;
        }

        let mut msg = Message::new("/live/clip/add/notes").arg(track).arg(slot);
        for note in notes {
            msg = msg
                .arg(note.pitch as i32)
                .arg(note.start as f32)
                .arg(note.duration as f32)
                .arg(note.velocity as i32)
                .arg(note.mute);
        }
        debug!("adding {} notes to {}", notes.len(), clip_entity(track, slot));
        let outcome = self.command(msg).await?;
        let written = self.get_notes(track, slot).await;
        self.confirm(outcome, Some(&clip_entity(track, slot))).await?;
        written
    }

    /// Remove notes inside `range`, or all notes when `None`.
    pub async fn remove_notes(
        &self,
        track: i32,
        slot: i32,
        range: Option<NoteRange>,
    ) -> Result<NotesResponse, BridgeError> {
        check_index("track", track)?;
        check_index("slot", slot)?;

        let mut msg = Message::new("/live/clip/remove/notes").arg(track).arg(slot);
        if let Some(r) = range {
            if r.pitch_start > 127 || r.pitch_start as u16 + r.pitch_span as u16 > 128 {
                return Err(BridgeError::InvalidArgument(format!(
                    "pitch range {}+{} leaves 0-127",
                    r.pitch_start, r.pitch_span
                )));
            }
            check_range("time_start", r.time_start, 0.0, f64::MAX)?;
            check_range("time_span", r.time_span, 0.0, f64::MAX)?;
            msg = msg
                .arg(r.pitch_start as i32)
                .arg(r.pitch_span as i32)
                .arg(r.time_start as f32)
                .arg(r.time_span as f32);
        }
        let outcome = self.command(msg).await?;
        let remaining = self.get_notes(track, slot).await;
        self.confirm(outcome, Some(&clip_entity(track, slot))).await?;
        remaining
    }

    pub async fn get_notes(&self, track: i32, slot: i32) -> Result<NotesResponse, BridgeError> {
        check_index("track", track)?;
        check_index("slot", slot)?;
        let entity = clip_entity(track, slot);
        let msg = self
            .query(
                Message::new("/live/clip/get/notes").arg(track).arg(slot),
                vec![Arg::Int(track), Arg::Int(slot)],
                Some(&entity),
            )
            .await?;

        let groups = expect_prefix_then_repeating(&msg, &[ArgKind::Int, ArgKind::Int], &NOTE_GROUP)?;
        let reply = Reply::unchecked(&msg);
        let mut notes = Vec::with_capacity(groups);
        for g in 0..groups {
            let base = 2 + g * NOTE_GROUP.len();
            let note = Note::new(
                reply.int(base)?,
                reply.number(base + 1)?,
                reply.number(base + 2)?,
                reply.int(base + 3)?,
            )?
            .muted(reply.bool(base + 4)?);
            notes.push(note);
        }

        Ok(NotesResponse { track, slot, notes })
    }

    // --- Listeners -------------------------------------------------------

    /// Ask the peer to push beat ticks and stream them.
    pub async fn listen_beat(&self) -> Result<BeatStream, BridgeError> {
        // Subscribe first so the first tick is not missed
        let inner = self
            .correlator
            .subscribe(BEAT_ADDRESS)
            .await
            .map_err(|e| BridgeError::from_correlation(e, None, self.peer_errors))?;
        // Dropping the outcome leaves its error slot armed
        self.command(Message::new("/live/song/start_listen/beat")).await?;
        Ok(BeatStream { inner })
    }

    pub async fn stop_listen_beat(&self) -> Result<(), BridgeError> {
        self.command(Message::new("/live/song/stop_listen/beat")).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_checks() {
        assert!(check_range("tempo", 120.0, MIN_TEMPO, MAX_TEMPO).is_ok());
        assert!(check_range("tempo", 19.9, MIN_TEMPO, MAX_TEMPO).is_err());
        assert!(check_range("tempo", 1000.0, MIN_TEMPO, MAX_TEMPO).is_err());
        assert!(check_range("pan", f64::NAN, -1.0, 1.0).is_err());
        assert!(check_index("track", 0).is_ok());
        assert!(matches!(check_index("slot", -1), Err(BridgeError::InvalidArgument(_))));
    }
}
