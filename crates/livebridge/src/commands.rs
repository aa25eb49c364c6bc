//! Subcommand implementations. Results go to stdout as JSON.

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use livebridge::music_theory::{detect_key, parse_pitch_class};
use livebridge::LiveBridge;
use serde::Serialize;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize result")?;
    println!("{}", json);
    Ok(())
}

pub async fn ping(bridge: &LiveBridge) -> Result<()> {
    let pong = bridge.ping().await.context("Ping failed")?;
    print_json(&pong)
}

pub async fn info(bridge: &LiveBridge) -> Result<()> {
    let info = bridge.song_info().await.context("Failed to read song info")?;
    print_json(&info)
}

pub async fn tempo(bridge: &LiveBridge, bpm: Option<f64>) -> Result<()> {
    let tempo = match bpm {
        Some(bpm) => bridge.set_tempo(bpm).await.context("Failed to set tempo")?,
        None => bridge.get_tempo().await.context("Failed to read tempo")?,
    };
    print_json(&tempo)
}

pub async fn play(bridge: &LiveBridge) -> Result<()> {
    print_json(&bridge.play().await.context("Failed to start playback")?)
}

pub async fn stop(bridge: &LiveBridge) -> Result<()> {
    print_json(&bridge.stop().await.context("Failed to stop playback")?)
}

pub async fn notes(bridge: &LiveBridge, track: i32, slot: i32) -> Result<()> {
    let notes = bridge
        .get_notes(track, slot)
        .await
        .with_context(|| format!("Failed to read notes from clip {}/{}", track, slot))?;
    print_json(&notes)
}

/// One compact JSON object per line until `count` beats or Ctrl-C.
pub async fn listen(bridge: &LiveBridge, count: Option<usize>) -> Result<()> {
    let mut beats = bridge.listen_beat().await.context("Failed to start beat listener")?;
    let mut seen = 0usize;

    loop {
        tokio::select! {
            beat = beats.next() => {
                let Some(beat) = beat else { break };
                println!("{}", serde_json::to_string(&beat)?);
                seen += 1;
                if count.is_some_and(|n| seen >= n) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    bridge.stop_listen_beat().await.context("Failed to stop beat listener")?;
    Ok(())
}

/// Parse "60", "C", "f#" and friends. Bare note names sit in octave 4.
fn parse_pitch(raw: &str) -> Result<u8> {
    if let Ok(midi) = raw.parse::<i32>() {
        if !(0..=127).contains(&midi) {
            bail!("MIDI pitch {} is outside 0-127", midi);
        }
        return Ok(midi as u8);
    }
    let pc = parse_pitch_class(raw)?;
    Ok(60 + pc)
}

pub fn key(pitches: &[String], top: usize) -> Result<()> {
    let observations = pitches
        .iter()
        .map(|p| parse_pitch(p).map(|pitch| (pitch, 1.0)))
        .collect::<Result<Vec<_>>>()?;

    let ranked: Vec<_> = detect_key(&observations).into_iter().take(top.max(1)).collect();
    print_json(&ranked)
}
