//! livebridge - drive a live AbletonOSC session from the command line
//!
//! Subcommands:
//! - `livebridge ping` - Check the peer answers
//! - `livebridge info` - Tempo, transport, tracks
//! - `livebridge tempo [BPM]` - Read or set the tempo
//! - `livebridge play` / `stop` - Transport
//! - `livebridge notes <track> <slot>` - Dump a clip's notes
//! - `livebridge listen` - Stream beat ticks
//! - `livebridge config` - Print the effective configuration
//! - `livebridge key <pitches...>` - Offline key detection

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use livebridge::telemetry;
use liveconf::LiveConfig;

mod commands;

#[derive(Parser)]
#[command(name = "livebridge")]
#[command(about = "Typed control of a live DAW session over AbletonOSC")]
#[command(version)]
struct Cli {
    /// Config file used in place of ./livebridge.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Host running AbletonOSC
    #[arg(long, global = true)]
    host: Option<String>,

    /// Port AbletonOSC listens on
    #[arg(long, global = true)]
    send_port: Option<u16>,

    /// Local port replies arrive on
    #[arg(long, global = true)]
    receive_port: Option<u16>,

    /// Per-attempt reply timeout
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the peer answers /live/test
    Ping,

    /// Show tempo, transport state, time signature and track names
    Info,

    /// Print the tempo, or set it when BPM is given
    Tempo {
        /// New tempo (20-999)
        bpm: Option<f64>,
    },

    /// Start playback
    Play,

    /// Stop playback
    Stop,

    /// Print the notes in a clip
    Notes {
        /// Track index (0-based)
        track: i32,

        /// Clip slot index (0-based)
        slot: i32,
    },

    /// Stream beat ticks as JSON lines
    Listen {
        /// Stop after this many beats
        #[arg(short, long)]
        count: Option<usize>,
    },

    /// Print the effective configuration as TOML
    Config,

    /// Rank keys for a set of pitches (MIDI numbers or note names)
    Key {
        #[arg(required = true)]
        pitches: Vec<String>,

        /// How many candidates to print
        #[arg(short, long, default_value = "3")]
        top: usize,
    },
}

impl Cli {
    fn apply_overrides(&self, config: &mut LiveConfig) {
        if let Some(host) = &self.host {
            config.peer.host = host.clone();
        }
        if let Some(port) = self.send_port {
            config.peer.send_port = port;
        }
        if let Some(port) = self.receive_port {
            config.peer.receive_port = port;
        }
        if let Some(ms) = self.timeout_ms {
            config.requests.timeout_ms = ms;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, sources) =
        LiveConfig::load_with_sources_from(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply_overrides(&mut config);

    telemetry::init(&config.telemetry.log_level).context("Failed to initialize logging")?;
    for file in &sources.files {
        tracing::debug!("loaded config from {}", file.display());
    }
    if !sources.env_overrides.is_empty() {
        tracing::debug!("env overrides: {}", sources.env_overrides.join(", "));
    }

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml());
            Ok(())
        }
        Commands::Key { pitches, top } => commands::key(&pitches, top),
        command => {
            let bridge = livebridge::LiveBridge::connect(&config)
                .await
                .with_context(|| format!("Failed to connect to {}", config.peer.remote_addr()))?;
            let result = match command {
                Commands::Ping => commands::ping(&bridge).await,
                Commands::Info => commands::info(&bridge).await,
                Commands::Tempo { bpm } => commands::tempo(&bridge, bpm).await,
                Commands::Play => commands::play(&bridge).await,
                Commands::Stop => commands::stop(&bridge).await,
                Commands::Notes { track, slot } => commands::notes(&bridge, track, slot).await,
                Commands::Listen { count } => commands::listen(&bridge, count).await,
                Commands::Config | Commands::Key { .. } => Ok(()),
            };
            bridge.close().await;
            result
        }
    }
}
