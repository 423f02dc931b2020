//! Transition simulator (sos-sim) - Main entry point
//!
//! Plays a queue of silent simulated tracks through the in-memory host with
//! the transition coordinator attached, and logs every transition event.
//! Useful for trying gap and crossfade settings without a real host.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use sos_common::config::resolve_settings;
use sos_transitions::host::PlaybackHost;
use sos_transitions::sim::SimHost;
use sos_transitions::{
    EndDisposition, PlaybackMode, SilenceMode, SilenceParams, TransitionConfig, TransitionCoordinator,
    TransitionMode,
};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Transition {
    None,
    Silence,
    Random,
    Crossfade,
}

/// Command-line arguments for sos-sim
#[derive(Parser, Debug)]
#[command(name = "sos-sim")]
#[command(about = "Simulate silent gaps and crossfades on a playback queue")]
#[command(version)]
struct Args {
    /// Settings file (TOML)
    #[arg(short, long, env = "SOS_CONFIG")]
    config: Option<PathBuf>,

    /// Transition inserted between tracks
    #[arg(short, long, value_enum, default_value = "silence")]
    transition: Transition,

    /// Number of tracks in the queue
    #[arg(long, default_value = "3")]
    tracks: usize,

    /// Length of every track in seconds
    #[arg(long, default_value = "4.0")]
    track_secs: f64,

    /// Silence duration (ms); the upper bound in random mode
    #[arg(long, default_value = "1500")]
    silence_ms: u64,

    /// Lower bound of random gaps (ms)
    #[arg(long, default_value = "0")]
    min_delay_ms: u64,

    /// Declared queue fade length (ms), used as crossfade overlap
    #[arg(long, default_value = "1000")]
    fade_ms: u64,

    /// Fade-in length (ms) applied to every track
    #[arg(long, default_value = "0")]
    fade_in_ms: u64,

    /// Stop the whole queue after this many seconds
    #[arg(long)]
    stop_after_secs: Option<f64>,

    /// Verbose scheduling logs
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = resolve_settings(args.config.as_deref()).context("Failed to load settings")?;

    let default_filter = if args.debug || settings.debug {
        "sos_transitions=debug,sos_sim=debug"
    } else {
        "sos_transitions=info,sos_sim=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let host = SimHost::new();
    let queue = host.add_queue("Simulated Queue", PlaybackMode::Sequential, args.fade_ms);
    let tracks: Vec<_> = (1..=args.tracks)
        .map(|n| host.add_track(queue, &format!("Track {}", n), args.track_secs))
        .collect();
    let Some(&first) = tracks.first() else {
        warn!("Queue has no tracks; nothing to simulate");
        return Ok(());
    };

    let coordinator = TransitionCoordinator::new(host.clone(), settings);
    let config = coordinator
        .write_config(queue, transition_config(&args))
        .await
        .context("Failed to write transition config")?;
    info!("Transition config: {:?}", config);

    let mut events = coordinator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => info!("event: {}", json),
                Err(e) => warn!("Unserializable event: {}", e),
            }
        }
    });

    host.play_now(queue, first);
    coordinator.on_track_started(queue, first);

    let started = Instant::now();
    let stop_at = args.stop_after_secs.map(Duration::from_secs_f64);
    let mut current = Some(first);
    let mut gaps: Vec<JoinHandle<()>> = Vec::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(50));

    loop {
        ticker.tick().await;

        if let Some(limit) = stop_at {
            if started.elapsed() >= limit {
                info!("Stopping queue after {:.1} s", limit.as_secs_f64());
                coordinator.on_queue_stopped(queue).await;
                host.stop_all(queue).await.context("Failed to stop queue")?;
                break;
            }
        }

        // Tracks started by the host itself (crossfade, gap advancement)
        let playing = host.playing_track(queue);
        if playing != current {
            if let Some(track) = playing {
                let is_gap = host.track(queue, track).map(|t| t.is_silence_gap()).unwrap_or(false);
                if !is_gap {
                    coordinator.on_track_started(queue, track);
                }
            }
            current = playing;
        }

        let Some(track) = playing else {
            gaps.retain(|gap| !gap.is_finished());
            if gaps.is_empty() && !coordinator.has_pending_gap(queue) {
                break;
            }
            continue;
        };

        let Some(info) = host.track(queue, track) else {
            continue;
        };
        if info.is_silence_gap() {
            if let Some(countdown) = coordinator.gap_countdown(queue) {
                info!(
                    "Gap {:.1}/{:.1} s",
                    countdown.current_time_secs(),
                    countdown.duration_secs()
                );
            }
            continue;
        }

        let Some(transport) = host.transport(queue, track) else {
            continue;
        };
        if transport.current_time_secs() < transport.duration_secs() {
            continue;
        }

        info!("\"{}\" ended", info.name);
        let disposition = coordinator.on_track_ended(queue, track);
        host.finish_track(queue, track);
        match disposition {
            EndDisposition::Proceed => {
                host.play_next(queue).await.context("Failed to advance queue")?;
                coordinator.on_queue_advanced(queue);
            }
            EndDisposition::Gap(outcome) => {
                gaps.push(tokio::spawn(async move {
                    match outcome.await {
                        Ok(outcome) => info!("Gap outcome: {:?}", outcome),
                        Err(e) => warn!("Gap task failed: {}", e),
                    }
                }));
            }
            EndDisposition::Suppress => {}
        }
    }

    info!("Simulation finished after {:.1} s", started.elapsed().as_secs_f64());
    Ok(())
}

fn transition_config(args: &Args) -> TransitionConfig {
    let silence = |mode| {
        TransitionMode::Silence(SilenceParams {
            mode,
            duration_ms: args.silence_ms,
            min_delay_ms: args.min_delay_ms,
            max_delay_ms: args.silence_ms,
        })
    };

    let mode = match args.transition {
        Transition::None => TransitionMode::None,
        Transition::Silence => silence(SilenceMode::Static),
        Transition::Random => silence(SilenceMode::Random),
        Transition::Crossfade => TransitionMode::Crossfade,
    };

    TransitionConfig { fade_in_ms: args.fade_in_ms, mode }
}
