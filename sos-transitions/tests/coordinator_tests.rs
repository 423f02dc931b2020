//! Lifecycle hook routing tests
//!
//! **Coverage:**
//! - Fade-in on track start (authoritative) and transport start (other peers)
//! - Re-arming after host-driven advancement
//! - Configuration accessors and mode exclusivity
//! - Forgetting deleted queues and tracks
//! - A full sequential run: track, gap, track, gap, stop

use sos_transitions::config::{toggle_crossfade, toggle_silence, ConfigForm};
use sos_transitions::sim::SimHost;
use sos_transitions::{
    EndDisposition, GapOutcome, PlaybackHost, PlaybackMode, SilenceMode, SilenceParams,
    TransitionConfig, TransitionCoordinator, TransitionMode, TransitionSettings, Transport,
};
use std::time::Duration;
use tokio::time::sleep;

fn silence(duration_ms: u64) -> TransitionMode {
    TransitionMode::Silence(SilenceParams {
        mode: SilenceMode::Static,
        duration_ms,
        min_delay_ms: 0,
        max_delay_ms: duration_ms,
    })
}

#[tokio::test(start_paused = true)]
async fn test_track_start_fades_in() {
    let host = SimHost::new();
    let queue = host.add_queue("Tavern", PlaybackMode::Sequential, 0);
    let track = host.add_track(queue, "Lute", 60.0);
    host.set_track_volume(queue, track, 0.8);
    let coordinator = TransitionCoordinator::new(host.clone(), TransitionSettings::default());
    coordinator
        .write_config(queue, TransitionConfig { fade_in_ms: 1500, mode: TransitionMode::None })
        .await
        .unwrap();

    host.play_now(queue, track);
    coordinator.on_track_started(queue, track).await.unwrap();

    let fades = host.sim_transport(queue, track).unwrap().fades();
    assert_eq!(fades.len(), 1);
    assert_eq!(fades[0].from, 0.0);
    assert_eq!(fades[0].target, 0.8);
    assert_eq!(fades[0].duration, Duration::from_millis(1500));
}

#[tokio::test(start_paused = true)]
async fn test_transport_start_premutes_and_other_peers_fade() {
    let host = SimHost::new();
    let queue = host.add_queue("Tavern", PlaybackMode::Sequential, 0);
    let track = host.add_track(queue, "Lute", 60.0);
    let coordinator = TransitionCoordinator::new(host.clone(), TransitionSettings::default());
    coordinator
        .write_config(queue, TransitionConfig { fade_in_ms: 1000, mode: TransitionMode::None })
        .await
        .unwrap();

    // Authoritative peer: muted only, the ramp comes from on_track_started
    host.play_now(queue, track);
    coordinator.on_transport_started(queue, track).await;
    let transport = host.sim_transport(queue, track).unwrap();
    assert_eq!(transport.volume(), 0.0);
    assert!(transport.fades().is_empty());

    // Any other peer ramps on its own
    host.set_authoritative(false);
    host.play_now(queue, track);
    coordinator.on_transport_started(queue, track).await;
    let fades = host.sim_transport(queue, track).unwrap().fades();
    assert_eq!(fades.len(), 1);
    assert_eq!(fades[0].target, 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_transport_resume_is_left_alone() {
    let host = SimHost::new();
    let queue = host.add_queue("Tavern", PlaybackMode::Sequential, 0);
    let track = host.add_track(queue, "Lute", 60.0);
    let coordinator = TransitionCoordinator::new(host.clone(), TransitionSettings::default());
    coordinator
        .write_config(queue, TransitionConfig { fade_in_ms: 1000, mode: TransitionMode::None })
        .await
        .unwrap();

    host.play_now(queue, track);
    let transport = host.sim_transport(queue, track).unwrap();
    sleep(Duration::from_secs(5)).await;
    transport.pause();

    coordinator.on_transport_started(queue, track).await;
    assert_eq!(transport.volume(), 1.0, "Resumed track was muted");
}

#[tokio::test(start_paused = true)]
async fn test_queue_advance_rearms_crossfade() {
    let host = SimHost::new();
    let queue = host.add_queue("Battle", PlaybackMode::Sequential, 2000);
    let first = host.add_track(queue, "Drums", 10.0);
    let second = host.add_track(queue, "Horns", 10.0);
    let coordinator = TransitionCoordinator::new(host.clone(), TransitionSettings::default());
    coordinator
        .write_config(queue, TransitionConfig { fade_in_ms: 0, mode: TransitionMode::Crossfade })
        .await
        .unwrap();

    host.play_now(queue, first);
    host.play_next(queue).await.unwrap();
    coordinator.on_queue_advanced(queue).await.unwrap();

    assert_eq!(host.playing_track(queue), Some(second));
    assert!(coordinator.has_pending_crossfade(queue));
}

#[tokio::test]
async fn test_toggles_keep_modes_exclusive() {
    let host = SimHost::new();
    let queue = host.add_queue("Tavern", PlaybackMode::Sequential, 1000);
    let coordinator = TransitionCoordinator::new(host.clone(), TransitionSettings::default());
    coordinator
        .write_config(queue, TransitionConfig { fade_in_ms: 500, mode: silence(1500) })
        .await
        .unwrap();

    let config = toggle_crossfade(host.as_ref(), queue).await.unwrap();
    assert!(config.crossfade_enabled());
    assert!(!config.silence_enabled());
    assert_eq!(config.fade_in_ms, 500);
    assert_eq!(coordinator.config(queue), config);

    // Gap settings survive the detour through crossfade
    let config = toggle_silence(host.as_ref(), queue).await.unwrap();
    assert!(!config.crossfade_enabled());
    assert_eq!(config.silence().map(|p| p.duration_ms), Some(1500));

    let config = toggle_silence(host.as_ref(), queue).await.unwrap();
    assert_eq!(config.mode, TransitionMode::None);
}

#[tokio::test]
async fn test_form_with_both_modes_checked_writes_neither() {
    let host = SimHost::new();
    let queue = host.add_queue("Tavern", PlaybackMode::Sequential, 1000);
    let coordinator = TransitionCoordinator::new(host.clone(), TransitionSettings::default());

    let form = ConfigForm {
        silence_enabled: true,
        crossfade: true,
        silence_duration_ms: 1000,
        ..ConfigForm::default()
    };
    coordinator.write_config(queue, form.into_config()).await.unwrap();

    let config = coordinator.config(queue);
    assert!(!config.silence_enabled());
    assert!(!config.crossfade_enabled());
}

#[tokio::test]
async fn test_write_config_normalizes_bounds() {
    let host = SimHost::new();
    let queue = host.add_queue("Tavern", PlaybackMode::Sequential, 0);
    let coordinator = TransitionCoordinator::new(host.clone(), TransitionSettings::default());

    let stored = coordinator
        .write_config(
            queue,
            TransitionConfig {
                fade_in_ms: 0,
                mode: TransitionMode::Silence(SilenceParams {
                    mode: SilenceMode::Random,
                    duration_ms: 2000,
                    min_delay_ms: 2500,
                    max_delay_ms: 5000,
                }),
            },
        )
        .await
        .unwrap();

    let params = stored.silence().copied().unwrap();
    assert!(params.min_delay_ms <= params.max_delay_ms);
    assert!(params.max_delay_ms <= params.duration_ms);
    assert_eq!(coordinator.config(queue), stored);
}

#[tokio::test]
async fn test_write_config_requires_authority() {
    let host = SimHost::new();
    let queue = host.add_queue("Tavern", PlaybackMode::Sequential, 0);
    host.set_authoritative(false);
    let coordinator = TransitionCoordinator::new(host.clone(), TransitionSettings::default());

    let result = coordinator.write_config(queue, TransitionConfig::default()).await;
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_forget_queue_drops_pending_transitions() {
    let host = SimHost::new();
    let queue = host.add_queue("Tavern", PlaybackMode::Sequential, 0);
    let track = host.add_track(queue, "Lute", 60.0);
    let coordinator = TransitionCoordinator::new(host.clone(), TransitionSettings::default());
    coordinator
        .write_config(queue, TransitionConfig { fade_in_ms: 0, mode: silence(5000) })
        .await
        .unwrap();
    host.play_now(queue, track);

    let pending = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.play_silence(queue).await })
    };
    sleep(Duration::from_millis(100)).await;
    assert!(coordinator.has_pending_gap(queue));

    coordinator.forget_queue(queue);

    assert!(!coordinator.has_pending_gap(queue));
    assert!(pending.await.unwrap(), "Forgotten gap should resolve as cancelled");
}

#[tokio::test(start_paused = true)]
async fn test_sequential_run_with_gaps() {
    let host = SimHost::new();
    let queue = host.add_queue("Dungeon", PlaybackMode::Sequential, 0);
    let tracks: Vec<_> = ["Drip", "Wind", "Chains"]
        .iter()
        .map(|name| host.add_track(queue, name, 4.0))
        .collect();
    let coordinator = TransitionCoordinator::new(host.clone(), TransitionSettings::default());
    coordinator
        .write_config(queue, TransitionConfig { fade_in_ms: 0, mode: silence(1000) })
        .await
        .unwrap();

    host.play_now(queue, tracks[0]);
    for (i, track) in tracks.iter().enumerate() {
        assert_eq!(host.playing_track(queue), Some(*track));
        sleep(Duration::from_secs(4)).await;

        let disposition = coordinator.on_track_ended(queue, *track);
        host.finish_track(queue, *track);
        let EndDisposition::Gap(outcome) = disposition else {
            panic!("Track {} ended without a gap", i);
        };

        let expected = match tracks.get(i + 1) {
            Some(next) => GapOutcome::Advanced(*next),
            None => GapOutcome::Stopped,
        };
        assert_eq!(outcome.await.unwrap(), expected);
    }

    assert_eq!(host.created_tracks().len(), 3);
    assert_eq!(host.deleted_tracks(), host.created_tracks());
    assert!(!host.is_queue_playing(queue));
}
