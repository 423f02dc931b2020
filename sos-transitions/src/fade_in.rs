//! Fade-in ramp for newly started tracks
//!
//! A track starts silent and ramps to its declared volume over the queue's
//! configured fade-in length. Pausing mid-ramp remembers how much of the
//! ramp is left; the next play resumes over exactly that remainder, from
//! whatever volume the transport is at.

use crate::config::load_config;
use crate::host::{PlaybackHost, Transport, TransportEvent};
use crate::media::MediaReadyWaiter;
use sos_common::{EventBus, QueueId, TrackId, TransitionEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Ramp progress of one track
struct FadeState {
    target_volume: f32,
    remaining: Duration,
    /// Start of the ramp segment currently running
    started_at: Option<Instant>,
    /// Transport listener, one per track
    listener: JoinHandle<()>,
}

/// Pause/resume-aware fade-in ramps
#[derive(Clone)]
pub struct FadeController {
    host: Arc<dyn PlaybackHost>,
    waiter: MediaReadyWaiter,
    events: Arc<EventBus>,
    states: Arc<Mutex<HashMap<TrackId, FadeState>>>,
}

impl FadeController {
    pub fn new(host: Arc<dyn PlaybackHost>, waiter: MediaReadyWaiter, events: Arc<EventBus>) -> Self {
        Self {
            host,
            waiter,
            events,
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fade `track` in from silence
    ///
    /// No-op when the queue has no fade-in configured, the track is a gap
    /// track, or its transport never becomes available. Calling this again
    /// for the same track restarts the ramp without adding listeners.
    pub async fn apply_fade_in(&self, queue: QueueId, track: TrackId) {
        let fade_ms = load_config(self.host.as_ref(), queue).fade_in_ms;
        if fade_ms == 0 {
            return;
        }
        let Some(info) = self.host.track(queue, track) else {
            return;
        };
        if info.is_silence_gap() {
            return;
        }

        let Some(transport) = self.waiter.wait_for_media(queue, track).await else {
            debug!("No media for \"{}\"; skipping fade-in", info.name);
            return;
        };

        // Subscribe before sampling `is_playing` so a play in between is seen
        let events = transport.subscribe();
        transport.set_volume(0.0);
        let playing = transport.is_playing();

        {
            let mut states = self.states.lock().unwrap();
            let total = Duration::from_millis(fade_ms);
            match states.get_mut(&track) {
                Some(state) => {
                    state.target_volume = info.volume;
                    state.remaining = total;
                    state.started_at = None;
                }
                None => {
                    let listener = self.spawn_listener(track, Arc::clone(&transport), events);
                    states.insert(
                        track,
                        FadeState {
                            target_volume: info.volume,
                            remaining: total,
                            started_at: None,
                            listener,
                        },
                    );
                }
            }
        }

        if playing {
            self.resume(track, transport.as_ref());
        }
        // Otherwise the listener starts the ramp on the next play event
    }

    /// Remaining ramp length of a track, if it has fade state
    pub fn remaining(&self, track: TrackId) -> Option<Duration> {
        self.states.lock().unwrap().get(&track).map(|s| s.remaining)
    }

    /// Drop fade state of a track the host no longer has
    pub fn forget_track(&self, track: TrackId) {
        if let Some(state) = self.states.lock().unwrap().remove(&track) {
            state.listener.abort();
        }
    }

    fn spawn_listener(
        &self,
        track: TrackId,
        transport: Arc<dyn Transport>,
        mut events: tokio::sync::broadcast::Receiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TransportEvent::Play) => this.resume(track, transport.as_ref()),
                    Ok(TransportEvent::Pause) => this.pause(track),
                    Ok(TransportEvent::End) | Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(_)) => continue,
                }
            }
            this.states.lock().unwrap().remove(&track);
        })
    }

    /// Start the ramp over whatever remains, from the current volume
    fn resume(&self, track: TrackId, transport: &dyn Transport) {
        let (target, remaining) = {
            let mut states = self.states.lock().unwrap();
            let Some(state) = states.get_mut(&track) else {
                return;
            };
            if state.remaining.is_zero() || state.started_at.is_some() {
                return;
            }
            state.started_at = Some(Instant::now());
            (state.target_volume, state.remaining)
        };

        transport.fade(target, remaining, transport.volume());
        debug!("Resuming fade of track {} over {} ms", track, remaining.as_millis());
        self.events.emit_lossy(TransitionEvent::FadeInStarted {
            track_id: track,
            duration_ms: remaining.as_millis() as u64,
        });
    }

    /// Capture how much of the ramp is left
    fn pause(&self, track: TrackId) {
        let mut states = self.states.lock().unwrap();
        let Some(state) = states.get_mut(&track) else {
            return;
        };
        if let Some(started_at) = state.started_at.take() {
            state.remaining = state.remaining.saturating_sub(started_at.elapsed());
            debug!("Fade paused on track {}. {} ms left", track, state.remaining.as_millis());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::PlaybackMode;
    use crate::sim::SimHost;
    use serde_json::json;
    use sos_common::TransitionSettings;

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn controller(host: &Arc<SimHost>) -> FadeController {
        let settings = TransitionSettings::default();
        let host: Arc<dyn PlaybackHost> = host.clone();
        FadeController::new(
            Arc::clone(&host),
            MediaReadyWaiter::new(host, &settings),
            Arc::new(EventBus::new(16)),
        )
    }

    fn queue_with_fade(host: &SimHost, fade_in_ms: u64) -> (QueueId, TrackId) {
        let queue = host.add_queue("Tavern", PlaybackMode::Sequential, 0);
        host.set_flags(queue, json!({ "fadeIn": fade_in_ms }).as_object().cloned().unwrap());
        let track = host.add_track(queue, "Lute", 120.0);
        host.set_track_volume(queue, track, 0.6);
        (queue, track)
    }

    #[tokio::test(start_paused = true)]
    async fn test_playing_track_ramps_from_silence() {
        let host = SimHost::new();
        let (queue, track) = queue_with_fade(&host, 2000);
        host.play_now(queue, track);

        controller(&host).apply_fade_in(queue, track).await;

        let fades = host.sim_transport(queue, track).unwrap().fades();
        assert_eq!(fades.len(), 1);
        assert_eq!(fades[0].from, 0.0);
        assert_eq!(fades[0].target, 0.6);
        assert_eq!(fades[0].duration, Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_fade_is_noop() {
        let host = SimHost::new();
        let (queue, track) = queue_with_fade(&host, 0);
        host.play_now(queue, track);

        controller(&host).apply_fade_in(queue, track).await;

        let transport = host.sim_transport(queue, track).unwrap();
        assert!(transport.fades().is_empty());
        assert_eq!(transport.volume(), 0.6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_yet_playing_waits_for_play_event() {
        let host = SimHost::new();
        host.set_autoplay(false);
        let (queue, track) = queue_with_fade(&host, 1000);
        host.play_now(queue, track);

        controller(&host).apply_fade_in(queue, track).await;
        let transport = host.sim_transport(queue, track).unwrap();
        assert!(transport.fades().is_empty());
        assert_eq!(transport.volume(), 0.0);

        transport.play();
        settle().await;

        assert_eq!(transport.fades().len(), 1);
        assert_eq!(transport.fades()[0].duration, Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_continues_with_remainder() {
        let host = SimHost::new();
        let (queue, track) = queue_with_fade(&host, 3000);
        host.play_now(queue, track);
        let fade = controller(&host);

        fade.apply_fade_in(queue, track).await;
        let transport = host.sim_transport(queue, track).unwrap();

        tokio::time::advance(Duration::from_millis(1200)).await;
        transport.pause();
        settle().await;
        assert_eq!(fade.remaining(track), Some(Duration::from_millis(1800)));

        tokio::time::advance(Duration::from_secs(10)).await;
        transport.play();
        settle().await;

        let fades = transport.fades();
        assert_eq!(fades.len(), 2);
        assert_eq!(fades[1].duration, Duration::from_millis(1800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_apply_keeps_single_listener() {
        let host = SimHost::new();
        let (queue, track) = queue_with_fade(&host, 1000);
        host.set_autoplay(false);
        host.play_now(queue, track);
        let fade = controller(&host);

        fade.apply_fade_in(queue, track).await;
        fade.apply_fade_in(queue, track).await;
        fade.apply_fade_in(queue, track).await;

        let transport = host.sim_transport(queue, track).unwrap();
        transport.play();
        settle().await;

        assert_eq!(transport.fades().len(), 1);
    }
}
