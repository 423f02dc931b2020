//! Auto-crossfade timers
//!
//! Advances a queue to its next track at the moment the current track's
//! fade-out begins, so the host overlaps the two fades. Applies to
//! Sequential and Shuffle queues only.
//!
//! Each queue has at most one timer. Arming always retires the previous one.

use crate::config::load_config;
use crate::host::{PlaybackHost, Transport, TransportEvent};
use crate::media::MediaReadyWaiter;
use sos_common::time::secs_to_duration;
use sos_common::{EventBus, QueueId, TrackId, TransitionEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Seconds until the fade-out of a track begins
///
/// `max(0, duration - elapsed - fade)`. A track shorter than its fade fires
/// immediately.
pub fn fire_in_secs(duration_secs: f64, elapsed_secs: f64, fade_secs: f64) -> f64 {
    let fire_in = duration_secs - elapsed_secs - fade_secs;
    if fire_in.is_finite() {
        fire_in.max(0.0)
    } else {
        0.0
    }
}

/// The live timer of a queue
struct CrossfadeTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// One crossfade timer per queue
#[derive(Clone)]
pub struct CrossfadeScheduler {
    host: Arc<dyn PlaybackHost>,
    waiter: MediaReadyWaiter,
    events: Arc<EventBus>,
    timers: Arc<Mutex<HashMap<QueueId, CrossfadeTimer>>>,
    generation: Arc<AtomicU64>,
}

impl CrossfadeScheduler {
    pub fn new(host: Arc<dyn PlaybackHost>, waiter: MediaReadyWaiter, events: Arc<EventBus>) -> Self {
        Self {
            host,
            waiter,
            events,
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Arm the crossfade timer for `track`, which just started on `queue`
    ///
    /// Does nothing unless the local peer is authoritative, the queue is
    /// sequential, crossfade is enabled, the queue declares a fade length and
    /// the track's transport becomes available. If the transport is not
    /// playing yet, arming waits for its next play event.
    pub async fn schedule_crossfade(&self, queue: QueueId, track: TrackId) {
        if !self.host.is_authoritative(queue) {
            debug!("Not authoritative for queue {}; no crossfade", queue);
            return;
        }
        let Some(info) = self.host.queue(queue) else {
            return;
        };
        if !info.mode.is_sequential() {
            debug!("Queue mode {:?} unsupported for crossfade", info.mode);
            return;
        }
        if !load_config(self.host.as_ref(), queue).crossfade_enabled() {
            debug!("Crossfade not enabled on \"{}\"", info.name);
            return;
        }
        if info.fade_ms == 0 {
            debug!("Fade length of \"{}\" is zero; no crossfade", info.name);
            return;
        }
        let fade_secs = info.fade_ms as f64 / 1000.0;

        let Some(transport) = self.waiter.wait_for_media(queue, track).await else {
            debug!("Media for track {} never became available; aborting crossfade", track);
            return;
        };

        let mut events = transport.subscribe();
        if transport.is_playing() {
            debug!("Track {} already playing; arming now", track);
            let fire_in = self.announce(queue, track, transport.as_ref(), fade_secs);
            self.install(queue, |this, generation| {
                tokio::spawn(async move {
                    tokio::time::sleep(secs_to_duration(fire_in)).await;
                    this.fire(queue, generation).await;
                })
            });
            return;
        }

        debug!("Waiting for play event on track {}", track);
        self.install(queue, |this, generation| {
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(TransportEvent::Play) => break,
                        Ok(TransportEvent::Pause) | Err(RecvError::Lagged(_)) => continue,
                        Ok(TransportEvent::End) | Err(RecvError::Closed) => {
                            this.retire(queue, generation);
                            return;
                        }
                    }
                }
                let fire_in = this.announce(queue, track, transport.as_ref(), fade_secs);
                tokio::time::sleep(secs_to_duration(fire_in)).await;
                this.fire(queue, generation).await;
            })
        });
    }

    /// Clear any outstanding timer for `queue`; safe when none is armed
    pub fn cancel_crossfade(&self, queue: QueueId) {
        if let Some(timer) = self.timers.lock().unwrap().remove(&queue) {
            timer.handle.abort();
            debug!("Cancelled crossfade timer for queue {}", queue);
        }
    }

    pub fn has_pending(&self, queue: QueueId) -> bool {
        self.timers.lock().unwrap().contains_key(&queue)
    }

    /// Number of live timers across all queues
    pub fn pending_count(&self) -> usize {
        self.timers.lock().unwrap().len()
    }

    /// Compute the firing delay from the transport's current fields
    fn announce(&self, queue: QueueId, track: TrackId, transport: &dyn Transport, fade_secs: f64) -> f64 {
        let duration = transport.duration_secs();
        let elapsed = transport.current_time_secs();
        let fire_in = fire_in_secs(duration, elapsed, fade_secs);

        info!(
            "Scheduling crossfade in {:.2} s (duration: {:.2} s, elapsed: {:.2} s, fade: {:.2} s)",
            fire_in, duration, elapsed, fade_secs
        );
        self.events.emit_lossy(TransitionEvent::CrossfadeArmed {
            queue_id: queue,
            track_id: track,
            fire_in_ms: (fire_in * 1000.0).round() as u64,
        });
        fire_in
    }

    /// Replace the queue's timer with the task built by `spawn`
    fn install<F>(&self, queue: QueueId, spawn: F)
    where
        F: FnOnce(Self, u64) -> JoinHandle<()>,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut timers = self.timers.lock().unwrap();
        if let Some(previous) = timers.remove(&queue) {
            previous.handle.abort();
        }
        let handle = spawn(self.clone(), generation);
        timers.insert(queue, CrossfadeTimer { generation, handle });
    }

    /// Drop the entry only if it still belongs to `generation`
    fn retire(&self, queue: QueueId, generation: u64) -> bool {
        let mut timers = self.timers.lock().unwrap();
        match timers.get(&queue) {
            Some(timer) if timer.generation == generation => {
                timers.remove(&queue);
                true
            }
            _ => false,
        }
    }

    async fn fire(&self, queue: QueueId, generation: u64) {
        // Retire first: advancing re-arms a timer for the next track
        if !self.retire(queue, generation) {
            return;
        }

        let playing = self.host.queue(queue).map(|q| q.playing).unwrap_or(false);
        if !playing {
            debug!("Queue {} stopped before crossfade fired", queue);
            return;
        }

        debug!("Crossfade firing; advancing queue {}", queue);
        self.events.emit_lossy(TransitionEvent::CrossfadeFired { queue_id: queue });
        if let Err(e) = self.host.play_next(queue).await {
            warn!("Failed to advance queue {} for crossfade: {}", queue, e);
        }
    }
}
