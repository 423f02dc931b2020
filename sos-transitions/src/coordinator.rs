//! Transition coordinator
//!
//! Owns all per-queue scheduling state and routes the host's playback
//! lifecycle hooks to the schedulers:
//!
//! | Hook | Authoritative peer | Other peers |
//! |---|---|---|
//! | track started | fade-in, cancel + re-arm crossfade | cancel crossfade |
//! | transport started (first play) | pre-mute | pre-mute, fade-in |
//! | track ended (gap track) | clear cancellation mark | clear cancellation mark |
//! | track ended, silence active, queue playing | silent gap (none on simultaneous queues), then advance | suppress default |
//! | track ended, silence inactive | host default | host default |
//! | queue stopped | cancel gap and crossfade | cancel gap and crossfade |
//! | track stopped (the gap track) | cancel gap | cancel gap |
//!
//! Only the authoritative peer mutates host documents or advances queues.
//! Cancelling touches local state only, so every peer runs it.

use crate::config::{self, TransitionConfig};
use crate::crossfade::CrossfadeScheduler;
use crate::fade_in::FadeController;
use crate::host::PlaybackHost;
use crate::media::MediaReadyWaiter;
use crate::silence::{GapCountdown, SilenceGapScheduler};
use sos_common::{EventBus, QueueId, Result, TrackId, TransitionEvent, TransitionSettings};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How the host should treat a natural track end
#[derive(Debug)]
pub enum EndDisposition {
    /// Run the host's default advancement
    Proceed,
    /// Skip the default; nothing further happens
    Suppress,
    /// Skip the default; a silent gap is running and decides what follows
    Gap(JoinHandle<GapOutcome>),
}

/// What happened after a silent gap settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapOutcome {
    /// The gap expired and the queue moved on to this track
    Advanced(TrackId),
    /// The gap expired and no track followed, so the queue was stopped
    Stopped,
    /// A stop cancelled the gap; nothing was advanced
    Cancelled,
    /// The gap expired but the host refused to advance or stop
    AdvanceFailed,
}

/// Routes host lifecycle hooks to the transition schedulers
#[derive(Clone)]
pub struct TransitionCoordinator {
    host: Arc<dyn PlaybackHost>,
    events: Arc<EventBus>,
    fade: FadeController,
    crossfade: CrossfadeScheduler,
    silence: SilenceGapScheduler,
    /// Bumped on every queue stop; a gap requested before a stop is dropped
    stop_epochs: Arc<Mutex<HashMap<QueueId, u64>>>,
}

impl TransitionCoordinator {
    pub fn new(host: Arc<dyn PlaybackHost>, settings: TransitionSettings) -> Self {
        let settings = Arc::new(settings);
        let events = Arc::new(EventBus::new(settings.event_capacity));
        let waiter = MediaReadyWaiter::new(Arc::clone(&host), &settings);

        Self {
            fade: FadeController::new(Arc::clone(&host), waiter.clone(), Arc::clone(&events)),
            crossfade: CrossfadeScheduler::new(Arc::clone(&host), waiter.clone(), Arc::clone(&events)),
            silence: SilenceGapScheduler::new(Arc::clone(&host), waiter, settings, Arc::clone(&events)),
            host,
            events,
            stop_epochs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.events.subscribe()
    }

    /// A track was started on `queue` (play track, advance, play all)
    pub fn on_track_started(&self, queue: QueueId, track: TrackId) -> JoinHandle<()> {
        debug!("Track {} started on queue {}", track, queue);
        self.crossfade.cancel_crossfade(queue);

        let this = self.clone();
        tokio::spawn(async move {
            if this.host.is_authoritative(queue) {
                tokio::join!(
                    this.fade.apply_fade_in(queue, track),
                    this.crossfade.schedule_crossfade(queue, track),
                );
            }
        })
    }

    /// The host advanced `queue` on its own; re-arm for whatever now plays
    pub fn on_queue_advanced(&self, queue: QueueId) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            // Let the host settle which track is playing
            tokio::task::yield_now().await;

            match this.host.playing_track(queue) {
                Some(track) => {
                    debug!("Queue {} advanced to track {}", queue, track);
                    this.crossfade.cancel_crossfade(queue);
                    this.crossfade.schedule_crossfade(queue, track).await;
                }
                None => debug!("Queue {} advanced but nothing is playing", queue),
            }
        })
    }

    /// A track's transport started or resumed, on any peer
    ///
    /// On the first play of a non-gap track the transport is muted when a
    /// fade-in is configured. Peers without authority run the fade-in here,
    /// the authoritative peer runs it from `on_track_started`.
    pub async fn on_transport_started(&self, queue: QueueId, track: TrackId) {
        let Some(info) = self.host.track(queue, track) else {
            return;
        };
        if info.is_silence_gap() || info.paused_time_secs > 0.0 {
            return;
        }
        if self.config(queue).fade_in_ms == 0 {
            return;
        }

        if let Some(transport) = self.host.transport(queue, track) {
            transport.set_volume(0.0);
        }
        if !self.host.is_authoritative(queue) {
            self.fade.apply_fade_in(queue, track).await;
        }
    }

    /// A track on `queue` reached its natural end
    pub fn on_track_ended(&self, queue: QueueId, track: TrackId) -> EndDisposition {
        // A cancelled gap is usually deleted before its end is reported
        if self.silence.take_cancelled_marker(track) {
            debug!("Silent gap {} was cancelled", track);
            return EndDisposition::Suppress;
        }

        let Some(info) = self.host.track(queue, track) else {
            return EndDisposition::Proceed;
        };

        if info.is_silence_gap() {
            debug!("Silent gap \"{}\" completed naturally", info.name);
            // Never advance on a gap track
            return EndDisposition::Suppress;
        }

        if !self.config(queue).silence_enabled() {
            debug!("Silence disabled; continuing normally");
            return EndDisposition::Proceed;
        }

        let Some(queue_info) = self.host.queue(queue) else {
            return EndDisposition::Proceed;
        };
        if !queue_info.playing {
            debug!("Queue \"{}\" already stopped; skipping gap", queue_info.name);
            return EndDisposition::Proceed;
        }

        if !self.host.is_authoritative(queue) {
            return EndDisposition::Suppress;
        }

        debug!("Injecting silent gap after \"{}\"", info.name);
        let epoch = self.stop_epoch(queue);
        let this = self.clone();
        EndDisposition::Gap(tokio::spawn(async move {
            if this.stop_epoch(queue) != epoch {
                debug!("Queue {} stopped before its gap began", queue);
                return GapOutcome::Cancelled;
            }
            let cancelled = this.silence.play_silence_after(queue, Some(track)).await;
            debug!("Gap settled for queue {} (cancelled = {})", queue, cancelled);
            if cancelled || this.stop_epoch(queue) != epoch {
                GapOutcome::Cancelled
            } else {
                this.advance_after(queue, track).await
            }
        }))
    }

    /// The whole queue is being stopped
    pub async fn on_queue_stopped(&self, queue: QueueId) {
        *self.stop_epochs.lock().unwrap().entry(queue).or_insert(0) += 1;
        self.crossfade.cancel_crossfade(queue);
        self.silence.cancel_silent_gap(queue).await;
        debug!("Queue {} stopped; transitions cleared", queue);
    }

    /// A single track of `queue` was stopped
    pub async fn on_track_stopped(&self, queue: QueueId, track: TrackId) {
        if !self.silence.has_pending(queue) {
            return;
        }

        let is_gap = self.silence.pending_gap_track(queue) == Some(track)
            || self
                .host
                .track(queue, track)
                .map(|t| t.is_silence_gap())
                .unwrap_or(false);
        let queue_playing = self.host.queue(queue).map(|q| q.playing).unwrap_or(false);

        if is_gap || !queue_playing {
            self.silence.cancel_silent_gap(queue).await;
        }
    }

    /// Play a silent gap on `queue` now; `true` if it was cancelled
    pub async fn play_silence(&self, queue: QueueId) -> bool {
        self.silence.play_silence(queue).await
    }

    /// Cancel the pending gap on `queue`, if any
    pub async fn cancel_silent_gap(&self, queue: QueueId) -> bool {
        self.silence.cancel_silent_gap(queue).await
    }

    pub async fn schedule_crossfade(&self, queue: QueueId, track: TrackId) {
        self.crossfade.schedule_crossfade(queue, track).await
    }

    pub fn cancel_crossfade(&self, queue: QueueId) {
        self.crossfade.cancel_crossfade(queue)
    }

    pub async fn apply_fade_in(&self, queue: QueueId, track: TrackId) {
        self.fade.apply_fade_in(queue, track).await
    }

    /// Countdown view of the gap currently playing on `queue`
    pub fn gap_countdown(&self, queue: QueueId) -> Option<GapCountdown> {
        self.silence.countdown(queue)
    }

    pub fn has_pending_gap(&self, queue: QueueId) -> bool {
        self.silence.has_pending(queue)
    }

    pub fn has_pending_crossfade(&self, queue: QueueId) -> bool {
        self.crossfade.has_pending(queue)
    }

    /// Live crossfade timers across all queues
    pub fn pending_crossfades(&self) -> usize {
        self.crossfade.pending_count()
    }

    /// Transition configuration of `queue` with defaults applied
    pub fn config(&self, queue: QueueId) -> TransitionConfig {
        config::load_config(self.host.as_ref(), queue)
    }

    /// Persist a configuration; silence and crossfade stay exclusive
    pub async fn write_config(&self, queue: QueueId, config: TransitionConfig) -> Result<TransitionConfig> {
        config::write_config(self.host.as_ref(), queue, config).await
    }

    /// Drop all scheduling state of a queue the host deleted
    pub fn forget_queue(&self, queue: QueueId) {
        self.stop_epochs.lock().unwrap().remove(&queue);
        self.crossfade.cancel_crossfade(queue);
        self.silence.forget_queue(queue);
    }

    /// Gap tracks cancelled whose end has not been reported yet
    pub fn cancelled_gap_markers(&self) -> usize {
        self.silence.cancelled_marker_count()
    }

    /// Drop fade state and gap marks of a track the host deleted
    pub fn forget_track(&self, track: TrackId) {
        self.fade.forget_track(track);
        self.silence.forget_track(track);
    }

    fn stop_epoch(&self, queue: QueueId) -> u64 {
        self.stop_epochs.lock().unwrap().get(&queue).copied().unwrap_or(0)
    }

    /// Play the track following `ended`, or stop if there is none
    async fn advance_after(&self, queue: QueueId, ended: TrackId) -> GapOutcome {
        if !self.host.is_authoritative(queue) {
            return GapOutcome::Cancelled;
        }
        let Some(info) = self.host.queue(queue) else {
            return GapOutcome::AdvanceFailed;
        };

        let start = info
            .playback_order
            .iter()
            .position(|id| *id == ended)
            .map(|i| i + 1)
            .unwrap_or(0);
        let next = info.playback_order[start..]
            .iter()
            .copied()
            .find(|id| {
                self.host
                    .track(queue, *id)
                    .map(|t| !t.is_silence_gap())
                    .unwrap_or(false)
            });

        match next {
            Some(track) => {
                debug!("Advancing queue \"{}\" to track {}", info.name, track);
                match self.host.play_track(queue, track).await {
                    Ok(()) => {
                        self.events.emit_lossy(TransitionEvent::QueueAdvanced { queue_id: queue, track_id: track });
                        GapOutcome::Advanced(track)
                    }
                    Err(e) => {
                        warn!("Failed to advance queue \"{}\": {}", info.name, e);
                        GapOutcome::AdvanceFailed
                    }
                }
            }
            None => {
                debug!("No track after the gap; stopping queue \"{}\"", info.name);
                match self.host.stop_all(queue).await {
                    Ok(()) => {
                        self.events.emit_lossy(TransitionEvent::QueueStopped { queue_id: queue });
                        GapOutcome::Stopped
                    }
                    Err(e) => {
                        warn!("Failed to stop queue \"{}\": {}", info.name, e);
                        GapOutcome::AdvanceFailed
                    }
                }
            }
        }
    }
}
