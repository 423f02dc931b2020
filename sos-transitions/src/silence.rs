//! Silent gaps between tracks
//!
//! When a track ends on a silence-enabled queue, a synthetic near-silent
//! gap track is inserted and played for the configured (or randomly chosen)
//! duration. When the gap expires it is deleted and the caller learns that
//! it may advance the queue; when a stop cancels the gap, the caller learns
//! that it must not.
//!
//! **Per-queue state:** at most one pending gap transition exists per queue.
//! Registering a new one cancels the previous one.

use crate::config::{read_silence_params, SilenceMode, SilenceParams};
use crate::host::{GapMetadata, NewTrack, PlaybackHost, PlaybackMode};
use crate::media::MediaReadyWaiter;
use rand::Rng;
use sos_common::time::{epoch_millis, millis_to_duration};
use sos_common::{EventBus, QueueId, TrackId, TransitionEvent, TransitionSettings};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Pick a random gap length between `min_ms` and `max_ms`
///
/// Both bounds are quantized to `step_ms` (`ceil(min/step)` and
/// `floor(max/step)`) and a step index is drawn uniformly from the inclusive
/// range. When no step fits in the range the minimum is returned as is.
pub fn random_gap_ms<R: Rng + ?Sized>(min_ms: u64, max_ms: u64, step_ms: u64, rng: &mut R) -> u64 {
    let step = step_ms.max(1);
    let min = min_ms;
    let max = max_ms.max(min);

    let min_step = min.div_ceil(step);
    let max_step = max / step;

    if max_step < min_step {
        debug!(
            "Random gap range collapsed (min = {}, max = {}, step = {}); using {} ms",
            min, max, step, min
        );
        return min;
    }

    let chosen = rng.gen_range(min_step..=max_step) * step;
    debug!("Random gap selected: {} ms (range: {}-{}, step = {} ms)", chosen, min, max, step);
    chosen
}

/// Gap length for one transition
pub fn gap_duration_ms(params: &SilenceParams, settings: &TransitionSettings) -> u64 {
    match params.mode {
        SilenceMode::Static => params.duration_ms,
        SilenceMode::Random => {
            if params.max_delay_ms > settings.high_delay_warning_ms {
                warn!(
                    "Unusually high delay range: {}-{} ms",
                    params.min_delay_ms, params.max_delay_ms
                );
            }
            random_gap_ms(
                params.min_delay_ms,
                params.max_delay_ms,
                settings.gap_step_ms,
                &mut rand::thread_rng(),
            )
        }
    }
}

/// Countdown readout for a playing gap track
///
/// The gap track plays a tiny clip, so its transport's own duration and
/// position are meaningless. Display collaborators read this view instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapCountdown {
    pub track_id: TrackId,
    pub duration_ms: u64,
    started: Instant,
}

impl GapCountdown {
    pub fn new(track_id: TrackId, duration_ms: u64, started: Instant) -> Self {
        Self { track_id, duration_ms, started }
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_ms as f64 / 1000.0
    }

    pub fn current_time_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn remaining(&self) -> Duration {
        millis_to_duration(self.duration_ms).saturating_sub(self.started.elapsed())
    }
}

/// A pending gap transition
struct TransitionState {
    generation: u64,
    /// Set once the gap document exists
    gap_track: Option<TrackId>,
    timer: Option<JoinHandle<()>>,
    countdown: Option<GapCountdown>,
    cancelled: Arc<AtomicBool>,
    /// Settles the `play_silence` call; `true` means cancelled
    resolve: Option<oneshot::Sender<bool>>,
}

/// Inserts and retires silent gap tracks
#[derive(Clone)]
pub struct SilenceGapScheduler {
    host: Arc<dyn PlaybackHost>,
    waiter: MediaReadyWaiter,
    settings: Arc<TransitionSettings>,
    events: Arc<EventBus>,
    states: Arc<Mutex<HashMap<QueueId, TransitionState>>>,
    /// Gap tracks whose end was caused by a cancellation
    cancelled_gaps: Arc<Mutex<HashSet<TrackId>>>,
    generation: Arc<AtomicU64>,
}

impl SilenceGapScheduler {
    pub fn new(
        host: Arc<dyn PlaybackHost>,
        waiter: MediaReadyWaiter,
        settings: Arc<TransitionSettings>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            host,
            waiter,
            settings,
            events,
            states: Arc::new(Mutex::new(HashMap::new())),
            cancelled_gaps: Arc::new(Mutex::new(HashSet::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Play a silent gap after the queue's current track
    ///
    /// Resolves `true` if the gap was cancelled, `false` if it expired
    /// naturally or no gap was needed.
    pub async fn play_silence(&self, queue: QueueId) -> bool {
        let after = self.host.playing_track(queue);
        self.play_silence_after(queue, after).await
    }

    /// Play a silent gap inserted after `after` in the playback order
    pub async fn play_silence_after(&self, queue: QueueId, after: Option<TrackId>) -> bool {
        // Only the authoritative peer creates gap documents
        if !self.host.is_authoritative(queue) {
            return false;
        }
        let Some(info) = self.host.queue(queue) else {
            return false;
        };
        if info.mode == PlaybackMode::Simultaneous {
            debug!("Simultaneous mode; skipping silence on \"{}\"", info.name);
            return false;
        }

        let params = read_silence_params(&self.host.flags(queue));
        let gap_ms = gap_duration_ms(&params, &self.settings);
        if gap_ms == 0 {
            debug!("Silence mode {:?}; gap skipped (duration is zero)", params.mode);
            return false;
        }

        let (resolve, settled) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let generation = self.register(queue, Arc::clone(&cancelled), resolve);

        let started = Instant::now();
        let gap = NewTrack {
            name: self.settings.gap_name.clone(),
            path: self.settings.gap_media_path.clone(),
            volume: self.settings.gap_volume,
            repeat: false,
            insert_after: after,
            gap: Some(GapMetadata {
                duration_ms: gap_ms,
                started_at_epoch_ms: epoch_millis(),
            }),
        };

        let gap_track = match self.host.create_track(queue, gap).await {
            Ok(track) => track,
            Err(e) => {
                warn!("Failed to create silent gap on \"{}\": {}", info.name, e);
                self.retire(queue, generation);
                return cancelled.load(Ordering::SeqCst);
            }
        };

        if !self.attach_gap(queue, generation, gap_track, gap_ms) {
            // A stop arrived while the gap document was being created
            debug!("Gap on \"{}\" cancelled during creation", info.name);
            self.delete_gap(queue, gap_track).await;
            return settled.await.unwrap_or(true);
        }

        info!("Playing silence for {} ms in \"{}\"", gap_ms, info.name);
        self.events.emit_lossy(TransitionEvent::GapStarted {
            queue_id: queue,
            track_id: gap_track,
            duration_ms: gap_ms,
            timestamp: sos_common::time::now(),
        });

        if let Err(e) = self.host.play_track(queue, gap_track).await {
            warn!("Failed to start silent gap on \"{}\": {}", info.name, e);
        }
        self.spawn_countdown(queue, generation, gap_track, gap_ms, started);

        // A dropped resolver means the state was discarded, not expired
        settled.await.unwrap_or(true)
    }

    /// Cancel the pending gap of `queue`
    ///
    /// The timer is retired and the cancellation flag set before the first
    /// suspension point. Returns whether a gap was pending.
    pub async fn cancel_silent_gap(&self, queue: QueueId) -> bool {
        let Some(state) = self.states.lock().unwrap().remove(&queue) else {
            debug!("No active silence state for queue {}", queue);
            return false;
        };
        self.finish_cancel(queue, state).await;
        true
    }

    /// Whether the end of `track` was caused by a cancellation; clears the mark
    pub fn take_cancelled_marker(&self, track: TrackId) -> bool {
        self.cancelled_gaps.lock().unwrap().remove(&track)
    }

    /// Gap tracks cancelled whose end has not been reported yet
    pub fn cancelled_marker_count(&self) -> usize {
        self.cancelled_gaps.lock().unwrap().len()
    }

    /// Drop the cancellation mark of a gap track the host deleted
    pub fn forget_track(&self, track: TrackId) {
        self.cancelled_gaps.lock().unwrap().remove(&track);
    }

    pub fn has_pending(&self, queue: QueueId) -> bool {
        self.states.lock().unwrap().contains_key(&queue)
    }

    /// Gap track of the pending transition, once created
    pub fn pending_gap_track(&self, queue: QueueId) -> Option<TrackId> {
        self.states.lock().unwrap().get(&queue).and_then(|s| s.gap_track)
    }

    pub fn countdown(&self, queue: QueueId) -> Option<GapCountdown> {
        self.states.lock().unwrap().get(&queue).and_then(|s| s.countdown)
    }

    /// Drop the pending transition without touching host documents
    ///
    /// The waiting `play_silence` call resolves `true`.
    pub fn forget_queue(&self, queue: QueueId) {
        if let Some(state) = self.states.lock().unwrap().remove(&queue) {
            state.cancelled.store(true, Ordering::SeqCst);
            if let Some(timer) = state.timer {
                timer.abort();
            }
        }
    }

    /// Insert a fresh transition, superseding any previous one
    fn register(
        &self,
        queue: QueueId,
        cancelled: Arc<AtomicBool>,
        resolve: oneshot::Sender<bool>,
    ) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.states.lock().unwrap().insert(
            queue,
            TransitionState {
                generation,
                gap_track: None,
                timer: None,
                countdown: None,
                cancelled,
                resolve: Some(resolve),
            },
        );

        if let Some(previous) = previous {
            debug!("Superseding pending gap on queue {}", queue);
            let this = self.clone();
            tokio::spawn(async move { this.finish_cancel(queue, previous).await });
        }
        generation
    }

    /// Record the created gap track and arm its expiry timer
    ///
    /// Returns `false` if the transition was cancelled meanwhile.
    fn attach_gap(&self, queue: QueueId, generation: u64, gap_track: TrackId, gap_ms: u64) -> bool {
        let mut states = self.states.lock().unwrap();
        let Some(state) = states.get_mut(&queue).filter(|s| s.generation == generation) else {
            return false;
        };
        if state.cancelled.load(Ordering::SeqCst) {
            return false;
        }

        let this = self.clone();
        state.gap_track = Some(gap_track);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(millis_to_duration(gap_ms)).await;
            this.expire(queue, generation).await;
        }));
        true
    }

    /// Wait for the gap's transport, then publish its countdown view
    fn spawn_countdown(
        &self,
        queue: QueueId,
        generation: u64,
        gap_track: TrackId,
        gap_ms: u64,
        started: Instant,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            if this.waiter.wait_for_media(queue, gap_track).await.is_none() {
                debug!("No media for silent gap {}; countdown unavailable", gap_track);
                return;
            }
            let mut states = this.states.lock().unwrap();
            if let Some(state) = states.get_mut(&queue).filter(|s| s.generation == generation) {
                state.countdown = Some(GapCountdown::new(gap_track, gap_ms, started));
            }
        });
    }

    fn retire(&self, queue: QueueId, generation: u64) -> Option<TransitionState> {
        let mut states = self.states.lock().unwrap();
        match states.get(&queue) {
            Some(state) if state.generation == generation => states.remove(&queue),
            _ => None,
        }
    }

    /// Natural expiry: tear the gap down, then resolve `false`
    ///
    /// The state stays registered while the gap is deleted, so a stop
    /// arriving meanwhile still cancels it and resolves `true`.
    async fn expire(&self, queue: QueueId, generation: u64) {
        let gap_track = {
            let states = self.states.lock().unwrap();
            match states.get(&queue) {
                Some(state) if state.generation == generation => state.gap_track,
                _ => return,
            }
        };
        debug!("Silent gap expired for queue {}", queue);

        if let Some(track) = gap_track {
            self.delete_gap(queue, track).await;
        }

        let Some(mut state) = self.retire(queue, generation) else {
            debug!("Gap on queue {} was cancelled during teardown", queue);
            return;
        };
        self.events.emit_lossy(TransitionEvent::GapExpired {
            queue_id: queue,
            track_id: state.gap_track,
        });
        if let Some(resolve) = state.resolve.take() {
            let _ = resolve.send(false);
        }
    }

    async fn finish_cancel(&self, queue: QueueId, mut state: TransitionState) {
        state.cancelled.store(true, Ordering::SeqCst);
        if let Some(timer) = state.timer.take() {
            timer.abort();
            debug!("Cleared gap timer for queue {}", queue);
        }

        if let Some(track) = state.gap_track {
            self.cancelled_gaps.lock().unwrap().insert(track);
            if self.host.is_authoritative(queue) {
                self.delete_gap(queue, track).await;
            }
        }

        self.events.emit_lossy(TransitionEvent::GapCancelled {
            queue_id: queue,
            track_id: state.gap_track,
        });
        if let Some(resolve) = state.resolve.take() {
            let _ = resolve.send(true);
            debug!("Resolved silence for queue {} as cancelled", queue);
        }
    }

    /// Best-effort delete; failures are logged, never propagated
    async fn delete_gap(&self, queue: QueueId, track: TrackId) {
        match self.host.delete_track(queue, track).await {
            Ok(()) => debug!("Deleted silent gap {}", track),
            Err(e) => warn!("Failed to delete silent gap {}: {}", track, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_equal_bounds_always_return_that_value() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            assert_eq!(random_gap_ms(200, 200, 100, &mut rng), 200);
        }
    }

    #[test]
    fn test_values_are_step_aligned_within_bounds() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let gap = random_gap_ms(150, 1250, 100, &mut rng);
            assert!((200..=1200).contains(&gap), "gap {} out of range", gap);
            assert_eq!(gap % 100, 0);
        }
    }

    #[test]
    fn test_collapsed_range_falls_back_to_minimum() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(random_gap_ms(130, 170, 100, &mut rng), 130);
    }

    #[test]
    fn test_inverted_bounds_use_minimum_as_maximum() {
        let mut rng = StdRng::seed_from_u64(5);
        assert_eq!(random_gap_ms(500, 100, 100, &mut rng), 500);
    }

    #[test]
    fn test_static_duration_ignores_delay_bounds() {
        let params = SilenceParams {
            mode: SilenceMode::Static,
            duration_ms: 1500,
            min_delay_ms: 100,
            max_delay_ms: 200,
        };
        assert_eq!(gap_duration_ms(&params, &TransitionSettings::default()), 1500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_gap_is_marked_once() {
        use crate::sim::SimHost;
        use serde_json::json;

        let sim = SimHost::new();
        let queue = sim.add_queue("Crypt", PlaybackMode::Sequential, 0);
        let track = sim.add_track(queue, "Bells", 30.0);
        sim.set_flags(
            queue,
            json!({ "silenceEnabled": true, "silenceDuration": 1000 }).as_object().cloned().unwrap(),
        );
        sim.play_now(queue, track);

        let settings = TransitionSettings::default();
        let host: Arc<dyn PlaybackHost> = sim.clone();
        let scheduler = SilenceGapScheduler::new(
            Arc::clone(&host),
            MediaReadyWaiter::new(host, &settings),
            Arc::new(settings),
            Arc::new(EventBus::new(16)),
        );

        let pending = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.play_silence(queue).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        let gap = scheduler.pending_gap_track(queue).unwrap();

        assert!(scheduler.cancel_silent_gap(queue).await);
        assert!(pending.await.unwrap());
        assert!(scheduler.take_cancelled_marker(gap));
        assert!(!scheduler.take_cancelled_marker(gap));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_reports_progress() {
        let countdown = GapCountdown::new(TrackId::generate(), 1500, Instant::now());
        tokio::time::advance(Duration::from_millis(500)).await;

        assert_eq!(countdown.duration_secs(), 1.5);
        assert!((countdown.current_time_secs() - 0.5).abs() < 1e-9);
        assert_eq!(countdown.remaining(), Duration::from_millis(1000));
    }
}
