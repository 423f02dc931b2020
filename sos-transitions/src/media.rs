//! Transport-handle availability
//!
//! A track's transport handle is instantiated by the host some time after
//! playback was requested. Everything that reads transport fields or
//! listens to transport events waits here first.

use crate::host::{PlaybackHost, Transport};
use sos_common::{QueueId, TrackId, TransitionSettings};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Bounded poll for a track's transport handle
#[derive(Clone)]
pub struct MediaReadyWaiter {
    host: Arc<dyn PlaybackHost>,
    poll_interval: Duration,
    max_attempts: u32,
}

impl MediaReadyWaiter {
    pub fn new(host: Arc<dyn PlaybackHost>, settings: &TransitionSettings) -> Self {
        Self {
            host,
            poll_interval: Duration::from_millis(settings.media_poll_interval_ms),
            max_attempts: settings.media_max_attempts,
        }
    }

    /// Resolve the transport handle, or `None` once the poll budget is spent
    ///
    /// Returns without suspending when the handle already exists. `None` is
    /// an expected outcome; callers abort their own operation on it.
    pub async fn wait_for_media(
        &self,
        queue: QueueId,
        track: TrackId,
    ) -> Option<Arc<dyn Transport>> {
        if let Some(transport) = self.host.transport(queue, track) {
            return Some(transport);
        }

        debug!("Waiting for media on track {}", track);
        for _ in 0..self.max_attempts {
            tokio::time::sleep(self.poll_interval).await;

            if let Some(transport) = self.host.transport(queue, track) {
                debug!("Media found for track {}", track);
                return Some(transport);
            }
        }

        debug!("Timed out waiting for media for track {}", track);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::PlaybackMode;
    use crate::sim::SimHost;

    fn settings() -> TransitionSettings {
        TransitionSettings::default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_handle_resolves_immediately() {
        let host = SimHost::new();
        let queue = host.add_queue("Ambience", PlaybackMode::Sequential, 0);
        let track = host.add_track(queue, "Rain", 30.0);
        host.play_now(queue, track);

        let waiter = MediaReadyWaiter::new(host.clone(), &settings());
        let start = tokio::time::Instant::now();

        assert!(waiter.wait_for_media(queue, track).await.is_some());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_handle_is_found_by_polling() {
        let host = SimHost::new();
        host.set_media_delay(Duration::from_millis(420));
        let queue = host.add_queue("Ambience", PlaybackMode::Sequential, 0);
        let track = host.add_track(queue, "Rain", 30.0);
        host.play_now(queue, track);

        let waiter = MediaReadyWaiter::new(host.clone(), &settings());
        let start = tokio::time::Instant::now();

        assert!(waiter.wait_for_media(queue, track).await.is_some());
        // Found on the first poll after the delay elapsed
        assert_eq!(start.elapsed(), Duration::from_millis(450));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_handle_times_out_after_budget() {
        let host = SimHost::new();
        let queue = host.add_queue("Ambience", PlaybackMode::Sequential, 0);
        let track = host.add_track(queue, "Never loads", 30.0);

        let waiter = MediaReadyWaiter::new(host.clone(), &settings());
        let start = tokio::time::Instant::now();

        assert!(waiter.wait_for_media(queue, track).await.is_none());
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }
}
