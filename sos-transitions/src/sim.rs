//! In-memory playback host
//!
//! `SimHost` implements [`PlaybackHost`] without audio: tracks have a
//! declared duration and a `SimTransport` whose clock is the tokio clock, so
//! paused-time tests and the `sos-sim` binary drive it deterministically.
//!
//! Beyond the trait it offers controls a real host would not expose:
//! media-ready delay, autoplay, delete failure injection, and call counters.

use crate::host::{
    FlagMap, GapMetadata, NewTrack, PlaybackHost, PlaybackMode, QueueInfo, TrackInfo, Transport,
    TransportEvent,
};
use async_trait::async_trait;
use sos_common::{Error, QueueId, Result, TrackId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;

/// A recorded `Transport::fade` call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeCall {
    pub target: f32,
    pub duration: Duration,
    pub from: f32,
    pub at: Instant,
}

struct TransportClock {
    playing: bool,
    /// Offset accumulated before the current play run
    offset: Duration,
    /// Start of the current play run
    resumed_at: Option<Instant>,
}

/// Simulated transport handle
pub struct SimTransport {
    duration_secs: f64,
    clock: Mutex<TransportClock>,
    volume: Mutex<f32>,
    fades: Mutex<Vec<FadeCall>>,
    events: broadcast::Sender<TransportEvent>,
}

impl SimTransport {
    pub fn new(duration_secs: f64) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            duration_secs,
            clock: Mutex::new(TransportClock {
                playing: false,
                offset: Duration::ZERO,
                resumed_at: None,
            }),
            volume: Mutex::new(1.0),
            fades: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn play(&self) {
        {
            let mut clock = self.clock.lock().unwrap();
            if clock.playing {
                return;
            }
            clock.playing = true;
            clock.resumed_at = Some(Instant::now());
        }
        let _ = self.events.send(TransportEvent::Play);
    }

    pub fn pause(&self) {
        {
            let mut clock = self.clock.lock().unwrap();
            if !clock.playing {
                return;
            }
            Self::settle(&mut clock);
        }
        let _ = self.events.send(TransportEvent::Pause);
    }

    /// Stop playback and publish `End`
    pub fn end(&self) {
        Self::settle(&mut self.clock.lock().unwrap());
        let _ = self.events.send(TransportEvent::End);
    }

    /// Move the playback offset
    pub fn seek(&self, offset: Duration) {
        let mut clock = self.clock.lock().unwrap();
        clock.offset = offset;
        if clock.playing {
            clock.resumed_at = Some(Instant::now());
        }
    }

    pub fn fades(&self) -> Vec<FadeCall> {
        self.fades.lock().unwrap().clone()
    }

    fn settle(clock: &mut TransportClock) {
        if let Some(resumed_at) = clock.resumed_at.take() {
            clock.offset += resumed_at.elapsed();
        }
        clock.playing = false;
    }
}

impl Transport for SimTransport {
    fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    fn current_time_secs(&self) -> f64 {
        let clock = self.clock.lock().unwrap();
        let running = clock.resumed_at.map(|t| t.elapsed()).unwrap_or_default();
        (clock.offset + running).as_secs_f64()
    }

    fn is_playing(&self) -> bool {
        self.clock.lock().unwrap().playing
    }

    fn volume(&self) -> f32 {
        *self.volume.lock().unwrap()
    }

    fn set_volume(&self, volume: f32) {
        *self.volume.lock().unwrap() = volume.clamp(0.0, 1.0);
    }

    fn fade(&self, target: f32, duration: Duration, from: f32) {
        self.fades.lock().unwrap().push(FadeCall {
            target,
            duration,
            from,
            at: Instant::now(),
        });
        // Ramps are not simulated; the volume lands on the target
        self.set_volume(target);
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

struct SimTrack {
    id: TrackId,
    name: String,
    path: String,
    volume: f32,
    repeat: bool,
    duration_secs: f64,
    gap: Option<GapMetadata>,
    playing: bool,
    transport: Option<Arc<SimTransport>>,
    media_ready_at: Option<Instant>,
}

impl SimTrack {
    fn info(&self) -> TrackInfo {
        let paused_time_secs = match &self.transport {
            Some(transport) if !transport.is_playing() => transport.current_time_secs(),
            _ => 0.0,
        };
        TrackInfo {
            id: self.id,
            name: self.name.clone(),
            path: self.path.clone(),
            volume: self.volume,
            repeat: self.repeat,
            playing: self.playing,
            paused_time_secs,
            gap: self.gap,
        }
    }

    fn stop(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.end();
        }
        self.playing = false;
        self.media_ready_at = None;
    }
}

struct SimQueue {
    name: String,
    mode: PlaybackMode,
    fade_ms: u64,
    flags: FlagMap,
    tracks: Vec<SimTrack>,
    last_started: Option<TrackId>,
}

impl SimQueue {
    fn track_mut(&mut self, id: TrackId) -> Option<&mut SimTrack> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    fn is_playing(&self) -> bool {
        self.tracks.iter().any(|t| t.playing)
    }
}

#[derive(Default)]
struct SimCounters {
    play_next_calls: usize,
    stop_all_calls: usize,
    started: Vec<TrackId>,
    created: Vec<TrackId>,
    deleted: Vec<TrackId>,
}

/// In-memory host with one local peer
pub struct SimHost {
    queues: Mutex<HashMap<QueueId, SimQueue>>,
    counters: Mutex<SimCounters>,
    authoritative: AtomicBool,
    autoplay: AtomicBool,
    fail_deletes: AtomicBool,
    media_delay: Mutex<Duration>,
}

impl SimHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queues: Mutex::new(HashMap::new()),
            counters: Mutex::new(SimCounters::default()),
            authoritative: AtomicBool::new(true),
            autoplay: AtomicBool::new(true),
            fail_deletes: AtomicBool::new(false),
            media_delay: Mutex::new(Duration::ZERO),
        })
    }

    pub fn add_queue(&self, name: &str, mode: PlaybackMode, fade_ms: u64) -> QueueId {
        let id = QueueId::generate();
        self.queues.lock().unwrap().insert(
            id,
            SimQueue {
                name: name.to_string(),
                mode,
                fade_ms,
                flags: FlagMap::new(),
                tracks: Vec::new(),
                last_started: None,
            },
        );
        id
    }

    pub fn add_track(&self, queue: QueueId, name: &str, duration_secs: f64) -> TrackId {
        let id = TrackId::generate();
        if let Some(q) = self.queues.lock().unwrap().get_mut(&queue) {
            q.tracks.push(SimTrack {
                id,
                name: name.to_string(),
                path: format!("{}.ogg", name.to_lowercase().replace(' ', "-")),
                volume: 1.0,
                repeat: false,
                duration_secs,
                gap: None,
                playing: false,
                transport: None,
                media_ready_at: None,
            });
        }
        id
    }

    pub fn set_track_volume(&self, queue: QueueId, track: TrackId, volume: f32) {
        if let Some(t) = self.queues.lock().unwrap().get_mut(&queue).and_then(|q| q.track_mut(track)) {
            t.volume = volume;
        }
    }

    /// Replace the queue's flag store
    pub fn set_flags(&self, queue: QueueId, flags: FlagMap) {
        if let Some(q) = self.queues.lock().unwrap().get_mut(&queue) {
            q.flags = flags;
        }
    }

    pub fn set_authoritative(&self, authoritative: bool) {
        self.authoritative.store(authoritative, Ordering::SeqCst);
    }

    /// Whether new transports start playing as soon as they exist
    pub fn set_autoplay(&self, autoplay: bool) {
        self.autoplay.store(autoplay, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Delay between a play request and the transport becoming visible
    pub fn set_media_delay(&self, delay: Duration) {
        *self.media_delay.lock().unwrap() = delay;
    }

    /// Start a track synchronously
    pub fn play_now(&self, queue: QueueId, track: TrackId) -> bool {
        let delay = *self.media_delay.lock().unwrap();
        let autoplay = self.autoplay.load(Ordering::SeqCst);
        let mut queues = self.queues.lock().unwrap();
        let Some(q) = queues.get_mut(&queue) else {
            return false;
        };
        if q.track_mut(track).is_none() {
            return false;
        }

        if q.mode != PlaybackMode::Simultaneous {
            for other in q.tracks.iter_mut().filter(|t| t.id != track && t.playing) {
                other.stop();
            }
        }

        let Some(t) = q.track_mut(track) else {
            return false;
        };
        t.stop();
        let transport = Arc::new(SimTransport::new(t.duration_secs));
        transport.set_volume(t.volume);
        if autoplay {
            transport.play();
        }
        t.transport = Some(transport);
        t.media_ready_at = Some(Instant::now() + delay);
        t.playing = true;
        q.last_started = Some(track);
        drop(queues);

        debug!("Sim: started track {}", track);
        self.counters.lock().unwrap().started.push(track);
        true
    }

    /// Natural end of a track: the transport ends and the track stops
    pub fn finish_track(&self, queue: QueueId, track: TrackId) {
        if let Some(t) = self.queues.lock().unwrap().get_mut(&queue).and_then(|q| q.track_mut(track)) {
            t.stop();
        }
    }

    /// The transport of a started track, ignoring the media delay
    pub fn sim_transport(&self, queue: QueueId, track: TrackId) -> Option<Arc<SimTransport>> {
        self.queues
            .lock()
            .unwrap()
            .get_mut(&queue)
            .and_then(|q| q.track_mut(track))
            .and_then(|t| t.transport.clone())
    }

    pub fn tracks(&self, queue: QueueId) -> Vec<TrackInfo> {
        self.queues
            .lock()
            .unwrap()
            .get(&queue)
            .map(|q| q.tracks.iter().map(SimTrack::info).collect())
            .unwrap_or_default()
    }

    pub fn gap_tracks(&self, queue: QueueId) -> Vec<TrackInfo> {
        self.tracks(queue).into_iter().filter(TrackInfo::is_silence_gap).collect()
    }

    pub fn is_queue_playing(&self, queue: QueueId) -> bool {
        self.queues.lock().unwrap().get(&queue).map(SimQueue::is_playing).unwrap_or(false)
    }

    pub fn play_next_calls(&self) -> usize {
        self.counters.lock().unwrap().play_next_calls
    }

    pub fn stop_all_calls(&self) -> usize {
        self.counters.lock().unwrap().stop_all_calls
    }

    /// Every track started, in order
    pub fn started_tracks(&self) -> Vec<TrackId> {
        self.counters.lock().unwrap().started.clone()
    }

    pub fn created_tracks(&self) -> Vec<TrackId> {
        self.counters.lock().unwrap().created.clone()
    }

    pub fn deleted_tracks(&self) -> Vec<TrackId> {
        self.counters.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl PlaybackHost for SimHost {
    fn queue(&self, queue: QueueId) -> Option<QueueInfo> {
        let queues = self.queues.lock().unwrap();
        let q = queues.get(&queue)?;
        Some(QueueInfo {
            id: queue,
            name: q.name.clone(),
            mode: q.mode,
            playing: q.is_playing(),
            fade_ms: q.fade_ms,
            playback_order: q.tracks.iter().map(|t| t.id).collect(),
        })
    }

    fn track(&self, queue: QueueId, track: TrackId) -> Option<TrackInfo> {
        let queues = self.queues.lock().unwrap();
        queues.get(&queue)?.tracks.iter().find(|t| t.id == track).map(SimTrack::info)
    }

    fn transport(&self, queue: QueueId, track: TrackId) -> Option<Arc<dyn Transport>> {
        let queues = self.queues.lock().unwrap();
        let t = queues.get(&queue)?.tracks.iter().find(|t| t.id == track)?;
        match t.media_ready_at {
            Some(ready_at) if Instant::now() >= ready_at => {
                t.transport.clone().map(|transport| transport as Arc<dyn Transport>)
            }
            _ => None,
        }
    }

    fn playing_track(&self, queue: QueueId) -> Option<TrackId> {
        let queues = self.queues.lock().unwrap();
        let q = queues.get(&queue)?;
        let last = q.last_started?;
        q.tracks.iter().any(|t| t.id == last && t.playing).then_some(last)
    }

    fn is_authoritative(&self, _queue: QueueId) -> bool {
        self.authoritative.load(Ordering::SeqCst)
    }

    fn flags(&self, queue: QueueId) -> FlagMap {
        self.queues
            .lock()
            .unwrap()
            .get(&queue)
            .map(|q| q.flags.clone())
            .unwrap_or_default()
    }

    async fn write_flags(&self, queue: QueueId, flags: FlagMap) -> Result<()> {
        if !self.is_authoritative(queue) {
            return Err(Error::Host("not permitted to update queue flags".to_string()));
        }
        let mut queues = self.queues.lock().unwrap();
        let q = queues
            .get_mut(&queue)
            .ok_or_else(|| Error::NotFound(format!("queue {}", queue)))?;
        q.flags.extend(flags);
        Ok(())
    }

    async fn create_track(&self, queue: QueueId, track: NewTrack) -> Result<TrackId> {
        if !self.is_authoritative(queue) {
            return Err(Error::Host("not permitted to create tracks".to_string()));
        }
        let id = TrackId::generate();
        {
            let mut queues = self.queues.lock().unwrap();
            let q = queues
                .get_mut(&queue)
                .ok_or_else(|| Error::NotFound(format!("queue {}", queue)))?;
            let position = track
                .insert_after
                .and_then(|after| q.tracks.iter().position(|t| t.id == after))
                .map(|i| i + 1)
                .unwrap_or(q.tracks.len());
            // Gap tracks play a tiny clip; the declared gap length is metadata
            let duration_secs = if track.gap.is_some() { 0.1 } else { 0.0 };
            q.tracks.insert(
                position,
                SimTrack {
                    id,
                    name: track.name,
                    path: track.path,
                    volume: track.volume,
                    repeat: track.repeat,
                    duration_secs,
                    gap: track.gap,
                    playing: false,
                    transport: None,
                    media_ready_at: None,
                },
            );
        }
        self.counters.lock().unwrap().created.push(id);
        Ok(id)
    }

    async fn delete_track(&self, queue: QueueId, track: TrackId) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) || !self.is_authoritative(queue) {
            return Err(Error::Host("permission denied deleting track".to_string()));
        }
        {
            let mut queues = self.queues.lock().unwrap();
            let Some(q) = queues.get_mut(&queue) else {
                return Ok(());
            };
            let Some(index) = q.tracks.iter().position(|t| t.id == track) else {
                return Ok(());
            };
            q.tracks.remove(index).stop();
        }
        self.counters.lock().unwrap().deleted.push(track);
        Ok(())
    }

    async fn play_track(&self, queue: QueueId, track: TrackId) -> Result<()> {
        if self.play_now(queue, track) {
            Ok(())
        } else {
            Err(Error::NotFound(format!("track {} in queue {}", track, queue)))
        }
    }

    async fn play_next(&self, queue: QueueId) -> Result<()> {
        self.counters.lock().unwrap().play_next_calls += 1;
        let next = {
            let queues = self.queues.lock().unwrap();
            let q = queues
                .get(&queue)
                .ok_or_else(|| Error::NotFound(format!("queue {}", queue)))?;
            let start = q
                .last_started
                .and_then(|last| q.tracks.iter().position(|t| t.id == last))
                .map(|i| i + 1)
                .unwrap_or(0);
            q.tracks.iter().skip(start).find(|t| t.gap.is_none()).map(|t| t.id)
        };

        match next {
            Some(track) => self.play_track(queue, track).await,
            None => self.stop_all(queue).await,
        }
    }

    async fn stop_all(&self, queue: QueueId) -> Result<()> {
        self.counters.lock().unwrap().stop_all_calls += 1;
        let mut queues = self.queues.lock().unwrap();
        let q = queues
            .get_mut(&queue)
            .ok_or_else(|| Error::NotFound(format!("queue {}", queue)))?;
        for track in q.tracks.iter_mut() {
            track.stop();
        }
        Ok(())
    }
}
