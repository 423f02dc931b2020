//! Host playback/document system interface
//!
//! The scheduling core never decodes or mixes audio and never stores
//! documents. Everything it needs from the host is expressed here:
//! - Read-only snapshots of queues and tracks
//! - Transport handles of tracks that are ready to play
//! - Document mutations (flags, gap track creation/deletion)
//! - Playback control (play a track, advance, stop)
//!
//! Entities are addressed by id only. The core never keeps an owning
//! reference to a host entity, so host-side deletion reclaims everything.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sos_common::{QueueId, Result, TrackId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Flag store contents scoped to this module's identifier
pub type FlagMap = Map<String, Value>;

/// Playback mode of a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackMode {
    /// Tracks play one after another in declared order
    Sequential,
    /// Tracks play one after another in shuffled order
    Shuffle,
    /// All tracks play at once
    Simultaneous,
    /// Tracks play only when triggered individually
    Soundboard,
}

impl PlaybackMode {
    /// Modes in which one track follows another, so boundary transitions apply
    pub fn is_sequential(self) -> bool {
        matches!(self, PlaybackMode::Sequential | PlaybackMode::Shuffle)
    }
}

/// Lifecycle events published by a transport handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Play,
    Pause,
    End,
}

/// Live playback object of a track
///
/// Owned by the host's playback engine. Time values are in seconds.
pub trait Transport: Send + Sync {
    /// Total media length in seconds
    fn duration_secs(&self) -> f64;

    /// Current playback offset in seconds
    fn current_time_secs(&self) -> f64;

    fn is_playing(&self) -> bool;

    fn volume(&self) -> f32;

    fn set_volume(&self, volume: f32);

    /// Ramp volume from `from` to `target` over `duration`
    fn fade(&self, target: f32, duration: Duration, from: f32);

    /// Receive future play/pause/end events
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

/// Gap metadata carried by synthetic gap tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapMetadata {
    pub duration_ms: u64,
    /// Wall-clock epoch milliseconds when the gap started
    pub started_at_epoch_ms: i64,
}

/// Snapshot of a queue
#[derive(Debug, Clone)]
pub struct QueueInfo {
    pub id: QueueId,
    pub name: String,
    pub mode: PlaybackMode,
    pub playing: bool,
    /// Declared fade length; drives crossfade overlap
    pub fade_ms: u64,
    /// Track ids in the order the queue plays them
    pub playback_order: Vec<TrackId>,
}

/// Snapshot of a track
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub id: TrackId,
    pub name: String,
    pub path: String,
    /// Target volume, 0.0 to 1.0
    pub volume: f32,
    pub repeat: bool,
    pub playing: bool,
    /// Offset the track was paused at; 0 until it has played
    pub paused_time_secs: f64,
    /// Present only on synthetic gap tracks
    pub gap: Option<GapMetadata>,
}

impl TrackInfo {
    pub fn is_silence_gap(&self) -> bool {
        self.gap.is_some()
    }
}

/// Record for creating a track document
#[derive(Debug, Clone)]
pub struct NewTrack {
    pub name: String,
    pub path: String,
    pub volume: f32,
    pub repeat: bool,
    /// Insert after this track in the playback order; `None` appends
    pub insert_after: Option<TrackId>,
    pub gap: Option<GapMetadata>,
}

/// The host playback/document system
#[async_trait]
pub trait PlaybackHost: Send + Sync + 'static {
    fn queue(&self, queue: QueueId) -> Option<QueueInfo>;

    fn track(&self, queue: QueueId, track: TrackId) -> Option<TrackInfo>;

    /// Transport handle, once the host has instantiated it
    fn transport(&self, queue: QueueId, track: TrackId) -> Option<Arc<dyn Transport>>;

    /// Most recently started track that is currently playing
    fn playing_track(&self, queue: QueueId) -> Option<TrackId>;

    /// Whether the local peer may mutate this queue
    fn is_authoritative(&self, queue: QueueId) -> bool;

    fn flags(&self, queue: QueueId) -> FlagMap;

    async fn write_flags(&self, queue: QueueId, flags: FlagMap) -> Result<()>;

    async fn create_track(&self, queue: QueueId, track: NewTrack) -> Result<TrackId>;

    async fn delete_track(&self, queue: QueueId, track: TrackId) -> Result<()>;

    async fn play_track(&self, queue: QueueId, track: TrackId) -> Result<()>;

    async fn play_next(&self, queue: QueueId) -> Result<()>;

    async fn stop_all(&self, queue: QueueId) -> Result<()>;
}
