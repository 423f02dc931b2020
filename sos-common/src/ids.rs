//! Entity identity newtypes
//!
//! Queues and tracks are owned by the host. Scheduling state refers to them
//! only through these ids, so dropping a host entity never depends on us.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a playback queue (playlist)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueId(pub Uuid);

/// Identity of a track within a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub Uuid);

impl QueueId {
    /// Generate a new random queue id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl TrackId {
    /// Generate a new random track id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
