//! # Sound of Silence Transitions (sos-transitions)
//!
//! Automatic transitions between consecutive tracks of a playback queue.
//!
//! **Purpose:** Insert either a timed silent gap or an auto-crossfade at each
//! track boundary, fade new tracks in, and do so exactly once per boundary
//! however a natural end, a user stop and a late transport handle interleave.
//!
//! **Architecture:** The host playback system is reached only through the
//! [`host::PlaybackHost`] trait. The [`TransitionCoordinator`] receives the
//! host's lifecycle hooks and owns every piece of scheduling state; all of
//! it is ephemeral and keyed by entity id.

pub mod config;
pub mod coordinator;
pub mod crossfade;
pub mod fade_in;
pub mod host;
pub mod media;
pub mod silence;
pub mod sim;

pub use config::{SilenceMode, SilenceParams, TransitionConfig, TransitionMode};
pub use coordinator::{EndDisposition, GapOutcome, TransitionCoordinator};
pub use host::{PlaybackHost, PlaybackMode, Transport, TransportEvent};
pub use silence::GapCountdown;
pub use sos_common::{Error, QueueId, Result, TrackId, TransitionEvent, TransitionSettings};
