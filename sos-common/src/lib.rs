//! # Sound of Silence Common Library
//!
//! Shared code for the transition scheduling crates including:
//! - Error type and result alias
//! - Module settings loading (TOML, environment, defaults)
//! - Entity identity newtypes
//! - Transition event types and the EventBus
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod time;

pub use config::TransitionSettings;
pub use error::{Error, Result};
pub use events::{EventBus, TransitionEvent};
pub use ids::{QueueId, TrackId};
