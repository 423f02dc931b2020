//! Common error types for Sound of Silence

use thiserror::Error;

/// Common result type for transition operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the transition crates
#[derive(Error, Debug)]
pub enum Error {
    /// Settings file could not be parsed
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The host playback/document system rejected an operation
    ///
    /// Covers permission denials and failed document mutations.
    #[error("Host error: {0}")]
    Host(String),

    /// Requested queue or track not found
    #[error("Not found: {0}")]
    NotFound(String),
}
