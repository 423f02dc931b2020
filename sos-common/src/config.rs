//! Module settings loading
//!
//! Settings are tunables of the scheduling core itself (poll cadence, gap
//! track template, logging), not per-queue transition configuration. The
//! per-queue configuration lives in the host's flag store.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming an explicit settings file
pub const SETTINGS_ENV_VAR: &str = "SOS_CONFIG";

/// Silent 16-bit mono WAV with an empty data chunk
pub const SILENT_WAV_DATA_URI: &str =
    "data:audio/wav;base64,UklGRiQAAABXQVZFZm10IBAAAAABAAEAESsAACJWAAACABAAZGF0YQAAAAA=";

/// Tunables for the transition scheduling core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionSettings {
    /// Verbose scheduling logs
    pub debug: bool,

    /// Interval between transport-handle availability checks
    pub media_poll_interval_ms: u64,

    /// Number of checks before giving up on a transport handle
    pub media_max_attempts: u32,

    /// Granularity of randomly chosen gap lengths
    pub gap_step_ms: u64,

    /// Declared volume of synthetic gap tracks
    pub gap_volume: f32,

    /// Display name of synthetic gap tracks
    pub gap_name: String,

    /// Media reference played by synthetic gap tracks
    pub gap_media_path: String,

    /// Random delay ranges above this produce a warning
    pub high_delay_warning_ms: u64,

    /// EventBus channel capacity
    pub event_capacity: usize,
}

impl Default for TransitionSettings {
    fn default() -> Self {
        Self {
            debug: false,
            media_poll_interval_ms: 50,
            media_max_attempts: 100,
            gap_step_ms: 100,
            gap_volume: 0.01,
            gap_name: "Silent Gap".to_string(),
            gap_media_path: SILENT_WAV_DATA_URI.to_string(),
            high_delay_warning_ms: 10_000,
            event_capacity: 256,
        }
    }
}

impl TransitionSettings {
    /// Parse settings from TOML text; absent keys take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read settings file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject values the schedulers cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.media_poll_interval_ms == 0 {
            return Err(Error::Config(
                "media_poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.gap_step_ms == 0 {
            return Err(Error::Config("gap_step_ms must be greater than zero".to_string()));
        }
        if !(0.0..=1.0).contains(&self.gap_volume) {
            return Err(Error::Config(format!(
                "gap_volume must be within 0.0..=1.0, got {}",
                self.gap_volume
            )));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be greater than zero".to_string()));
        }
        Ok(())
    }

    /// Total time spent waiting for a transport handle before giving up
    pub fn media_wait_budget(&self) -> std::time::Duration {
        std::time::Duration::from_millis(
            self.media_poll_interval_ms * u64::from(self.media_max_attempts),
        )
    }
}

/// Resolve settings in priority order:
/// 1. Explicit path argument (highest priority, errors are fatal)
/// 2. `SOS_CONFIG` environment variable (errors are fatal)
/// 3. User config file, if present
/// 4. Compiled defaults (fallback)
pub fn resolve_settings(cli_path: Option<&Path>) -> Result<TransitionSettings> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_path {
        return TransitionSettings::from_file(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(SETTINGS_ENV_VAR) {
        return TransitionSettings::from_file(Path::new(&path));
    }

    // Priority 3: User config file
    if let Some(path) = default_settings_path() {
        if path.exists() {
            debug!("Loading settings from {}", path.display());
            return TransitionSettings::from_file(&path);
        }
    }

    // Priority 4: Compiled defaults
    Ok(TransitionSettings::default())
}

/// Platform settings file location, e.g. ~/.config/sound-of-silence/config.toml
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sound-of-silence").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_tunables() {
        let settings = TransitionSettings::default();
        assert_eq!(settings.media_poll_interval_ms, 50);
        assert_eq!(settings.media_max_attempts, 100);
        assert_eq!(settings.gap_step_ms, 100);
        assert_eq!(settings.media_wait_budget(), std::time::Duration::from_secs(5));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = TransitionSettings::from_toml_str("debug = true\ngap_step_ms = 250\n").unwrap();
        assert!(settings.debug);
        assert_eq!(settings.gap_step_ms, 250);
        assert_eq!(settings.gap_name, "Silent Gap");
    }

    #[test]
    fn test_zero_step_rejected() {
        let err = TransitionSettings::from_toml_str("gap_step_ms = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_gap_volume_out_of_range_rejected() {
        assert!(TransitionSettings::from_toml_str("gap_volume = 1.5").is_err());
    }
}
