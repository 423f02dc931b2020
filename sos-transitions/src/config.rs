//! Per-queue transition configuration
//!
//! The configuration is stored as flags on the queue in the host's flag
//! store. Reads apply defaults, writes enforce that silence-mode and
//! crossfade-mode are never both enabled.
//!
//! In memory the two modes are a single tagged enum, so an invalid combined
//! state cannot be represented once a configuration has been read.

use crate::host::{FlagMap, PlaybackHost};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sos_common::{QueueId, Result};
use tracing::{debug, warn};

pub const FLAG_SILENCE_ENABLED: &str = "silenceEnabled";
pub const FLAG_CROSSFADE: &str = "crossfade";
pub const FLAG_FADE_IN: &str = "fadeIn";
pub const FLAG_SILENCE_MODE: &str = "silenceMode";
pub const FLAG_SILENCE_DURATION: &str = "silenceDuration";
pub const FLAG_MIN_DELAY: &str = "minDelay";
pub const FLAG_MAX_DELAY: &str = "maxDelay";

/// How the length of a silent gap is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SilenceMode {
    /// Always `duration_ms`
    #[default]
    Static,
    /// Uniformly chosen between `min_delay_ms` and `max_delay_ms`
    Random,
}

impl SilenceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SilenceMode::Static => "static",
            SilenceMode::Random => "random",
        }
    }

    /// Unknown values read as static
    pub fn parse(value: &str) -> Self {
        match value {
            "random" => SilenceMode::Random,
            _ => SilenceMode::Static,
        }
    }
}

/// Silent gap parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SilenceParams {
    pub mode: SilenceMode,
    pub duration_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl SilenceParams {
    /// Enforce `min ≤ max ≤ duration`
    pub fn normalized(self) -> Self {
        let max_delay_ms = self.max_delay_ms.min(self.duration_ms);
        let min_delay_ms = self.min_delay_ms.min(self.duration_ms);
        Self {
            max_delay_ms: max_delay_ms.max(min_delay_ms),
            min_delay_ms,
            ..self
        }
    }
}

/// Which boundary transition a queue uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransitionMode {
    /// Host default advancement
    #[default]
    None,
    /// Insert a silent gap between tracks
    Silence(SilenceParams),
    /// Start the next track when the current one begins fading out
    Crossfade,
}

/// Full transition configuration of a queue, defaults applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransitionConfig {
    /// Fade-in length applied to every started track; 0 disables
    pub fade_in_ms: u64,
    pub mode: TransitionMode,
}

impl TransitionConfig {
    pub fn silence(&self) -> Option<&SilenceParams> {
        match &self.mode {
            TransitionMode::Silence(params) => Some(params),
            _ => None,
        }
    }

    pub fn silence_enabled(&self) -> bool {
        matches!(self.mode, TransitionMode::Silence(_))
    }

    pub fn crossfade_enabled(&self) -> bool {
        matches!(self.mode, TransitionMode::Crossfade)
    }
}

/// Raw values submitted by a configuration form
///
/// Both checkboxes are independent here; `into_config` resolves them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigForm {
    pub fade_in_ms: u64,
    pub silence_enabled: bool,
    pub crossfade: bool,
    pub silence_mode: SilenceMode,
    pub silence_duration_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl ConfigForm {
    /// Silence only when crossfade is off, crossfade only when silence is off
    pub fn into_config(self) -> TransitionConfig {
        let mode = match (self.silence_enabled, self.crossfade) {
            (true, false) => TransitionMode::Silence(SilenceParams {
                mode: self.silence_mode,
                duration_ms: self.silence_duration_ms,
                min_delay_ms: self.min_delay_ms,
                max_delay_ms: self.max_delay_ms,
            }),
            (false, true) => TransitionMode::Crossfade,
            _ => TransitionMode::None,
        };
        TransitionConfig { fade_in_ms: self.fade_in_ms, mode }
    }
}

/// Numeric flag value; numeric strings are accepted, negatives read as 0
fn flag_u64(flags: &FlagMap, key: &str) -> Option<u64> {
    let number = match flags.get(key)? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if number.is_finite() {
        Some(number.max(0.0).round() as u64)
    } else {
        None
    }
}

fn flag_bool(flags: &FlagMap, key: &str) -> bool {
    flags.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Silence parameters stored on the queue, whether or not silence is enabled
pub fn read_silence_params(flags: &FlagMap) -> SilenceParams {
    let duration_ms = flag_u64(flags, FLAG_SILENCE_DURATION).unwrap_or(0);
    let mode = flags
        .get(FLAG_SILENCE_MODE)
        .and_then(Value::as_str)
        .map(SilenceMode::parse)
        .unwrap_or_default();

    // An unset or zero maximum means "up to the full silence duration"
    let max_delay_ms = match flag_u64(flags, FLAG_MAX_DELAY) {
        Some(max) if max > 0 => max,
        _ => duration_ms,
    };

    SilenceParams {
        mode,
        duration_ms,
        min_delay_ms: flag_u64(flags, FLAG_MIN_DELAY).unwrap_or(0),
        max_delay_ms,
    }
}

/// Read the full configuration from a queue's flags, defaults applied
pub fn read_config(flags: &FlagMap) -> TransitionConfig {
    let silence_enabled = flag_bool(flags, FLAG_SILENCE_ENABLED);
    let crossfade = flag_bool(flags, FLAG_CROSSFADE);

    if silence_enabled && crossfade {
        warn!("Both silence and crossfade flags set; using silence");
    }

    let mode = if silence_enabled {
        TransitionMode::Silence(read_silence_params(flags))
    } else if crossfade {
        TransitionMode::Crossfade
    } else {
        TransitionMode::None
    };

    TransitionConfig {
        fade_in_ms: flag_u64(flags, FLAG_FADE_IN).unwrap_or(0),
        mode,
    }
}

/// Flags representing `config`
///
/// Silence parameters are only written when silence is enabled, so
/// switching modes keeps the previously configured gap settings.
pub fn config_to_flags(config: &TransitionConfig) -> FlagMap {
    let mut flags = FlagMap::new();
    flags.insert(FLAG_FADE_IN.to_string(), Value::from(config.fade_in_ms));
    flags.insert(FLAG_SILENCE_ENABLED.to_string(), Value::from(config.silence_enabled()));
    flags.insert(FLAG_CROSSFADE.to_string(), Value::from(config.crossfade_enabled()));

    if let TransitionMode::Silence(params) = config.mode {
        let params = params.normalized();
        flags.insert(FLAG_SILENCE_MODE.to_string(), Value::from(params.mode.as_str()));
        flags.insert(FLAG_SILENCE_DURATION.to_string(), Value::from(params.duration_ms));
        flags.insert(FLAG_MIN_DELAY.to_string(), Value::from(params.min_delay_ms));
        flags.insert(FLAG_MAX_DELAY.to_string(), Value::from(params.max_delay_ms));
    }
    flags
}

/// Read accessor for configuration collaborators
pub fn load_config(host: &dyn PlaybackHost, queue: QueueId) -> TransitionConfig {
    read_config(&host.flags(queue))
}

/// Write accessor for configuration collaborators
///
/// Validates the silence bounds and persists the flags. Returns the
/// configuration as stored.
pub async fn write_config(
    host: &dyn PlaybackHost,
    queue: QueueId,
    config: TransitionConfig,
) -> Result<TransitionConfig> {
    let config = match config.mode {
        TransitionMode::Silence(params) => TransitionConfig {
            mode: TransitionMode::Silence(params.normalized()),
            ..config
        },
        _ => config,
    };

    debug!("Writing transition config for queue {}: {:?}", queue, config);
    host.write_flags(queue, config_to_flags(&config)).await?;
    Ok(config)
}

/// Flip silence-mode; enabling it disables crossfade
pub async fn toggle_silence(host: &dyn PlaybackHost, queue: QueueId) -> Result<TransitionConfig> {
    let flags = host.flags(queue);
    let current = read_config(&flags);
    let mode = if current.silence_enabled() {
        TransitionMode::None
    } else {
        TransitionMode::Silence(read_silence_params(&flags))
    };
    write_config(host, queue, TransitionConfig { mode, ..current }).await
}

/// Flip crossfade-mode; enabling it disables silence
pub async fn toggle_crossfade(host: &dyn PlaybackHost, queue: QueueId) -> Result<TransitionConfig> {
    let current = load_config(host, queue);
    let mode = if current.crossfade_enabled() {
        TransitionMode::None
    } else {
        TransitionMode::Crossfade
    };
    write_config(host, queue, TransitionConfig { mode, ..current }).await
}
