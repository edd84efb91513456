//! # Core Configuration
//!
//! Configuration types for the dialogue and audio coordination pipeline.
//! Every value has a serde-level default so a partial config document (or
//! none at all) yields a working setup; `validate()` enforces the invariants
//! the components rely on.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Top-level configuration for the slidecast core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Dialogue manifest and envelope fetching.
    #[serde(default)]
    pub dialogue: DialogueConfig,

    /// Background music ducking and fades.
    #[serde(default)]
    pub background: BackgroundConfig,

    /// Sound effect throttling.
    #[serde(default)]
    pub effects: EffectsConfig,

    /// Event bus buffer size.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl CoreConfig {
    /// Validate the whole configuration tree.
    pub fn validate(&self) -> Result<()> {
        self.dialogue.validate()?;
        self.background.validate()?;
        self.effects.validate()?;

        if self.event_buffer == 0 {
            return Err(Error::Config("event_buffer must be > 0".to_string()));
        }

        Ok(())
    }
}

// ============================================================================
// Dialogue
// ============================================================================

/// Configuration for dialogue content fetching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueConfig {
    /// Base URL or path under which per-slide dialogue directories live.
    ///
    /// The manifest for slide `n` is fetched from
    /// `{manifest_base}/slide{NN}/metadata.json` with `NN` zero-padded to
    /// two digits.
    #[serde(default = "default_manifest_base")]
    pub manifest_base: String,

    /// Maximum duration to wait for a manifest or envelope fetch.
    ///
    /// Default: 5 seconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: Duration,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            manifest_base: default_manifest_base(),
            fetch_timeout: default_fetch_timeout(),
        }
    }
}

impl DialogueConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.manifest_base.is_empty() {
            return Err(Error::Config("manifest_base must not be empty".to_string()));
        }

        if self.fetch_timeout.is_zero() {
            return Err(Error::Config("fetch_timeout must be > 0".to_string()));
        }

        Ok(())
    }
}

// ============================================================================
// Background music
// ============================================================================

/// Configuration for the background music coordinator.
///
/// Duck and restore are asymmetric on purpose: dropping the music fast makes
/// the first narrated word audible, while bringing it back slowly avoids a
/// jarring swell when narration stops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundConfig {
    /// Volume the ambient track starts at.
    ///
    /// Default: 0.6.
    #[serde(default = "default_initial_volume")]
    pub initial_volume: f32,

    /// Fraction of the pre-duck volume to fade down to while dialogue plays.
    ///
    /// Default: 0.15 (15% of the pre-duck level).
    #[serde(default = "default_duck_fraction")]
    pub duck_fraction: f32,

    /// Duration of the duck fade.
    ///
    /// Default: 300 ms.
    #[serde(default = "default_duck_duration")]
    pub duck_duration: Duration,

    /// Duration of the restore fade.
    ///
    /// Default: 600 ms.
    #[serde(default = "default_restore_duration")]
    pub restore_duration: Duration,

    /// Number of discrete volume steps per fade.
    ///
    /// Default: 12.
    #[serde(default = "default_fade_steps")]
    pub fade_steps: u32,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            initial_volume: default_initial_volume(),
            duck_fraction: default_duck_fraction(),
            duck_duration: default_duck_duration(),
            restore_duration: default_restore_duration(),
            fade_steps: default_fade_steps(),
        }
    }
}

impl BackgroundConfig {
    /// A deeper duck with a slower recovery, for decks where narration
    /// carries most of the content.
    pub fn pronounced() -> Self {
        Self {
            duck_fraction: 0.08,
            restore_duration: Duration::from_millis(900),
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.initial_volume) {
            return Err(Error::Config(
                "initial_volume must be between 0.0 and 1.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.duck_fraction) {
            return Err(Error::Config(
                "duck_fraction must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.fade_steps == 0 {
            return Err(Error::Config("fade_steps must be > 0".to_string()));
        }

        if self.duck_duration.is_zero() || self.restore_duration.is_zero() {
            return Err(Error::Config("fade durations must be > 0".to_string()));
        }

        Ok(())
    }
}

// ============================================================================
// Sound effects
// ============================================================================

/// Configuration for the sound effect trigger layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectsConfig {
    /// Minimum interval between two triggers of the same effect. Triggers
    /// landing inside the window are dropped, not queued; this keeps an
    /// effect wired to an animation frame (typing) from stacking dozens of
    /// overlapping instances per second.
    ///
    /// Default: 150 ms.
    #[serde(default = "default_min_trigger_interval")]
    pub min_trigger_interval: Duration,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            min_trigger_interval: default_min_trigger_interval(),
        }
    }
}

impl EffectsConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.min_trigger_interval.is_zero() {
            return Err(Error::Config(
                "min_trigger_interval must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Defaults
// ============================================================================

fn default_manifest_base() -> String {
    "/sounds/dialogue".to_string()
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_initial_volume() -> f32 {
    0.6
}

fn default_duck_fraction() -> f32 {
    0.15
}

fn default_duck_duration() -> Duration {
    Duration::from_millis(300)
}

fn default_restore_duration() -> Duration {
    Duration::from_millis(600)
}

fn default_fade_steps() -> u32 {
    12
}

fn default_min_trigger_interval() -> Duration {
    Duration::from_millis(150)
}

fn default_event_buffer() -> usize {
    crate::events::DEFAULT_EVENT_BUFFER_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = CoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dialogue.manifest_base, "/sounds/dialogue");
        assert_eq!(config.background.duck_fraction, 0.15);
        assert!(config.background.restore_duration > config.background.duck_duration);
    }

    #[test]
    fn pronounced_preset_is_valid() {
        let config = BackgroundConfig::pronounced();
        assert!(config.validate().is_ok());
        assert!(config.duck_fraction < BackgroundConfig::default().duck_fraction);
    }

    #[test]
    fn rejects_out_of_range_volume() {
        let config = BackgroundConfig {
            initial_volume: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_fade_steps() {
        let config = BackgroundConfig {
            fade_steps: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_manifest_base() {
        let config = DialogueConfig {
            manifest_base: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_document_fills_defaults() {
        let config: CoreConfig =
            serde_json::from_str(r#"{"dialogue": {"manifest_base": "/assets/voice"}}"#).unwrap();
        assert_eq!(config.dialogue.manifest_base, "/assets/voice");
        assert_eq!(config.dialogue.fetch_timeout, Duration::from_secs(5));
        assert_eq!(config.background.fade_steps, 12);
    }
}
