//! Playback configuration (`playback` section)

use crate::error::{AudioError, Result};
use crate::volume::DEFAULT_VOLUME;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Volume used until the user picks one
    #[serde(default = "PlaybackConfig::default_volume")]
    pub initial_volume: f32,
    /// Fade applied to silent segments and tracks without their own fades
    #[serde(default = "PlaybackConfig::default_fade_ms")]
    pub fade_in_ms: u64,
    #[serde(default = "PlaybackConfig::default_fade_ms")]
    pub fade_out_ms: u64,
    /// Period of the progress sampler and gain updates
    #[serde(default = "PlaybackConfig::default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Directory that track `fileUrl`s are resolved against
    #[serde(default = "PlaybackConfig::default_media_root")]
    pub media_root: String,
    #[serde(default = "PlaybackConfig::default_volume_file")]
    pub volume_file: String,
}

impl PlaybackConfig {
    const fn default_volume() -> f32 {
        DEFAULT_VOLUME
    }

    const fn default_fade_ms() -> u64 {
        moodstream::models::DEFAULT_FADE_MS
    }

    const fn default_tick_interval_ms() -> u64 {
        50
    }

    fn default_media_root() -> String {
        "media".to_string()
    }

    fn default_volume_file() -> String {
        "volume.json".to_string()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn fade_in(&self) -> Duration {
        Duration::from_millis(self.fade_in_ms)
    }

    pub fn fade_out(&self) -> Duration {
        Duration::from_millis(self.fade_out_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.initial_volume) {
            return Err(AudioError::Config(format!(
                "initial_volume must be within 0..=1, got {}",
                self.initial_volume
            )));
        }
        if self.tick_interval_ms == 0 || self.tick_interval_ms >= 1000 {
            return Err(AudioError::Config(format!(
                "tick_interval_ms must be within 1..1000, got {}",
                self.tick_interval_ms
            )));
        }
        Ok(())
    }

    #[cfg(feature = "moodconfig")]
    pub fn load_from_moodconfig(config: &moodconfig::Config) -> Result<Self> {
        let loaded: Self = config
            .get_section(&["playback"])
            .map_err(|e| AudioError::Config(e.to_string()))?;
        loaded.validate()?;
        Ok(loaded)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            initial_volume: Self::default_volume(),
            fade_in_ms: Self::default_fade_ms(),
            fade_out_ms: Self::default_fade_ms(),
            tick_interval_ms: Self::default_tick_interval_ms(),
            media_root: Self::default_media_root(),
            volume_file: Self::default_volume_file(),
        }
    }
}
