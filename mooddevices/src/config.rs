//! Device forwarding configuration (`devices` section)

use crate::error::{DeviceError, Result};
use crate::sink::{DeviceSink, HttpDeviceSink, LoggingDeviceSink};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicesConfig {
    /// Device controller; without it updates are only logged
    #[serde(default)]
    pub base_url: Option<String>,
    /// Sent as `x-api-key`
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "DevicesConfig::default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "DevicesConfig::default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "DevicesConfig::default_scent_level")]
    pub default_scent_level: u8,
    #[serde(default = "DevicesConfig::default_scent_interval")]
    pub default_scent_interval: u32,
    #[serde(default = "DevicesConfig::default_speaker_volume")]
    pub default_speaker_volume: u8,
}

impl DevicesConfig {
    const fn default_debounce_ms() -> u64 {
        300
    }

    const fn default_timeout_seconds() -> u64 {
        10
    }

    const fn default_scent_level() -> u8 {
        5
    }

    const fn default_scent_interval() -> u32 {
        30
    }

    const fn default_speaker_volume() -> u8 {
        70
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// HTTP sink when a base URL is configured, logging sink otherwise
    pub fn build_sink(&self) -> Result<Arc<dyn DeviceSink>> {
        match self.base_url.as_deref().filter(|url| !url.trim().is_empty()) {
            Some(base_url) => {
                let sink = HttpDeviceSink::new(base_url, self.api_key.clone(), self.timeout())?;
                Ok(Arc::new(sink))
            }
            None => Ok(Arc::new(LoggingDeviceSink)),
        }
    }

    #[cfg(feature = "moodconfig")]
    pub fn load_from_moodconfig(config: &moodconfig::Config) -> Result<Self> {
        config
            .get_section(&["devices"])
            .map_err(|e| DeviceError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_speaker_volume > 100 {
            return Err(DeviceError::Config(format!(
                "default_speaker_volume must be within 0..=100, got {}",
                self.default_speaker_volume
            )));
        }
        Ok(())
    }
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            debounce_ms: Self::default_debounce_ms(),
            timeout_seconds: Self::default_timeout_seconds(),
            default_scent_level: Self::default_scent_level(),
            default_scent_interval: Self::default_scent_interval(),
            default_speaker_volume: Self::default_speaker_volume(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: DevicesConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, DevicesConfig::default());
        assert_eq!(config.debounce(), Duration::from_millis(300));
        assert_eq!(config.build_sink().unwrap().name(), "logging");
    }

    #[test]
    fn test_http_sink_when_configured() {
        let config = DevicesConfig {
            base_url: Some("http://10.0.0.12:8080".to_string()),
            ..Default::default()
        };
        assert_eq!(config.build_sink().unwrap().name(), "http");

        let broken = DevicesConfig {
            base_url: Some("not a url".to_string()),
            ..Default::default()
        };
        assert!(broken.build_sink().is_err());
    }
}
