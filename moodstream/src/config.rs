//! Typed configuration of the segment pipeline
//!
//! Every field has a serde default so a partial YAML section (or none at all)
//! still yields a usable configuration.

use crate::client::{
    ClientBuilder, GenerationClient, DEFAULT_AUX_TIMEOUT_SECS, DEFAULT_BASE_URL,
    DEFAULT_GENERATE_ENDPOINT, DEFAULT_GENERATE_TIMEOUT_SECS, DEFAULT_USER_AGENT,
};
use crate::merge::MergePolicy;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration of the pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoodStreamConfig {
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub merge: MergePolicy,
}

impl MoodStreamConfig {
    pub fn validate(&self) -> crate::Result<()> {
        self.retry.validate()?;
        self.merge.validate()
    }

    /// Read the `generation`, `retry` and `merge` sections
    #[cfg(feature = "moodconfig")]
    pub fn load_from_moodconfig(config: &moodconfig::Config) -> crate::Result<Self> {
        let loaded = Self {
            generation: config
                .get_section(&["generation"])
                .map_err(|e| crate::Error::Config(e.to_string()))?,
            retry: config
                .get_section(&["retry"])
                .map_err(|e| crate::Error::Config(e.to_string()))?,
            merge: config
                .get_section(&["merge"])
                .map_err(|e| crate::Error::Config(e.to_string()))?,
        };
        loaded.validate()?;
        Ok(loaded)
    }
}

/// Generation service parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "GenerationConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "GenerationConfig::default_endpoint")]
    pub endpoint: String,
    #[serde(default = "GenerationConfig::default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "GenerationConfig::default_aux_timeout_seconds")]
    pub aux_timeout_seconds: u64,
    #[serde(default = "GenerationConfig::default_user_agent")]
    pub user_agent: String,
    /// Optional `musicTracks.json` used to resolve `musicID` references
    #[serde(default)]
    pub catalog_path: Option<String>,
}

impl GenerationConfig {
    fn default_base_url() -> String {
        DEFAULT_BASE_URL.to_string()
    }

    fn default_endpoint() -> String {
        DEFAULT_GENERATE_ENDPOINT.to_string()
    }

    const fn default_timeout_seconds() -> u64 {
        DEFAULT_GENERATE_TIMEOUT_SECS
    }

    const fn default_aux_timeout_seconds() -> u64 {
        DEFAULT_AUX_TIMEOUT_SECS
    }

    fn default_user_agent() -> String {
        DEFAULT_USER_AGENT.to_string()
    }

    /// A client builder preloaded with these settings
    pub fn client_builder(&self) -> ClientBuilder {
        GenerationClient::builder()
            .base_url(&self.base_url)
            .endpoint(&self.endpoint)
            .timeout(Duration::from_secs(self.timeout_seconds))
            .aux_timeout(Duration::from_secs(self.aux_timeout_seconds))
            .user_agent(&self.user_agent)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            endpoint: Self::default_endpoint(),
            timeout_seconds: Self::default_timeout_seconds(),
            aux_timeout_seconds: Self::default_aux_timeout_seconds(),
            user_agent: Self::default_user_agent(),
            catalog_path: None,
        }
    }
}
