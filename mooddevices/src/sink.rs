//! Device controllers receiving payloads

use crate::error::{DeviceError, Result};
use crate::payload::{LightPayload, ScentPayload, SpeakerPayload};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

pub const LIGHT_ENDPOINT: &str = "/api/light/control";
pub const SCENT_ENDPOINT: &str = "/api/scent/control";
pub const SPEAKER_ENDPOINT: &str = "/api/speaker/control";

const API_KEY_HEADER: &str = "x-api-key";

#[async_trait]
pub trait DeviceSink: Send + Sync {
    fn name(&self) -> &str;
    async fn send_light(&self, payload: &LightPayload) -> Result<()>;
    async fn send_scent(&self, payload: &ScentPayload) -> Result<()>;
    async fn send_speaker(&self, payload: &SpeakerPayload) -> Result<()>;
}

/// Posts JSON payloads to the device controller
#[derive(Debug, Clone)]
pub struct HttpDeviceSink {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpDeviceSink {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DeviceError::Http)?;
        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
            api_key,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn post<T: Serialize + Sync>(&self, endpoint: &str, payload: &T) -> Result<()> {
        let url = self.base_url.join(endpoint)?;
        let mut request = self.client.post(url).json(payload);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeviceError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        debug!(endpoint, "Device update accepted");
        Ok(())
    }
}

#[async_trait]
impl DeviceSink for HttpDeviceSink {
    fn name(&self) -> &str {
        "http"
    }

    async fn send_light(&self, payload: &LightPayload) -> Result<()> {
        self.post(LIGHT_ENDPOINT, payload).await
    }

    async fn send_scent(&self, payload: &ScentPayload) -> Result<()> {
        self.post(SCENT_ENDPOINT, payload).await
    }

    async fn send_speaker(&self, payload: &SpeakerPayload) -> Result<()> {
        self.post(SPEAKER_ENDPOINT, payload).await
    }
}

/// Sink used when no controller is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDeviceSink;

#[async_trait]
impl DeviceSink for LoggingDeviceSink {
    fn name(&self) -> &str {
        "logging"
    }

    async fn send_light(&self, payload: &LightPayload) -> Result<()> {
        info!(
            r = payload.r,
            g = payload.g,
            b = payload.b,
            colortemp = ?payload.colortemp,
            brightness = payload.brightness,
            "Light"
        );
        Ok(())
    }

    async fn send_scent(&self, payload: &ScentPayload) -> Result<()> {
        info!(
            scent = %payload.scent_type,
            level = payload.scent_level,
            interval = payload.scent_interval,
            "Scent"
        );
        Ok(())
    }

    async fn send_speaker(&self, payload: &SpeakerPayload) -> Result<()> {
        info!(now_playing = %payload.now_playing, volume = payload.volume, "Speaker");
        Ok(())
    }
}
