//! HTTP client for the segment generation service

use crate::catalog::{CatalogEntry, StaticTrackCatalog, TrackCatalog, TrackId};
use crate::chain::chain;
use crate::color::is_hex_color;
use crate::error::{Error, Result};
use crate::models::{
    BackgroundParams, DurationMs, EpochMs, LightingInfo, MoodSnapshot, Segment, TrackRef,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Default generation service base URL
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Default generation endpoint, relative to the base URL
pub const DEFAULT_GENERATE_ENDPOINT: &str = "/api/moods/current/generate";

/// Default timeout for a full generation call
///
/// Generation chains a prediction step and a language-model step, a full
/// 10-segment batch routinely takes tens of seconds.
pub const DEFAULT_GENERATE_TIMEOUT_SECS: u64 = 120;

/// Default timeout for auxiliary lookups (catalog)
pub const DEFAULT_AUX_TIMEOUT_SECS: u64 = 30;

/// Default User-Agent
pub const DEFAULT_USER_AGENT: &str = "moodstream/0.1.0";

/// Largest batch the generation service accepts
pub const MAX_SEGMENT_COUNT: usize = 10;

/// Longest segment accepted from the generation service (24 h)
pub const MAX_SEGMENT_DURATION_MS: DurationMs = 24 * 60 * 60 * 1000;

/// Something that can produce a batch of segments
///
/// Implemented by [`GenerationClient`]; tests and offline setups provide
/// their own implementations.
#[async_trait]
pub trait SegmentGenerator: Send + Sync {
    /// Produce between 1 and `segment_count` segments chained from
    /// `next_start_time`
    async fn generate(&self, next_start_time: EpochMs, segment_count: usize)
        -> Result<Vec<Segment>>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    next_start_time: EpochMs,
    segment_count: usize,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(rename = "moodStream", alias = "segments")]
    segments: Vec<WireSegment>,
}

/// Segment as sent by the generation service
///
/// Its `timestamp` is ignored: batches are always re-chained from the
/// requested start time.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSegment {
    duration: DurationMs,
    mood: MoodSnapshot,
    #[serde(default)]
    music_tracks: Vec<TrackRef>,
    #[serde(rename = "musicID", default)]
    music_id: Option<TrackId>,
    #[serde(default)]
    background_params: BackgroundParams,
}

/// Client for the generation service
///
/// Performs exactly one request per [`generate`](SegmentGenerator::generate)
/// call, bounded by a timeout. Retrying is the job of
/// [`crate::RetryingGenerator`].
#[derive(Clone)]
pub struct GenerationClient {
    client: Client,
    generate_url: Url,
    base_url: Url,
    timeout: Duration,
    aux_timeout: Duration,
    catalog: Option<Arc<dyn TrackCatalog>>,
}

impl fmt::Debug for GenerationClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationClient")
            .field("generate_url", &self.generate_url.as_str())
            .field("timeout", &self.timeout)
            .field("catalog", &self.catalog.is_some())
            .finish()
    }
}

impl GenerationClient {
    /// Create a builder for configuring the client
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Full URL of the generation endpoint
    pub fn generate_url(&self) -> &Url {
        &self.generate_url
    }

    /// Timeout applied to generation calls
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch a `musicTracks.json` style catalog from the service
    ///
    /// Uses the auxiliary timeout.
    pub async fn fetch_catalog(&self, path: &str) -> Result<StaticTrackCatalog> {
        let url = self.base_url.join(path)?;
        debug!(%url, "Fetching music catalog");

        let response = tokio::time::timeout(
            self.aux_timeout,
            self.client.get(url).timeout(self.aux_timeout).send(),
        )
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(map_transport)?;

        if !response.status().is_success() {
            return Err(Error::Status(response.status().as_u16()));
        }

        let body = response.bytes().await.map_err(map_transport)?;
        let entries: Vec<CatalogEntry> = serde_json::from_slice(&body)?;
        Ok(StaticTrackCatalog::from_entries(entries))
    }

    fn decode_batch(
        &self,
        response: GenerateResponse,
        next_start_time: EpochMs,
        segment_count: usize,
    ) -> Result<Vec<Segment>> {
        if response.segments.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let received = response.segments.len();
        if received > segment_count {
            debug!(
                received,
                requested = segment_count,
                "Truncating oversized generation batch"
            );
        }

        let segments = response
            .segments
            .into_iter()
            .take(segment_count)
            .enumerate()
            .map(|(i, wire)| self.to_segment(i, wire))
            .collect::<Result<Vec<_>>>()?;

        Ok(chain(next_start_time, segments))
    }

    fn to_segment(&self, index: usize, wire: WireSegment) -> Result<Segment> {
        if wire.duration == 0 {
            return Err(Error::Malformed(format!(
                "segment {index} has a zero duration"
            )));
        }
        if wire.duration > MAX_SEGMENT_DURATION_MS {
            return Err(Error::Malformed(format!(
                "segment {index} lasts {} ms, more than {MAX_SEGMENT_DURATION_MS}",
                wire.duration
            )));
        }
        if !is_hex_color(&wire.mood.color) {
            return Err(Error::Malformed(format!(
                "segment {index} has an invalid color {:?}",
                wire.mood.color
            )));
        }

        let mut mood = wire.mood;
        if mood.lighting.color.is_empty() {
            mood.lighting = LightingInfo::from_color(&mood.color);
        }

        let music_track = match wire.music_tracks.into_iter().next() {
            Some(track) => Some(track),
            None => wire.music_id.and_then(|id| self.resolve_track(index, id)),
        };

        Ok(Segment {
            start_time: 0,
            duration: wire.duration,
            mood,
            music_track,
            background_params: wire.background_params,
        })
    }

    fn resolve_track(&self, index: usize, track_id: TrackId) -> Option<TrackRef> {
        let track = self
            .catalog
            .as_ref()
            .and_then(|catalog| catalog.resolve(track_id));
        if track.is_none() {
            warn!(
                segment = index,
                track_id, "No track for this segment, it will play silently"
            );
        }
        track
    }
}

#[async_trait]
impl SegmentGenerator for GenerationClient {
    async fn generate(
        &self,
        next_start_time: EpochMs,
        segment_count: usize,
    ) -> Result<Vec<Segment>> {
        if segment_count == 0 || segment_count > MAX_SEGMENT_COUNT {
            return Err(Error::InvalidSegmentCount(segment_count));
        }

        debug!(
            url = %self.generate_url,
            next_start_time,
            segment_count,
            "Requesting segment generation"
        );

        let request = GenerateRequest {
            next_start_time,
            segment_count,
        };

        let send = self
            .client
            .post(self.generate_url.clone())
            .timeout(self.timeout)
            .json(&request)
            .send();

        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(map_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status(status.as_u16()));
        }

        let body = tokio::time::timeout(self.timeout, response.bytes())
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(map_transport)?;
        let decoded: GenerateResponse = serde_json::from_slice(&body)?;

        let segments = self.decode_batch(decoded, next_start_time, segment_count)?;
        debug!(received = segments.len(), "Generation batch decoded");
        Ok(segments)
    }
}

fn map_transport(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout
    } else {
        Error::Http(err)
    }
}

/// Builder for configuring a [`GenerationClient`]
pub struct ClientBuilder {
    client: Option<Client>,
    base_url: String,
    endpoint: String,
    timeout: Duration,
    aux_timeout: Duration,
    user_agent: String,
    catalog: Option<Arc<dyn TrackCatalog>>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            client: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            endpoint: DEFAULT_GENERATE_ENDPOINT.to_string(),
            timeout: Duration::from_secs(DEFAULT_GENERATE_TIMEOUT_SECS),
            aux_timeout: Duration::from_secs(DEFAULT_AUX_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            catalog: None,
        }
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a custom HTTP client
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the service base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the generation endpoint path
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the generation timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the timeout for auxiliary lookups
    pub fn aux_timeout(mut self, timeout: Duration) -> Self {
        self.aux_timeout = timeout;
        self
    }

    /// Set a custom User-Agent header
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Resolve `musicID` references through this catalog
    pub fn catalog(mut self, catalog: Arc<dyn TrackCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Build the client
    pub fn build(self) -> Result<GenerationClient> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .user_agent(&self.user_agent)
                .timeout(self.timeout)
                .build()?,
        };

        let base_url = Url::parse(&self.base_url)?;
        let generate_url = base_url.join(&self.endpoint)?;

        Ok(GenerationClient {
            client,
            generate_url,
            base_url,
            timeout: self.timeout,
            aux_timeout: self.aux_timeout,
            catalog: self.catalog,
        })
    }
}
