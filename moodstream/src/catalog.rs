//! Music catalog resolution
//!
//! Generated segments may reference a track by its numeric `musicID` instead
//! of carrying the full track. A catalog turns that id into a [`TrackRef`].
//! An unknown id is not an error: the segment simply plays silently.

use crate::error::{Error, Result};
use crate::models::{TrackRef, DEFAULT_FADE_MS};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Stable identifier of a track in the catalog
pub type TrackId = u32;

/// `trackId -> TrackRef` lookup
pub trait TrackCatalog: Send + Sync {
    fn resolve(&self, track_id: TrackId) -> Option<TrackRef>;
}

/// One entry of a `musicTracks.json` file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    #[serde(rename = "musicID")]
    pub music_id: TrackId,
    #[serde(default)]
    pub genre: String,
    pub title: String,
    #[serde(default)]
    pub artist: String,
    /// Duration in seconds
    pub duration: f64,
    pub mp3_url: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl CatalogEntry {
    fn to_track(&self) -> TrackRef {
        TrackRef {
            title: self.title.clone(),
            artist: self.artist.clone(),
            duration_ms: (self.duration.max(0.0) * 1000.0).round() as u64,
            start_offset_ms: 0,
            fade_in_ms: DEFAULT_FADE_MS,
            fade_out_ms: DEFAULT_FADE_MS,
            file_url: self.mp3_url.clone(),
            album_image_url: self.image_url.clone(),
        }
    }
}

/// In-memory catalog
#[derive(Debug, Clone, Default)]
pub struct StaticTrackCatalog {
    tracks: HashMap<TrackId, TrackRef>,
}

impl StaticTrackCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let tracks = entries
            .into_iter()
            .map(|entry| (entry.music_id, entry.to_track()))
            .collect();
        Self { tracks }
    }

    /// Parse the JSON array format of `musicTracks.json`
    pub fn from_json_str(json: &str) -> Result<Self> {
        let entries: Vec<CatalogEntry> = serde_json::from_str(json)?;
        Ok(Self::from_entries(entries))
    }

    /// Load a `musicTracks.json` file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::other(format!("Cannot read {}: {}", path.display(), e)))?;
        let catalog = Self::from_json_str(&json)?;
        debug!(path = %path.display(), tracks = catalog.len(), "Loaded music catalog");
        Ok(catalog)
    }

    pub fn insert(&mut self, track_id: TrackId, track: TrackRef) {
        self.tracks.insert(track_id, track);
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl TrackCatalog for StaticTrackCatalog {
    fn resolve(&self, track_id: TrackId) -> Option<TrackRef> {
        self.tracks.get(&track_id).cloned()
    }
}
