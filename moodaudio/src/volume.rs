//! Volume persistence

use crate::error::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Volume used when nothing valid is stored
pub const DEFAULT_VOLUME: f32 = 0.7;

/// Storage for the user's volume level
pub trait VolumeStore: Send + Sync {
    /// Raw stored value, if any
    fn load(&self) -> Option<f32>;
    fn save(&self, volume: f32) -> Result<()>;
}

/// Stored volume if it is a finite level in `0..=1`, otherwise `default`
pub fn initial_volume(store: &dyn VolumeStore, default: f32) -> f32 {
    match store.load() {
        Some(v) if v.is_finite() && (0.0..=1.0).contains(&v) => v,
        Some(v) => {
            warn!(volume = v, "Ignoring invalid stored volume");
            default
        }
        None => default,
    }
}

#[derive(Debug, Default)]
pub struct MemoryVolumeStore {
    volume: Mutex<Option<f32>>,
}

impl MemoryVolumeStore {
    pub fn new(volume: Option<f32>) -> Self {
        Self {
            volume: Mutex::new(volume),
        }
    }
}

impl VolumeStore for MemoryVolumeStore {
    fn load(&self) -> Option<f32> {
        *self.volume.lock()
    }

    fn save(&self, volume: f32) -> Result<()> {
        *self.volume.lock() = Some(volume);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct VolumeFile {
    volume: f32,
}

/// Volume kept in a small JSON file (`{"volume": 0.7}`)
#[derive(Debug, Clone)]
pub struct FileVolumeStore {
    path: PathBuf,
}

impl FileVolumeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl VolumeStore for FileVolumeStore {
    fn load(&self) -> Option<f32> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<VolumeFile>(&content) {
            Ok(file) => Some(file.volume),
            Err(e) => {
                warn!(path = %self.path.display(), "Unreadable volume file: {}", e);
                None
            }
        }
    }

    fn save(&self, volume: f32) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string(&VolumeFile { volume })?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}
