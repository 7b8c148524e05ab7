//! Playback errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AudioError>;

#[derive(Debug, Error)]
pub enum AudioError {
    /// Output refused to start without a direct user gesture
    #[error("playback blocked until a user gesture")]
    PlaybackBlocked,

    #[error("track not found: {0}")]
    TrackNotFound(String),

    #[error("audio device unavailable: {0}")]
    Device(String),

    #[error("cannot decode {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("seek failed: {0}")]
    Seek(String),

    #[error("audio backend stopped")]
    BackendClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl AudioError {
    pub fn is_blocked(&self) -> bool {
        matches!(self, AudioError::PlaybackBlocked)
    }
}
