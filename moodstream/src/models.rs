//! Data model of the mood stream

use crate::color::hex_to_rgb;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Milliseconds since the Unix epoch
pub type EpochMs = i64;

/// Duration in milliseconds
pub type DurationMs = u64;

/// Default fade applied to tracks that do not carry their own
pub const DEFAULT_FADE_MS: DurationMs = 750;

const fn default_fade() -> DurationMs {
    DEFAULT_FADE_MS
}

/// Deserialize an RGB triple from any JSON numbers, clamping to 0..=255
fn deserialize_rgb<'de, D>(deserializer: D) -> Result<[u8; 3], D::Error>
where
    D: Deserializer<'de>,
{
    let raw = <[f64; 3]>::deserialize(deserializer)?;
    Ok(raw.map(|v| v.round().clamp(0.0, 255.0) as u8))
}

/// One timed slice of the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// Start instant, rewritten by [`crate::chain`]
    #[serde(alias = "timestamp")]
    pub start_time: EpochMs,
    pub duration: DurationMs,
    pub mood: MoodSnapshot,
    /// `None` when the track could not be resolved; the segment stays valid
    /// and plays silently for its duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music_track: Option<TrackRef>,
    #[serde(default)]
    pub background_params: BackgroundParams,
}

impl Segment {
    /// Instant at which the next segment starts
    pub fn end_time(&self) -> EpochMs {
        let duration = EpochMs::try_from(self.duration).unwrap_or(EpochMs::MAX);
        self.start_time.saturating_add(duration)
    }

    /// Fade-out of the segment's track, zero for silent segments
    pub fn fade_out_ms(&self) -> DurationMs {
        self.music_track.as_ref().map_or(0, |t| t.fade_out_ms)
    }
}

/// Mood attributes carried by a segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoodSnapshot {
    pub id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    /// Hex color such as `#DC143C`
    pub color: String,
    pub music: MusicInfo,
    pub scent: ScentInfo,
    #[serde(default)]
    pub lighting: LightingInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MusicInfo {
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScentInfo {
    #[serde(rename = "type", default)]
    pub scent_type: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightingInfo {
    #[serde(default)]
    pub color: String,
    #[serde(default, deserialize_with = "deserialize_rgb")]
    pub rgb: [u8; 3],
}

impl LightingInfo {
    /// Lighting derived from a hex color
    pub fn from_color(color: &str) -> Self {
        Self {
            color: color.to_string(),
            rgb: hex_to_rgb(color),
        }
    }
}

/// A resolved music track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRef {
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(rename = "duration")]
    pub duration_ms: DurationMs,
    #[serde(rename = "startOffset", default)]
    pub start_offset_ms: DurationMs,
    #[serde(rename = "fadeIn", default = "default_fade")]
    pub fade_in_ms: DurationMs,
    #[serde(rename = "fadeOut", default = "default_fade")]
    pub fade_out_ms: DurationMs,
    pub file_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_image_url: Option<String>,
}

/// Cosmetic parameters for the animated background
///
/// Only the fields the pipeline reads are typed; anything else the
/// generation service sends is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood_alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lighting: Option<BackgroundLighting>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icon_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_wind: Option<Wind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation_speed: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_opacity: Option<f32>,
    /// Origin of the segment: `initial`, `fallback`, or whatever the
    /// generation service reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl BackgroundParams {
    /// Brightness in percent, when the segment specifies one
    pub fn brightness(&self) -> Option<u8> {
        self.lighting.as_ref().and_then(|l| l.brightness)
    }

    /// Color temperature in kelvin, when the segment specifies one
    pub fn temperature(&self) -> Option<u32> {
        self.lighting.as_ref().and_then(|l| l.temperature)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundLighting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Wind {
    pub direction: f32,
    pub speed: f32,
}

/// User-held edits applied on top of the current segment
///
/// Set through [`crate::StreamController::set_mood_override`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoodOverride {
    pub color: Option<String>,
    pub scent: Option<ScentInfo>,
    /// Brightness in percent
    pub brightness: Option<u8>,
}

impl MoodOverride {
    /// Patch a segment in place
    pub fn apply(&self, segment: &mut Segment) {
        if let Some(color) = &self.color {
            segment.mood.color = color.clone();
            segment.mood.lighting = LightingInfo::from_color(color);
        }
        if let Some(scent) = &self.scent {
            segment.mood.scent = scent.clone();
        }
        if let Some(brightness) = self.brightness {
            segment
                .background_params
                .lighting
                .get_or_insert_with(BackgroundLighting::default)
                .brightness = Some(brightness.min(100));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.color.is_none() && self.scent.is_none() && self.brightness.is_none()
    }
}

/// A timeline sharing one stream identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoodStream {
    pub stream_id: String,
    pub segments: Vec<Segment>,
    pub current_index: usize,
    pub created_at: DateTime<Utc>,
}

impl MoodStream {
    /// Create a stream with a fresh identifier, positioned on the first segment
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            stream_id: new_stream_id(),
            segments,
            current_index: 0,
            created_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn current_segment(&self) -> Option<&Segment> {
        self.segments.get(self.current_index)
    }

    /// End instant of the last segment, if any
    pub fn last_end_time(&self) -> Option<EpochMs> {
        self.segments.last().map(Segment::end_time)
    }
}

/// Generate a new stream identifier
pub fn new_stream_id() -> String {
    format!("stream-{}", uuid::Uuid::new_v4())
}

/// Current wall-clock time in epoch milliseconds
pub fn now_ms() -> EpochMs {
    Utc::now().timestamp_millis()
}
