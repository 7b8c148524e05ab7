//! Fixed cold-start sequence
//!
//! Three hard-coded carol segments available with no network or storage
//! access, so the stream has content before any generation completes.

use crate::chain::chain;
use crate::color::hex_to_rgb;
use crate::models::{
    BackgroundLighting, BackgroundParams, DurationMs, EpochMs, LightingInfo, MoodSnapshot,
    MusicInfo, ScentInfo, Segment, TrackRef, Wind, DEFAULT_FADE_MS,
};
use std::collections::HashMap;

/// Number of segments in the cold-start sequence
pub const COLD_START_COUNT: usize = 3;

/// Genre shared by every cold-start segment
pub const COLD_START_GENRE: &str = "Carol";

/// Source of the segments shown before anything is generated
pub trait InitialSegmentSource: Send + Sync {
    /// Segments chained from `start_time`
    fn initial_segments(&self, start_time: EpochMs) -> Vec<Segment>;
}

struct Carol {
    alias: &'static str,
    color: &'static str,
    icons: &'static [&'static str],
    scent_type: &'static str,
    scent_name: &'static str,
    title: &'static str,
    artist: &'static str,
    file: &'static str,
    duration: DurationMs,
    wind_direction: f32,
    wind_speed: f32,
    animation_speed: f32,
    icon_opacity: f32,
    brightness: u8,
}

const CAROLS: [Carol; COLD_START_COUNT] = [
    Carol {
        alias: "Festive Christmas Vibes",
        color: "#DC143C",
        icons: &["snowflake", "star", "gift", "bell", "candle", "tree"],
        scent_type: "Woody",
        scent_name: "Wood",
        title: "All I want for christmas",
        artist: "Mariah Carey",
        file: "/album/Carol/Carol_01.mp3",
        duration: 242_000,
        wind_direction: 180.0,
        wind_speed: 3.0,
        animation_speed: 4.0,
        icon_opacity: 0.7,
        brightness: 100,
    },
    Carol {
        alias: "Cozy Green Retreat",
        color: "#228B22",
        icons: &["tree", "bell", "candle", "snowflake", "star", "gift"],
        scent_type: "Spicy",
        scent_name: "Cinnamon Stick",
        title: "Because it's Christmas",
        artist: "Sung Sikyung and others",
        file: "/album/Carol/Carol_02.mp3",
        duration: 226_000,
        wind_direction: 210.0,
        wind_speed: 4.0,
        animation_speed: 5.0,
        icon_opacity: 0.8,
        brightness: 50,
    },
    Carol {
        alias: "Golden Holiday Cheer",
        color: "#FFD700",
        icons: &["star", "sparkles", "gift", "bell", "snowflake", "tree"],
        scent_type: "Floral",
        scent_name: "Rose",
        title: "Jingle bell rock",
        artist: "Bobby Helms",
        file: "/album/Carol/Carol_03.mp3",
        duration: 130_000,
        wind_direction: 240.0,
        wind_speed: 5.0,
        animation_speed: 6.0,
        icon_opacity: 0.9,
        brightness: 50,
    },
];

const COLOR_TEMPERATURE: u32 = 4000;

/// Deterministic provider of the cold-start sequence
#[derive(Debug, Clone, Copy, Default)]
pub struct ColdStartProvider;

impl ColdStartProvider {
    pub fn new() -> Self {
        Self
    }

    /// The three segments, not yet chained (all start at 0)
    pub fn segments(&self) -> Vec<Segment> {
        CAROLS
            .iter()
            .enumerate()
            .map(|(i, carol)| carol_segment(i, carol, "initial"))
            .collect()
    }

    /// Palette entry `i` (modulo the sequence length) tagged with `source`
    ///
    /// Used to build substitute batches that look like cold-start content.
    pub(crate) fn palette_segment(index: usize, source: &str) -> Segment {
        carol_segment(index, &CAROLS[index % COLD_START_COUNT], source)
    }
}

impl InitialSegmentSource for ColdStartProvider {
    fn initial_segments(&self, start_time: EpochMs) -> Vec<Segment> {
        chain(start_time, self.segments())
    }
}

fn carol_segment(index: usize, carol: &Carol, source: &str) -> Segment {
    let mut extra = HashMap::new();
    extra.insert(
        "musicSelection".to_string(),
        serde_json::Value::String(carol.title.to_string()),
    );

    Segment {
        start_time: 0,
        duration: carol.duration,
        mood: MoodSnapshot {
            id: format!("carol-segment-{index}"),
            display_name: carol.alias.to_string(),
            color: carol.color.to_string(),
            music: MusicInfo {
                genre: COLD_START_GENRE.to_string(),
                title: carol.title.to_string(),
            },
            scent: ScentInfo {
                scent_type: carol.scent_type.to_string(),
                name: carol.scent_name.to_string(),
            },
            lighting: LightingInfo {
                color: carol.color.to_string(),
                rgb: hex_to_rgb(carol.color),
            },
        },
        music_track: Some(TrackRef {
            title: carol.title.to_string(),
            artist: carol.artist.to_string(),
            duration_ms: carol.duration,
            start_offset_ms: 0,
            fade_in_ms: DEFAULT_FADE_MS,
            fade_out_ms: DEFAULT_FADE_MS,
            file_url: carol.file.to_string(),
            album_image_url: Some(format!("/album/Carol/{}.png", carol.title)),
        }),
        background_params: BackgroundParams {
            mood_alias: Some(carol.alias.to_string()),
            mood_color: Some(carol.color.to_string()),
            lighting: Some(BackgroundLighting {
                brightness: Some(carol.brightness),
                temperature: Some(COLOR_TEMPERATURE),
            }),
            icon_keys: carol.icons.iter().map(|s| s.to_string()).collect(),
            background_wind: Some(Wind {
                direction: carol.wind_direction,
                speed: carol.wind_speed,
            }),
            animation_speed: Some(carol.animation_speed),
            icon_opacity: Some(carol.icon_opacity),
            source: Some(source.to_string()),
            extra,
        },
    }
}
