//! Device payloads derived from a segment
//!
//! Values the segment does not carry (scent level and interval, speaker
//! volume, brightness for cold-start segments) are kept from the previously
//! stored state, then from configured defaults.

use crate::config::DevicesConfig;
use moodstream::hex_to_rgb;
use moodstream::Segment;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SCENT_TYPE: &str = "Floral";
pub const DEFAULT_NOW_PLAYING: &str = "Unknown";
pub const DEFAULT_BRIGHTNESS_PERCENT: u8 = 50;
pub const MIN_COLOR_TEMPERATURE: u32 = 2000;
pub const MAX_COLOR_TEMPERATURE: u32 = 7000;

/// Convert a 0–100 brightness to the bulb's 0–255 scale
pub fn brightness_level(percent: u8) -> u8 {
    ((u16::from(percent.min(100)) * 255 + 50) / 100) as u8
}

/// `POST /api/light/control`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightPayload {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colortemp: Option<u32>,
    /// 0–255
    pub brightness: u8,
}

/// `POST /api/scent/control`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScentPayload {
    pub scent_type: String,
    pub scent_level: u8,
    /// Seconds between sprays
    pub scent_interval: u32,
}

/// `POST /api/speaker/control`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakerPayload {
    pub now_playing: String,
    /// 0–100
    pub volume: u8,
}

/// Last state pushed to each device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub light: Option<LightPayload>,
    pub scent: Option<ScentPayload>,
    pub speaker: Option<SpeakerPayload>,
}

impl DeviceState {
    /// Target state of every device for `segment`
    ///
    /// `volume` is the playback volume in percent, when known.
    pub fn derive(
        segment: &Segment,
        previous: &DeviceState,
        volume: Option<u8>,
        defaults: &DevicesConfig,
    ) -> DeviceState {
        DeviceState {
            light: Some(light_for(segment, previous.light.as_ref())),
            scent: Some(scent_for(segment, previous.scent.as_ref(), defaults)),
            speaker: Some(speaker_for(
                segment,
                previous.speaker.as_ref(),
                volume,
                defaults,
            )),
        }
    }
}

fn light_for(segment: &Segment, previous: Option<&LightPayload>) -> LightPayload {
    let params = &segment.background_params;
    let color = params
        .mood_color
        .as_deref()
        .filter(|c| !c.is_empty())
        .unwrap_or(&segment.mood.color);
    let [r, g, b] = hex_to_rgb(color);

    let brightness = match params.brightness().filter(|pct| *pct > 0) {
        Some(percent) => brightness_level(percent),
        None => previous
            .map(|light| light.brightness)
            .filter(|level| *level > 0)
            .unwrap_or_else(|| brightness_level(DEFAULT_BRIGHTNESS_PERCENT)),
    };

    LightPayload {
        r,
        g,
        b,
        colortemp: params
            .temperature()
            .map(|t| t.clamp(MIN_COLOR_TEMPERATURE, MAX_COLOR_TEMPERATURE)),
        brightness,
    }
}

fn scent_for(
    segment: &Segment,
    previous: Option<&ScentPayload>,
    defaults: &DevicesConfig,
) -> ScentPayload {
    let scent = &segment.mood.scent;
    let scent_type = [scent.name.as_str(), scent.scent_type.as_str()]
        .into_iter()
        .find(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SCENT_TYPE)
        .to_string();

    ScentPayload {
        scent_type,
        scent_level: previous
            .map(|s| s.scent_level)
            .filter(|level| *level > 0)
            .unwrap_or(defaults.default_scent_level),
        scent_interval: previous
            .map(|s| s.scent_interval)
            .filter(|interval| *interval > 0)
            .unwrap_or(defaults.default_scent_interval),
    }
}

fn speaker_for(
    segment: &Segment,
    previous: Option<&SpeakerPayload>,
    volume: Option<u8>,
    defaults: &DevicesConfig,
) -> SpeakerPayload {
    let now_playing = segment
        .music_track
        .as_ref()
        .map(|t| t.title.as_str())
        .into_iter()
        .chain([segment.mood.music.title.as_str()])
        .find(|t| !t.is_empty())
        .unwrap_or(DEFAULT_NOW_PLAYING)
        .to_string();

    let volume = match volume {
        Some(v) => v.min(100),
        None => previous
            .map(|s| s.volume)
            .filter(|v| *v > 0)
            .unwrap_or(defaults.default_speaker_volume),
    };

    SpeakerPayload {
        now_playing,
        volume,
    }
}
