//! Playback notifications

use moodstream::{EpochMs, Segment};

/// Identity of a segment within a timeline
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentKey {
    pub mood_id: String,
    pub start_time: EpochMs,
}

impl SegmentKey {
    pub fn of(segment: &Segment) -> Self {
        Self {
            mood_id: segment.mood.id.clone(),
            start_time: segment.start_time,
        }
    }
}

/// Sent exactly once per played segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentEnded {
    pub segment: SegmentKey,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// A segment was loaded onto a fresh deck
    Started {
        segment: SegmentKey,
        title: Option<String>,
    },
    /// Sampled position within the current segment
    Progress { position_ms: u64, duration_ms: u64 },
    /// Output refused to start; waiting for a user gesture
    Blocked,
    Paused,
    Resumed,
    CrossfadeStarted { from: SegmentKey, to: SegmentKey },
    /// The outgoing deck reached silence and was stopped
    CrossfadeFinished { segment: SegmentKey },
    VolumeChanged { volume: f32 },
    SegmentEnded(SegmentEnded),
}
