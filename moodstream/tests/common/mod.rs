#![allow(dead_code)]

use async_trait::async_trait;
use moodstream::models::{LightingInfo, MusicInfo, ScentInfo};
use moodstream::{
    chain, BackgroundParams, EpochMs, Error, InitialSegmentSource, MoodSnapshot, Result, Segment,
    SegmentGenerator,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const T0: EpochMs = 1_766_620_800_000;

pub fn segment(id: &str, duration: u64) -> Segment {
    Segment {
        start_time: 0,
        duration,
        mood: MoodSnapshot {
            id: id.to_string(),
            display_name: format!("Mood {id}"),
            color: "#6B8E9F".to_string(),
            music: MusicInfo::default(),
            scent: ScentInfo {
                scent_type: "Citrus".to_string(),
                name: "Lemon".to_string(),
            },
            lighting: LightingInfo::from_color("#6B8E9F"),
        },
        music_track: None,
        background_params: BackgroundParams::default(),
    }
}

pub fn batch(prefix: &str, count: usize, start: EpochMs) -> Vec<Segment> {
    chain(
        start,
        (0..count).map(|i| segment(&format!("{prefix}-{i}"), 60_000 + i as u64 * 1_000)),
    )
}

/// Initial source returning a fixed number of segments
pub struct FixedSource(pub usize);

impl InitialSegmentSource for FixedSource {
    fn initial_segments(&self, start_time: EpochMs) -> Vec<Segment> {
        batch("initial", self.0, start_time)
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Outcome {
    Segments(usize),
    Timeout,
    Malformed,
}

/// Generator following a script, then repeating a default outcome
pub struct ScriptedGenerator {
    calls: AtomicUsize,
    delay: Duration,
    script: Mutex<VecDeque<Outcome>>,
    default: Outcome,
}

impl ScriptedGenerator {
    pub fn new(default: Outcome, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            script: Mutex::new(VecDeque::new()),
            default,
        })
    }

    pub fn succeeding(delay: Duration) -> Arc<Self> {
        Self::new(Outcome::Segments(10), delay)
    }

    pub fn scripted(script: Vec<Outcome>, default: Outcome) -> Arc<Self> {
        let generator = Self::new(default, Duration::from_millis(100));
        generator.script.lock().unwrap().extend(script);
        generator
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SegmentGenerator for ScriptedGenerator {
    async fn generate(&self, next_start_time: EpochMs, segment_count: usize) -> Result<Vec<Segment>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.default);
        tokio::time::sleep(self.delay).await;
        match outcome {
            Outcome::Segments(n) => Ok(batch(
                &format!("gen{call}"),
                n.min(segment_count),
                next_start_time,
            )),
            Outcome::Timeout => Err(Error::Timeout),
            Outcome::Malformed => Err(Error::Malformed("segment 0 has an invalid color".into())),
        }
    }
}
