//! Playback engine on the tokio clock

use moodaudio::{
    AudioBackend, AudioError, Deck, EndSignal, MemoryVolumeStore, PlaybackConfig, PlaybackEngine,
    PlaybackEvent, Progress, SegmentEnded, SilentBackend, VolumeStore,
};
use moodstream::models::{LightingInfo, MusicInfo, ScentInfo};
use moodstream::{BackgroundParams, EpochMs, MoodSnapshot, Segment, TrackRef};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{Receiver, UnboundedReceiver};
use tokio::time::sleep;

const T0: EpochMs = 1_766_620_800_000;

fn segment(id: &str, start_time: EpochMs, duration: u64, with_track: bool) -> Segment {
    let track = with_track.then(|| TrackRef {
        title: format!("Track {id}"),
        artist: "Someone".to_string(),
        duration_ms: duration,
        start_offset_ms: 0,
        fade_in_ms: 750,
        fade_out_ms: 750,
        file_url: format!("/album/Test/{id}.mp3"),
        album_image_url: None,
    });
    Segment {
        start_time,
        duration,
        mood: MoodSnapshot {
            id: id.to_string(),
            display_name: id.to_string(),
            color: "#6B8E9F".to_string(),
            music: MusicInfo::default(),
            scent: ScentInfo::default(),
            lighting: LightingInfo::from_color("#6B8E9F"),
        },
        music_track: track,
        background_params: BackgroundParams::default(),
    }
}

fn engine_with(
    backend: impl AudioBackend + 'static,
) -> (PlaybackEngine, UnboundedReceiver<SegmentEnded>) {
    PlaybackEngine::new(
        Arc::new(backend),
        Arc::new(MemoryVolumeStore::new(Some(1.0))),
        PlaybackConfig::default(),
    )
}

fn drain(rx: &mut Receiver<PlaybackEvent>) -> Vec<PlaybackEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 0.02
}

#[tokio::test(start_paused = true)]
async fn test_crossfade_between_segments() {
    let (engine, mut ended) = engine_with(SilentBackend::new());
    let a = segment("a", T0, 3_000, true);
    let b = segment("b", T0 + 3_000, 3_000, true);

    engine.play(&a);
    sleep(Duration::from_millis(3_100)).await;

    let done = ended.try_recv().unwrap();
    assert_eq!(done.segment.mood_id, "a");
    assert!(ended.try_recv().is_err(), "segment a ended twice");

    engine.play(&b);
    let gains = engine.gains();
    assert_eq!(gains.len(), 2);
    assert_eq!(gains[0].segment.mood_id, "b");
    assert!(approx(gains[0].gain, 0.0));
    assert!(gains[1].fading_out);
    assert!(approx(gains[1].gain, 1.0));

    sleep(Duration::from_millis(375)).await;
    let gains = engine.gains();
    assert!(approx(gains[0].gain, 0.5), "{gains:?}");
    assert!(approx(gains[1].gain, 0.5), "{gains:?}");

    sleep(Duration::from_millis(400)).await;
    let gains = engine.gains();
    assert_eq!(gains.len(), 1, "outgoing deck still alive: {gains:?}");
    assert!(approx(gains[0].gain, 1.0));

    assert!(ended.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_incoming_segment_plays_to_its_end() {
    let (engine, mut ended) = engine_with(SilentBackend::new());
    let a = segment("a", T0, 3_000, true);
    let b = segment("b", T0 + 3_000, 3_000, true);

    engine.play(&a);
    sleep(Duration::from_millis(3_100)).await;
    assert_eq!(ended.try_recv().unwrap().segment.mood_id, "a");

    engine.play(&b);
    assert!(engine.is_playing());
    sleep(Duration::from_secs(1)).await;
    assert_eq!(engine.current_segment().unwrap().mood_id, "b");
    assert_eq!(engine.progress().unwrap().position_ms, 1_000);
    assert!(approx(engine.gains()[0].gain, 1.0));

    sleep(Duration::from_millis(2_100)).await;
    assert_eq!(ended.try_recv().unwrap().segment.mood_id, "b");
    assert!(ended.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_sampler_completes_without_end_event() {
    let (engine, mut ended) = engine_with(SilentBackend::new().without_end_events());
    engine.play(&segment("a", T0, 2_000, true));

    sleep(Duration::from_millis(1_900)).await;
    assert!(ended.try_recv().is_err());

    sleep(Duration::from_millis(200)).await;
    assert_eq!(ended.try_recv().unwrap().segment.mood_id, "a");
    sleep(Duration::from_secs(2)).await;
    assert!(ended.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_blocked_start_waits_for_gesture() {
    let (engine, mut ended) = engine_with(SilentBackend::new().requiring_gesture());
    let mut events = engine.subscribe();

    engine.play(&segment("a", T0, 5_000, true));
    assert!(engine.is_blocked());
    assert!(!engine.is_playing());
    let seen = drain(&mut events);
    assert!(matches!(seen[0], PlaybackEvent::Started { .. }));
    assert!(seen.contains(&PlaybackEvent::Blocked));

    sleep(Duration::from_secs(1)).await;
    assert_eq!(engine.progress().unwrap().position_ms, 0);

    assert!(engine.toggle());
    assert!(!engine.is_blocked());
    sleep(Duration::from_secs(1)).await;
    assert_eq!(engine.progress().unwrap().position_ms, 1_000);
    assert!(ended.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_replaying_loaded_segment_resumes() {
    let (engine, mut ended) = engine_with(SilentBackend::new());
    let a = segment("a", T0, 3_000, true);

    engine.play(&a);
    sleep(Duration::from_millis(1_000)).await;
    engine.pause();
    sleep(Duration::from_secs(10)).await;
    assert_eq!(engine.progress().unwrap().position_ms, 1_000);
    assert!(ended.try_recv().is_err());

    engine.play(&a);
    sleep(Duration::from_millis(500)).await;
    assert_eq!(engine.progress().unwrap().position_ms, 1_500);
    assert_eq!(engine.gains().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_toggle_pauses_and_resumes() {
    let (engine, _ended) = engine_with(SilentBackend::new());
    engine.play(&segment("a", T0, 3_000, true));

    assert!(!engine.toggle());
    assert!(!engine.is_playing());
    assert!(engine.toggle());
    assert!(engine.is_playing());
}

#[tokio::test(start_paused = true)]
async fn test_seek_is_clamped_and_immediate() {
    let (engine, mut ended) = engine_with(SilentBackend::new());
    engine.play(&segment("a", T0, 3_000, true));

    assert_eq!(
        engine.seek(-500),
        Some(Progress {
            position_ms: 0,
            duration_ms: 3_000
        })
    );
    assert_eq!(engine.seek(1_200).unwrap().position_ms, 1_200);
    assert_eq!(engine.progress().unwrap().position_ms, 1_200);
    assert!(!engine.is_fading_out());

    assert_eq!(engine.seek(10_000).unwrap().position_ms, 3_000);
    assert!(engine.is_fading_out());

    sleep(Duration::from_millis(200)).await;
    assert_eq!(ended.try_recv().unwrap().segment.mood_id, "a");
    assert!(ended.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_seek_without_segment() {
    let (engine, _ended) = engine_with(SilentBackend::new());
    assert_eq!(engine.seek(1_000), None);
    assert!(engine.progress().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_volume_is_clamped_and_persisted() {
    let store = Arc::new(MemoryVolumeStore::new(Some(9.0)));
    let (engine, _ended) = PlaybackEngine::new(
        Arc::new(SilentBackend::new()),
        store.clone(),
        PlaybackConfig::default(),
    );
    assert_eq!(engine.volume(), 0.7);

    let mut events = engine.subscribe();
    assert_eq!(engine.set_volume(1.4), 1.0);
    assert_eq!(store.load(), Some(1.0));
    assert_eq!(engine.set_volume(0.25), 0.25);
    assert_eq!(engine.volume(), 0.25);
    assert_eq!(engine.set_volume(f32::NAN), 0.25);

    let seen = drain(&mut events);
    assert_eq!(
        seen,
        vec![
            PlaybackEvent::VolumeChanged { volume: 1.0 },
            PlaybackEvent::VolumeChanged { volume: 0.25 },
        ]
    );
}

struct MissingMedia;

impl AudioBackend for MissingMedia {
    fn name(&self) -> &str {
        "missing"
    }

    fn open(&self, track: &TrackRef, _end: EndSignal) -> moodaudio::Result<Box<dyn Deck>> {
        Err(AudioError::TrackNotFound(track.file_url.clone()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_missing_track_plays_silently() {
    let (engine, mut ended) = engine_with(MissingMedia);
    engine.play(&segment("a", T0, 2_000, true));
    assert!(engine.is_playing());

    sleep(Duration::from_millis(2_100)).await;
    assert_eq!(ended.try_recv().unwrap().segment.mood_id, "a");
}

#[tokio::test(start_paused = true)]
async fn test_segment_without_track_advances() {
    let (engine, mut ended) = engine_with(SilentBackend::new());
    engine.play(&segment("quiet", T0, 1_500, false));

    sleep(Duration::from_millis(1_600)).await;
    assert_eq!(ended.try_recv().unwrap().segment.mood_id, "quiet");
}

#[tokio::test(start_paused = true)]
async fn test_crossfade_events() {
    let (engine, _ended) = engine_with(SilentBackend::new());
    let mut events = engine.subscribe();

    engine.play(&segment("a", T0, 3_000, true));
    sleep(Duration::from_millis(1_000)).await;
    engine.play(&segment("b", T0 + 3_000, 3_000, true));
    sleep(Duration::from_millis(1_000)).await;

    let seen: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|e| !matches!(e, PlaybackEvent::Progress { .. }))
        .collect();
    let names: Vec<&str> = seen
        .iter()
        .map(|e| match e {
            PlaybackEvent::Started { .. } => "started",
            PlaybackEvent::CrossfadeStarted { .. } => "crossfade-started",
            PlaybackEvent::CrossfadeFinished { .. } => "crossfade-finished",
            _ => "other",
        })
        .collect();
    assert_eq!(
        names,
        vec!["started", "crossfade-started", "started", "crossfade-finished"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_everything() {
    let (engine, mut ended) = engine_with(SilentBackend::new());
    engine.play(&segment("a", T0, 1_000, true));
    engine.shutdown();

    sleep(Duration::from_secs(5)).await;
    assert!(!engine.is_playing());
    assert!(engine.current_segment().is_none());
    assert!(ended.try_recv().is_err());

    engine.play(&segment("b", T0, 1_000, true));
    assert!(engine.current_segment().is_none());
}
