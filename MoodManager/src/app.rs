//! Wiring of the stream controller, the playback engine and the devices
//!
//! The controller owns the timeline. Its `SegmentChanged` events drive the
//! engine and the device bridge; the engine's completion signal drives
//! `advance()`. Nothing else moves the current index.

use moodaudio::{
    AudioBackend, FileVolumeStore, PlaybackConfig, PlaybackEngine, PlaybackEvent, SegmentEnded,
    SilentBackend,
};
use moodconfig::Config;
use mooddevices::{DeviceSyncBridge, DevicesConfig, MemoryDeviceStore};
use moodstream::{
    AdvanceOutcome, GenerationConfig, MoodStreamConfig, StaticTrackCatalog, StreamController,
    StreamEvent,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub struct MoodManager {
    controller: StreamController,
    engine: PlaybackEngine,
    bridge: DeviceSyncBridge,
    ended: mpsc::UnboundedReceiver<SegmentEnded>,
    stream_events: mpsc::Receiver<StreamEvent>,
    playback_events: mpsc::Receiver<PlaybackEvent>,
}

impl MoodManager {
    /// Build every component from the `generation`, `retry`, `merge`,
    /// `playback` and `devices` sections
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let settings = MoodStreamConfig::load_from_moodconfig(config)?;
        let playback = PlaybackConfig::load_from_moodconfig(config)?;
        let devices = DevicesConfig::load_from_moodconfig(config)?;
        devices.validate()?;

        let mut builder = settings.generation.client_builder();
        if let Some(catalog) = load_catalog(config, &settings.generation).await {
            info!("🎵 Music catalog loaded ({} tracks)", catalog.len());
            builder = builder.catalog(Arc::new(catalog));
        }
        let client = builder.build()?;
        info!("📡 Generation service at {}", client.generate_url());

        let controller = StreamController::with_cold_start(
            Arc::new(client),
            settings.merge,
            settings.retry,
        )?;

        let volume_store = Arc::new(FileVolumeStore::new(
            config.resolve_path(&playback.volume_file),
        ));
        let backend = audio_backend(config, &playback);
        let (engine, ended) = PlaybackEngine::new(backend, volume_store, playback);

        let bridge = DeviceSyncBridge::spawn(
            devices.build_sink()?,
            Arc::new(MemoryDeviceStore::default()),
            devices,
        );

        Ok(Self::assemble(controller, engine, ended, bridge))
    }

    pub fn assemble(
        controller: StreamController,
        engine: PlaybackEngine,
        ended: mpsc::UnboundedReceiver<SegmentEnded>,
        bridge: DeviceSyncBridge,
    ) -> Self {
        let stream_events = controller.subscribe();
        let playback_events = engine.subscribe();
        Self {
            controller,
            engine,
            bridge,
            ended,
            stream_events,
            playback_events,
        }
    }

    /// Load the cold-start segments; playback begins once the loop runs
    pub fn start(&self) -> moodstream::Result<()> {
        let loaded = self.controller.load_initial()?;
        info!("❄️ Cold start ready ({} segments)", loaded);
        self.bridge.set_volume(volume_percent(self.engine.volume()));
        Ok(())
    }

    pub async fn run_until_ctrl_c(&mut self) {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
    }

    /// Dispatch events until `stop` completes
    pub async fn run_until<F: Future<Output = ()>>(&mut self, stop: F) {
        let Self {
            controller,
            engine,
            bridge,
            ended,
            stream_events,
            playback_events,
        } = self;
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                Some(done) = ended.recv() => on_segment_ended(controller, done),
                Some(event) = stream_events.recv() => on_stream_event(engine, bridge, event),
                Some(event) = playback_events.recv() => on_playback_event(bridge, event),
                else => break,
            }
        }
    }

    pub async fn shutdown(&self) {
        info!("🛑 Shutting down...");
        self.controller.shutdown();
        self.engine.shutdown();
        self.bridge.shutdown();
        self.bridge.join().await;
    }
}

fn on_segment_ended(controller: &StreamController, done: SegmentEnded) {
    let current = controller.current_segment();
    let is_current = current.as_ref().is_some_and(|segment| {
        segment.mood.id == done.segment.mood_id && segment.start_time == done.segment.start_time
    });
    if !is_current {
        debug!(mood_id = %done.segment.mood_id, "Ignoring completion of a stale segment");
        return;
    }

    match controller.advance() {
        AdvanceOutcome::Advanced { index } => debug!(index, "Advanced"),
        AdvanceOutcome::Switched => info!("🔀 Switched to the next stream"),
        AdvanceOutcome::Parked => info!("⏳ Waiting for the next window"),
        AdvanceOutcome::AtEnd => warn!("Timeline exhausted, holding the last segment"),
        AdvanceOutcome::NotLoaded => {}
    }
}

fn on_stream_event(engine: &PlaybackEngine, bridge: &DeviceSyncBridge, event: StreamEvent) {
    match event {
        StreamEvent::SegmentChanged {
            stream_id,
            index,
            segment,
        } => {
            info!(
                stream_id = %stream_id,
                index,
                "🎶 Now: {} ({})",
                segment.mood.display_name,
                segment.mood.color
            );
            engine.play(&segment);
            bridge.forward(&segment);
        }
        StreamEvent::GenerationStateChanged { generating } => {
            debug!(generating, "Generation state changed");
        }
        StreamEvent::TimelineExtended { stream_id, total } => {
            info!(stream_id = %stream_id, "✨ Timeline extended to {} segments", total);
        }
        StreamEvent::NextStreamReady {
            stream_id,
            segments,
        } => {
            info!(stream_id = %stream_id, "Next window ready ({} segments)", segments);
        }
        StreamEvent::StreamSwitched {
            previous,
            stream_id,
        } => {
            debug!(previous = %previous, stream_id = %stream_id, "Stream switched");
        }
        StreamEvent::GenerationFailed {
            key,
            error,
            substituted,
        } => {
            warn!(key = %key, substituted, "⚠️ Generation failed: {}", error);
        }
    }
}

fn on_playback_event(bridge: &DeviceSyncBridge, event: PlaybackEvent) {
    match event {
        PlaybackEvent::VolumeChanged { volume } => bridge.set_volume(volume_percent(volume)),
        PlaybackEvent::Blocked => warn!("Audio output is waiting for a user gesture"),
        PlaybackEvent::CrossfadeStarted { from, to } => {
            debug!(from = %from.mood_id, to = %to.mood_id, "Cross-fade");
        }
        _ => {}
    }
}

fn volume_percent(volume: f32) -> u8 {
    (volume.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Catalog from a local file, or fetched from the generation service
async fn load_catalog(config: &Config, generation: &GenerationConfig) -> Option<StaticTrackCatalog> {
    let path = generation.catalog_path.as_deref()?;
    let local = config.resolve_path(path);
    if local.is_file() {
        return match StaticTrackCatalog::from_path(&local) {
            Ok(catalog) => Some(catalog),
            Err(e) => {
                warn!("⚠️ Unreadable music catalog {}: {}", local.display(), e);
                None
            }
        };
    }

    let client = match generation.client_builder().build() {
        Ok(client) => client,
        Err(e) => {
            warn!("⚠️ Cannot fetch the music catalog: {}", e);
            return None;
        }
    };
    match client.fetch_catalog(path).await {
        Ok(catalog) => Some(catalog),
        Err(e) => {
            warn!("⚠️ Music catalog unavailable, musicID references stay silent: {}", e);
            None
        }
    }
}

#[cfg(feature = "rodio")]
fn audio_backend(config: &Config, playback: &PlaybackConfig) -> Arc<dyn AudioBackend> {
    match moodaudio::RodioBackend::new(config.resolve_path(&playback.media_root)) {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            warn!("⚠️ Audio output unavailable, playing silently: {}", e);
            Arc::new(SilentBackend::new())
        }
    }
}

#[cfg(not(feature = "rodio"))]
fn audio_backend(_config: &Config, _playback: &PlaybackConfig) -> Arc<dyn AudioBackend> {
    Arc::new(SilentBackend::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use moodaudio::MemoryVolumeStore;
    use mooddevices::{DeviceStateStore, LoggingDeviceSink};
    use moodstream::{EpochMs, MergePolicy, RetryPolicy, Segment, SegmentGenerator};
    use std::time::Duration;

    struct Offline;

    #[async_trait]
    impl SegmentGenerator for Offline {
        async fn generate(&self, _start: EpochMs, _count: usize) -> moodstream::Result<Vec<Segment>> {
            Err(moodstream::Error::Timeout)
        }
    }

    #[test]
    fn test_volume_percent() {
        assert_eq!(volume_percent(0.7), 70);
        assert_eq!(volume_percent(1.5), 100);
        assert_eq!(volume_percent(-1.0), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_start_plays_across_boundaries() {
        let controller = StreamController::with_cold_start(
            Arc::new(Offline),
            MergePolicy::default(),
            RetryPolicy::default(),
        )
        .unwrap();
        let (engine, ended) = PlaybackEngine::new(
            Arc::new(SilentBackend::new()),
            Arc::new(MemoryVolumeStore::default()),
            PlaybackConfig::default(),
        );
        let store = Arc::new(MemoryDeviceStore::default());
        let bridge = DeviceSyncBridge::spawn(
            Arc::new(LoggingDeviceSink),
            store.clone(),
            DevicesConfig::default(),
        );

        let mut manager = MoodManager::assemble(controller.clone(), engine.clone(), ended, bridge);
        manager.start().unwrap();
        let first = controller.current_segment().unwrap();

        manager
            .run_until(tokio::time::sleep(Duration::from_millis(first.duration + 1_000)))
            .await;

        assert_eq!(controller.current_index(), Some(1));
        let second = controller.current_segment().unwrap();
        let playing = engine.current_segment().unwrap();
        assert_eq!(playing.mood_id, second.mood.id);
        assert_eq!(playing.start_time, second.start_time);
        assert!(engine.is_playing());
        assert!(engine.progress().unwrap().position_ms > 0);
        assert!(store.load().light.is_some());

        manager
            .run_until(tokio::time::sleep(Duration::from_millis(second.duration + 1_000)))
            .await;

        assert_eq!(controller.current_index(), Some(2));
        let third = controller.current_segment().unwrap();
        assert_eq!(engine.current_segment().unwrap().start_time, third.start_time);
        assert!(engine.progress().unwrap().position_ms > 0);

        manager.shutdown().await;
        assert!(!engine.is_playing());
    }
}
