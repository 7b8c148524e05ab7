//! Debounced forwarding of the current mood to devices
//!
//! The bridge task keeps the latest segment and volume it was given. Once
//! no new input has arrived for the debounce period it derives the device
//! state and sends only the payloads that differ from what the store says
//! each device last received. A failed send leaves the stored value alone,
//! so the next flush tries again.

use crate::config::DevicesConfig;
use crate::payload::DeviceState;
use crate::sink::DeviceSink;
use crate::store::DeviceStateStore;
use moodstream::Segment;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

enum BridgeInput {
    Segment(Box<Segment>),
    Volume(u8),
}

/// Handle on the forwarding task
pub struct DeviceSyncBridge {
    tx: mpsc::UnboundedSender<BridgeInput>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceSyncBridge {
    /// Start the forwarding task on the current runtime
    pub fn spawn(
        sink: Arc<dyn DeviceSink>,
        store: Arc<dyn DeviceStateStore>,
        config: DevicesConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        info!(
            sink = sink.name(),
            debounce_ms = config.debounce_ms,
            "Device sync started"
        );

        let forwarder = Forwarder {
            sink,
            store,
            config,
            segment: None,
            volume: None,
        };
        let task = tokio::spawn(forwarder.run(rx, shutdown.clone()));

        Self {
            tx,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Queue the mood of `segment` for the devices
    pub fn forward(&self, segment: &Segment) {
        self.send(BridgeInput::Segment(Box::new(segment.clone())));
    }

    /// Queue a speaker volume change, in percent
    pub fn set_volume(&self, percent: u8) {
        self.send(BridgeInput::Volume(percent.min(100)));
    }

    fn send(&self, input: BridgeInput) {
        if self.tx.send(input).is_err() {
            debug!("Device sync already stopped");
        }
    }

    /// Stop forwarding; pending updates are dropped
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait for the forwarding task to finish
    pub async fn join(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

struct Forwarder {
    sink: Arc<dyn DeviceSink>,
    store: Arc<dyn DeviceStateStore>,
    config: DevicesConfig,
    segment: Option<Segment>,
    volume: Option<u8>,
}

impl Forwarder {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<BridgeInput>,
        shutdown: CancellationToken,
    ) {
        let debounce = self.config.debounce();
        let mut deadline: Option<Instant> = None;

        loop {
            let wake = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            tokio::select! {
                _ = shutdown.cancelled() => break,
                input = rx.recv() => {
                    let Some(input) = input else {
                        if deadline.is_some() {
                            self.flush().await;
                        }
                        break;
                    };
                    self.accept(input);
                    deadline = Some(Instant::now() + debounce);
                }
                _ = tokio::time::sleep_until(wake), if deadline.is_some() => {
                    deadline = None;
                    self.flush().await;
                }
            }
        }
        debug!("Device sync stopped");
    }

    fn accept(&mut self, input: BridgeInput) {
        match input {
            BridgeInput::Segment(segment) => self.segment = Some(*segment),
            BridgeInput::Volume(percent) => self.volume = Some(percent),
        }
    }

    async fn flush(&self) {
        let Some(segment) = &self.segment else {
            debug!("No mood to forward yet");
            return;
        };

        let stored = self.store.load();
        let target = DeviceState::derive(segment, &stored, self.volume, &self.config);
        let mut next = stored.clone();

        // Delivery is best effort: a failed payload still counts as sent.
        if let Some(light) = target.light.filter(|l| stored.light.as_ref() != Some(l)) {
            if let Err(e) = self.sink.send_light(&light).await {
                warn!(device = "light", mood_id = %segment.mood.id, "Device update failed: {}", e);
            }
            next.light = Some(light);
        }
        if let Some(scent) = target.scent.filter(|s| stored.scent.as_ref() != Some(s)) {
            if let Err(e) = self.sink.send_scent(&scent).await {
                warn!(device = "scent", mood_id = %segment.mood.id, "Device update failed: {}", e);
            }
            next.scent = Some(scent);
        }
        if let Some(speaker) = target.speaker.filter(|s| stored.speaker.as_ref() != Some(s)) {
            if let Err(e) = self.sink.send_speaker(&speaker).await {
                warn!(device = "speaker", mood_id = %segment.mood.id, "Device update failed: {}", e);
            }
            next.speaker = Some(speaker);
        }

        if next != stored {
            debug!(mood_id = %segment.mood.id, "Device state recorded");
            self.store.save(next);
        }
    }
}
