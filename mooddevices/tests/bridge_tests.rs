//! Debounced device forwarding

use async_trait::async_trait;
use mooddevices::{
    DeviceError, DeviceSink, DeviceState, DeviceStateStore, DeviceSyncBridge, DevicesConfig,
    LightPayload, MemoryDeviceStore, ScentPayload, SpeakerPayload,
};
use moodstream::{ColdStartProvider, Segment};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    Light(LightPayload),
    Scent(ScentPayload),
    Speaker(SpeakerPayload),
}

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<Sent>>,
    failing: AtomicBool,
}

impl RecordingSink {
    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, sent: Sent) -> mooddevices::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeviceError::Status {
                endpoint: "/api/light/control".to_string(),
                status: 502,
            });
        }
        self.sent.lock().unwrap().push(sent);
        Ok(())
    }
}

#[async_trait]
impl DeviceSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_light(&self, payload: &LightPayload) -> mooddevices::Result<()> {
        self.record(Sent::Light(payload.clone()))
    }

    async fn send_scent(&self, payload: &ScentPayload) -> mooddevices::Result<()> {
        self.record(Sent::Scent(payload.clone()))
    }

    async fn send_speaker(&self, payload: &SpeakerPayload) -> mooddevices::Result<()> {
        self.record(Sent::Speaker(payload.clone()))
    }
}

fn carols() -> Vec<Segment> {
    ColdStartProvider.segments()
}

fn setup() -> (DeviceSyncBridge, Arc<RecordingSink>, Arc<MemoryDeviceStore>) {
    let sink = Arc::new(RecordingSink::default());
    let store = Arc::new(MemoryDeviceStore::default());
    let bridge = DeviceSyncBridge::spawn(sink.clone(), store.clone(), DevicesConfig::default());
    (bridge, sink, store)
}

#[tokio::test(start_paused = true)]
async fn test_rapid_changes_are_coalesced() {
    let (bridge, sink, store) = setup();
    let segments = carols();

    for segment in &segments {
        bridge.forward(segment);
        sleep(Duration::from_millis(100)).await;
    }
    assert!(sink.sent().is_empty());

    sleep(Duration::from_millis(300)).await;
    let sent = sink.sent();
    assert_eq!(sent.len(), 3, "{sent:?}");

    let expected = DeviceState::derive(
        &segments[2],
        &DeviceState::default(),
        None,
        &DevicesConfig::default(),
    );
    assert_eq!(sent[0], Sent::Light(expected.light.clone().unwrap()));
    assert_eq!(store.load(), expected);
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_payloads_are_not_resent() {
    let (bridge, sink, _store) = setup();
    let segment = carols().remove(0);

    bridge.forward(&segment);
    sleep(Duration::from_millis(400)).await;
    assert_eq!(sink.sent().len(), 3);

    bridge.forward(&segment);
    sleep(Duration::from_millis(400)).await;
    assert_eq!(sink.sent().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_volume_change_only_touches_speaker() {
    let (bridge, sink, _store) = setup();
    bridge.forward(&carols().remove(0));
    sleep(Duration::from_millis(400)).await;

    bridge.set_volume(30);
    sleep(Duration::from_millis(400)).await;

    let sent = sink.sent();
    assert_eq!(sent.len(), 4);
    match &sent[3] {
        Sent::Speaker(speaker) => assert_eq!(speaker.volume, 30),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_volume_before_any_mood_is_held() {
    let (bridge, sink, _store) = setup();
    bridge.set_volume(45);
    sleep(Duration::from_millis(400)).await;
    assert!(sink.sent().is_empty());

    bridge.forward(&carols().remove(0));
    sleep(Duration::from_millis(400)).await;
    assert!(sink
        .sent()
        .iter()
        .any(|s| matches!(s, Sent::Speaker(p) if p.volume == 45)));
}

#[tokio::test(start_paused = true)]
async fn test_failed_updates_are_not_retried() {
    let (bridge, sink, store) = setup();
    let segments = carols();

    sink.failing.store(true, Ordering::SeqCst);
    bridge.forward(&segments[0]);
    sleep(Duration::from_millis(400)).await;
    assert!(sink.sent().is_empty());
    let attempted = DeviceState::derive(
        &segments[0],
        &DeviceState::default(),
        None,
        &DevicesConfig::default(),
    );
    assert_eq!(store.load(), attempted);

    sink.failing.store(false, Ordering::SeqCst);
    bridge.forward(&segments[0]);
    sleep(Duration::from_millis(400)).await;
    assert!(sink.sent().is_empty());

    bridge.forward(&segments[1]);
    sleep(Duration::from_millis(400)).await;
    let sent = sink.sent();
    assert!(matches!(sent[0], Sent::Light(_)), "{sent:?}");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drops_pending_update() {
    let (bridge, sink, _store) = setup();
    bridge.forward(&carols().remove(0));
    bridge.shutdown();
    bridge.join().await;

    sleep(Duration::from_secs(1)).await;
    assert!(sink.sent().is_empty());
}
