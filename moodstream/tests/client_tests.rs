//! Generation client against a mock HTTP service

use moodstream::catalog::StaticTrackCatalog;
use moodstream::chain::is_contiguous;
use moodstream::{Error, GenerationClient, SegmentGenerator};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ENDPOINT: &str = "/api/moods/current/generate";

fn wire_segment(i: usize, color: &str, duration: u64) -> Value {
    json!({
        "timestamp": 0,
        "duration": duration,
        "mood": {
            "id": format!("llm-{i}"),
            "name": format!("Rainy Calm {i}"),
            "color": color,
            "music": {"genre": "Ambient", "title": "Drift"},
            "scent": {"type": "Woody", "name": "Pine"},
            "lighting": {"color": color, "rgb": [107, 142, 159]}
        },
        "musicTracks": [{
            "title": "Drift",
            "artist": "Someone",
            "duration": duration,
            "startOffset": 0,
            "fadeIn": 750,
            "fadeOut": 750,
            "fileUrl": "/album/Ambient/Drift.mp3",
            "albumImageUrl": "/album/Ambient/Drift.png"
        }],
        "backgroundParams": {"moodAlias": "Rainy Calm", "iconKeys": ["cloud"], "source": "llm"}
    })
}

fn client_for(server: &MockServer) -> GenerationClient {
    GenerationClient::builder()
        .base_url(server.uri())
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_generate_decodes_and_chains() {
    let server = MockServer::start().await;
    let segments: Vec<Value> = (0..3).map(|i| wire_segment(i, "#6B8E9F", 180_000)).collect();

    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .and(body_json(json!({"nextStartTime": 1_000_000, "segmentCount": 3})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "moodStream": segments,
            "currentMood": {"id": "x"},
            "userDataCount": 4
        })))
        .expect(1)
        .mount(&server)
        .await;

    let batch = client_for(&server).generate(1_000_000, 3).await.unwrap();
    assert_eq!(batch.len(), 3);
    assert_eq!(batch[0].start_time, 1_000_000);
    assert!(is_contiguous(&batch));
    assert_eq!(batch[1].mood.display_name, "Rainy Calm 1");
    let track = batch[2].music_track.as_ref().unwrap();
    assert_eq!(track.file_url, "/album/Ambient/Drift.mp3");
    assert_eq!(batch[0].background_params.source.as_deref(), Some("llm"));
}

#[tokio::test]
async fn test_oversized_batch_is_truncated() {
    let server = MockServer::start().await;
    let segments: Vec<Value> = (0..10).map(|i| wire_segment(i, "#FFD700", 60_000)).collect();

    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "segments": segments })))
        .mount(&server)
        .await;

    let batch = client_for(&server).generate(0, 7).await.unwrap();
    assert_eq!(batch.len(), 7);
    assert_eq!(batch[6].mood.id, "llm-6");
}

#[tokio::test]
async fn test_music_id_resolved_through_catalog() {
    let server = MockServer::start().await;
    let mut known = wire_segment(0, "#228B22", 90_000);
    known["musicTracks"] = json!([]);
    known["musicID"] = json!(61);
    let mut unknown = wire_segment(1, "#228B22", 90_000);
    unknown["musicTracks"] = json!([]);
    unknown["musicID"] = json!(99);

    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "moodStream": [known, unknown] })),
        )
        .mount(&server)
        .await;

    let catalog = StaticTrackCatalog::from_json_str(
        r#"[{"musicID": 61, "title": "Because it's Christmas", "duration": 226,
             "mp3Url": "/album/Carol/Carol_02.mp3"}]"#,
    )
    .unwrap();
    let client = GenerationClient::builder()
        .base_url(server.uri())
        .catalog(Arc::new(catalog))
        .build()
        .unwrap();

    let batch = client.generate(0, 2).await.unwrap();
    assert_eq!(
        batch[0].music_track.as_ref().unwrap().file_url,
        "/album/Carol/Carol_02.mp3"
    );
    assert!(batch[1].music_track.is_none());
}

#[tokio::test]
async fn test_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client_for(&server).generate(0, 10).await.unwrap_err();
    assert!(matches!(err, Error::Status(503)));
    assert!(!err.is_malformed());
}

#[tokio::test]
async fn test_malformed_responses() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "moodStream": [] })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "moodStream": [wire_segment(0, "blue", 60_000)]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);

    let err = client.generate(0, 3).await.unwrap_err();
    assert!(matches!(err, Error::Json(_)), "{err:?}");
    assert!(err.is_malformed());

    let err = client.generate(0, 3).await.unwrap_err();
    assert!(matches!(err, Error::EmptyBatch), "{err:?}");

    let err = client.generate(0, 3).await.unwrap_err();
    assert!(matches!(err, Error::Malformed(_)), "{err:?}");
}

#[tokio::test]
async fn test_zero_duration_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "moodStream": [wire_segment(0, "#FFFFFF", 0)]
        })))
        .mount(&server)
        .await;

    let err = client_for(&server).generate(0, 1).await.unwrap_err();
    assert!(err.is_malformed());
}

#[tokio::test]
async fn test_oversized_duration_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "moodStream": [
                wire_segment(0, "#FFFFFF", u64::MAX),
                wire_segment(1, "#FFFFFF", 1_000)
            ]
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .generate(1_766_620_800_000, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Malformed(_)), "{err:?}");
    assert!(err.is_malformed());
}

#[tokio::test]
async fn test_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "moodStream": [wire_segment(0, "#FFFFFF", 1_000)] }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = GenerationClient::builder()
        .base_url(server.uri())
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let err = client.generate(0, 1).await.unwrap_err();
    assert!(matches!(err, Error::Timeout), "{err:?}");
}

#[tokio::test]
async fn test_fetch_catalog() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/musicTracks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"musicID": 10, "title": "Rain", "duration": 200, "mp3Url": "/album/Balad/Rain.mp3"}
        ])))
        .mount(&server)
        .await;

    let catalog = client_for(&server)
        .fetch_catalog("/musicTracks.json")
        .await
        .unwrap();
    assert_eq!(catalog.len(), 1);
}
