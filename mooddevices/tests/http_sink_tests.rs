//! HTTP device sink against a mock controller

use mooddevices::{DeviceError, DeviceSink, HttpDeviceSink, LightPayload, ScentPayload, SpeakerPayload};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sink_for(server: &MockServer, api_key: Option<&str>) -> HttpDeviceSink {
    HttpDeviceSink::new(
        &server.uri(),
        api_key.map(str::to_string),
        Duration::from_secs(2),
    )
    .unwrap()
}

#[tokio::test]
async fn test_light_payload_posted_with_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/light/control"))
        .and(header("x-api-key", "secret"))
        .and(body_json(json!({"r": 107, "g": 142, "b": 159, "colortemp": 4000, "brightness": 128})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let light = LightPayload {
        r: 107,
        g: 142,
        b: 159,
        colortemp: Some(4000),
        brightness: 128,
    };
    sink_for(&server, Some("secret")).send_light(&light).await.unwrap();
}

#[tokio::test]
async fn test_scent_and_speaker_payloads() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/scent/control"))
        .and(body_json(json!({"scentType": "Pine", "scentLevel": 5, "scentInterval": 30})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/speaker/control"))
        .and(body_json(json!({"nowPlaying": "Drift", "volume": 70})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let sink = sink_for(&server, None);
    sink.send_scent(&ScentPayload {
        scent_type: "Pine".to_string(),
        scent_level: 5,
        scent_interval: 30,
    })
    .await
    .unwrap();
    sink.send_speaker(&SpeakerPayload {
        now_playing: "Drift".to_string(),
        volume: 70,
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/light/control"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let light = LightPayload {
        r: 0,
        g: 0,
        b: 0,
        colortemp: None,
        brightness: 0,
    };
    let err = sink_for(&server, None).send_light(&light).await.unwrap_err();
    assert!(matches!(err, DeviceError::Status { status: 401, .. }), "{err:?}");
}
