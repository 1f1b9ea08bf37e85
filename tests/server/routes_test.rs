//! HTTP endpoints exercised in-process with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::response::IntoResponse;
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

use guardian_relay::config::ServerConfig;
use guardian_relay::delivery::{DeliveryEngine, DeliveryError};
use guardian_relay::recipient::PhoneNormalizer;
use guardian_relay::server::{router, AppState};
use guardian_relay::session::SessionTracker;
use guardian_relay::template::MessageTemplate;
use guardian_relay::whatsapp::{MediaAsset, MessagingClient};

use crate::mock_client::RecordingClient;

struct Harness {
    router: Router,
    tracker: SessionTracker,
    client: Arc<RecordingClient>,
}

fn harness_with(config: &ServerConfig) -> Harness {
    let (reinit_tx, _reinit_rx) = mpsc::unbounded_channel();
    let tracker = SessionTracker::new(reinit_tx);
    let client = RecordingClient::new().into_arc();
    let dyn_client: Arc<dyn MessagingClient> = Arc::clone(&client) as Arc<dyn MessagingClient>;
    let engine = DeliveryEngine::new(
        dyn_client,
        tracker.handle(),
        PhoneNormalizer::default(),
        MessageTemplate::default(),
    )
    .with_media(Some(Arc::new(MediaAsset::new(
        "image/png",
        "mindi_wsp.png",
        vec![1, 2, 3],
    ))));
    let state = AppState {
        session: tracker.handle(),
        engine: Arc::new(engine),
    };
    let router = match router(state, config) {
        Ok(router) => router,
        Err(err) => panic!("router should build: {err}"),
    };
    Harness {
        router,
        tracker,
        client,
    }
}

fn harness() -> Harness {
    harness_with(&ServerConfig::default())
}

async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = match router.clone().oneshot(request).await {
        Ok(response) => response,
        Err(err) => match err {},
    };
    let status = response.status();
    let bytes = match to_bytes(response.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => panic!("body should be readable: {err}"),
    };
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(err) => panic!("body should be JSON: {err}"),
        }
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    match Request::get(uri).body(Body::empty()) {
        Ok(request) => request,
        Err(err) => panic!("request should build: {err}"),
    }
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    match Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_owned()))
    {
        Ok(request) => request,
        Err(err) => panic!("request should build: {err}"),
    }
}

fn sample_batch() -> String {
    json!([{
        "telefono_apoderado": "987654321",
        "apoderado": "Ana",
        "nombre": "Luis",
        "apellido": "Perez",
        "nombre_usuario": "lperez",
        "contrasena": "x1"
    }])
    .to_string()
}

#[tokio::test]
async fn status_reflects_session_state() {
    let h = harness();
    let (status, body) = call(&h.router, get("/whatsapp-status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"connected": false}));

    h.tracker.on_ready();
    let (_, body) = call(&h.router, get("/whatsapp-status")).await;
    assert_eq!(body, json!({"connected": true}));
}

#[tokio::test]
async fn qr_is_rendered_while_awaiting_login() {
    let h = harness();
    h.tracker.on_login_code_issued("XYZ");

    let (status, body) = call(&h.router, get("/whatsapp-qr")).await;
    assert_eq!(status, StatusCode::OK);
    let qr = body["qr"].as_str().unwrap_or_default();
    assert!(qr.starts_with("data:image/png;base64,"), "got {body}");
}

#[tokio::test]
async fn qr_is_null_once_ready() {
    let h = harness();
    h.tracker.on_login_code_issued("XYZ");
    h.tracker.on_ready();

    let (status, body) = call(&h.router, get("/whatsapp-qr")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["qr"].is_null());
    assert_eq!(body["connected"], json!(true));
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn qr_is_null_before_any_code() {
    let h = harness();
    let (_, body) = call(&h.router, get("/whatsapp-qr")).await;
    assert!(body["qr"].is_null());
    assert_eq!(body["connected"], json!(false));
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn send_messages_delivers_when_ready() {
    let h = harness();
    h.tracker.on_ready();

    let (status, body) = call(&h.router, post_json("/send-messages", &sample_batch())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert!(body["message"].is_string());
    assert_eq!(body["sent"], json!(1));
    assert_eq!(body["failed"], json!(0));
    assert_eq!(body["results"][0]["target"], json!("51987654321@c.us"));

    let sends = h.client.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].target, "51987654321@c.us");
    assert!(sends[0].with_media);
    for needle in ["Ana", "Luis Perez", "lperez", "x1"] {
        assert!(sends[0].text.contains(needle), "caption should contain {needle}");
    }
}

#[tokio::test]
async fn send_messages_while_awaiting_login_is_unavailable() {
    let h = harness();
    h.tracker.on_login_code_issued("ABC");

    let (status, body) = call(&h.router, post_json("/send-messages", &sample_batch())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], json!(false));
    assert!(body["message"].is_string());
    assert_eq!(h.client.send_count(), 0);
}

#[tokio::test]
async fn empty_or_non_array_body_is_bad_request() {
    let h = harness();
    h.tracker.on_ready();

    for payload in ["[]", "{\"apoderado\": \"Ana\"}", "not json"] {
        let (status, body) = call(&h.router, post_json("/send-messages", payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "payload {payload}");
        assert_eq!(body["success"], json!(false));
        assert!(body["message"].is_string());
    }
    assert_eq!(h.client.send_count(), 0);
}

#[tokio::test]
async fn invalid_body_is_rejected_before_readiness() {
    let h = harness();
    let (status, _) = call(&h.router, post_json("/send-messages", "[]")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn engine_fault_is_internal_error_without_results() {
    let response = DeliveryError::Engine("render failed".to_owned()).into_response();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let bytes = match to_bytes(response.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => panic!("body should be readable: {err}"),
    };
    let body: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => panic!("body should be JSON: {err}"),
    };
    assert_eq!(
        body,
        json!({"success": false, "message": "Error al enviar mensajes"})
    );
    assert!(body.get("results").is_none());
}

#[tokio::test]
async fn oversized_body_with_length_is_enveloped_413() {
    let h = harness_with(&ServerConfig {
        max_body_bytes: 16,
        ..ServerConfig::default()
    });
    h.tracker.on_ready();
    let payload = sample_batch();
    let request = match Request::post("/send-messages")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_LENGTH, payload.len())
        .body(Body::from(payload))
    {
        Ok(request) => request,
        Err(err) => panic!("request should build: {err}"),
    };

    let (status, body) = call(&h.router, request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["success"], json!(false));
    assert!(body["message"].is_string());
    assert_eq!(h.client.send_count(), 0);
}

#[tokio::test]
async fn oversized_streamed_body_is_enveloped_413() {
    let h = harness_with(&ServerConfig {
        max_body_bytes: 16,
        ..ServerConfig::default()
    });
    h.tracker.on_ready();

    let (status, body) = call(&h.router, post_json("/send-messages", &sample_batch())).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["success"], json!(false));
    assert_eq!(h.client.send_count(), 0);
}

#[tokio::test]
async fn cors_preflight_allows_configured_origin() {
    let config = ServerConfig {
        allowed_origins: vec!["https://school.example".to_owned()],
        ..ServerConfig::default()
    };
    let h = harness_with(&config);

    let request = match Request::builder()
        .method(Method::OPTIONS)
        .uri("/send-messages")
        .header(header::ORIGIN, "https://school.example")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
    {
        Ok(request) => request,
        Err(err) => panic!("request should build: {err}"),
    };
    let response = match h.router.clone().oneshot(request).await {
        Ok(response) => response,
        Err(err) => match err {},
    };
    let headers = response.headers();
    assert_eq!(
        headers
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("https://school.example")
    );
    assert_eq!(
        headers
            .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
            .and_then(|v| v.to_str().ok()),
        Some("true")
    );
}

#[tokio::test]
async fn cors_rejects_unlisted_origin() {
    let config = ServerConfig {
        allowed_origins: vec!["https://school.example".to_owned()],
        ..ServerConfig::default()
    };
    let h = harness_with(&config);

    let request = match Request::get("/whatsapp-status")
        .header(header::ORIGIN, "https://evil.example")
        .body(Body::empty())
    {
        Ok(request) => request,
        Err(err) => panic!("request should build: {err}"),
    };
    let response = match h.router.clone().oneshot(request).await {
        Ok(response) => response,
        Err(err) => match err {},
    };
    assert!(response
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .is_none());
}

#[test]
fn invalid_origin_fails_router_construction() {
    let (reinit_tx, _rx) = mpsc::unbounded_channel();
    let tracker = SessionTracker::new(reinit_tx);
    let client: Arc<dyn MessagingClient> = RecordingClient::new().into_arc();
    let engine = DeliveryEngine::new(
        client,
        tracker.handle(),
        PhoneNormalizer::default(),
        MessageTemplate::default(),
    );
    let state = AppState {
        session: tracker.handle(),
        engine: Arc::new(engine),
    };
    let config = ServerConfig {
        allowed_origins: vec!["bad\norigin".to_owned()],
        ..ServerConfig::default()
    };
    assert!(router(state, &config).is_err());
}
