//! HTTP surface driven in-process through the router.

mod fixtures;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::Engine;
use httpmock::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use scriptframe_gen::app_state::AppState;
use scriptframe_gen::config::StaticSource;
use scriptframe_gen::routes::api_router;
use scriptframe_gen::services::registry::Providers;

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

/// Router over a temp public dir with the demo image generator and an
/// unconfigured HTTP speech provider, plus any `extra` settings.
fn test_app(dir: &TempDir, extra: &[(&str, String)]) -> Router {
    let mut vars = vec![
        ("PUBLIC_DIR".to_string(), dir.path().display().to_string()),
        ("IMAGE_PROVIDER".to_string(), "demo".to_string()),
        ("DEMO_DELAY_MS".to_string(), "0".to_string()),
        ("AUDIO_PROVIDER".to_string(), "volcengine_tts".to_string()),
    ];
    vars.extend(extra.iter().map(|(k, v)| (k.to_string(), v.clone())));

    let providers = Providers::new(Arc::new(StaticSource::new(vars)));
    api_router(AppState::new(
        providers,
        reqwest::Client::new(),
        dir.path().to_path_buf(),
    ))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

#[tokio::test]
async fn test_health_reports_active_providers() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir, &[]);

    let request = Request::builder()
        .uri("/api/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["providers"]["storage"], "local");
    assert_eq!(body["providers"]["image"], "demo");
    assert_eq!(body["providers"]["audio"], "volcengine_tts");
    assert_eq!(body["storage_external_accessible"], false);
}

#[tokio::test]
async fn test_generate_image_with_demo_provider() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir, &[]);

    let (status, body) = post(&app, "/api/generate-image", json!({"prompt": "a cat"})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let data = &body["data"];
    assert!(data["imageUrl"]
        .as_str()
        .unwrap()
        .starts_with("https://example.com/demo-image-"));
    assert!(data["taskId"].as_str().unwrap().starts_with("demo_"));
    assert_eq!(data["prompt"], "a cat");
    // URL results are never re-stored.
    assert!(data.get("storage_provider").is_none());
}

#[tokio::test]
async fn test_frame_prompt_overrides_request_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir, &[]);

    let (status, body) = post(
        &app,
        "/api/generate-image",
        json!({
            "prompt": "",
            "frame": {"type": "page", "pageIndex": 2, "jimengPrompt": "a dog", "mood": "calm"}
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["prompt"], "a dog");
    assert_eq!(body["data"]["frame"]["pageIndex"], 2);
    assert_eq!(body["data"]["frame"]["mood"], "calm");
}

#[tokio::test]
async fn test_invalid_image_requests_get_400() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir, &[]);

    let (status, body) = post(&app, "/api/generate-image", json!({"prompt": "   "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Missing required parameter: prompt");

    let request = Request::builder()
        .method("POST")
        .uri("/api/generate-image")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid request body");
}

#[tokio::test]
async fn test_inline_result_is_persisted_under_frame_folder() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/")
                .query_param("Action", "CVSync2AsyncSubmitTask");
            then.status(200)
                .json_body(fixtures::submitted_inline(fixtures::PNG_BASE64));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let app = test_app(
        &dir,
        &[
            ("IMAGE_PROVIDER", "jimeng".to_string()),
            ("VOLCENGINE_ACCESS_KEY_ID", "ak".to_string()),
            ("VOLCENGINE_SECRET_ACCESS_KEY", "sk".to_string()),
            ("VOLCENGINE_ENDPOINT", server.base_url()),
        ],
    );

    let (status, body) = post(
        &app,
        "/api/generate-image",
        json!({"prompt": "a cat", "frame": {"type": "page", "pageIndex": 3}}),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    let data = &body["data"];
    let url = data["imageUrl"].as_str().unwrap();
    assert!(url.starts_with("/generated/pages/page_3_"), "{url}");
    assert!(url.ends_with(".png"));
    assert!(data["taskId"].as_str().unwrap().starts_with("jimeng_"));
    assert_eq!(data["storage_provider"], "local");
    assert_eq!(data["external_accessible"], false);

    let on_disk = dir.path().join(url.trim_start_matches('/'));
    let expected = base64::engine::general_purpose::STANDARD
        .decode(fixtures::PNG_BASE64)
        .unwrap();
    assert_eq!(std::fs::read(&on_disk).unwrap(), expected);

    // The stored file is served back under the same URL.
    let request = Request::builder().uri(url).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_polled_job_returns_remote_url() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).query_param("Action", "CVSync2AsyncSubmitTask");
            then.status(200).json_body(fixtures::submitted("T1"));
        })
        .await;
    let query = server
        .mock_async(|when, then| {
            when.method(POST)
                .query_param("Action", "CVSync2AsyncGetResult")
                .body_includes(r#""task_id":"T1""#);
            then.status(200)
                .json_body(fixtures::done_with_urls(&["https://cdn.example.com/cat.png"]));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let app = test_app(
        &dir,
        &[
            ("IMAGE_PROVIDER", "jimeng".to_string()),
            ("VOLCENGINE_ACCESS_KEY_ID", "ak".to_string()),
            ("VOLCENGINE_SECRET_ACCESS_KEY", "sk".to_string()),
            ("VOLCENGINE_ENDPOINT", server.base_url()),
            ("POLL_INTERVAL_MS", "10".to_string()),
        ],
    );

    let (status, body) = post(&app, "/api/generate-image", json!({"prompt": "a cat"})).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["imageUrl"], "https://cdn.example.com/cat.png");
    query.assert_hits_async(1).await;
}

#[tokio::test]
async fn test_provider_failure_is_reported_in_envelope() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST);
            then.status(200)
                .json_body(fixtures::business_error(50411, "Pre Img Risk Not Pass"));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let app = test_app(
        &dir,
        &[
            ("IMAGE_PROVIDER", "jimeng".to_string()),
            ("VOLCENGINE_ACCESS_KEY_ID", "ak".to_string()),
            ("VOLCENGINE_SECRET_ACCESS_KEY", "sk".to_string()),
            ("VOLCENGINE_ENDPOINT", server.base_url()),
        ],
    );

    let (status, body) = post(&app, "/api/generate-image", json!({"prompt": "a cat"})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    let error = body["error"].as_str().unwrap();
    assert!(error.starts_with("Image generation failed:"), "{error}");
    assert!(error.contains("50411"));
}

#[tokio::test]
async fn test_edit_image_resolves_local_source() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("generated/pages")).unwrap();
    std::fs::write(dir.path().join("generated/pages/p.png"), PNG_MAGIC).unwrap();
    let app = test_app(&dir, &[]);

    let (status, body) = post(
        &app,
        "/api/edit-image",
        json!({
            "image_url": "/generated/pages/p.png",
            "prompt": "make it night",
            "page_index": 0
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["data"]["imageUrl"]
        .as_str()
        .unwrap()
        .contains("demo-edited-"));
    assert_eq!(body["data"]["pageIndex"], 0);
}

#[tokio::test]
async fn test_edit_image_rejects_bad_sources() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir, &[]);

    for source in ["ftp://host/a.png", "/generated/missing.png", "/../etc/passwd"] {
        let (status, body) = post(
            &app,
            "/api/edit-image",
            json!({"image_url": source, "prompt": "night"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{source}");
        assert_eq!(body["success"], false);
    }

    let (status, _) = post(
        &app,
        "/api/edit-image",
        json!({"image_url": "/generated/p.png", "prompt": "night", "strength": 2.0}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_audio_failure_is_reported_in_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let app = test_app(&dir, &[]);

    let (status, body) = post(&app, "/api/generate-audio", json!({"text": "hello"})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    let error = body["error"].as_str().unwrap();
    assert!(error.starts_with("Audio generation failed:"), "{error}");
    assert!(error.contains("VOLCENGINE_TTS_APP_ID"));

    let (status, _) = post(&app, "/api/generate-audio", json!({"text": ""})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_audio_is_written_and_served() {
    let pcm: Vec<u8> = (0..480u16).flat_map(|s| s.to_le_bytes()).collect();
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/v1/tts")
                .body_includes(r#""text":"once upon a time""#);
            then.status(200).json_body(json!({
                "code": 3000,
                "message": "Success",
                "data": base64::engine::general_purpose::STANDARD.encode(&pcm),
            }));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let app = test_app(
        &dir,
        &[
            ("VOLCENGINE_TTS_APP_ID", "app".to_string()),
            ("VOLCENGINE_TTS_ACCESS_TOKEN", "token".to_string()),
            ("VOLCENGINE_TTS_ENDPOINT", server.url("/api/v1/tts")),
        ],
    );

    let (status, body) = post(
        &app,
        "/api/generate-audio",
        json!({"text": "once upon a time", "page_index": 2}),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    let url = body["data"]["audioUrl"].as_str().unwrap();
    assert!(url.starts_with("/audio/pages/page_2_"), "{url}");
    assert!(url.ends_with(".wav"));
    assert_eq!(body["data"]["speakerId"], "child");

    let wav = std::fs::read(dir.path().join(url.trim_start_matches('/'))).unwrap();
    assert_eq!(&wav[..4], b"RIFF");
    assert_eq!(wav.len(), 44 + pcm.len());

    let request = Request::builder().uri(url).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_free_text_audio_is_named_per_request() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/v1/tts");
            then.status(200)
                .json_body(json!({"code": 3000, "message": "Success", "data": "AQACAA=="}));
        })
        .await;

    let dir = tempfile::tempdir().unwrap();
    let app = test_app(
        &dir,
        &[
            ("VOLCENGINE_TTS_APP_ID", "app".to_string()),
            ("VOLCENGINE_TTS_ACCESS_TOKEN", "token".to_string()),
            ("VOLCENGINE_TTS_ENDPOINT", server.url("/api/v1/tts")),
        ],
    );

    let mut names = Vec::new();
    for _ in 0..2 {
        let (status, body) = post(&app, "/api/generate-audio", json!({"text": "hello"})).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(body["data"]["pageIndex"].is_null());

        let url = body["data"]["audioUrl"].as_str().unwrap().to_string();
        let name = url.strip_prefix("/audio/audio_").unwrap_or_else(|| panic!("{url}"));
        let (request_id, rest) = name.split_at(12);
        assert!(request_id.chars().all(|c| c.is_ascii_hexdigit()), "{url}");
        assert!(rest.starts_with('_') && rest.ends_with(".wav"), "{url}");
        assert!(dir.path().join(url.trim_start_matches('/')).exists());
        names.push(request_id.to_string());
    }
    assert_ne!(names[0], names[1]);
}
