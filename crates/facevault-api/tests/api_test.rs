//! HTTP API tests: the full router over the in-memory store and a scripted
//! detector.

use axum_test::TestServer;
use facevault_api::setup;
use facevault_api::AppState;
use facevault_core::models::FileRecord;
use facevault_core::Config;
use facevault_db::InMemoryFileRecordStore;
use facevault_plugins::test_helpers::{ScriptedDetector, ScriptedResponse};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

struct TestApp {
    server: TestServer,
    store: InMemoryFileRecordStore,
    state: Arc<AppState>,
}

fn test_config() -> Config {
    Config::from_lookup(|key| match key {
        "STORE_BACKEND" => Some("memory".to_string()),
        "DETECTION_BASE_BACKOFF_MS" => Some("1".to_string()),
        "DETECTION_MAX_BACKOFF_MS" => Some("4".to_string()),
        "VECTORIZE_REAP_INTERVAL_SECS" => Some("0".to_string()),
        "VECTORIZE_DAILY_QUOTA" => Some("5".to_string()),
        _ => None,
    })
    .unwrap()
}

fn image(id: &str) -> FileRecord {
    FileRecord::new(id, format!("{}.jpg", id), "image/jpeg", 64 * 1024).with_user("u1")
}

fn setup_app(records: Vec<FileRecord>, detector: ScriptedDetector) -> TestApp {
    let store = InMemoryFileRecordStore::with_records(records);
    let (state, router) = setup::initialize_with(
        &test_config(),
        Arc::new(store.clone()),
        Arc::new(detector),
    )
    .unwrap();
    TestApp {
        server: TestServer::new(router.into_make_service()).expect("Failed to create test server"),
        store,
        state,
    }
}

impl TestApp {
    async fn wait_for_status(&self, file_id: &str, status: &str) -> Value {
        for _ in 0..250 {
            let body: Value = self
                .server
                .get(&format!("/api/v0/files/{}", file_id))
                .await
                .json();
            if body["vectorizationStatus"] == status {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{} never reached {}", file_id, status);
    }
}

#[tokio::test]
async fn liveness_and_readiness() {
    let app = setup_app(vec![], ScriptedDetector::new());

    let live = app.server.get("/health").await;
    live.assert_status_ok();
    assert_eq!(live.json::<Value>()["status"], "alive");

    let ready = app.server.get("/health/ready").await;
    ready.assert_status_ok();
    let body: Value = ready.json();
    assert_eq!(body["store"], "ready");
    assert_eq!(body["dispatchQueue"], "accepting");

    app.store.set_unavailable(true);
    let not_ready = app.server.get("/health/ready").await;
    assert_eq!(not_ready.status_code(), 503);
}

#[tokio::test]
async fn submit_batch_returns_dispositions_and_completes() {
    let tiny = FileRecord::new("a", "a.jpg", "image/jpeg", 50);
    let pdf = FileRecord::new("b", "b.pdf", "application/pdf", 64 * 1024);
    let detector = ScriptedDetector::new();
    detector.script("c", [ScriptedResponse::faces(2)]);
    let app = setup_app(vec![tiny, pdf, image("c")], detector);

    let response = app
        .server
        .post("/api/v0/vectorize/batch")
        .json(&json!({ "fileIds": ["a", "b", "c"] }))
        .await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert!(body["batchId"].is_string());
    assert_eq!(
        body["results"]["a"],
        json!({ "disposition": "skipped", "reason": "too_small" })
    );
    assert_eq!(
        body["results"]["b"],
        json!({ "disposition": "skipped", "reason": "unsupported_type" })
    );
    assert_eq!(
        body["results"]["c"],
        json!({ "disposition": "accepted", "attempt": 1 })
    );

    let file = app.wait_for_status("c", "completed").await;
    assert_eq!(file["faceCount"], 2);
    assert_eq!(file["extractedFaces"].as_array().unwrap().len(), 2);
    assert_eq!(file["hasExtractedFaces"], true);
    assert!(file["vectorizationCompletedAt"].is_string());
}

#[tokio::test]
async fn fatal_detection_error_is_visible_on_file() {
    let detector = ScriptedDetector::new();
    detector.script("a", [ScriptedResponse::fatal("unsupported image format")]);
    let app = setup_app(vec![image("a")], detector);

    app.server
        .post("/api/v0/vectorize/batch")
        .json(&json!({ "fileIds": ["a"] }))
        .await
        .assert_status_ok();

    let file = app.wait_for_status("a", "failed").await;
    assert_eq!(
        file["vectorizationError"],
        "detection failed: unsupported image format"
    );
}

#[tokio::test]
async fn invalid_batches_are_400() {
    let app = setup_app(vec![image("a")], ScriptedDetector::new());

    let empty = app
        .server
        .post("/api/v0/vectorize/batch")
        .json(&json!({ "fileIds": [] }))
        .await;
    assert_eq!(empty.status_code(), 400);
    let body: Value = empty.json();
    assert_eq!(body["code"], "INVALID_INPUT");
    assert_eq!(body["recoverable"], false);

    let malformed = app
        .server
        .post("/api/v0/vectorize/batch")
        .json(&json!({ "fileIds": "a" }))
        .await;
    assert_eq!(malformed.status_code(), 400);
}

#[tokio::test]
async fn store_outage_is_503() {
    let app = setup_app(vec![image("a")], ScriptedDetector::new());
    app.store.set_unavailable(true);

    let response = app
        .server
        .post("/api/v0/vectorize/batch")
        .json(&json!({ "fileIds": ["a"] }))
        .await;
    assert_eq!(response.status_code(), 503);
    let body: Value = response.json();
    assert_eq!(body["code"], "STORE_UNAVAILABLE");
    assert_eq!(body["recoverable"], true);
}

#[tokio::test]
async fn unknown_file_is_404() {
    let app = setup_app(vec![], ScriptedDetector::new());
    let response = app.server.get("/api/v0/files/missing").await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn cancel_batch_endpoint() {
    let detector =
        ScriptedDetector::with_default(ScriptedResponse::faces(1).delayed(Duration::from_secs(30)));
    let app = setup_app(vec![image("a")], detector);

    let unknown = app
        .server
        .post("/api/v0/vectorize/batches/7f1c0c4e-8a57-4a4e-9a39-0d6f1b0b6c11/cancel")
        .await;
    assert_eq!(unknown.status_code(), 404);

    let submitted: Value = app
        .server
        .post("/api/v0/vectorize/batch")
        .json(&json!({ "fileIds": ["a"] }))
        .await
        .json();
    let batch_id = submitted["batchId"].as_str().unwrap().to_string();

    let cancelled = app
        .server
        .post(&format!("/api/v0/vectorize/batches/{}/cancel", batch_id))
        .await;
    assert_eq!(cancelled.status_code(), 202);

    let file = app.wait_for_status("a", "failed").await;
    assert_eq!(file["vectorizationError"], "cancelled");
}

#[tokio::test]
async fn user_files_and_quota() {
    let app = setup_app(
        vec![image("a"), image("b"), image("c").with_user("u2")],
        ScriptedDetector::new(),
    );

    let response = app
        .server
        .post("/api/v0/vectorize/batch")
        .json(&json!({ "fileIds": ["a", "c"], "userId": "u1" }))
        .await;
    let body: Value = response.json();
    assert_eq!(body["results"]["a"]["disposition"], "accepted");
    assert_eq!(
        body["results"]["c"],
        json!({ "disposition": "skipped", "reason": "not_found" })
    );
    app.wait_for_status("a", "completed").await;

    let all: Value = app.server.get("/api/v0/users/u1/files").await.json();
    assert_eq!(all["count"], 2);

    let with_faces: Value = app
        .server
        .get("/api/v0/users/u1/files")
        .add_query_param("withFaces", true)
        .await
        .json();
    assert_eq!(with_faces["count"], 1);
    assert_eq!(with_faces["files"][0]["id"], "a");

    let quota: Value = app
        .server
        .get("/api/v0/users/u1/vectorization-quota")
        .await
        .json();
    assert_eq!(quota, json!({ "used": 1, "limit": 5 }));
}

#[tokio::test]
async fn drained_queue_rejects_new_work() {
    let app = setup_app(vec![image("a")], ScriptedDetector::new());
    app.state.queue.drain().await;

    let body: Value = app
        .server
        .post("/api/v0/vectorize/batch")
        .json(&json!({ "fileIds": ["a"] }))
        .await
        .json();
    assert_eq!(
        body["results"]["a"],
        json!({ "disposition": "failed", "error": "shutting_down" })
    );

    let ready = app.server.get("/health/ready").await;
    assert_eq!(ready.status_code(), 503);
}
