//! Standalone regression tests.
//!
//! Drives the gateway router of a fully assembled standalone deployment:
//! uploads go through the object store and queues to a worker started by
//! the autoscaler, and the answer comes back through the correlator.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use facegrid_backend::{ObjectStore, QueueService};
use facegrid_core::FacegridConfig;
use facegrid_gateway::MAX_UPLOAD_BYTES;
use facegrid_worker::{Classification, Classifier, ClassifyError};
use facegridd::Standalone;
use tower::ServiceExt;

const BOUNDARY: &str = "facegrid-test-boundary";

/// Labels every input with its capitalised name, read from the first line.
struct NameClassifier;

impl Classifier for NameClassifier {
    fn classify(&self, input: &[u8]) -> Result<Classification, ClassifyError> {
        let text = std::str::from_utf8(input).map_err(|e| ClassifyError::Task(e.to_string()))?;
        let name = text.lines().next().ok_or(ClassifyError::EmptyInput)?;
        if name == "unrecognisable" {
            return Err(ClassifyError::EmptyReferenceSet);
        }
        let mut chars = name.chars();
        let label = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => return Err(ClassifyError::EmptyInput),
        };
        Ok(Classification { label, distance: 0.0 })
    }
}

fn test_config() -> FacegridConfig {
    let mut config = FacegridConfig::default();
    config.autoscaler.fleet_size = 3;
    config.autoscaler.max_instances = 3;
    config
}

fn standalone(config: FacegridConfig) -> Standalone {
    Standalone::new(config, Arc::new(NameClassifier)).unwrap()
}

fn multipart(field: &str, filename: &str, content: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

async fn body_text(resp: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn standalone_classifies_upload_end_to_end() {
    let app = standalone(test_config());
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handles = app.spawn_background(rx);

    let resp = app
        .router()
        .oneshot(multipart("inputFile", "alice.jpg", b"alice"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "alice:Alice");

    // Output object written under the correlation id.
    let output = app.store.get("out-bucket", "alice").await.unwrap();
    assert_eq!(output, b"Alice");
    // The worker acknowledged the job.
    assert_eq!(app.queue.approximate_count("req-queue").await.unwrap(), 0);

    tx.send(true).unwrap();
    for h in handles {
        h.await.unwrap();
    }
    app.fleet.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn standalone_classification_failure_is_500() {
    let app = standalone(test_config());
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handles = app.spawn_background(rx);

    let resp = app
        .router()
        .oneshot(multipart("inputFile", "mystery.png", b"unrecognisable"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    tx.send(true).unwrap();
    for h in handles {
        h.await.unwrap();
    }
    app.fleet.shutdown().await;
}

#[tokio::test]
async fn standalone_missing_field_is_400() {
    let app = standalone(test_config());
    let resp = app
        .router()
        .oneshot(multipart("photo", "alice.jpg", b"alice"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(resp).await.contains("inputFile"));
    assert_eq!(app.queue.approximate_count("req-queue").await.unwrap(), 0);
}

#[tokio::test]
async fn standalone_empty_filename_is_400() {
    let app = standalone(test_config());
    let resp = app
        .router()
        .oneshot(multipart("inputFile", "", b"alice"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn standalone_non_multipart_is_400() {
    let app = standalone(test_config());
    let req = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "text/plain")
        .body(Body::from("alice"))
        .unwrap();
    let resp = app.router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn standalone_queue_outage_is_500() {
    let app = standalone(test_config());
    app.queue.set_available(false);
    let resp = app
        .router()
        .oneshot(multipart("inputFile", "alice.jpg", b"alice"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test(start_paused = true)]
async fn standalone_no_workers_times_out_with_504() {
    let mut config = test_config();
    config.gateway.result_timeout = Duration::from_secs(3);
    // Background loops never started: nobody answers.
    let app = standalone(config);

    let resp = app
        .router()
        .oneshot(multipart("inputFile", "bob.jpg", b"bob"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    // The job is still queued for a worker to pick up later.
    assert_eq!(app.queue.approximate_count("req-queue").await.unwrap(), 1);
}

#[tokio::test]
async fn standalone_health_reports_pending_results() {
    let app = standalone(test_config());
    app.gateway
        .pending()
        .insert("orphan", facegrid_core::JobOutcome::Label("Orphan".to_string()))
        .await;

    let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let resp = app.router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["pending_results"], 1);
    assert_eq!(json["dead_lettered"], 0);
}

#[tokio::test]
async fn standalone_health_reports_dead_lettered_jobs() {
    let app = standalone(test_config());
    app.queue.send("dead-letter-queue", "lost.jpg").await.unwrap();

    let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let resp = app.router().oneshot(req).await.unwrap();
    let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(json["dead_lettered"], 1);
}

#[tokio::test]
async fn standalone_health_omits_dead_letters_without_a_queue() {
    let mut config = test_config();
    config.queues.dead_letter = None;
    let app = standalone(config);

    let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let resp = app.router().oneshot(req).await.unwrap();
    let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert!(json.get("dead_lettered").is_none());
}

#[tokio::test]
async fn standalone_oversized_upload_is_413() {
    let app = standalone(test_config());
    let content = vec![b'a'; MAX_UPLOAD_BYTES + 1];
    let resp = app
        .router()
        .oneshot(multipart("inputFile", "huge.jpg", &content))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.queue.approximate_count("req-queue").await.unwrap(), 0);
}

#[tokio::test]
async fn standalone_redb_storage_persists_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.storage.path = Some(dir.path().join("data").join("objects.redb"));
    config.gateway.result_timeout = Duration::from_millis(50);
    let app = standalone(config);

    let resp = app
        .router()
        .oneshot(multipart("inputFile", "carol.jpg", b"carol"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(app.store.get("in-bucket", "carol.jpg").await.unwrap(), b"carol");
}
