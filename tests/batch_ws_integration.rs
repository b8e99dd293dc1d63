//! Integration tests for the batch estimation WebSocket + REST system.
//!
//! Each test spins up an Axum server on a random port with stub
//! collaborators, connects via tokio-tungstenite, and exercises the real
//! WS / REST contract end to end.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use async_trait::async_trait;

use estimate_assist::artifacts::ArtifactStore;
use estimate_assist::config::SizeBands;
use estimate_assist::error::{ExportError, FetchError, LlmError};
use estimate_assist::estimation::generator::EstimateGenerator;
use estimate_assist::estimation::orchestrator::Orchestrator;
use estimate_assist::estimation::runner::JobDeps;
use estimate_assist::estimation::session::SessionStore;
use estimate_assist::estimation::ws::estimate_routes;
use estimate_assist::export::ExportSink;
use estimate_assist::fetch::{ContentFetcher, FetchedPage};
use estimate_assist::llm::{GenerationRequest, LlmProvider};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Stub fetcher: fails URLs containing "fail", stalls URLs containing
/// "slow" long enough for tests to observe non-terminal states.
struct StubFetcher;

#[async_trait]
impl ContentFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        if url.contains("slow") {
            tokio::time::sleep(Duration::from_millis(1500)).await;
        }
        if url.contains("fail") {
            return Err(FetchError::BadStatus {
                url: url.to_string(),
                status: 404,
            });
        }
        Ok(FetchedPage {
            title: "Stub Page".into(),
            body_markdown: "# Requirements\nBuild the thing.".into(),
        })
    }
}

/// Stub LLM: canned notes, canned estimate with a parseable total. The
/// estimate stage can be slowed down to observe `estimate_generation`.
struct StubLlm {
    estimate_delay: Duration,
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }
    async fn generate(&self, request: GenerationRequest) -> Result<String, LlmError> {
        if request.user_messages[1].contains("PERT Template") {
            tokio::time::sleep(self.estimate_delay).await;
            Ok("# PERT Estimate\n\nTotal: 6 man-weeks\n".into())
        } else {
            Ok("# BA Estimation Notes\n\n## Functional Breakdown\n- one item\n".into())
        }
    }
}

/// Stub export sink: in-memory page registry keyed by (destination, title).
#[derive(Default)]
struct StubSink {
    pages: Mutex<HashMap<(String, String), String>>,
}

impl StubSink {
    async fn page_count(&self) -> usize {
        self.pages.lock().await.len()
    }
}

#[async_trait]
impl ExportSink for StubSink {
    async fn create(
        &self,
        destination: &str,
        title: &str,
        body_markdown: &str,
        overwrite: bool,
    ) -> Result<String, ExportError> {
        let key = (destination.to_string(), title.to_string());
        let mut pages = self.pages.lock().await;
        if pages.contains_key(&key) && !overwrite {
            return Err(ExportError::Conflict {
                title: title.to_string(),
            });
        }
        pages.insert(key, body_markdown.to_string());
        Ok(format!("https://stub.example/pages/{title}"))
    }
}

struct TestServer {
    port: u16,
    sink: Arc<StubSink>,
    _artifact_dir: tempfile::TempDir,
}

/// Start an Axum server on a random port with stub collaborators.
async fn start_server(estimate_delay: Duration) -> TestServer {
    let artifact_dir = tempfile::tempdir().unwrap();
    let artifacts = Arc::new(ArtifactStore::new(artifact_dir.path().to_path_buf()));

    let deps = Arc::new(JobDeps {
        fetcher: Arc::new(StubFetcher),
        generator: EstimateGenerator::new(Arc::new(StubLlm { estimate_delay }), 0.2),
        artifacts: Arc::clone(&artifacts),
        size_bands: SizeBands::default(),
        fetch_timeout: Duration::from_secs(5),
        llm_timeout: Duration::from_secs(5),
    });
    let orchestrator = Orchestrator::new(SessionStore::new(), deps, 32);

    let sink = Arc::new(StubSink::default());
    let app = estimate_routes(
        orchestrator,
        artifacts,
        Some(Arc::clone(&sink) as Arc<dyn ExportSink>),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        port,
        sink,
        _artifact_dir: artifact_dir,
    }
}

fn base(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}

fn batch_body(names: &[&str]) -> Value {
    json!({
        "items": names
            .iter()
            .map(|n| json!({"url": format!("https://x.atlassian.net/wiki/pages/{n}"), "name": n}))
            .collect::<Vec<_>>()
    })
}

/// Submit a batch, return the session id.
async fn submit(port: u16, body: &Value) -> String {
    let resp = reqwest::Client::new()
        .post(format!("{}/api/estimates", base(port)))
        .json(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let json: Value = resp.json().await.unwrap();
    json["session_id"].as_str().unwrap().to_string()
}

async fn snapshot(port: u16, session_id: &str) -> Value {
    let resp = reqwest::get(format!("{}/api/estimates/{session_id}", base(port)))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

/// Poll the REST snapshot until the predicate holds.
async fn wait_until<F>(port: u16, session_id: &str, mut predicate: F) -> Value
where
    F: FnMut(&Value) -> bool,
{
    loop {
        let frame = snapshot(port, session_id).await;
        if predicate(&frame) {
            return frame;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn all_terminal(frame: &Value) -> bool {
    frame["results"]
        .as_array()
        .unwrap()
        .iter()
        .all(|j| j["status"] == "completed" || j["status"] == "failed")
}

/// Parse a WS text frame into a serde_json::Value.
fn parse_ws_json(msg: &Message) -> Value {
    match msg {
        Message::Text(txt) => serde_json::from_str(txt).expect("invalid JSON from server"),
        other => panic!("expected Text frame, got {:?}", other),
    }
}

// ── Submission ───────────────────────────────────────────────────────────

#[tokio::test]
async fn submit_creates_all_pending_snapshot() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(Duration::ZERO).await;

        // Slow URLs so nothing can be terminal while we look.
        let session_id = submit(server.port, &batch_body(&["slow-a", "slow-b", "slow-c"])).await;

        let frame = snapshot(server.port, &session_id).await;
        let results = frame["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        let names: Vec<&str> = results.iter().map(|j| j["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["slow-a", "slow-b", "slow-c"]);
        for job in results {
            let status = job["status"].as_str().unwrap();
            assert!(
                status == "pending" || status == "fetching",
                "unexpected early status {status}"
            );
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn duplicate_names_rejected_with_400() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(Duration::ZERO).await;

        let resp = reqwest::Client::new()
            .post(format!("{}/api/estimates", base(server.port)))
            .json(&batch_body(&["X", "X"]))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("duplicate"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn empty_batch_rejected_with_400() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(Duration::ZERO).await;

        let resp = reqwest::Client::new()
            .post(format!("{}/api/estimates", base(server.port)))
            .json(&json!({"items": []}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_session_is_404_and_bad_uuid_is_400() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(Duration::ZERO).await;

        let resp = reqwest::get(format!(
            "{}/api/estimates/{}",
            base(server.port),
            uuid::Uuid::new_v4()
        ))
        .await
        .unwrap();
        assert_eq!(resp.status(), 404);

        let resp = reqwest::get(format!("{}/api/estimates/not-a-uuid", base(server.port)))
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    })
    .await
    .expect("test timed out");
}

// ── WebSocket ────────────────────────────────────────────────────────────

#[tokio::test]
async fn ws_connect_receives_immediate_snapshot() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(Duration::ZERO).await;
        let session_id = submit(server.port, &batch_body(&["slow-a"])).await;

        let (mut ws, _resp) = connect_async(format!(
            "ws://127.0.0.1:{}/ws/{session_id}",
            server.port
        ))
        .await
        .expect("WS connect failed");

        // First message arrives without waiting for a state change.
        let msg = ws.next().await.unwrap().unwrap();
        let frame = parse_ws_json(&msg);
        assert_eq!(frame["session_id"], session_id);
        assert_eq!(frame["results"].as_array().unwrap().len(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_streams_transitions_to_completion() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(Duration::ZERO).await;
        let session_id = submit(server.port, &batch_body(&["checkout"])).await;

        let (mut ws, _) = connect_async(format!(
            "ws://127.0.0.1:{}/ws/{session_id}",
            server.port
        ))
        .await
        .unwrap();

        let mut seen = Vec::new();
        let job = loop {
            let msg = ws.next().await.unwrap().unwrap();
            let frame = parse_ws_json(&msg);
            let job = frame["results"][0].clone();
            let status = job["status"].as_str().unwrap().to_string();
            if seen.last() != Some(&status) {
                seen.push(status.clone());
            }
            if status == "completed" || status == "failed" {
                break job;
            }
        };

        // Forward-only progression, no skipped mandatory states.
        let order = ["pending", "fetching", "notes_generation", "estimate_generation", "completed"];
        let mut last_index = 0;
        for status in &seen {
            let index = order.iter().position(|s| *s == status.as_str()).unwrap();
            assert!(index >= last_index, "went backwards: {seen:?}");
            last_index = index;
        }
        assert_eq!(seen.last().unwrap(), "completed");

        assert_eq!(job["status"], "completed");
        assert_eq!(job["estimate_value"], 6.0);
        assert_eq!(job["size_class"], "M");
        assert_eq!(job["notes_ready"], true);
        assert_eq!(job["estimate_ready"], true);
        assert!(job.get("error").is_none());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn ws_to_unknown_session_fails_handshake() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(Duration::ZERO).await;

        let result = connect_async(format!(
            "ws://127.0.0.1:{}/ws/{}",
            server.port,
            uuid::Uuid::new_v4()
        ))
        .await;
        assert!(result.is_err(), "handshake should be refused");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn late_subscriber_sees_current_state_mix() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(Duration::ZERO).await;
        let session_id = submit(server.port, &batch_body(&["fast", "slow-one"])).await;

        // Wait until the fast job is done while the slow one is still going.
        wait_until(server.port, &session_id, |frame| {
            frame["results"][0]["status"] == "completed"
        })
        .await;

        let (mut ws, _) = connect_async(format!(
            "ws://127.0.0.1:{}/ws/{session_id}",
            server.port
        ))
        .await
        .unwrap();

        let msg = ws.next().await.unwrap().unwrap();
        let frame = parse_ws_json(&msg);
        assert_eq!(frame["results"][0]["status"], "completed");
        let slow_status = frame["results"][1]["status"].as_str().unwrap();
        assert_ne!(slow_status, "completed");
        assert_ne!(slow_status, "failed");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn two_subscribers_both_receive_broadcasts() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(Duration::ZERO).await;
        let session_id = submit(server.port, &batch_body(&["slow-x"])).await;

        let url = format!("ws://127.0.0.1:{}/ws/{session_id}", server.port);
        let (mut ws1, _) = connect_async(&url).await.unwrap();
        let (mut ws2, _) = connect_async(&url).await.unwrap();

        // Both see the sync frame and then progress frames for the same job.
        for ws in [&mut ws1, &mut ws2] {
            let msg = ws.next().await.unwrap().unwrap();
            let frame = parse_ws_json(&msg);
            assert_eq!(frame["session_id"], session_id);
        }
        for ws in [&mut ws1, &mut ws2] {
            let msg = ws.next().await.unwrap().unwrap();
            let frame = parse_ws_json(&msg);
            assert_eq!(frame["results"][0]["name"], "slow-x");
        }
    })
    .await
    .expect("test timed out");
}

// ── Failure isolation ────────────────────────────────────────────────────

#[tokio::test]
async fn one_failing_job_does_not_affect_siblings() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(Duration::ZERO).await;
        let session_id = submit(server.port, &batch_body(&["good", "fail-me", "other-good"])).await;

        let frame = wait_until(server.port, &session_id, all_terminal).await;
        let results = frame["results"].as_array().unwrap();

        assert_eq!(results[0]["status"], "completed");
        assert_eq!(results[2]["status"], "completed");

        assert_eq!(results[1]["status"], "failed");
        let error = results[1]["error"].as_str().unwrap();
        assert!(error.starts_with("fetching:"), "got {error:?}");
        assert_eq!(results[1]["notes_ready"], false);
        assert_eq!(results[1]["estimate_ready"], false);
    })
    .await
    .expect("test timed out");
}

// ── Artifacts ────────────────────────────────────────────────────────────

#[tokio::test]
async fn artifact_gating_follows_ready_flags() {
    timeout(TEST_TIMEOUT, async {
        // Slow estimate stage: the job sits in estimate_generation with
        // notes already written.
        let server = start_server(Duration::from_millis(1500)).await;
        let session_id = submit(server.port, &batch_body(&["item"])).await;

        wait_until(server.port, &session_id, |frame| {
            frame["results"][0]["status"] == "estimate_generation"
        })
        .await;

        let artifact_url = |kind: &str| {
            format!(
                "{}/api/estimates/{session_id}/items/item/artifacts/{kind}",
                base(server.port)
            )
        };

        // Notes are ready; the estimate is not.
        let resp = reqwest::get(artifact_url("notes")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let notes = resp.text().await.unwrap();
        assert!(notes.contains("BA Estimation Notes"));

        let resp = reqwest::get(artifact_url("estimate")).await.unwrap();
        assert_eq!(resp.status(), 404);

        // Unknown kind is a client error, not a 404.
        let resp = reqwest::get(artifact_url("pert")).await.unwrap();
        assert_eq!(resp.status(), 400);

        // After completion both artifacts are readable.
        wait_until(server.port, &session_id, all_terminal).await;
        let resp = reqwest::get(artifact_url("estimate")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let estimate = resp.text().await.unwrap();
        assert!(estimate.contains("Total: 6 man-weeks"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn artifact_for_unknown_item_is_404() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(Duration::ZERO).await;
        let session_id = submit(server.port, &batch_body(&["a"])).await;

        let resp = reqwest::get(format!(
            "{}/api/estimates/{session_id}/items/missing/artifacts/notes",
            base(server.port)
        ))
        .await
        .unwrap();
        assert_eq!(resp.status(), 404);
    })
    .await
    .expect("test timed out");
}

// ── Export ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn export_succeeds_then_conflicts_on_same_destination() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(Duration::ZERO).await;
        let session_id = submit(server.port, &batch_body(&["billing"])).await;
        wait_until(server.port, &session_id, all_terminal).await;

        let export_url = format!(
            "{}/api/estimates/{session_id}/items/billing/export",
            base(server.port)
        );
        let body = json!({"parent_page_url": "https://x.atlassian.net/wiki/pages/999/Parent"});
        let client = reqwest::Client::new();

        let resp = client.post(&export_url).json(&body).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let ok: Value = resp.json().await.unwrap();
        assert!(ok["page_url"].as_str().unwrap().contains("billing"));
        assert_eq!(server.sink.page_count().await, 1);

        // Same destination and name again: a distinct conflict, and the
        // destination is unchanged.
        let resp = client.post(&export_url).json(&body).send().await.unwrap();
        assert_eq!(resp.status(), 409);
        assert_eq!(server.sink.page_count().await, 1);

        // Overwrite is an explicit opt-in.
        let overwrite = json!({
            "parent_page_url": "https://x.atlassian.net/wiki/pages/999/Parent",
            "overwrite": true
        });
        let resp = client.post(&export_url).json(&overwrite).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(server.sink.page_count().await, 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn export_before_artifacts_ready_is_404() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(Duration::ZERO).await;
        let session_id = submit(server.port, &batch_body(&["slow-y"])).await;

        let resp = reqwest::Client::new()
            .post(format!(
                "{}/api/estimates/{session_id}/items/slow-y/export",
                base(server.port)
            ))
            .json(&json!({"parent_page_url": "https://x.atlassian.net/wiki/pages/999/Parent"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        assert_eq!(server.sink.page_count().await, 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn exported_page_is_estimate_then_notes() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(Duration::ZERO).await;
        let session_id = submit(server.port, &batch_body(&["combined"])).await;
        wait_until(server.port, &session_id, all_terminal).await;

        let resp = reqwest::Client::new()
            .post(format!(
                "{}/api/estimates/{session_id}/items/combined/export",
                base(server.port)
            ))
            .json(&json!({"parent_page_url": "https://x.atlassian.net/wiki/pages/999/Parent"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let pages = server.sink.pages.lock().await;
        let body = pages.values().next().unwrap();
        let estimate_pos = body.find("PERT Estimate").unwrap();
        let notes_pos = body.find("BA Estimation Notes").unwrap();
        assert!(estimate_pos < notes_pos);
    })
    .await
    .expect("test timed out");
}

// ── Health ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn rest_health_endpoint() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(Duration::ZERO).await;

        let resp = reqwest::get(format!("{}/health", base(server.port)))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "estimate-assist");
    })
    .await
    .expect("test timed out");
}
