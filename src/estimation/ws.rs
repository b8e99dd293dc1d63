//! WebSocket + REST endpoints for the estimation service.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{BatchRequest, BatchResponse, ProgressFrame};
use super::orchestrator::Orchestrator;
use crate::artifacts::{ArtifactKind, ArtifactStore};
use crate::error::{ExportError, SessionError};
use crate::export::{ExportSink, combine_documents};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub artifacts: Arc<ArtifactStore>,
    /// Export destination (None if no Atlassian site is configured).
    pub export: Option<Arc<dyn ExportSink>>,
}

/// Build the Axum router with estimation WebSocket and REST routes.
pub fn estimate_routes(
    orchestrator: Arc<Orchestrator>,
    artifacts: Arc<ArtifactStore>,
    export: Option<Arc<dyn ExportSink>>,
) -> Router {
    let state = AppState {
        orchestrator,
        artifacts,
        export,
    };

    Router::new()
        .route("/health", get(health))
        .route("/ws/{session_id}", get(ws_handler))
        .route("/api/estimates", post(submit_batch))
        .route("/api/estimates/{session_id}", get(get_snapshot))
        .route(
            "/api/estimates/{session_id}/items/{name}/artifacts/{kind}",
            get(get_artifact),
        )
        .route(
            "/api/estimates/{session_id}/items/{name}/export",
            post(export_item),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "estimate-assist"
    }))
}

// ── Batch submission ────────────────────────────────────────────────────

async fn submit_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Response {
    match state.orchestrator.submit(request).await {
        Ok(session_id) => (StatusCode::CREATED, Json(BatchResponse { session_id })).into_response(),
        Err(SessionError::Validation(reason)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": reason})),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

// ── Snapshot ────────────────────────────────────────────────────────────

async fn get_snapshot(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let session_id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match state.orchestrator.snapshot(session_id).await {
        Ok(frame) => Json(frame).into_response(),
        Err(e) => session_error_response(e),
    }
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let session_id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    // Unknown sessions are refused before the upgrade; the client sees a
    // failed handshake rather than an immediately closed socket.
    match state.orchestrator.subscribe(session_id).await {
        Ok((frame, rx)) => {
            info!(session_id = %session_id, "Progress subscriber connecting");
            let orchestrator = Arc::clone(&state.orchestrator);
            ws.on_upgrade(move |socket| handle_socket(socket, frame, rx, orchestrator, session_id))
        }
        Err(e) => session_error_response(e),
    }
}

async fn handle_socket(
    mut socket: WebSocket,
    initial: ProgressFrame,
    mut rx: tokio::sync::broadcast::Receiver<ProgressFrame>,
    orchestrator: Arc<Orchestrator>,
    session_id: Uuid,
) {
    // Push the current snapshot immediately; subscribers never wait for the
    // next change to see state.
    if let Ok(json) = serde_json::to_string(&initial) {
        if socket.send(Message::Text(json.into())).await.is_err() {
            warn!(session_id = %session_id, "Failed to send initial snapshot, client disconnected");
            return;
        }
    }

    loop {
        tokio::select! {
            // Forward snapshot broadcasts to this client
            result = rx.recv() => {
                match result {
                    Ok(frame) => {
                        if let Ok(json) = serde_json::to_string(&frame) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                debug!(session_id = %session_id, "Client disconnected during send");
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        // Slow subscriber — skip the missed frames and
                        // re-sync with the latest snapshot.
                        warn!(session_id = %session_id, missed = n, "WS client lagged behind broadcast");
                        if let Ok(frame) = orchestrator.snapshot(session_id).await {
                            if let Ok(json) = serde_json::to_string(&frame) {
                                if socket.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        debug!(session_id = %session_id, "Broadcast channel closed");
                        break;
                    }
                }
            }

            // The stream is one-way; drain client frames to notice disconnects
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(session_id = %session_id, "Progress subscriber disconnected");
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        debug!(session_id = %session_id, text = %text, "Ignoring WS message from client");
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %session_id, error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}

// ── Artifacts ───────────────────────────────────────────────────────────

async fn get_artifact(
    State(state): State<AppState>,
    Path((id, name, kind)): Path<(String, String, String)>,
) -> Response {
    let session_id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let kind: ArtifactKind = match kind.parse() {
        Ok(kind) => kind,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(serde_json::json!({"error": e})))
                .into_response();
        }
    };

    let job = match state.orchestrator.job_state(session_id, &name).await {
        Ok(job) => job,
        Err(e) => return session_error_response(e),
    };

    let ready = match kind {
        ArtifactKind::Notes => job.notes_ready,
        ArtifactKind::Estimate => job.estimate_ready,
    };
    if !ready {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("{kind} artifact is not ready for item {name}")})),
        )
            .into_response();
    }

    match state.artifacts.read(session_id, &name, kind).await {
        Ok(content) => (
            [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
            content,
        )
            .into_response(),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

// ── Export ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ExportRequest {
    parent_page_url: String,
    #[serde(default)]
    overwrite: bool,
}

async fn export_item(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
    Json(body): Json<ExportRequest>,
) -> Response {
    let session_id = match parse_session_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let Some(sink) = state.export.as_ref() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "export destination is not configured"})),
        )
            .into_response();
    };

    let job = match state.orchestrator.job_state(session_id, &name).await {
        Ok(job) => job,
        Err(e) => return session_error_response(e),
    };

    if !job.notes_ready || !job.estimate_ready {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("artifacts are not ready for item {name}")})),
        )
            .into_response();
    }

    let estimate = match state
        .artifacts
        .read(session_id, &name, ArtifactKind::Estimate)
        .await
    {
        Ok(text) => text,
        Err(e) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response();
        }
    };
    let notes = match state
        .artifacts
        .read(session_id, &name, ArtifactKind::Notes)
        .await
    {
        Ok(text) => text,
        Err(e) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response();
        }
    };

    let combined = combine_documents(&estimate, &notes);
    match sink
        .create(&body.parent_page_url, &name, &combined, body.overwrite)
        .await
    {
        Ok(page_url) => {
            info!(session_id = %session_id, item = %name, page_url = %page_url, "Estimate exported");
            Json(serde_json::json!({"page_url": page_url})).into_response()
        }
        Err(ExportError::Conflict { title }) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "error": format!("destination already has a page titled {title:?}")
            })),
        )
            .into_response(),
        Err(ExportError::BadDestination { reason, .. }) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": reason})),
        )
            .into_response(),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn parse_session_id(raw: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(raw).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Invalid session ID"})),
        )
            .into_response()
    })
}

fn session_error_response(error: SessionError) -> Response {
    match error {
        SessionError::NotFound(_) | SessionError::ItemNotFound { .. } => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": error.to_string()})),
        )
            .into_response(),
        SessionError::Validation(reason) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": reason})),
        )
            .into_response(),
    }
}
