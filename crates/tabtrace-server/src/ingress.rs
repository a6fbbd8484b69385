//! HTTP ingress
//!
//! `POST /visit` decodes the wire payload, validates it, and hands it to the
//! queue without ever waiting on the consumer. `GET /status` reads the same
//! counters the consumer updates, for readiness checks only.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tabtrace_core::queue::{QueueError, VisitQueueSender};
use tabtrace_core::wire::VisitWire;

struct AppState {
    queue: VisitQueueSender,
}

#[derive(Serialize)]
struct QueuedResponse {
    status: &'static str,
    position: u64,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    issues: Vec<String>,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    queue_depth: u64,
    visits_total: u64,
}

async fn handle_visit(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    // Deserialized by hand rather than via the `Json<VisitWire>` extractor:
    // axum's own JSON rejection returns 422 for a schema mismatch, but an
    // unknown field (`deny_unknown_fields` on `VisitWire`) must surface as
    // 400 like any other validation failure.
    let wire: VisitWire = match serde_json::from_slice(&body) {
        Ok(wire) => wire,
        Err(e) => {
            tracing::warn!(error = %e, "rejecting visit: malformed json");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "invalid visit payload".to_string(),
                    issues: vec![e.to_string()],
                }),
            )
                .into_response();
        }
    };

    let issues = wire.validate();
    if !issues.is_empty() {
        let issues: Vec<String> = issues.into_iter().map(|i| i.0).collect();
        tracing::warn!(?issues, "rejecting visit: schema violation");
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "invalid visit payload".to_string(),
                issues,
            }),
        )
            .into_response();
    }

    let visit = wire.into_visit();
    match state.queue.try_enqueue(visit) {
        Ok(position) => (
            StatusCode::OK,
            Json(QueuedResponse {
                status: "queued",
                position,
            }),
        )
            .into_response(),
        Err(QueueError::Full) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "queue is at capacity".to_string(),
                issues: Vec::new(),
            }),
        )
            .into_response(),
        Err(QueueError::Closed) => {
            tracing::error!("visit queue closed while ingress still accepting requests");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: "server is shutting down".to_string(),
                    issues: Vec::new(),
                }),
            )
                .into_response()
        }
    }
}

async fn handle_status(State(state): State<Arc<AppState>>) -> Response {
    (
        StatusCode::OK,
        Json(StatusResponse {
            status: "ok",
            queue_depth: state.queue.depth(),
            visits_total: state.queue.visits_total(),
        }),
    )
        .into_response()
}

/// Serve `/visit` and `/status` on an already-bound `listener` until
/// `shutdown` resolves. The listener is bound by the caller so the
/// discovery file can be written with the real port before requests start
/// flowing. Never touches the consumer side directly; all communication
/// with it goes through `queue`.
pub async fn serve(
    listener: tokio::net::TcpListener,
    queue: VisitQueueSender,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let state = Arc::new(AppState { queue });
    let app = Router::new()
        .route("/visit", post(handle_visit))
        .route("/status", get(handle_status))
        .with_state(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use tokio::sync::oneshot;

    async fn spawn_server(queue: VisitQueueSender) -> (std::net::SocketAddr, oneshot::Sender<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(serve(listener, queue, async {
            stop_rx.await.ok();
        }));
        (addr, stop_tx)
    }

    fn visit_payload() -> serde_json::Value {
        let content = base64::engine::general_purpose::STANDARD
            .encode(zstd::stream::encode_all("hello".as_bytes(), 0).unwrap());
        serde_json::json!({
            "url": "https://example.com/a",
            "page_loaded_at": "2026-01-01T00:00:00Z",
            "tab_id": "tab1",
            "group_id": "g1",
            "content": content,
        })
    }

    #[tokio::test]
    async fn posting_a_valid_visit_queues_it() {
        let (queue, _rx) = tabtrace_core::queue::bounded(4);
        let (addr, _stop) = spawn_server(queue).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("http://{addr}/visit"))
            .json(&visit_payload())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "queued");
        assert_eq!(body["position"], 1);
    }

    #[tokio::test]
    async fn posting_an_invalid_visit_is_rejected() {
        let (queue, _rx) = tabtrace_core::queue::bounded(4);
        let (addr, _stop) = spawn_server(queue).await;
        let client = reqwest::Client::new();

        let mut payload = visit_payload();
        payload["url"] = serde_json::json!("");
        let resp = client
            .post(format!("http://{addr}/visit"))
            .json(&payload)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn posting_a_visit_with_an_unknown_field_is_rejected() {
        let (queue, _rx) = tabtrace_core::queue::bounded(4);
        let (addr, _stop) = spawn_server(queue).await;
        let client = reqwest::Client::new();

        let mut payload = visit_payload();
        payload["unexpected_field"] = serde_json::json!("surprise");
        let resp = client
            .post(format!("http://{addr}/visit"))
            .json(&payload)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_reports_queue_depth_and_total() {
        let (queue, _rx) = tabtrace_core::queue::bounded(4);
        let (addr, _stop) = spawn_server(queue).await;
        let client = reqwest::Client::new();

        client
            .post(format!("http://{addr}/visit"))
            .json(&visit_payload())
            .send()
            .await
            .unwrap();

        let resp = client
            .get(format!("http://{addr}/status"))
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["queue_depth"], 1);
        assert_eq!(body["visits_total"], 1);
    }

    #[tokio::test]
    async fn full_queue_returns_service_unavailable() {
        let (queue, _rx) = tabtrace_core::queue::bounded(1);
        queue.try_enqueue(tabtrace_core::wire::VisitWire {
            url: "https://example.com/first".to_string(),
            page_loaded_at: chrono::Utc::now(),
            tab_id: "tab1".to_string(),
            opener_tab_id: None,
            group_id: "g1".to_string(),
            referrer_url: None,
            referrer_timestamp: None,
            title: None,
            content: String::new(),
        }.into_visit()).unwrap();
        let (addr, _stop) = spawn_server(queue).await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("http://{addr}/visit"))
            .json(&visit_payload())
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    }
}
