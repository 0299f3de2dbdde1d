use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderValue,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt};
use tracing::info;
use uuid::Uuid;

use crate::emitter::run_audit_job;
use crate::error::ApiError;
use crate::models::{
    AuditAcceptedResponse, AuditRequest, DeliveryMode, RecordKind, StatusRecord,
};
use crate::queue::QueuedAudit;
use crate::steps;
use crate::summary::SummaryRequest;
use crate::validation::validate_audit_request;
use crate::AppState;

const AUDIT_ID_HEADER: &str = "x-audit-id";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/audits", post(create_audit).get(list_audits))
        .route("/v1/audits/{job_id}", get(get_status))
        .route("/v1/audits/{job_id}/advance", post(advance_audit))
        .route("/v1/summary", post(summarize))
        .with_state(state)
}

async fn healthz() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Accepts an audit and dispatches it by delivery mode: `stream` answers
/// with a live SSE record feed, `background` queues it for the worker,
/// `simulated` seeds the fixed step table for advance-driven polling.
/// Every response carries the minted job id in the `x-audit-id` header.
async fn create_audit(
    State(state): State<AppState>,
    Json(request): Json<AuditRequest>,
) -> Result<Response, ApiError> {
    validate_audit_request(&request, state.config.max_runs)?;
    let job_id = format!("audit-{}", Uuid::new_v4());
    info!(
        job_id = %job_id,
        url = %request.url.trim(),
        delivery = ?request.delivery,
        runs = request.runs,
        "Accepted audit request"
    );

    match request.delivery {
        DeliveryMode::Stream => {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_audit_job(
                Arc::clone(&state.store),
                Arc::clone(&state.engine),
                state.emitter_settings.clone(),
                vec![tx],
                job_id.clone(),
                request,
            ));

            let stream =
                UnboundedReceiverStream::new(rx).map(|record| Event::default().json_data(&record));
            let mut response = Sse::new(stream)
                .keep_alive(KeepAlive::default())
                .into_response();
            attach_audit_id(&mut response, &job_id);
            Ok(response)
        }
        DeliveryMode::Background => {
            let total_runs = request.runs.max(1);
            state
                .store
                .put(
                    &job_id,
                    StatusRecord::new(
                        RecordKind::Start,
                        "Audit accepted, waiting for a worker...",
                        0,
                    )
                    .with_stage("queued")
                    .with_total_runs(total_runs),
                )
                .await;
            state
                .queue_tx
                .try_send(QueuedAudit {
                    job_id: job_id.clone(),
                    request,
                })
                .map_err(|_| ApiError::QueueUnavailable)?;
            Ok(accepted(job_id, DeliveryMode::Background))
        }
        DeliveryMode::Simulated => {
            state.store.put(&job_id, steps::record_for_step(0)).await;
            Ok(accepted(job_id, DeliveryMode::Simulated))
        }
    }
}

fn accepted(job_id: String, delivery: DeliveryMode) -> Response {
    let body = AuditAcceptedResponse {
        job_id: job_id.clone(),
        delivery,
        message: "Audit accepted. Poll the status endpoint for progress.".to_string(),
        created_at: Utc::now(),
    };
    let mut response = (axum::http::StatusCode::ACCEPTED, Json(body)).into_response();
    attach_audit_id(&mut response, &job_id);
    response
}

fn attach_audit_id(response: &mut Response, job_id: &str) {
    if let Ok(value) = HeaderValue::from_str(job_id) {
        response.headers_mut().insert(AUDIT_ID_HEADER, value);
    }
}

/// Always 200: unknown or expired ids answer with the not-found sentinel
/// rather than an HTTP error, so pollers keep a single happy path.
async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Json<StatusRecord> {
    Json(state.store.get(&job_id).await)
}

/// Single step of the simulated fallback: initializes an unknown job and
/// walks it one entry down the step table. Emitter-owned and terminal jobs
/// come back unchanged.
async fn advance_audit(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Json<StatusRecord> {
    Json(steps::advance(&state.store, &job_id).await)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActiveAudit {
    job_id: String,
    status: StatusRecord,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ActiveAuditsResponse {
    count: usize,
    audits: Vec<ActiveAudit>,
}

async fn list_audits(State(state): State<AppState>) -> Json<ActiveAuditsResponse> {
    let audits: Vec<ActiveAudit> = state
        .store
        .list_active()
        .await
        .into_iter()
        .map(|(job_id, status)| ActiveAudit { job_id, status })
        .collect();
    Json(ActiveAuditsResponse {
        count: audits.len(),
        audits,
    })
}

async fn summarize(
    State(state): State<AppState>,
    Json(request): Json<SummaryRequest>,
) -> Result<Json<Value>, ApiError> {
    let client = state.summarizer.as_ref().ok_or(ApiError::SummaryUnavailable)?;
    let summary = client
        .summarize(&request)
        .await
        .map_err(|err| ApiError::SummaryFailed(format!("{err:#}")))?;
    Ok(Json(json!({ "summary": summary })))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::SocketAddr;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header::CONTENT_TYPE, Request, StatusCode};
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::emitter::EmitterSettings;
    use crate::engine::SimulatedEngine;
    use crate::store::StatusStore;

    fn test_config() -> Config {
        Config {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            retention_seconds: 600,
            queue_capacity: 1,
            max_runs: 10,
            interim_tick_ms: 0,
            inter_run_delay_ms: 0,
            engine_latency_ms: 0,
            summary_base_url: "https://api.openai.com/v1".to_string(),
            summary_model: "gpt-4o-mini".to_string(),
            summary_api_key: None,
        }
    }

    fn test_state() -> (AppState, mpsc::Receiver<QueuedAudit>) {
        let config = test_config();
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let state = AppState {
            config,
            store: Arc::new(StatusStore::new(600)),
            engine: Arc::new(SimulatedEngine::new(Duration::ZERO)),
            queue_tx,
            summarizer: None,
            emitter_settings: EmitterSettings {
                interim_tick: Duration::ZERO,
                inter_run_delay: Duration::ZERO,
                ..EmitterSettings::default()
            },
        };
        (state, queue_rx)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let (state, _rx) = test_state();
        let response = router(state)
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn rejects_invalid_url_with_error_envelope() {
        let (state, _rx) = test_state();
        let response = router(state)
            .oneshot(post_json(
                "/v1/audits",
                json!({"url": "not a url", "delivery": "simulated"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "INVALID_URL");
    }

    #[tokio::test]
    async fn simulated_audit_is_accepted_and_seeded() {
        let (state, _rx) = test_state();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(post_json(
                "/v1/audits",
                json!({"url": "https://example.com", "delivery": "simulated"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let job_id = response
            .headers()
            .get(AUDIT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        assert!(job_id.starts_with("audit-"));
        let body = body_json(response).await;
        assert_eq!(body["jobId"], job_id);

        let response = app
            .oneshot(
                Request::get(format!("/v1/audits/{job_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["type"], "start");
        assert_eq!(body["progress"], 0);
    }

    #[tokio::test]
    async fn advance_walks_the_step_table_to_completion() {
        let (state, _rx) = test_state();
        let app = router(state);

        let mut last = Value::Null;
        for _ in 0..10 {
            let response = app
                .clone()
                .oneshot(post_json("/v1/audits/audit-sim/advance", json!({})))
                .await
                .unwrap();
            last = body_json(response).await;
            if last["type"] == "complete" || last["type"] == "error" {
                break;
            }
        }
        assert_eq!(last["type"], "complete");
        assert_eq!(last["progress"], 100);
        assert_eq!(last["data"]["run"]["scores"]["performance"], 85);
    }

    #[tokio::test]
    async fn unknown_job_returns_sentinel_not_an_error() {
        let (state, _rx) = test_state();
        let response = router(state)
            .oneshot(
                Request::get("/v1/audits/audit-missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["type"], "not-found");
        assert_eq!(body["status"], "not-found");
        assert_eq!(body["progress"], 0);
    }

    #[tokio::test]
    async fn background_audit_queues_and_reports_full_queue() {
        let (state, mut rx) = test_state();
        let app = router(state);
        let request_body = json!({"url": "https://example.com", "delivery": "background"});

        let response = app
            .clone()
            .oneshot(post_json("/v1/audits", request_body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        let job_id = body["jobId"].as_str().unwrap().to_string();

        // Capacity is 1 and nothing drains, so the next accept must fail.
        let response = app
            .clone()
            .oneshot(post_json("/v1/audits", request_body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "QUEUE_UNAVAILABLE");

        let queued = rx.recv().await.unwrap();
        assert_eq!(queued.job_id, job_id);

        let response = app
            .oneshot(
                Request::get(format!("/v1/audits/{job_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["type"], "start");
        assert_eq!(body["stage"], "queued");
    }

    #[tokio::test]
    async fn stream_audit_answers_with_sse_and_audit_id() {
        let (state, _rx) = test_state();
        let store = Arc::clone(&state.store);
        let response = router(state)
            .oneshot(post_json(
                "/v1/audits",
                json!({"url": "https://example.com", "delivery": "stream"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );
        let job_id = response
            .headers()
            .get(AUDIT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();

        let mut record = StatusRecord::not_found();
        for _ in 0..100 {
            record = store.get(&job_id).await;
            if record.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(record.kind, RecordKind::Complete);
        assert_eq!(record.progress, 100);
    }

    #[tokio::test]
    async fn summaries_are_unavailable_without_an_api_key() {
        let (state, _rx) = test_state();
        let response = router(state)
            .oneshot(post_json("/v1/summary", json!({"scores": null})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "SUMMARY_UNAVAILABLE");
    }
}
