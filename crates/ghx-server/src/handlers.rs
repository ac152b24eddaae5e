//! HTTP request handlers binding the core components onto axum.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::Stream;
use ghx_proto::{JobSubmission, JobView, NodeConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::error::{ServerError, ServerResult};
use crate::multihost::{MultiHostRun, MultiHostSubmission};
use crate::probes::{self, CommandPresenceProbe, ConnectionProbe, ProbeOutcome};
use crate::state::AppState;

/// `GET /api/health`.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /api/metrics` — Prometheus text exposition.
pub async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}

#[derive(Debug, Serialize)]
pub struct JobIdResponse {
    job_id: String,
}

/// `POST /api/jobs` — submit a new job.
pub async fn submit_job(State(state): State<AppState>, Json(submission): Json<JobSubmission>) -> ServerResult<Json<JobIdResponse>> {
    let job_id = state.orchestrator.submit(submission).await?;
    state.metrics.record_job_submitted();
    state.bus.publish(ghx_proto::BusEvent::JobStatusChange {
        job_id: job_id.clone(),
        status: ghx_proto::JobStatus::Pending,
        node_name: None,
    });
    Ok(Json(JobIdResponse { job_id }))
}

/// `GET /api/jobs/{id}` — read one job's sanitized view.
pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> ServerResult<Json<JobView>> {
    state.orchestrator.get(&job_id).await.map(Json).ok_or_else(|| ServerError::NotFound(job_id))
}

/// `GET /api/jobs` — list every known job.
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobView>> {
    Json(state.orchestrator.list().await)
}

/// `POST /api/jobs/{id}/stop` — cancel a job.
pub async fn stop_job(State(state): State<AppState>, Path(job_id): Path<String>) -> ServerResult<Json<serde_json::Value>> {
    state.orchestrator.stop(&job_id).await?;
    state.bus.publish(ghx_proto::BusEvent::JobStatusChange {
        job_id: job_id.clone(),
        status: ghx_proto::JobStatus::Cancelled,
        node_name: None,
    });
    Ok(Json(json!({ "job_id": job_id, "status": "cancelled" })))
}

/// `POST /api/probes/test-connection` — SSH reachability + inventory probe.
pub async fn test_connection(Json(connection): Json<NodeConnection>) -> Json<ConnectionProbe> {
    Json(probes::test_connection(&connection).await)
}

#[derive(Debug, Deserialize)]
pub struct CommandPresenceRequest {
    connection: NodeConnection,
    probe: CommandPresenceProbe,
}

/// `POST /api/probes/command-presence` — run one closed-menu probe.
pub async fn command_presence(Json(request): Json<CommandPresenceRequest>) -> ServerResult<Json<ProbeOutcome>> {
    probes::run_probe(&request.connection, &request.probe)
        .await
        .map(Json)
        .map_err(|e| ServerError::Internal(e.to_string()))
}

/// `POST /api/nccl/multi-host` — submit a multi-host NCCL run.
pub async fn submit_multi_host(State(state): State<AppState>, Json(submission): Json<MultiHostSubmission>) -> ServerResult<Json<serde_json::Value>> {
    let run_id = state.multihost.submit(submission).await.map_err(ServerError::InvalidRequest)?;
    Ok(Json(json!({ "run_id": run_id })))
}

/// `GET /api/nccl/multi-host/{id}` — poll a multi-host NCCL run.
pub async fn get_multi_host(State(state): State<AppState>, Path(run_id): Path<String>) -> ServerResult<Json<MultiHostRun>> {
    state.multihost.get(&run_id).await.map(Json).ok_or(ServerError::NotFound(run_id))
}

/// `POST /api/catalog/reload` — reload the benchmark catalog from disk.
pub async fn reload_catalog(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.catalog.reload();
    Json(json!({ "reloaded": true }))
}

/// `GET /api/events` — SSE stream of event-bus envelopes.
pub async fn stream_events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (_id, rx) = state.bus.subscribe();
    state.metrics.set_event_bus_subscribers(state.bus.subscriber_count());

    let stream = ReceiverStream::new(rx).filter_map(|envelope| serde_json::to_string(&envelope).ok().map(|data| Ok(Event::default().data(data))));

    Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_check_reports_ok() {
        let Json(body) = health_check().await;
        assert_eq!(body["status"], "ok");
    }
}
