//! HTTP surface: a thin JSON layer over the job registry.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::error::ThreadLensError;
use crate::job::JobRegistry;
use crate::types::EvidenceRef;

#[derive(Clone)]
pub struct AppState {
    pub registry: JobRegistry,
}

pub fn router(registry: JobRegistry) -> Router {
    Router::new()
        .route("/api/extract", post(extract))
        .route("/api/sessions/:session_id/analyze", post(analyze))
        .route("/api/sessions/:session_id/progress", get(progress))
        .route("/api/sessions/:session_id/cancel", post(cancel))
        .route("/api/sessions/:session_id/report", get(report))
        .route("/api/sessions/:session_id/evidence", post(evidence))
        .route("/api/sessions/:session_id/threads", get(threads))
        .with_state(AppState { registry })
}

pub async fn serve(registry: JobRegistry, port: u16) -> anyhow::Result<()> {
    let app = router(registry);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("listening on port {}", port);
    axum::serve(listener, app).await?;
    Ok(())
}

impl IntoResponse for ThreadLensError {
    fn into_response(self) -> Response {
        let status = if self.is_not_found() {
            StatusCode::NOT_FOUND
        } else if matches!(self, ThreadLensError::AlreadyRunning(_)) {
            StatusCode::CONFLICT
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct ExtractRequest {
    #[serde(default)]
    session_id: Option<String>,
    raw: String,
}

async fn extract(
    State(state): State<AppState>,
    Json(request): Json<ExtractRequest>,
) -> Result<impl IntoResponse, ThreadLensError> {
    let outcome = state
        .registry
        .extract_threads(request.session_id, &request.raw)
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    #[serde(default)]
    count: Option<usize>,
}

#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    session_id: String,
    requested: usize,
}

async fn analyze(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<impl IntoResponse, ThreadLensError> {
    let requested = state
        .registry
        .start_analysis(&session_id, request.count)
        .await?;
    Ok(Json(AnalyzeResponse {
        session_id,
        requested,
    }))
}

async fn progress(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ThreadLensError> {
    Ok(Json(state.registry.get_progress(&session_id).await?))
}

async fn cancel(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ThreadLensError> {
    let phase = state.registry.cancel_analysis(&session_id).await?;
    Ok(Json(json!({ "session_id": session_id, "phase": phase })))
}

async fn report(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ThreadLensError> {
    Ok(Json(state.registry.get_report(&session_id).await?))
}

async fn evidence(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(reference): Json<EvidenceRef>,
) -> Result<impl IntoResponse, ThreadLensError> {
    Ok(Json(
        state.registry.get_evidence(&session_id, &reference).await?,
    ))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

async fn threads(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ThreadLensError> {
    Ok(Json(
        state
            .registry
            .list_threads(&session_id, params.offset, params.limit)
            .await?,
    ))
}
