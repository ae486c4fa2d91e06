use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::{
    error::RepositoryError,
    orchestrator::{ScanOrchestrator, ScanPhase},
    repository::Repository,
};

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<ScanOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<ScanOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub phase: ScanPhase,
}

/// Repository failure surfaced as `500 {error}`.
struct ApiError(RepositoryError);

impl From<RepositoryError> for ApiError {
    fn from(e: RepositoryError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "repository read failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/hosts", get(get_hosts))
        .route("/devices", get(get_devices))
        .route("/latest-scan", get(get_latest_scan))
        .route("/total-devices", get(get_total_devices))
        .route("/scan-history", get(get_scan_history))
        .route("/status", get(get_status))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn spawn_server(bind: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("serving API on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Run the blocking repository call off the async runtime.
async fn read_repo<T, F>(app: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&dyn Repository) -> Result<T, RepositoryError> + Send + 'static,
{
    let repo = app.orchestrator.repository();
    let out = tokio::task::spawn_blocking(move || f(repo.as_ref()))
        .await
        .map_err(RepositoryError::from)??;
    Ok(out)
}

async fn get_hosts(State(app): State<AppState>) -> Response {
    let scan = app.orchestrator.run_local_scan().await;
    if let Some(err) = scan.report.error.as_deref() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": err, "devices": [] })),
        )
            .into_response();
    }
    (StatusCode::OK, Json(scan)).into_response()
}

async fn get_devices(State(app): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let devices = read_repo(&app, |repo| repo.devices()).await?;
    Ok(Json(devices))
}

async fn get_latest_scan(State(app): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let latest = read_repo(&app, |repo| repo.latest_scan()).await?;
    let body = match latest {
        Some(summary) => json!(summary),
        None => json!({}),
    };
    Ok(Json(body))
}

async fn get_total_devices(State(app): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let total = read_repo(&app, |repo| repo.total_devices()).await?;
    Ok(Json(json!({ "total_devices": total })))
}

async fn get_scan_history(State(app): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let history = read_repo(&app, |repo| repo.scan_history()).await?;
    Ok(Json(history))
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(Status {
            phase: app.orchestrator.phase(),
        }),
    )
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Endpoint not found" })),
    )
}
