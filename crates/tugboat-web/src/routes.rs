//! Web routes.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::info;
use tugboat_scheduler::{JobStatusView, Scheduler};

use crate::{LogStore, WebError};

/// Most log lines returned with a status response.
const LOG_LINE_CAP: usize = 100;

/// Shared state for the web server.
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub logs: Arc<dyn LogStore>,
}

/// Create the web router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/jobs/list", get(list_jobs))
        .route("/jobs/status/{name}", get(job_status))
        .route("/jobs/run/{name}", post(run_job))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobStatusView>> {
    Json(state.scheduler.list().await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusQuery {
    #[serde(default)]
    run_now: bool,
    job_param: Option<String>,
}

#[derive(Serialize)]
struct StatusResponse {
    info: JobStatusView,
    logs: Vec<String>,
}

async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusResponse>, WebError> {
    let info = if query.run_now {
        info!(job = %name, "run-now requested over http");
        state
            .scheduler
            .trigger_now(&name, query.job_param, false, None)
            .await?
    } else {
        state.scheduler.status(&name).await?
    };

    let logs = state.logs.recent_lines(&name, LOG_LINE_CAP).await?;
    Ok(Json(StatusResponse { info, logs }))
}

#[derive(Debug, Default, Deserialize)]
struct RunRequest {
    param: Option<String>,
}

async fn run_job(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Option<Json<RunRequest>>,
) -> Result<Json<JobStatusView>, WebError> {
    let param = body.and_then(|Json(request)| request.param);
    info!(job = %name, "blocking run requested over http");
    let view = state.scheduler.trigger_now(&name, param, true, None).await?;
    Ok(Json(view))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "jobs": state.scheduler.list().await.len(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
