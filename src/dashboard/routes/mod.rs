pub mod config;
pub mod logs;
pub mod processes;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::broadcast;

use crate::error::Error;
use crate::orchestrator::Orchestrator;

#[derive(Clone)]
pub struct DashboardState {
    pub orch: Orchestrator,
    /// Serialized process snapshots, pushed to WebSocket clients.
    pub snapshots_tx: broadcast::Sender<String>,
}

pub fn api_router(state: DashboardState) -> Router {
    Router::new()
        .route(
            "/api/processes",
            get(processes::list_processes).post(processes::start_process),
        )
        .route(
            "/api/processes/{name}",
            axum::routing::delete(processes::delete_process),
        )
        .route("/api/processes/{name}/stop", post(processes::stop_process))
        .route(
            "/api/processes/{name}/restart",
            post(processes::restart_process),
        )
        .route("/api/processes/{name}/logs", get(logs::get_logs))
        .route(
            "/api/processes/{name}/config",
            get(config::get_config).put(config::update_config),
        )
        .with_state(state)
}

/// Library errors as JSON responses carrying `{ "error", "name" }`.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::AlreadyRunning { .. } | Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Validation { .. } | Error::Config { .. } => StatusCode::BAD_REQUEST,
            Error::ExitedImmediately { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            e if e.is_busy() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "dashboard request failed");
        }
        (status, Json(self.0.body())).into_response()
    }
}
