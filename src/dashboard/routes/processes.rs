use std::collections::BTreeMap;
use std::path::PathBuf;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::orchestrator::{ProcessStatus, RunOutcome, RunRequest, StopOutcome};

use super::{ApiError, DashboardState};

pub async fn list_processes(
    State(state): State<DashboardState>,
) -> Result<Json<Vec<ProcessStatus>>, ApiError> {
    Ok(Json(state.orch.snapshot().await?))
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub name: String,
    pub command: Option<String>,
    pub directory: Option<PathBuf>,
    pub config: Option<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub fetch: bool,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub message: String,
    pub restarted: bool,
    pub pid: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stuck_ports: Vec<u16>,
}

impl From<RunOutcome> for RunResponse {
    fn from(o: RunOutcome) -> Self {
        Self {
            message: o.message,
            restarted: o.restarted,
            pid: o.record.pid,
            stuck_ports: o.stuck_ports,
        }
    }
}

pub async fn start_process(
    State(state): State<DashboardState>,
    Json(req): Json<StartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request = RunRequest {
        name: req.name,
        command: req.command,
        directory: req.directory,
        config: req.config,
        force: req.force,
        fetch: req.fetch,
        env: req.env,
        ..Default::default()
    };
    let outcome = state.orch.run(request).await?;
    let status = if outcome.restarted {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(RunResponse::from(outcome))))
}

pub async fn restart_process(
    State(state): State<DashboardState>,
    Path(name): Path<String>,
) -> Result<Json<RunResponse>, ApiError> {
    let outcome = state.orch.run(RunRequest::new(name).force(true)).await?;
    Ok(Json(outcome.into()))
}

pub async fn stop_process(
    State(state): State<DashboardState>,
    Path(name): Path<String>,
) -> Result<Json<StopOutcome>, ApiError> {
    Ok(Json(state.orch.stop(&name).await?))
}

pub async fn delete_process(
    State(state): State<DashboardState>,
    Path(name): Path<String>,
) -> Result<Json<StopOutcome>, ApiError> {
    Ok(Json(state.orch.delete(&name).await?))
}
