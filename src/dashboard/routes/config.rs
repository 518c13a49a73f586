use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use crate::orchestrator::ConfigDocument;

use super::{ApiError, DashboardState};

#[derive(Deserialize)]
pub struct ConfigUpdateRequest {
    pub content: String,
    /// Hash of the content the edit was based on.
    pub hash: String,
}

pub async fn get_config(
    State(state): State<DashboardState>,
    Path(name): Path<String>,
) -> Result<Json<ConfigDocument>, ApiError> {
    Ok(Json(state.orch.read_process_config(&name).await?))
}

pub async fn update_config(
    State(state): State<DashboardState>,
    Path(name): Path<String>,
    Json(req): Json<ConfigUpdateRequest>,
) -> Result<Json<ConfigDocument>, ApiError> {
    let doc = state
        .orch
        .write_process_config(&name, &req.content, &req.hash)
        .await?;
    Ok(Json(doc))
}
