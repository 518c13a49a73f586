use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::error::Error;
use crate::logs::{read_since, LogChunk, LogStream};

use super::{ApiError, DashboardState};

/// Largest slice of a log file returned per request.
const MAX_CHUNK_BYTES: u64 = 256 * 1024;

#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub stream: LogStream,
    #[serde(default)]
    pub offset: u64,
    pub filter: Option<String>,
}

/// Complete lines since `offset`; poll again with `next_offset`.
pub async fn get_logs(
    State(state): State<DashboardState>,
    Path(name): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<Json<LogChunk>, ApiError> {
    let record = state.orch.record(&name)?;
    let path = match query.stream {
        LogStream::Stdout => record.stdout_path,
        LogStream::Stderr => record.stderr_path,
    };
    let chunk = tokio::task::spawn_blocking(move || {
        read_since(&path, query.offset, query.filter.as_deref(), MAX_CHUNK_BYTES)
    })
    .await
    .map_err(std::io::Error::other)
    .and_then(|r| r)
    .map_err(Error::Io)?;
    Ok(Json(chunk))
}
