use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::orchestrator::{Orchestrator, ProcessStatus};

use super::routes::{self, DashboardState};
use super::ws;

#[derive(Serialize)]
#[serde(tag = "type", rename = "snapshot")]
struct SnapshotMessage<'a> {
    processes: &'a [ProcessStatus],
}

/// Serve the JSON API and WebSocket feed until `cancel` fires.
pub async fn start_dashboard_server(
    port: u16,
    orch: Orchestrator,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let (snapshots_tx, _) = broadcast::channel(16);
    let state = DashboardState {
        orch: orch.clone(),
        snapshots_tx: snapshots_tx.clone(),
    };

    let app = routes::api_router(state.clone())
        .merge(ws::ws_router(state))
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "dashboard listening");

    tokio::spawn(publish_snapshots(orch, snapshots_tx, cancel.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    Ok(())
}

/// Push a process snapshot to WebSocket subscribers on every tick.
async fn publish_snapshots(
    orch: Orchestrator,
    tx: broadcast::Sender<String>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(orch.settings().dashboard_interval());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if tx.receiver_count() == 0 {
            continue;
        }
        let processes = match orch.snapshot().await {
            Ok(p) => p,
            Err(e) => {
                debug!(error = %e, "snapshot failed");
                continue;
            }
        };
        if let Ok(json) = serde_json::to_string(&SnapshotMessage {
            processes: &processes,
        }) {
            let _ = tx.send(json);
        }
    }
}
