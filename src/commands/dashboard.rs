use std::path::Path;

use anyhow::Result;
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;

use crate::dashboard::start_dashboard_server;

use super::use_color;

pub async fn run(home: Option<&Path>, port: u16) -> Result<()> {
    let orch = super::open(home)?;
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown.cancel();
    });

    println!();
    if use_color() {
        println!("  {}", "Dashboard".bold());
    } else {
        println!("  Dashboard");
    }
    println!("    API:       http://localhost:{}/api/processes", port);
    println!("    WebSocket: ws://localhost:{}/ws", port);
    println!();

    start_dashboard_server(port, orch, cancel).await
}
