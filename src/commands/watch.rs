use std::path::Path;

use anyhow::Result;
use owo_colors::OwoColorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cli::RunArgs;
use crate::error::Error;
use crate::logs::LogStream;
use crate::watch::{WatchController, WatchEvent};

use super::use_color;

pub async fn run(home: Option<&Path>, args: RunArgs) -> Result<()> {
    let orch = super::open(home)?;
    let name = args.name.clone();
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown.cancel();
    });

    // Enter on stdin requests a restart.
    let (manual_tx, manual_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(_)) = lines.next_line().await {
            if manual_tx.try_send(()).is_err() && manual_tx.is_closed() {
                break;
            }
        }
    });

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        let color = use_color();
        while let Some(event) = events_rx.recv().await {
            print_event(&event, color);
        }
    });

    let controller = WatchController::new(orch, args.into(), events_tx);
    let result = controller.run(cancel, manual_rx).await;
    drop(controller);
    let _ = printer.await;

    match result {
        Ok(()) => {
            println!("  stopped watching '{}' (process left running)", name);
            Ok(())
        }
        Err(Error::ExitedImmediately { name, output }) => {
            eprintln!("{}", output);
            Err(Error::ExitedImmediately {
                name,
                output: String::new(),
            }
            .into())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_event(event: &WatchEvent, color: bool) {
    let note = |text: String| {
        if color {
            println!("{} {}", "[procrig]".cyan(), text);
        } else {
            println!("[procrig] {}", text);
        }
    };
    match event {
        WatchEvent::Log { stream, line } => match stream {
            LogStream::Stdout => println!("{}", line.raw),
            LogStream::Stderr => eprintln!("{}", line.raw),
        },
        WatchEvent::Started { message, .. } => {
            note(format!("{}; watching for changes (Enter restarts)", message))
        }
        WatchEvent::Attached { pid } => note(format!(
            "attached to running process (PID {}); watching for changes",
            pid
        )),
        WatchEvent::ChangeDetected { paths } => {
            note(format!("{} file(s) changed, restarting", paths.len()))
        }
        WatchEvent::RestartDropped => note("restart already in progress".to_string()),
        WatchEvent::Restarted { message, .. } => note(message.clone()),
        WatchEvent::Paused { output } => {
            note("process exited after restart; auto restart paused".to_string());
            eprintln!("{}", output);
            note("fix the problem and press Enter to restart".to_string());
        }
        WatchEvent::Resumed => note("auto restart resumed".to_string()),
        WatchEvent::RestartFailed { error } => note(format!("restart failed: {}", error)),
    }
}
