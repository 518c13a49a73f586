use std::time::Duration;

use procrig::watch::{WatchController, WatchEvent};
use procrig::RunRequest;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::common::*;

const EVENT_TIMEOUT: Duration = Duration::from_secs(15);

/// Wait for the first event `pick` accepts.
async fn next_event<T>(
    rx: &mut mpsc::UnboundedReceiver<WatchEvent>,
    mut pick: impl FnMut(&WatchEvent) -> Option<T>,
) -> T {
    let found = tokio::time::timeout(EVENT_TIMEOUT, async {
        while let Some(event) = rx.recv().await {
            if let Some(v) = pick(&event) {
                return Some(v);
            }
        }
        None
    })
    .await;
    match found {
        Ok(Some(v)) => v,
        Ok(None) => panic!("watch event channel closed"),
        Err(_) => panic!("timed out waiting for watch event"),
    }
}

async fn until_watching(controller: &WatchController) {
    for _ in 0..100 {
        if controller.is_watching() {
            // Give the OS watcher a moment to arm.
            tokio::time::sleep(Duration::from_millis(200)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("watcher never started");
}

#[cfg(unix)]
#[tokio::test]
async fn source_change_restarts_and_ignores_vendor_dirs() {
    let t = TestHome::new();
    scopeguard::defer! { t.stop_all(); }
    let orch = t.orch();
    std::fs::create_dir(t.work_path().join("node_modules")).unwrap();

    let request = RunRequest::new("svc")
        .command("echo booted; sleep 60")
        .directory(t.work_path());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let controller = WatchController::new(orch.clone(), request, tx);
    let cancel = CancellationToken::new();
    let (_manual_tx, manual_rx) = mpsc::channel(1);

    let driver = async {
        let first = next_event(&mut rx, |e| match e {
            WatchEvent::Started { pid, .. } => Some(*pid),
            _ => None,
        })
        .await;
        let line = next_event(&mut rx, |e| match e {
            WatchEvent::Log { line, .. } => Some(line.raw.clone()),
            _ => None,
        })
        .await;
        assert_eq!(line, "booted");
        until_watching(&controller).await;

        t.write("node_modules/dep.js", "ignored");
        t.write("app.txt", "v2");
        let paths = next_event(&mut rx, |e| match e {
            WatchEvent::ChangeDetected { paths } => Some(paths.clone()),
            _ => None,
        })
        .await;
        assert!(paths.iter().all(|p| !p.to_string_lossy().contains("node_modules")));

        let second = next_event(&mut rx, |e| match e {
            WatchEvent::Restarted { pid, .. } => Some(*pid),
            _ => None,
        })
        .await;
        assert_ne!(first, second);
        cancel.cancel();
        second
    };

    let (result, restarted_pid) = tokio::join!(controller.run(cancel.clone(), manual_rx), driver);
    result.unwrap();
    assert!(!controller.is_watching());

    // Leaving watch mode does not stop the process.
    let record = orch.record("svc").unwrap();
    assert_eq!(record.pid, restarted_pid);
    assert!(orch.is_alive(&record).await);
}

#[cfg(unix)]
#[tokio::test]
async fn crash_after_change_pauses_until_manual_restart() {
    let t = TestHome::new();
    scopeguard::defer! { t.stop_all(); }
    let orch = t.orch();

    // Exits straight away while `broken` exists.
    let request = RunRequest::new("svc")
        .command("test -f broken && exit 1; sleep 60")
        .directory(t.work_path());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let controller = WatchController::new(orch, request, tx);
    let cancel = CancellationToken::new();
    let (manual_tx, manual_rx) = mpsc::channel(1);

    let driver = async {
        next_event(&mut rx, |e| matches!(e, WatchEvent::Started { .. }).then_some(())).await;
        until_watching(&controller).await;

        t.write("broken", "");
        next_event(&mut rx, |e| matches!(e, WatchEvent::Paused { .. }).then_some(())).await;
        assert!(controller.is_paused());

        // Changes alone do not restart a paused watch.
        std::fs::remove_file(t.work_path().join("broken")).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(controller.is_paused());

        manual_tx.send(()).await.unwrap();
        next_event(&mut rx, |e| matches!(e, WatchEvent::Resumed).then_some(())).await;
        next_event(&mut rx, |e| matches!(e, WatchEvent::Restarted { .. }).then_some(())).await;
        assert!(!controller.is_paused());
        cancel.cancel();
    };

    let (result, ()) = tokio::join!(controller.run(cancel.clone(), manual_rx), driver);
    result.unwrap();
}
