use std::time::Duration;

use procrig::orchestrator::StopOutcome;
use procrig::RunRequest;

use crate::common::*;

#[cfg(unix)]
#[tokio::test]
async fn force_restart_frees_port_for_new_instance() {
    let t = TestHome::new();
    scopeguard::defer! { t.stop_all(); }
    let orch = t.orch();
    let port = free_port();

    let first = orch
        .run(
            RunRequest::new("web")
                .command(listener_command(port))
                .directory(t.work_path()),
        )
        .await
        .unwrap();
    assert!(
        wait_for_port(port, Duration::from_secs(10)).await,
        "listener never came up"
    );

    let second = orch
        .run(RunRequest::new("web").force(true))
        .await
        .unwrap();
    assert!(second.restarted);
    assert!(second.replaced_pid.is_some());
    assert!(second.stuck_ports.is_empty(), "{:?}", second.stuck_ports);
    assert_ne!(second.record.pid, first.record.pid);

    // The replacement could bind the same port, so the old one let go.
    assert!(wait_for_port(port, Duration::from_secs(10)).await);
    let status = orch.snapshot().await.unwrap();
    assert!(status[0].running);
    assert!(
        status[0].ports.contains(&port),
        "ports of new instance: {:?}",
        status[0].ports
    );

    match orch.stop("web").await.unwrap() {
        StopOutcome::Stopped { ports, .. } => assert!(ports.contains(&port)),
        other => panic!("expected Stopped, got {:?}", other),
    }
    assert!(wait_for_port_release(port, Duration::from_secs(5)).await);
}

#[cfg(unix)]
#[tokio::test]
async fn stop_frees_port_held_below_shell_wrapper() {
    let t = TestHome::new();
    scopeguard::defer! { t.stop_all(); }
    let orch = t.orch();
    let port = free_port();

    // The shell stays around as the listener's parent.
    let command = format!("{} & wait", listener_command(port));
    orch.run(
        RunRequest::new("pair")
            .command(command)
            .directory(t.work_path()),
    )
    .await
    .unwrap();
    assert!(wait_for_port(port, Duration::from_secs(10)).await);

    orch.stop("pair").await.unwrap();
    assert!(
        wait_for_port_release(port, Duration::from_secs(5)).await,
        "listener survived stop"
    );
    let record = orch.record("pair").unwrap();
    assert_eq!(record.pid, 0);
}
