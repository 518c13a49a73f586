use std::sync::Arc;

use procrig::orchestrator::{Orchestrator, StopOutcome};
use procrig::platform::fake::FakeInspector;
use procrig::process::container::NoContainers;
use procrig::process::ProcessController;
use procrig::registry::{NewRecord, Registry};
use procrig::settings::{Home, Settings};
use tempfile::TempDir;

use crate::common::free_port;

fn orchestrator(fake: Arc<FakeInspector>, home: &TempDir) -> Orchestrator {
    let controller =
        ProcessController::new(fake.clone(), fake, Arc::new(NoContainers), Settings::fast());
    Orchestrator::new(
        Arc::new(Registry::open_in_memory().unwrap()),
        controller,
        Home::new(home.path()),
    )
}

fn register(orch: &Orchestrator, name: &str, pid: u32, command: &str, workdir: &str) {
    orch.registry()
        .insert(NewRecord {
            name: name.to_string(),
            pid,
            command: command.to_string(),
            workdir: workdir.into(),
            env: String::new(),
            config_path: String::new(),
            stdout_path: orch.home().default_stdout(name),
            stderr_path: orch.home().default_stderr(name),
        })
        .unwrap();
}

#[tokio::test]
async fn restarted_elsewhere_process_is_adopted_and_stoppable() {
    let home = TempDir::new().unwrap();
    // The real port must be free: cleanup checks it with a bind.
    let port = free_port();
    // PID 4100 is gone; the same server now runs as 4200.
    let fake = Arc::new(
        FakeInspector::new()
            .with_process(4200, 1, "node /srv/shop/server.js")
            .with_process(4300, 1, "node /srv/blog/server.js"),
    );
    fake.bind_port(4200, port);
    let orch = orchestrator(fake.clone(), &home);
    register(&orch, "shop", 4100, "node server.js", "/srv/shop");

    let status = orch.snapshot().await.unwrap();
    assert_eq!(status[0].pid, 4200);
    assert!(status[0].running);
    assert_eq!(status[0].ports, vec![port]);
    assert_eq!(orch.record("shop").unwrap().pid, 4200);

    let outcome = orch.stop("shop").await.unwrap();
    assert_eq!(
        outcome,
        StopOutcome::Stopped {
            pid: 4200,
            ports: vec![port]
        }
    );
    assert!(!fake.is_alive(4200));
    assert!(fake.is_alive(4300), "unrelated process must survive");
}

#[tokio::test]
async fn contested_candidate_is_left_alone() {
    let home = TempDir::new().unwrap();
    let fake = Arc::new(FakeInspector::new().with_process(5200, 1, "python /srv/app/main.py"));
    let orch = orchestrator(fake.clone(), &home);
    register(&orch, "one", 5100, "python main.py", "/srv/app");
    register(&orch, "two", 5101, "python main.py", "/srv/app");

    let status = orch.snapshot().await.unwrap();
    assert!(status.iter().all(|s| !s.running));
    assert_eq!(orch.record("one").unwrap().pid, 5100);
    assert_eq!(orch.record("two").unwrap().pid, 5101);

    // Stopping does not touch the ambiguous candidate.
    assert_eq!(orch.stop("one").await.unwrap(), StopOutcome::AlreadyStopped);
    assert!(fake.is_alive(5200));
    assert!(fake.signals().is_empty());
}
