pub mod container;
pub mod reconcile;
pub mod tree;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::platform::{NativePlatform, ProcessInspector, Signaller};
use crate::registry::ProcessRecord;
use crate::settings::Settings;

use container::{ContainerLaunch, ContainerRuntime, DockerRuntime};
pub use reconcile::ReconcileOutcome;
use tree::{ProcessTree, MAX_LEAF_DEPTH};

/// OS-facing process and port operations.
///
/// Every question is answered from a fresh OS query; nothing is cached
/// between calls.
#[derive(Clone)]
pub struct ProcessController {
    inspector: Arc<dyn ProcessInspector>,
    signaller: Arc<dyn Signaller>,
    containers: Arc<dyn ContainerRuntime>,
    settings: Settings,
}

impl ProcessController {
    pub fn new(
        inspector: Arc<dyn ProcessInspector>,
        signaller: Arc<dyn Signaller>,
        containers: Arc<dyn ContainerRuntime>,
        settings: Settings,
    ) -> Self {
        Self {
            inspector,
            signaller,
            containers,
            settings,
        }
    }

    /// Controller for the host OS and the local Docker daemon.
    pub fn native(settings: Settings) -> Self {
        let platform = Arc::new(NativePlatform::new(settings.query_timeout()));
        Self::new(
            platform.clone(),
            platform,
            Arc::new(DockerRuntime::new(settings.query_timeout())),
            settings,
        )
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Whether `pid` is alive. PID 0 is never running. For container
    /// launches the daemon decides once the PID is set.
    pub async fn is_running(&self, pid: u32, command: Option<&str>) -> bool {
        self.is_running_in(pid, command, None).await
    }

    /// Liveness of a stored record, container-aware.
    pub async fn is_record_running(&self, record: &ProcessRecord) -> bool {
        self.is_running_in(record.pid, Some(&record.command), Some(&record.workdir))
            .await
    }

    async fn is_running_in(&self, pid: u32, command: Option<&str>, workdir: Option<&Path>) -> bool {
        if pid == 0 {
            return false;
        }
        let launch = command.and_then(|c| ContainerLaunch::detect(c, workdir.unwrap_or(Path::new(""))));
        if let Some(launch) = launch {
            return self.containers.is_running(&launch).await;
        }
        self.inspector.exists(pid).await
    }

    pub async fn process_tree(&self) -> ProcessTree {
        ProcessTree::from_entries(self.inspector.processes().await)
    }

    /// Direct children of `pid`.
    pub async fn child_pids(&self, pid: u32) -> Vec<u32> {
        self.process_tree().await.children(pid).to_vec()
    }

    /// Terminate `pid` and its direct children: children first, a short
    /// grace period, then the parent if it is still alive. Never fails;
    /// signal errors are logged.
    pub async fn terminate(&self, pid: u32, force: bool) {
        if pid == 0 || pid == std::process::id() {
            return;
        }
        for child in self.child_pids(pid).await {
            if let Err(e) = self.signaller.terminate(child, force).await {
                debug!(pid = child, error = %e, "failed to signal child");
            }
        }
        tokio::time::sleep(self.settings.graceful_kill()).await;
        if self.inspector.exists(pid).await {
            if let Err(e) = self.signaller.terminate(pid, force).await {
                warn!(pid, error = %e, "failed to signal process");
            }
        }
    }

    /// Graceful terminate, escalating to a forced kill when the process
    /// outlives another grace period.
    pub async fn terminate_escalating(&self, pid: u32) {
        self.terminate(pid, false).await;
        if pid == 0 {
            return;
        }
        let deadline = Instant::now() + self.settings.graceful_kill();
        while Instant::now() < deadline {
            if !self.inspector.exists(pid).await {
                return;
            }
            tokio::time::sleep(self.settings.port_poll()).await;
        }
        if self.inspector.exists(pid).await {
            info!(pid, "process ignored graceful stop, killing");
            self.terminate(pid, true).await;
        }
    }

    /// Stop a record's workload: containers through the daemon, then the
    /// PID tree.
    pub async fn stop_record(&self, record: &ProcessRecord) {
        if let Some(launch) = ContainerLaunch::detect(&record.command, &record.workdir) {
            if let Err(e) = self.containers.stop(&launch).await {
                warn!(name = %record.name, error = %format!("{:#}", e), "failed to stop container");
            }
        }
        if record.pid != 0 {
            self.terminate_escalating(record.pid).await;
        }
    }

    /// TCP ports `pid` listens on.
    pub async fn ports_of(&self, pid: u32) -> Vec<u16> {
        if pid == 0 {
            return Vec::new();
        }
        self.inspector.listening_ports(pid).await
    }

    /// Ports held by `pid` or any of its descendants.
    pub async fn ports_of_tree(&self, pid: u32) -> Vec<u16> {
        if pid == 0 {
            return Vec::new();
        }
        let tree = self.process_tree().await;
        let mut ports = self.inspector.listening_ports(pid).await;
        for child in tree.descendants(pid) {
            ports.extend(self.inspector.listening_ports(child).await);
        }
        ports.sort_unstable();
        ports.dedup();
        ports
    }

    /// Whether a listener could bind `port` right now.
    pub fn is_port_free(&self, port: u16) -> bool {
        TcpListener::bind(("0.0.0.0", port)).is_ok()
    }

    /// Poll until `port` is free or `timeout` elapses. Returns whether it
    /// became free.
    pub async fn wait_port_free(&self, port: u16, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_port_free(port) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.settings.port_poll()).await;
        }
    }

    /// Force-kill every process holding a socket on exactly `port`.
    pub async fn kill_on_port(&self, port: u16) {
        let me = std::process::id();
        for pid in self.inspector.pids_on_port(port).await {
            if pid == me || pid <= 1 {
                continue;
            }
            info!(pid, port, "killing port holder");
            if let Err(e) = self.signaller.terminate(pid, true).await {
                warn!(pid, port, error = %e, "failed to kill port holder");
            }
        }
    }

    /// Two-pass port cleanup: kill holders and wait, then once more with a
    /// shorter wait. Returns the ports still occupied.
    pub async fn free_ports(&self, ports: &[u16]) -> Vec<u16> {
        let mut stuck = Vec::new();
        for &port in ports {
            self.kill_on_port(port).await;
            if self.wait_port_free(port, self.settings.port_wait_primary()).await {
                continue;
            }
            debug!(port, "port still busy, second cleanup pass");
            self.kill_on_port(port).await;
            if !self.wait_port_free(port, self.settings.port_wait_secondary()).await {
                warn!(port, "port is still in use");
                stuck.push(port);
            }
        }
        stuck
    }

    /// Deepest descendant of `parent` (at most five levels), or `parent`.
    pub async fn find_child_pid(&self, parent: u32) -> u32 {
        self.process_tree().await.resolve_leaf(parent, MAX_LEAF_DEPTH)
    }

    /// Resident memory of `pid` in KiB.
    pub fn memory_in(&self, tree: &ProcessTree, pid: u32) -> Option<u64> {
        tree.get(pid).map(|p| p.memory_kb).filter(|kb| *kb > 0)
    }

    /// Detailed reconciliation outcome for each record whose PID is dead.
    pub async fn reconcile_outcomes(
        &self,
        records: &[ProcessRecord],
        dead: &HashSet<u32>,
    ) -> BTreeMap<String, ReconcileOutcome> {
        if !records.iter().any(|r| r.pid != 0 && dead.contains(&r.pid)) {
            return BTreeMap::new();
        }
        let live = self.inspector.processes().await;
        let mut excluded: HashSet<u32> = records
            .iter()
            .filter(|r| r.pid != 0 && !dead.contains(&r.pid))
            .map(|r| r.pid)
            .collect();
        excluded.insert(std::process::id());
        reconcile::reconcile(records, dead, &live, &excluded)
    }

    /// Name → replacement PID for every record that reconciled to exactly
    /// one live process.
    pub async fn reconcile_pids(
        &self,
        records: &[ProcessRecord],
        dead: &HashSet<u32>,
    ) -> HashMap<String, u32> {
        self.reconcile_outcomes(records, dead)
            .await
            .into_iter()
            .filter_map(|(name, outcome)| outcome.matched_pid().map(|pid| (name, pid)))
            .collect()
    }
}
