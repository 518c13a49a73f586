//! Scripted process table for tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ProcessEntry, ProcessInspector, Signaller};

#[derive(Debug, Clone)]
struct FakeProcess {
    ppid: u32,
    command: String,
    memory_kb: u64,
    ports: Vec<u16>,
    ignores_term: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    processes: BTreeMap<u32, FakeProcess>,
    signals: Vec<(u32, bool)>,
}

/// In-memory [`ProcessInspector`] + [`Signaller`].
///
/// Terminating a fake process removes it from the table (unless it was
/// marked to ignore TERM and the kill is not forced) and records the
/// signal so tests can assert on ordering.
#[derive(Debug, Default)]
pub struct FakeInspector {
    state: Mutex<FakeState>,
}

impl FakeInspector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_process(self, pid: u32, ppid: u32, command: &str) -> Self {
        self.add_process(pid, ppid, command);
        self
    }

    pub fn add_process(&self, pid: u32, ppid: u32, command: &str) {
        self.lock().processes.insert(
            pid,
            FakeProcess {
                ppid,
                command: command.to_string(),
                memory_kb: 1024,
                ports: Vec::new(),
                ignores_term: false,
            },
        );
    }

    pub fn remove_process(&self, pid: u32) {
        self.lock().processes.remove(&pid);
    }

    pub fn bind_port(&self, pid: u32, port: u16) {
        if let Some(p) = self.lock().processes.get_mut(&pid) {
            p.ports.push(port);
        }
    }

    pub fn set_memory(&self, pid: u32, memory_kb: u64) {
        if let Some(p) = self.lock().processes.get_mut(&pid) {
            p.memory_kb = memory_kb;
        }
    }

    /// Make `pid` survive a graceful (non-forced) terminate.
    pub fn ignore_term(&self, pid: u32) {
        if let Some(p) = self.lock().processes.get_mut(&pid) {
            p.ignores_term = true;
        }
    }

    /// Every `(pid, force)` terminate request seen, in order.
    pub fn signals(&self) -> Vec<(u32, bool)> {
        self.lock().signals.clone()
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.lock().processes.contains_key(&pid)
    }
}

#[async_trait]
impl ProcessInspector for FakeInspector {
    async fn exists(&self, pid: u32) -> bool {
        pid != 0 && self.is_alive(pid)
    }

    async fn processes(&self) -> Vec<ProcessEntry> {
        self.lock()
            .processes
            .iter()
            .map(|(pid, p)| ProcessEntry {
                pid: *pid,
                ppid: p.ppid,
                memory_kb: p.memory_kb,
                command: p.command.clone(),
            })
            .collect()
    }

    async fn listening_ports(&self, pid: u32) -> Vec<u16> {
        self.lock()
            .processes
            .get(&pid)
            .map(|p| p.ports.clone())
            .unwrap_or_default()
    }

    async fn pids_on_port(&self, port: u16) -> Vec<u32> {
        self.lock()
            .processes
            .iter()
            .filter(|(_, p)| p.ports.contains(&port))
            .map(|(pid, _)| *pid)
            .collect()
    }
}

#[async_trait]
impl Signaller for FakeInspector {
    async fn terminate(&self, pid: u32, force: bool) -> std::io::Result<()> {
        let mut state = self.lock();
        state.signals.push((pid, force));
        let survives = state
            .processes
            .get(&pid)
            .is_some_and(|p| p.ignores_term && !force);
        if !survives {
            state.processes.remove(&pid);
        }
        Ok(())
    }
}
