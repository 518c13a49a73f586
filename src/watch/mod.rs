//! Restart a process whenever its working directory changes.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_mini::notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::logs::{dump_logs, IncrementalTail, LogStream, TailLine};
use crate::orchestrator::{Orchestrator, RunRequest};
use crate::registry::ProcessRecord;

/// Directories whose changes never trigger a restart.
pub const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "target",
    "vendor",
    "__pycache__",
    ".venv",
    ".next",
    ".procrig",
];

const IGNORED_EXTENSIONS: &[&str] = &["swp", "swo", "tmp", "pyc", "pyo"];

const TAIL_INTERVAL: Duration = Duration::from_millis(250);
/// Log lines included in crash reports.
const DUMP_LINES: usize = 50;

/// Returns `true` if a change at `path` should not restart the process.
pub fn should_ignore(path: &Path) -> bool {
    for component in path.components() {
        if let Component::Normal(segment) = component {
            if segment.to_str().is_some_and(|s| IGNORED_DIRS.contains(&s)) {
                return true;
            }
        }
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IGNORED_EXTENSIONS.contains(&ext))
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchEvent {
    Started { message: String, pid: u32 },
    /// The process was already running and is watched as-is.
    Attached { pid: u32 },
    Log { stream: LogStream, line: TailLine },
    ChangeDetected { paths: Vec<PathBuf> },
    /// A change arrived while a restart was in flight and was dropped.
    RestartDropped,
    Restarted { message: String, pid: u32 },
    /// The process died right after a change-triggered restart; automatic
    /// restarts are off until a manual restart.
    Paused { output: String },
    Resumed,
    RestartFailed { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Change,
    Manual,
}

struct RestartResult {
    trigger: Trigger,
    outcome: Result<(ProcessRecord, String, bool)>,
}

/// Drives one watched process: initial run, file watcher, log tails and
/// the restart loop.
pub struct WatchController {
    orch: Orchestrator,
    request: RunRequest,
    events: mpsc::UnboundedSender<WatchEvent>,
    is_restarting: Arc<AtomicBool>,
    paused: AtomicBool,
    watching: AtomicBool,
}

impl WatchController {
    pub fn new(
        orch: Orchestrator,
        request: RunRequest,
        events: mpsc::UnboundedSender<WatchEvent>,
    ) -> Self {
        Self {
            orch,
            request,
            events,
            is_restarting: Arc::new(AtomicBool::new(false)),
            paused: AtomicBool::new(false),
            watching: AtomicBool::new(false),
        }
    }

    /// Whether a filesystem watcher is currently registered.
    pub fn is_watching(&self) -> bool {
        self.watching.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Claim the restart slot. `false` when a restart is already in flight.
    fn begin_restart(&self) -> bool {
        !self.is_restarting.swap(true, Ordering::SeqCst)
    }

    fn emit(&self, event: WatchEvent) {
        let _ = self.events.send(event);
    }

    /// Run (or attach to) the process, then watch until `cancel` fires.
    /// `manual` restart requests also lift a pause. The managed process is
    /// left running on exit.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        mut manual: mpsc::Receiver<()>,
    ) -> Result<()> {
        let name = self.request.name.clone();
        let record = self.initial_run().await?;
        let workdir = record.workdir.clone();
        let log_paths = [record.stdout_path.clone(), record.stderr_path.clone()];

        let tracker = TaskTracker::new();
        let tails = cancel.child_token();
        for stream in [LogStream::Stdout, LogStream::Stderr] {
            let mut tail = IncrementalTail::new(&record.stdout_path, &record.stderr_path);
            tail.set_stream(stream);
            tracker.spawn(follow(tail, self.events.clone(), tails.clone()));
        }

        let (fs_tx, mut fs_rx) = mpsc::channel::<Vec<PathBuf>>(64);
        let mut debouncer = new_debouncer(
            self.orch.settings().debounce(),
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let paths: Vec<PathBuf> = events
                        .into_iter()
                        .filter(|e| e.kind == DebouncedEventKind::Any)
                        .map(|e| e.path)
                        .collect();
                    if !paths.is_empty() {
                        let _ = fs_tx.blocking_send(paths);
                    }
                }
                Err(e) => warn!(error = %e, "file watcher error"),
            },
        )
        .map_err(|e| Error::Watch(e.to_string()))?;
        debouncer
            .watcher()
            .watch(&workdir, RecursiveMode::Recursive)
            .map_err(|e| Error::Watch(format!("watching {}: {}", workdir.display(), e)))?;
        self.watching.store(true, Ordering::SeqCst);
        info!(name = %name, dir = %workdir.display(), "watching for changes");

        let (done_tx, mut done_rx) = mpsc::channel::<RestartResult>(4);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(paths) = fs_rx.recv() => {
                    let relevant: Vec<PathBuf> = paths
                        .into_iter()
                        .filter(|p| !should_ignore(p.strip_prefix(&workdir).unwrap_or(p)))
                        .filter(|p| !log_paths.contains(p))
                        .collect();
                    if relevant.is_empty() {
                        continue;
                    }
                    debug!(name = %name, count = relevant.len(), "change detected");
                    self.emit(WatchEvent::ChangeDetected { paths: relevant });
                    self.trigger(Trigger::Change, &done_tx, &tracker).await;
                }
                Some(()) = manual.recv() => {
                    self.trigger(Trigger::Manual, &done_tx, &tracker).await;
                }
                Some(result) = done_rx.recv() => {
                    self.finish_restart(result);
                }
            }
        }

        drop(debouncer);
        self.watching.store(false, Ordering::SeqCst);
        tails.cancel();
        tracker.close();
        // An in-flight restart must finish so the registry row is rewritten.
        tracker.wait().await;
        while let Ok(result) = done_rx.try_recv() {
            self.finish_restart(result);
        }
        info!(name = %name, "watch stopped; process left running");
        Ok(())
    }

    /// Start the process unless it is already running (and `force` is not
    /// set), then make sure it survived startup.
    async fn initial_run(&self) -> Result<ProcessRecord> {
        if !self.request.force {
            if let Some(existing) = self.orch.registry().get(&self.request.name)? {
                if self.orch.is_alive(&existing).await {
                    self.emit(WatchEvent::Attached { pid: existing.pid });
                    return Ok(existing);
                }
            }
        }
        let mut request = self.request.clone();
        request.force = true;
        let outcome = self.orch.run(request).await?;
        tokio::time::sleep(self.orch.settings().death_check()).await;
        if !self.orch.is_alive(&outcome.record).await {
            return Err(Error::ExitedImmediately {
                name: outcome.record.name.clone(),
                output: dump_logs(&outcome.record, Some(DUMP_LINES)),
            });
        }
        self.emit(WatchEvent::Started {
            message: outcome.message,
            pid: outcome.record.pid,
        });
        Ok(outcome.record)
    }

    async fn trigger(
        &self,
        trigger: Trigger,
        done: &mpsc::Sender<RestartResult>,
        tracker: &TaskTracker,
    ) {
        if self.is_paused() {
            if trigger == Trigger::Change && !self.revived_elsewhere().await {
                debug!(name = %self.request.name, "auto restart paused, ignoring change");
                return;
            }
            self.paused.store(false, Ordering::SeqCst);
            self.emit(WatchEvent::Resumed);
            if trigger == Trigger::Change {
                return;
            }
        }
        if !self.begin_restart() {
            debug!(name = %self.request.name, "restart already in progress, dropping");
            self.emit(WatchEvent::RestartDropped);
            return;
        }
        let orch = self.orch.clone();
        let name = self.request.name.clone();
        let done = done.clone();
        tracker.spawn(async move {
            let outcome = restart_once(&orch, &name).await;
            let _ = done.send(RestartResult { trigger, outcome }).await;
        });
    }

    /// Someone restarted the process outside this watcher (e.g. a manual
    /// `run --force`), which counts as the user intervening.
    async fn revived_elsewhere(&self) -> bool {
        match self.orch.registry().get(&self.request.name) {
            Ok(Some(record)) => self.orch.is_alive(&record).await,
            _ => false,
        }
    }

    fn finish_restart(&self, result: RestartResult) {
        self.is_restarting.store(false, Ordering::SeqCst);
        let trigger = result.trigger;
        match result.outcome {
            Ok((record, message, true)) => {
                info!(name = %record.name, pid = record.pid, "restarted after change");
                self.emit(WatchEvent::Restarted {
                    message,
                    pid: record.pid,
                });
            }
            Ok((record, _, false)) => {
                warn!(
                    name = %record.name,
                    ?trigger,
                    "process died after restart, pausing auto restart"
                );
                self.paused.store(true, Ordering::SeqCst);
                self.emit(WatchEvent::Paused {
                    output: dump_logs(&record, Some(DUMP_LINES)),
                });
            }
            Err(e) => {
                warn!(name = %self.request.name, error = %e, "restart failed");
                self.emit(WatchEvent::RestartFailed {
                    error: e.to_string(),
                });
            }
        }
    }
}

async fn follow(
    mut tail: IncrementalTail,
    events: mpsc::UnboundedSender<WatchEvent>,
    cancel: CancellationToken,
) {
    loop {
        match tail.poll() {
            Ok(Some(delta)) => {
                for line in delta.merged.into_iter().chain(delta.appended) {
                    let _ = events.send(WatchEvent::Log {
                        stream: tail.stream(),
                        line,
                    });
                }
            }
            Ok(None) => {}
            Err(e) => debug!(path = %tail.path().display(), error = %e, "log tail failed"),
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(TAIL_INTERVAL) => {}
        }
    }
}

async fn restart_once(orch: &Orchestrator, name: &str) -> Result<(ProcessRecord, String, bool)> {
    let out = orch.run(RunRequest::new(name).force(true)).await?;
    tokio::time::sleep(orch.settings().death_check()).await;
    let alive = orch.is_alive(&out.record).await;
    Ok((out.record, out.message, alive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::test_commands::{exit_failure, sleep_long};
    use crate::process::ProcessController;
    use crate::registry::Registry;
    use crate::settings::{Home, Settings};
    use tempfile::tempdir;

    #[test]
    fn ignores_vendor_and_vcs_paths() {
        assert!(should_ignore(Path::new(".git/HEAD")));
        assert!(should_ignore(Path::new("web/node_modules/react/index.js")));
        assert!(should_ignore(Path::new("target/debug/app")));
        assert!(should_ignore(Path::new("src/main.rs.swp")));
        assert!(!should_ignore(Path::new("src/main.rs")));
        assert!(!should_ignore(Path::new("targets/list.txt")));
    }

    fn orchestrator(home: &Path) -> Orchestrator {
        let home = Home::new(home);
        home.ensure().unwrap();
        let registry = Arc::new(Registry::open(&home.db_path()).unwrap());
        Orchestrator::new(registry, ProcessController::native(Settings::fast()), home)
    }

    #[test]
    fn overlapping_restarts_are_dropped() {
        let dir = tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let ctl = WatchController::new(orchestrator(dir.path()), RunRequest::new("svc"), tx);
        assert!(ctl.begin_restart());
        assert!(!ctl.begin_restart());
        ctl.is_restarting.store(false, Ordering::SeqCst);
        assert!(ctl.begin_restart());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn immediate_exit_aborts_without_watcher() {
        let home = tempdir().unwrap();
        let work = tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let request = RunRequest::new("broken")
            .command(exit_failure())
            .directory(work.path());
        let ctl = WatchController::new(orchestrator(home.path()), request, tx);
        let (_manual_tx, manual_rx) = mpsc::channel(1);
        let err = ctl
            .run(CancellationToken::new(), manual_rx)
            .await
            .unwrap_err();
        match err {
            Error::ExitedImmediately { name, output } => {
                assert_eq!(name, "broken");
                assert!(output.contains("--- stdout"));
                assert!(output.contains("--- stderr"));
                assert!(output.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!ctl.is_watching());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_during_restart_keeps_record() {
        let home = tempdir().unwrap();
        let work = tempdir().unwrap();
        let orch = orchestrator(home.path());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = RunRequest::new("svc")
            .command(sleep_long())
            .directory(work.path());
        let ctl = WatchController::new(orch.clone(), request, tx);
        let (manual_tx, manual_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let driver = async {
            loop {
                match rx.recv().await {
                    Some(WatchEvent::Started { .. }) => break,
                    Some(_) => continue,
                    None => panic!("watch ended before start"),
                }
            }
            manual_tx.send(()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(ctl.run(cancel.clone(), manual_rx), driver);
        result.unwrap();

        let record = orch.registry().get("svc").unwrap().expect("record kept");
        assert!(orch.is_alive(&record).await);
        let mut restarted = false;
        while let Ok(event) = rx.try_recv() {
            restarted |= matches!(event, WatchEvent::Restarted { .. });
        }
        assert!(restarted);
        orch.delete("svc").await.unwrap();
    }
}
