pub mod git;
pub mod locks;

use std::collections::{BTreeMap, HashSet};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::parse_config_file;
use crate::error::{Error, Result};
use crate::platform::{self, absolute_dir};
use crate::process::container::ContainerLaunch;
use crate::process::{ProcessController, ReconcileOutcome};
use crate::registry::env::flatten_env;
use crate::registry::{NewRecord, ProcessRecord, Registry};
use crate::settings::{Home, Settings};

use locks::NameLocks;

// ---------------------------------------------------------------------------
// Requests and outcomes
// ---------------------------------------------------------------------------

/// A start/restart request. Unset fields are inherited from the existing
/// record for `name`; a new process needs `command` and `directory`.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub name: String,
    pub command: Option<String>,
    pub directory: Option<PathBuf>,
    /// Env-config file, relative to the working directory.
    pub config: Option<String>,
    pub force: bool,
    pub fetch: bool,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    /// Explicit environment, layered over the inherited one.
    pub env: BTreeMap<String, String>,
}

impl RunRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn config(mut self, config: impl Into<String>) -> Self {
        self.config = Some(config.into());
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub record: ProcessRecord,
    /// True when an existing record was replaced.
    pub restarted: bool,
    /// PID of the process that was torn down, if one was running.
    pub replaced_pid: Option<u32>,
    /// Ports that stayed busy after cleanup.
    pub stuck_ports: Vec<u16>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped { pid: u32, ports: Vec<u16> },
    AlreadyStopped,
}

/// Enriched view of one record for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessStatus {
    pub name: String,
    pub pid: u32,
    pub running: bool,
    pub container: bool,
    pub ports: Vec<u16>,
    pub memory_kb: Option<u64>,
    pub uptime_secs: Option<u64>,
    pub uptime: Option<String>,
    pub command: String,
    pub workdir: PathBuf,
    pub config_path: String,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciled: Option<ReconcileOutcome>,
}

/// A process's env-config file with its content hash.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigDocument {
    pub path: PathBuf,
    pub exists: bool,
    pub content: String,
    pub hash: String,
}

pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Turns run/stop/delete requests into registry and OS changes.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<Registry>,
    controller: ProcessController,
    home: Home,
    locks: NameLocks,
}

impl Orchestrator {
    pub fn new(registry: Arc<Registry>, controller: ProcessController, home: Home) -> Self {
        Self {
            registry,
            controller,
            home,
            locks: NameLocks::new(),
        }
    }

    /// Open the registry under `home` and drive the host OS.
    pub fn open(home: Home) -> Result<Self> {
        home.ensure()?;
        let settings = home.settings();
        let registry = Registry::open(&home.db_path())?;
        Ok(Self::new(
            Arc::new(registry),
            ProcessController::native(settings),
            home,
        ))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn controller(&self) -> &ProcessController {
        &self.controller
    }

    pub fn home(&self) -> &Home {
        &self.home
    }

    pub fn settings(&self) -> &Settings {
        self.controller.settings()
    }

    /// Authoritative record for `name`, or `NotFound` with a suggestion.
    pub fn record(&self, name: &str) -> Result<ProcessRecord> {
        match self.registry.get(name)? {
            Some(r) => Ok(r),
            None => {
                let known = self.registry.names()?;
                Err(Error::not_found(name, known.iter().map(String::as_str)))
            }
        }
    }

    pub async fn is_alive(&self, record: &ProcessRecord) -> bool {
        record.pid != 0 && self.controller.is_record_running(record).await
    }

    /// PID currently doing the record's work. A dead stored PID is
    /// reconciled against the live process table; a unique match is
    /// returned but not stored, since every caller either refuses or
    /// rewrites the row itself.
    async fn live_pid(&self, record: &ProcessRecord) -> Result<Option<u32>> {
        if record.pid == 0 {
            return Ok(None);
        }
        if self.controller.is_record_running(record).await {
            return Ok(Some(record.pid));
        }
        if ContainerLaunch::detect(&record.command, &record.workdir).is_some() {
            return Ok(None);
        }
        let all = self.registry.get_all()?;
        // Other dead records compete for the same candidates.
        let mut dead = HashSet::from([record.pid]);
        for other in &all {
            if other.name == record.name
                || other.pid == 0
                || ContainerLaunch::detect(&other.command, &other.workdir).is_some()
            {
                continue;
            }
            if !self.controller.is_record_running(other).await {
                dead.insert(other.pid);
            }
        }
        let outcomes = self.controller.reconcile_outcomes(&all, &dead).await;
        match outcomes.get(&record.name).and_then(ReconcileOutcome::matched_pid) {
            Some(pid) => {
                info!(name = %record.name, old_pid = record.pid, pid, "reconciled process PID");
                Ok(Some(pid))
            }
            None => Ok(None),
        }
    }

    /// Stop whatever `pid` runs for `record` and release its ports.
    /// Returns (captured ports, ports still busy).
    async fn teardown(&self, record: &ProcessRecord, pid: u32) -> (Vec<u16>, Vec<u16>) {
        // Ports are unknowable once the process is gone.
        let ports = self.controller.ports_of_tree(pid).await;
        debug!(name = %record.name, pid, ?ports, "tearing down");
        let target = ProcessRecord {
            pid,
            ..record.clone()
        };
        self.controller.stop_record(&target).await;
        let stuck = self.controller.free_ports(&ports).await;
        (ports, stuck)
    }

    // -----------------------------------------------------------------------
    // run
    // -----------------------------------------------------------------------

    /// Start a new process or restart an existing one.
    pub async fn run(&self, req: RunRequest) -> Result<RunOutcome> {
        let name = req.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::validation(&req.name, "a process name is required"));
        }
        let _guard = self.locks.lock(&name).await;

        let previous = self.registry.get(&name)?;
        let mut replaced_pid = None;
        let mut stuck_ports = Vec::new();

        let (command, workdir) = match &previous {
            Some(prev) => {
                let workdir = match &req.directory {
                    Some(d) => absolute_dir(&d.to_string_lossy()),
                    None => prev.workdir.clone(),
                };
                if !workdir.is_dir() {
                    return Err(Error::validation(
                        &name,
                        format!("directory {} does not exist", workdir.display()),
                    ));
                }
                if req.fetch {
                    git::sync(&name, &workdir).await?;
                }
                if let Some(pid) = self.live_pid(prev).await? {
                    if !req.force {
                        return Err(Error::AlreadyRunning { name, pid });
                    }
                    let (_, stuck) = self.teardown(prev, pid).await;
                    replaced_pid = Some(pid);
                    stuck_ports = stuck;
                }
                self.registry.remove_by_name(&name)?;
                let command = req.command.clone().unwrap_or_else(|| prev.command.clone());
                (command, workdir)
            }
            None => {
                let Some(command) = req.command.clone().filter(|c| !c.trim().is_empty()) else {
                    return Err(Error::validation(&name, "a command is required for a new process"));
                };
                let Some(dir) = &req.directory else {
                    return Err(Error::validation(&name, "a directory is required for a new process"));
                };
                let workdir = absolute_dir(&dir.to_string_lossy());
                if !workdir.is_dir() {
                    return Err(Error::validation(
                        &name,
                        format!("directory {} does not exist", workdir.display()),
                    ));
                }
                (command, workdir)
            }
        };

        let mut env = previous.as_ref().map(|p| p.env_map()).unwrap_or_default();
        env.extend(req.env.clone());

        let config_path = req
            .config
            .clone()
            .or_else(|| {
                previous
                    .as_ref()
                    .map(|p| p.config_path.clone())
                    .filter(|c| !c.is_empty())
            })
            .unwrap_or_else(|| self.settings().default_config_file.clone());
        let mut spawn_env = env.clone();
        let config_file = workdir.join(&config_path);
        if config_file.is_file() {
            let overrides = parse_config_file(&config_file);
            debug!(name = %name, file = %config_file.display(), keys = overrides.len(), "loaded env config");
            spawn_env.extend(overrides);
        } else {
            info!(name = %name, file = %config_file.display(), "config file not found, continuing");
        }

        let stdout_path = req
            .stdout
            .as_deref()
            .map(|p| absolute_dir(&p.to_string_lossy()))
            .or_else(|| previous.as_ref().map(|p| p.stdout_path.clone()))
            .unwrap_or_else(|| self.home.default_stdout(&name));
        let stderr_path = req
            .stderr
            .as_deref()
            .map(|p| absolute_dir(&p.to_string_lossy()))
            .or_else(|| previous.as_ref().map(|p| p.stderr_path.clone()))
            .unwrap_or_else(|| self.home.default_stderr(&name));

        let pid = self
            .spawn(&name, &command, &workdir, &spawn_env, &stdout_path, &stderr_path)
            .await?;

        let record = self.registry.insert(NewRecord {
            name: name.clone(),
            pid,
            command,
            workdir,
            env: flatten_env(&env),
            config_path,
            stdout_path,
            stderr_path,
        })?;

        let restarted = previous.is_some();
        let message = if restarted {
            format!("Process '{}' restarted (PID {})", name, pid)
        } else {
            format!("Process '{}' launched (PID {})", name, pid)
        };
        info!(name = %name, pid, restarted, "process started");
        Ok(RunOutcome {
            record,
            restarted,
            replaced_pid,
            stuck_ports,
            message,
        })
    }

    /// Spawn through the shell detached, then resolve the workload PID
    /// below the wrapper.
    async fn spawn(
        &self,
        name: &str,
        command: &str,
        workdir: &Path,
        env: &BTreeMap<String, String>,
        stdout_path: &Path,
        stderr_path: &Path,
    ) -> Result<u32> {
        let stdout = truncate_log(stdout_path)?;
        let stderr = truncate_log(stderr_path)?;

        let mut cmd = platform::shell_command(command);
        cmd.current_dir(workdir)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        platform::configure_detached(&mut cmd);

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            name: name.to_string(),
            source,
        })?;
        let wrapper = child.id().unwrap_or(0);
        debug!(name, pid = wrapper, shell = platform::shell_name(), "spawned");
        // Reap the wrapper so it never lingers as a zombie.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        tokio::time::sleep(self.settings().spawn_settle()).await;
        let mut pid = self.controller.find_child_pid(wrapper).await;
        tokio::time::sleep(self.settings().startup_wait()).await;
        // Wrappers like `npm start` may fork the real workload late.
        if self.controller.is_running(wrapper, None).await {
            pid = self.controller.find_child_pid(wrapper).await;
        }
        Ok(pid)
    }

    // -----------------------------------------------------------------------
    // stop / delete / clean
    // -----------------------------------------------------------------------

    /// Stop a process and mark its record stopped (PID 0). Stopping an
    /// already stopped process succeeds.
    pub async fn stop(&self, name: &str) -> Result<StopOutcome> {
        let _guard = self.locks.lock(name).await;
        let record = self.record(name)?;
        self.stop_locked(&record).await
    }

    async fn stop_locked(&self, record: &ProcessRecord) -> Result<StopOutcome> {
        let Some(pid) = self.live_pid(record).await? else {
            if record.pid != 0 {
                self.registry.set_pid(&record.name, 0)?;
            }
            return Ok(StopOutcome::AlreadyStopped);
        };
        let (ports, stuck) = self.teardown(record, pid).await;
        if !stuck.is_empty() {
            warn!(name = %record.name, ports = ?stuck, "ports still busy after stop");
        }
        self.registry.set_pid(&record.name, 0)?;
        info!(name = %record.name, pid, "process stopped");
        Ok(StopOutcome::Stopped { pid, ports })
    }

    /// Stop (if running) and forget a process.
    pub async fn delete(&self, name: &str) -> Result<StopOutcome> {
        let _guard = self.locks.lock(name).await;
        let record = self.record(name)?;
        let outcome = self.stop_locked(&record).await?;
        self.registry.remove_by_name(name)?;
        info!(name, "process deleted");
        Ok(outcome)
    }

    /// Remove records of processes that are not running, or every record
    /// (stopping live ones first) when `all` is set. Returns removed names.
    pub async fn clean(&self, all: bool) -> Result<Vec<String>> {
        if all {
            let records = self.registry.get_all()?;
            for record in &records {
                let _guard = self.locks.lock(&record.name).await;
                self.stop_locked(record).await?;
            }
            self.registry.remove_all()?;
            return Ok(records.into_iter().map(|r| r.name).collect());
        }

        let mut removed = Vec::new();
        for record in self.registry.get_all()? {
            let _guard = self.locks.lock(&record.name).await;
            if self.live_pid(&record).await?.is_none() {
                self.registry.remove_by_name(&record.name)?;
                removed.push(record.name);
            }
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // snapshot
    // -----------------------------------------------------------------------

    /// Liveness, ports, memory and age for every process. Dead PIDs are
    /// reconciled first and confident matches written back.
    pub async fn snapshot(&self) -> Result<Vec<ProcessStatus>> {
        let mut records = self.registry.get_all()?;

        let mut running = HashSet::new();
        let mut dead = HashSet::new();
        for r in &records {
            if r.pid == 0 {
                continue;
            }
            if self.controller.is_record_running(r).await {
                running.insert(r.name.clone());
            } else if ContainerLaunch::detect(&r.command, &r.workdir).is_none() {
                dead.insert(r.pid);
            }
        }

        let outcomes = self.controller.reconcile_outcomes(&records, &dead).await;
        for r in &mut records {
            if let Some(pid) = outcomes.get(&r.name).and_then(ReconcileOutcome::matched_pid) {
                info!(name = %r.name, old_pid = r.pid, pid, "reconciled process PID");
                self.registry.set_pid(&r.name, pid)?;
                r.pid = pid;
                running.insert(r.name.clone());
            }
        }

        let tree = self.controller.process_tree().await;
        let now = Utc::now();
        let mut out = Vec::with_capacity(records.len());
        for r in records {
            let is_running = running.contains(&r.name);
            let (ports, memory_kb, uptime_secs) = if is_running {
                let ports = self.controller.ports_of_tree(r.pid).await;
                let age = (now - r.timestamp).num_seconds().max(0) as u64;
                (ports, self.controller.memory_in(&tree, r.pid), Some(age))
            } else {
                (Vec::new(), None, None)
            };
            out.push(ProcessStatus {
                container: ContainerLaunch::detect(&r.command, &r.workdir).is_some(),
                reconciled: outcomes.get(&r.name).cloned(),
                running: is_running,
                ports,
                memory_kb,
                uptime: uptime_secs
                    .map(|s| humantime::format_duration(Duration::from_secs(s)).to_string()),
                uptime_secs,
                pid: r.pid,
                started_at: r.timestamp,
                name: r.name,
                command: r.command,
                workdir: r.workdir,
                config_path: r.config_path,
                stdout_path: r.stdout_path,
                stderr_path: r.stderr_path,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // env-config file
    // -----------------------------------------------------------------------

    fn config_file_of(&self, record: &ProcessRecord) -> PathBuf {
        let rel = if record.config_path.is_empty() {
            self.settings().default_config_file.as_str()
        } else {
            record.config_path.as_str()
        };
        record.workdir.join(rel)
    }

    /// Current env-config file of a process. A missing file reads as empty.
    pub async fn read_process_config(&self, name: &str) -> Result<ConfigDocument> {
        let record = self.record(name)?;
        let path = self.config_file_of(&record);
        let (exists, content) = match tokio::fs::read_to_string(&path).await {
            Ok(c) => (true, c),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (false, String::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(ConfigDocument {
            hash: content_hash(&content),
            path,
            exists,
            content,
        })
    }

    /// Replace a process's env-config file. `expected_hash` must match the
    /// file as last read; a stale hash is a conflict.
    pub async fn write_process_config(
        &self,
        name: &str,
        content: &str,
        expected_hash: &str,
    ) -> Result<ConfigDocument> {
        if let Err(e) = content.parse::<toml::Table>() {
            return Err(Error::Config {
                name: name.to_string(),
                message: format!("invalid TOML: {}", e),
            });
        }
        let _guard = self.locks.lock(name).await;
        let current = self.read_process_config(name).await?;
        if current.hash != expected_hash {
            return Err(Error::Conflict {
                name: name.to_string(),
                message: "config file was modified elsewhere; reload and retry".to_string(),
            });
        }
        tokio::fs::write(&current.path, content).await?;
        info!(name, file = %current.path.display(), "config file updated");
        Ok(ConfigDocument {
            path: current.path,
            exists: true,
            content: content.to_string(),
            hash: content_hash(content),
        })
    }
}

/// Create (or truncate) a log file and open it for appending.
fn truncate_log(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::File::create(path)?;
    Ok(OpenOptions::new().append(true).open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakeInspector;
    use crate::platform::test_commands::{exit_failure, sleep_long};
    use crate::process::container::NoContainers;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _home: TempDir,
        work: TempDir,
        orch: Orchestrator,
    }

    fn native_fixture() -> Fixture {
        let home = tempdir().unwrap();
        let work = tempdir().unwrap();
        let h = Home::new(home.path());
        h.ensure().unwrap();
        let registry = Arc::new(Registry::open(&h.db_path()).unwrap());
        let orch = Orchestrator::new(registry, ProcessController::native(Settings::fast()), h);
        Fixture {
            _home: home,
            work,
            orch,
        }
    }

    fn fake_fixture(fake: Arc<FakeInspector>) -> Fixture {
        let home = tempdir().unwrap();
        let work = tempdir().unwrap();
        let h = Home::new(home.path());
        h.ensure().unwrap();
        let registry = Arc::new(Registry::open_in_memory().unwrap());
        let controller =
            ProcessController::new(fake.clone(), fake, Arc::new(NoContainers), Settings::fast());
        Fixture {
            _home: home,
            work,
            orch: Orchestrator::new(registry, controller, h),
        }
    }

    fn stored(f: &Fixture, name: &str, pid: u32, command: &str) -> ProcessRecord {
        f.orch
            .registry()
            .insert(NewRecord {
                name: name.to_string(),
                pid,
                command: command.to_string(),
                workdir: f.work.path().to_path_buf(),
                env: String::new(),
                config_path: String::new(),
                stdout_path: f.orch.home().default_stdout(name),
                stderr_path: f.orch.home().default_stderr(name),
            })
            .unwrap()
    }

    #[tokio::test]
    async fn new_process_requires_command_and_directory() {
        let f = native_fixture();
        let err = f.orch.run(RunRequest::new("svc")).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        let err = f
            .orch
            .run(RunRequest::new("svc").command("sleep 1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("directory"));
        let err = f
            .orch
            .run(RunRequest::new("svc").command("sleep 1").directory("/nonexistent/x/y"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
        assert!(f.orch.registry().get_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_of_stopped_process_is_idempotent() {
        let fake = Arc::new(FakeInspector::new());
        let f = fake_fixture(fake);
        stored(&f, "svc", 0, "sleep 100");
        assert_eq!(f.orch.stop("svc").await.unwrap(), StopOutcome::AlreadyStopped);
        assert_eq!(f.orch.stop("svc").await.unwrap(), StopOutcome::AlreadyStopped);
        assert_eq!(f.orch.registry().get("svc").unwrap().unwrap().pid, 0);
    }

    #[tokio::test]
    async fn stop_of_dead_process_resets_pid() {
        let fake = Arc::new(FakeInspector::new());
        let f = fake_fixture(fake);
        stored(&f, "svc", 4242, "sleep 100");
        assert_eq!(f.orch.stop("svc").await.unwrap(), StopOutcome::AlreadyStopped);
        assert_eq!(f.orch.registry().get("svc").unwrap().unwrap().pid, 0);
    }

    #[tokio::test]
    async fn stop_terminates_tree_and_zeroes_pid() {
        let fake = Arc::new(
            FakeInspector::new()
                .with_process(500, 1, "sh -c serve")
                .with_process(501, 500, "serve"),
        );
        let f = fake_fixture(fake.clone());
        stored(&f, "svc", 500, "serve");
        let outcome = f.orch.stop("svc").await.unwrap();
        assert_eq!(
            outcome,
            StopOutcome::Stopped {
                pid: 500,
                ports: vec![]
            }
        );
        assert!(!fake.is_alive(500));
        assert!(!fake.is_alive(501));
        assert_eq!(f.orch.registry().get("svc").unwrap().unwrap().pid, 0);
    }

    #[tokio::test]
    async fn stop_unknown_name_suggests() {
        let f = fake_fixture(Arc::new(FakeInspector::new()));
        stored(&f, "worker", 0, "x");
        let err = f.orch.stop("workr").await.unwrap_err();
        assert!(err.to_string().contains("did you mean `worker`"));
    }

    #[tokio::test]
    async fn snapshot_reconciles_dead_wrapper() {
        let fake = Arc::new(FakeInspector::new());
        let f = fake_fixture(fake.clone());
        let dir = f.work.path().to_string_lossy().to_string();
        fake.add_process(900, 1, &format!("node {}/index.js", dir));
        fake.set_memory(900, 2048);
        stored(&f, "api", 700, "node index.js");
        stored(&f, "idle", 0, "node index.js");

        let snap = f.orch.snapshot().await.unwrap();
        let api = snap.iter().find(|s| s.name == "api").unwrap();
        assert!(api.running);
        assert_eq!(api.pid, 900);
        assert_eq!(api.memory_kb, Some(2048));
        assert!(api.uptime.is_some());
        let idle = snap.iter().find(|s| s.name == "idle").unwrap();
        assert!(!idle.running);
        assert!(idle.reconciled.is_none());
        assert_eq!(f.orch.registry().get("api").unwrap().unwrap().pid, 900);
    }

    #[tokio::test]
    async fn refused_run_leaves_record_untouched() {
        let fake = Arc::new(FakeInspector::new());
        let f = fake_fixture(fake.clone());
        let dir = f.work.path().to_string_lossy().to_string();
        fake.add_process(900, 1, &format!("node {}/index.js", dir));
        stored(&f, "api", 700, "node index.js");

        let err = f.orch.run(RunRequest::new("api")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning { pid: 900, .. }));
        assert_eq!(f.orch.registry().get("api").unwrap().unwrap().pid, 700);
        assert!(fake.is_alive(900));
    }

    #[tokio::test]
    async fn clean_removes_only_dead_records() {
        let fake = Arc::new(FakeInspector::new().with_process(600, 1, "sleep 100"));
        let f = fake_fixture(fake);
        stored(&f, "alive", 600, "sleep 100");
        stored(&f, "gone", 0, "sleep 100");
        let removed = f.orch.clean(false).await.unwrap();
        assert_eq!(removed, vec!["gone".to_string()]);
        assert!(f.orch.registry().get("alive").unwrap().is_some());
    }

    #[tokio::test]
    async fn config_write_detects_conflicts() {
        let f = fake_fixture(Arc::new(FakeInspector::new()));
        stored(&f, "svc", 0, "x");
        let doc = f.orch.read_process_config("svc").await.unwrap();
        assert!(!doc.exists);
        assert_eq!(doc.hash, content_hash(""));

        let written = f
            .orch
            .write_process_config("svc", "port = 8080\n", &doc.hash)
            .await
            .unwrap();
        assert!(written.exists);

        let stale = f
            .orch
            .write_process_config("svc", "port = 9090\n", &doc.hash)
            .await
            .unwrap_err();
        assert!(matches!(stale, Error::Conflict { .. }));

        let invalid = f
            .orch
            .write_process_config("svc", "port = ", &written.hash)
            .await
            .unwrap_err();
        assert!(matches!(invalid, Error::Config { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launch_then_refuse_then_force_restart() {
        let f = native_fixture();
        let req = RunRequest::new("svc")
            .command(sleep_long())
            .directory(f.work.path());
        let first = f.orch.run(req).await.unwrap();
        assert!(!first.restarted);
        assert!(first.message.contains("launched"));
        assert_ne!(first.record.pid, 0);
        assert!(f.orch.is_alive(&first.record).await);

        let err = f.orch.run(RunRequest::new("svc")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning { .. }));
        assert!(err.to_string().contains("use --force"));

        let second = f.orch.run(RunRequest::new("svc").force(true)).await.unwrap();
        assert!(second.restarted);
        assert!(second.message.contains("restarted"));
        assert_eq!(second.replaced_pid, Some(first.record.pid));
        assert!(second.record.timestamp >= first.record.timestamp);
        assert_eq!(f.orch.registry().count_by_name("svc").unwrap(), 1);
        assert!(!f.orch.controller().is_running(first.record.pid, None).await);

        f.orch.stop("svc").await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_config_is_not_fatal_and_config_values_reach_env() {
        let f = native_fixture();
        let out = f
            .orch
            .run(
                RunRequest::new("cfg")
                    .command("echo \"$GREETING\"")
                    .directory(f.work.path())
                    .config("missing.toml"),
            )
            .await
            .unwrap();
        assert_eq!(out.record.config_path, "missing.toml");

        std::fs::write(f.work.path().join("env.toml"), "greeting = \"hello\"\n").unwrap();
        let out = f
            .orch
            .run(RunRequest::new("cfg").config("env.toml").force(true))
            .await
            .unwrap();
        let logged = std::fs::read_to_string(&out.record.stdout_path).unwrap();
        assert_eq!(logged.trim(), "hello");
        // Config values are applied at spawn, not persisted as inherited env.
        assert!(out.record.env.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn relative_log_paths_are_stored_absolute() {
        let f = native_fixture();
        let rel = format!("procrig-test-{}-out.txt", std::process::id());
        let mut req = RunRequest::new("rel")
            .command("echo hi")
            .directory(f.work.path());
        req.stdout = Some(PathBuf::from(&rel));
        let out = f.orch.run(req).await.unwrap();
        let expected = std::env::current_dir().unwrap().join(&rel);
        let _ = std::fs::remove_file(&expected);
        assert!(out.record.stdout_path.is_absolute());
        assert_eq!(out.record.stdout_path, expected);
        assert!(out.record.stderr_path.is_absolute());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_still_records() {
        let f = native_fixture();
        let out = f
            .orch
            .run(
                RunRequest::new("bad")
                    .command(exit_failure())
                    .directory(f.work.path()),
            )
            .await
            .unwrap();
        assert!(!f.orch.is_alive(&out.record).await);
        let err = std::fs::read_to_string(&out.record.stderr_path).unwrap();
        assert!(err.contains("boom"));
    }
}
