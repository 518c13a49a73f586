use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;

pub mod parse;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
use unix as imp;
#[cfg(windows)]
use windows as imp;

pub use imp::NativePlatform;

/// One row of the OS process table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub ppid: u32,
    /// Resident memory in KiB (0 when unknown).
    pub memory_kb: u64,
    /// Full command line.
    pub command: String,
}

/// Read-only view of the OS process and socket tables.
///
/// Queried fresh on every call, never cached. Implementations must not
/// hang: every subprocess query is bounded by a timeout and falls back to
/// an empty/false answer.
#[async_trait]
pub trait ProcessInspector: Send + Sync {
    /// Whether a (non-zombie) process with this PID exists.
    async fn exists(&self, pid: u32) -> bool;

    /// Snapshot of every process on the host.
    async fn processes(&self) -> Vec<ProcessEntry>;

    /// TCP ports the PID is listening on.
    async fn listening_ports(&self, pid: u32) -> Vec<u16>;

    /// PIDs owning a socket whose local port is exactly `port`.
    async fn pids_on_port(&self, port: u16) -> Vec<u32>;
}

/// Delivers termination requests to processes.
#[async_trait]
pub trait Signaller: Send + Sync {
    /// Ask `pid` to exit (`force` = uncatchable kill). A process that is
    /// already gone is not an error.
    async fn terminate(&self, pid: u32, force: bool) -> std::io::Result<()>;
}

/// Create a platform-appropriate shell command.
/// Unix: `sh -c <command>`, Windows: `cmd.exe /C <command>`
pub fn shell_command(command: &str) -> Command {
    imp::shell_command(command)
}

/// Detach the spawned command from the supervisor's process group and
/// console so that signals aimed at the supervisor (Ctrl-C in watch mode)
/// do not reach it.
pub fn configure_detached(cmd: &mut Command) {
    imp::configure_detached(cmd)
}

/// Shell name for log messages.
pub fn shell_name() -> &'static str {
    imp::SHELL_NAME
}

/// Run a query command with a hard timeout, returning its stdout.
///
/// Non-zero exit codes still return stdout: tools like `lsof` exit 1 when
/// nothing matched. `None` on spawn failure or timeout.
pub(crate) async fn run_query(mut cmd: Command, timeout: Duration) -> Option<String> {
    cmd.stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Some(String::from_utf8_lossy(&output.stdout).into_owned()),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "process query failed to run");
            None
        }
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "process query timed out");
            None
        }
    }
}

/// Expand leading `~` or `$HOME` in a path string to the actual home directory.
///
/// Returns the original string unchanged when no home directory is available
/// or the string doesn't start with `~` or `$HOME`.
pub fn expand_home(path: &str) -> String {
    if let Some(home) = dirs::home_dir() {
        let home = home.to_string_lossy();
        if path == "~" || path == "$HOME" {
            return home.to_string();
        }
        if let Some(rest) = path.strip_prefix("~/") {
            return format!("{}/{}", home, rest);
        }
        if let Some(rest) = path
            .strip_prefix("$HOME/")
            .or_else(|| path.strip_prefix("$HOME\\"))
        {
            return format!("{}/{}", home, rest);
        }
    }
    path.to_string()
}

/// Resolve a user-supplied directory to an absolute path.
pub fn absolute_dir(dir: &str) -> std::path::PathBuf {
    let expanded = expand_home(dir);
    let p = Path::new(&expanded);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(p))
            .unwrap_or_else(|_| p.to_path_buf())
    }
}
