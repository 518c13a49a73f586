#![allow(dead_code)]
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use assert_cmd::assert::Assert;
use assert_cmd::Command;
use procrig::settings::{Home, Settings, SETTINGS_FILE_NAME};
use procrig::Orchestrator;
use tempfile::TempDir;

/// An isolated supervisor home with fast timings plus a scratch working
/// directory for the managed processes.
pub struct TestHome {
    pub home: TempDir,
    pub work: TempDir,
}

impl TestHome {
    pub fn new() -> Self {
        let home = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let settings = toml::to_string(&Settings::fast()).unwrap();
        std::fs::write(home.path().join(SETTINGS_FILE_NAME), settings).unwrap();
        Self { home, work }
    }

    pub fn home_path(&self) -> &Path {
        self.home.path()
    }

    pub fn work_path(&self) -> &Path {
        self.work.path()
    }

    pub fn orch(&self) -> Orchestrator {
        Orchestrator::open(Home::new(self.home.path())).unwrap()
    }

    /// `procrig --home <home> <args..>`
    pub fn procrig(&self, args: &[&str]) -> Assert {
        self.command(args).assert()
    }

    pub fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::cargo_bin("procrig").unwrap();
        cmd.arg("--home").arg(self.home.path()).args(args);
        cmd.env_remove("PROCRIG_HOME");
        cmd
    }

    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.work.path().join(rel);
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Stop everything this home still tracks.
    pub fn stop_all(&self) {
        let _ = self.command(&["clean", "--all"]).output();
    }
}

pub fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Parse the stdout of a successful command as JSON.
pub fn json_of(assert: Assert) -> serde_json::Value {
    serde_json::from_slice(&assert.success().get_output().stdout).unwrap()
}

/// A command that listens on `port` until killed.
pub fn listener_command(port: u16) -> String {
    format!("python3 -m http.server {}", port)
}

pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub async fn wait_for_port(port: u16, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

pub async fn wait_for_port_release(port: u16, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpListener::bind(("0.0.0.0", port)).is_ok() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}
