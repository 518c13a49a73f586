use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const HOME_ENV: &str = "PROCRIG_HOME";
pub const DB_FILE_NAME: &str = "procrig.sqlite";
pub const SETTINGS_FILE_NAME: &str = "settings.toml";
pub const DEFAULT_CONFIG_FILE: &str = ".config.toml";

/// Tunable timings and defaults, loaded from `<home>/settings.toml`.
///
/// Every field has a default, so a partial (or absent) file is fine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub port_wait_primary_ms: u64,
    pub port_wait_secondary_ms: u64,
    pub port_poll_ms: u64,
    pub graceful_kill_ms: u64,
    pub spawn_settle_ms: u64,
    pub startup_wait_ms: u64,
    pub query_timeout_ms: u64,
    pub debounce_ms: u64,
    pub death_check_ms: u64,
    pub dashboard_interval_ms: u64,
    pub default_config_file: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port_wait_primary_ms: 5000,
            port_wait_secondary_ms: 2000,
            port_poll_ms: 300,
            graceful_kill_ms: 500,
            spawn_settle_ms: 200,
            startup_wait_ms: 1000,
            query_timeout_ms: 5000,
            debounce_ms: 500,
            death_check_ms: 1500,
            dashboard_interval_ms: 3000,
            default_config_file: DEFAULT_CONFIG_FILE.to_string(),
        }
    }
}

impl Settings {
    pub fn load(home: &Path) -> Self {
        let path = home.join(SETTINGS_FILE_NAME);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return Self::default(),
        };
        match toml::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid settings file, using defaults");
                Self::default()
            }
        }
    }

    pub fn port_wait_primary(&self) -> Duration {
        Duration::from_millis(self.port_wait_primary_ms)
    }

    pub fn port_wait_secondary(&self) -> Duration {
        Duration::from_millis(self.port_wait_secondary_ms)
    }

    pub fn port_poll(&self) -> Duration {
        Duration::from_millis(self.port_poll_ms)
    }

    pub fn graceful_kill(&self) -> Duration {
        Duration::from_millis(self.graceful_kill_ms)
    }

    pub fn spawn_settle(&self) -> Duration {
        Duration::from_millis(self.spawn_settle_ms)
    }

    pub fn startup_wait(&self) -> Duration {
        Duration::from_millis(self.startup_wait_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn death_check(&self) -> Duration {
        Duration::from_millis(self.death_check_ms)
    }

    pub fn dashboard_interval(&self) -> Duration {
        Duration::from_millis(self.dashboard_interval_ms)
    }

    /// Short timings for tests that spawn real processes.
    pub fn fast() -> Self {
        Self {
            port_wait_primary_ms: 3000,
            port_wait_secondary_ms: 1000,
            port_poll_ms: 50,
            graceful_kill_ms: 100,
            spawn_settle_ms: 100,
            startup_wait_ms: 200,
            query_timeout_ms: 3000,
            debounce_ms: 200,
            death_check_ms: 500,
            dashboard_interval_ms: 500,
            default_config_file: DEFAULT_CONFIG_FILE.to_string(),
        }
    }
}

/// Resolved on-disk locations for one supervisor home.
#[derive(Debug, Clone)]
pub struct Home {
    root: PathBuf,
}

impl Home {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$PROCRIG_HOME`, else `~/.procrig`, else a temp-dir fallback.
    pub fn resolve(explicit: Option<&Path>) -> Self {
        if let Some(p) = explicit {
            return Self::new(p);
        }
        if let Some(p) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Self::new(PathBuf::from(p));
        }
        let base = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
        Self::new(base.join(".procrig"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(DB_FILE_NAME)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn default_stdout(&self, name: &str) -> PathBuf {
        self.logs_dir().join(format!("{}-out.txt", sanitize(name)))
    }

    pub fn default_stderr(&self, name: &str) -> PathBuf {
        self.logs_dir().join(format!("{}-err.txt", sanitize(name)))
    }

    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.logs_dir())
    }

    pub fn settings(&self) -> Settings {
        Settings::load(&self.root)
    }
}

/// Keep log file names portable and distinct per name: bytes outside
/// `[A-Za-z0-9._-]` are percent-encoded, `%` included.
fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}
