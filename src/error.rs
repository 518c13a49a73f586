use serde::Serialize;

/// Minimum Jaro-Winkler score for a "did you mean" suggestion.
const NAME_SUGGESTION_THRESHOLD: f64 = 0.8;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("process '{name}': {message}")]
    Validation { name: String, message: String },

    #[error("process '{name}' is currently running (PID {pid}); use --force to restart it")]
    AlreadyRunning { name: String, pid: u32 },

    #[error("process '{name}' not found{}", suggestion.as_ref().map(|s| format!(" (did you mean `{}`?)", s)).unwrap_or_default())]
    NotFound {
        name: String,
        suggestion: Option<String>,
    },

    #[error("process '{name}': git sync failed: {message}")]
    Git { name: String, message: String },

    #[error("process '{name}': failed to spawn command: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process '{name}': {message}")]
    Config { name: String, message: String },

    #[error("process '{name}': {message}")]
    Conflict { name: String, message: String },

    #[error("registry storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("process '{name}' exited immediately after starting")]
    ExitedImmediately { name: String, output: String },

    #[error("file watcher error: {0}")]
    Watch(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Structured error payload handed to programmatic callers.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Error {
    pub fn validation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Build a `NotFound` error, suggesting the closest known name.
    pub fn not_found<'a>(name: &str, known: impl IntoIterator<Item = &'a str>) -> Self {
        let mut best: Option<(&str, f64)> = None;
        for candidate in known {
            let score = strsim::jaro_winkler(name, candidate);
            if score >= NAME_SUGGESTION_THRESHOLD && best.is_none_or(|(_, s)| score > s) {
                best = Some((candidate, score));
            }
        }
        Error::NotFound {
            name: name.to_string(),
            suggestion: best.map(|(s, _)| s.to_string()),
        }
    }

    /// SQLite reported the store as busy or locked by another writer.
    pub fn is_busy(&self) -> bool {
        match self {
            Error::Storage(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// The process name this error refers to, when there is one.
    pub fn process_name(&self) -> Option<&str> {
        match self {
            Error::Validation { name, .. }
            | Error::AlreadyRunning { name, .. }
            | Error::NotFound { name, .. }
            | Error::Git { name, .. }
            | Error::Spawn { name, .. }
            | Error::Config { name, .. }
            | Error::Conflict { name, .. }
            | Error::ExitedImmediately { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
            name: self.process_name().map(String::from),
        }
    }
}
