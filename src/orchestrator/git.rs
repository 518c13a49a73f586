//! Version-control sync before a restart.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

const GIT_TIMEOUT: Duration = Duration::from_secs(60);

/// What a sync did to the working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    UpToDate,
    Pulled { from: String, to: String },
    /// Fetch or comparison was not possible (no remote, no upstream).
    Skipped { reason: String },
}

async fn git(dir: &Path, args: &[&str]) -> std::result::Result<String, String> {
    let mut cmd = Command::new("git");
    cmd.args(args)
        .current_dir(dir)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true);
    let output = match tokio::time::timeout(GIT_TIMEOUT, cmd.output()).await {
        Ok(Ok(out)) => out,
        Ok(Err(e)) => return Err(format!("running git {}: {}", args.join(" "), e)),
        Err(_) => return Err(format!("git {} timed out", args.join(" "))),
    };
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("git {} failed: {}", args.join(" "), stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Fetch, compare local and upstream commits, and pull only when they
/// differ. Fetch or compare problems skip the sync with a warning; a
/// failed pull is an error.
pub async fn sync(name: &str, dir: &Path) -> Result<SyncOutcome> {
    if let Err(e) = git(dir, &["fetch"]).await {
        warn!(name, error = %e, "git fetch failed, skipping sync");
        return Ok(SyncOutcome::Skipped { reason: e });
    }
    let local = match git(dir, &["rev-parse", "HEAD"]).await {
        Ok(hash) => hash,
        Err(e) => {
            warn!(name, error = %e, "cannot read local commit, skipping sync");
            return Ok(SyncOutcome::Skipped { reason: e });
        }
    };
    let remote = match git(dir, &["rev-parse", "@{u}"]).await {
        Ok(hash) => hash,
        Err(e) => {
            warn!(name, error = %e, "no upstream to compare against, skipping sync");
            return Ok(SyncOutcome::Skipped { reason: e });
        }
    };
    if local == remote {
        debug!(name, commit = %local, "already up to date");
        return Ok(SyncOutcome::UpToDate);
    }
    info!(name, from = %short(&local), to = %short(&remote), "pulling latest changes");
    git(dir, &["pull"]).await.map_err(|message| Error::Git {
        name: name.to_string(),
        message,
    })?;
    Ok(SyncOutcome::Pulled {
        from: local,
        to: remote,
    })
}

fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}
