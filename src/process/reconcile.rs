//! Recovering lost PIDs by matching live processes against stored records.
//!
//! Shell-wrapper PIDs die independently of their payload, and after a
//! reboot a stored PID may belong to something unrelated. Matching is
//! fuzzy, so it fails closed: without directory evidence, or with more
//! than one equally good candidate, nothing is reconciled.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::platform::ProcessEntry;
use crate::registry::ProcessRecord;

/// The working directory's last path segment appears in the candidate.
pub const DIR_SEGMENT_SCORE: u32 = 3;
/// The full working directory path appears in the candidate.
pub const DIR_FULL_SCORE: u32 = 5;
/// Total score a candidate needs, on top of having directory evidence.
pub const MIN_SCORE: u32 = 4;

const SHELL_OPERATORS: &[&str] = &["&&", "||", ";", "|", "&", ">", "<", "2>&1"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Score {
    pub tokens: u32,
    pub directory: u32,
}

impl Score {
    pub fn total(&self) -> u32 {
        self.tokens + self.directory
    }

    pub fn qualifies(&self) -> bool {
        self.directory >= DIR_SEGMENT_SCORE && self.total() >= MIN_SCORE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Matched { pid: u32, score: u32 },
    Ambiguous { candidates: Vec<u32>, score: u32 },
    NoCandidate,
}

impl ReconcileOutcome {
    pub fn matched_pid(&self) -> Option<u32> {
        match self {
            ReconcileOutcome::Matched { pid, .. } => Some(*pid),
            _ => None,
        }
    }
}

fn command_tokens(command: &str) -> Vec<&str> {
    let mut tokens: Vec<&str> = command
        .split_whitespace()
        .filter(|t| t.len() >= 2 && !SHELL_OPERATORS.contains(t))
        .collect();
    tokens.sort_unstable();
    tokens.dedup();
    tokens
}

fn token_matches(stored: &str, candidate: &str) -> bool {
    candidate == stored
        || candidate
            .strip_suffix(stored)
            .is_some_and(|prefix| prefix.ends_with('/') || prefix.ends_with('\\'))
}

/// Score one live command line against a stored command and directory.
pub fn score_candidate(command: &str, workdir: &Path, candidate: &str) -> Score {
    let candidate_tokens: Vec<&str> = candidate.split_whitespace().collect();
    let tokens = command_tokens(command)
        .into_iter()
        .filter(|stored| candidate_tokens.iter().any(|c| token_matches(stored, c)))
        .count() as u32;

    let mut directory = 0;
    if let Some(segment) = workdir.file_name().map(|s| s.to_string_lossy()) {
        if !segment.is_empty() && candidate.contains(segment.as_ref()) {
            directory += DIR_SEGMENT_SCORE;
        }
    }
    let full = workdir.to_string_lossy();
    if full.len() > 1 && candidate.contains(full.as_ref()) {
        directory += DIR_FULL_SCORE;
    }

    Score { tokens, directory }
}

/// Pick the best candidate for a single record.
pub fn reconcile_one(record: &ProcessRecord, candidates: &[&ProcessEntry]) -> ReconcileOutcome {
    let mut best_score = 0;
    let mut best: Vec<u32> = Vec::new();
    for candidate in candidates {
        let score = score_candidate(&record.command, &record.workdir, &candidate.command);
        if !score.qualifies() {
            continue;
        }
        match score.total().cmp(&best_score) {
            std::cmp::Ordering::Greater => {
                best_score = score.total();
                best = vec![candidate.pid];
            }
            std::cmp::Ordering::Equal => best.push(candidate.pid),
            std::cmp::Ordering::Less => {}
        }
    }
    match best.len() {
        0 => ReconcileOutcome::NoCandidate,
        1 => ReconcileOutcome::Matched {
            pid: best[0],
            score: best_score,
        },
        _ => {
            best.sort_unstable();
            ReconcileOutcome::Ambiguous {
                candidates: best,
                score: best_score,
            }
        }
    }
}

/// Reconcile every record whose stored, non-zero PID is in `dead`.
///
/// `excluded` holds PIDs that may never be handed out (the supervisor
/// itself, PIDs owned by other live records). A PID claimed by more than
/// one record is ambiguous for all of them.
pub fn reconcile(
    records: &[ProcessRecord],
    dead: &HashSet<u32>,
    live: &[ProcessEntry],
    excluded: &HashSet<u32>,
) -> BTreeMap<String, ReconcileOutcome> {
    let candidates: Vec<&ProcessEntry> = live
        .iter()
        .filter(|p| p.pid > 1 && !excluded.contains(&p.pid) && !dead.contains(&p.pid))
        .collect();

    let mut outcomes: BTreeMap<String, ReconcileOutcome> = BTreeMap::new();
    for record in records {
        if record.pid == 0 || !dead.contains(&record.pid) {
            continue;
        }
        let outcome = reconcile_one(record, &candidates);
        debug!(name = %record.name, old_pid = record.pid, ?outcome, "reconciliation result");
        outcomes.insert(record.name.clone(), outcome);
    }

    let mut claims: HashMap<u32, Vec<String>> = HashMap::new();
    for (name, outcome) in &outcomes {
        if let Some(pid) = outcome.matched_pid() {
            claims.entry(pid).or_default().push(name.clone());
        }
    }
    for (pid, names) in claims {
        if names.len() < 2 {
            continue;
        }
        info!(pid, records = ?names, "candidate claimed by several records, not reconciling");
        for name in names {
            if let Some(outcome) = outcomes.get_mut(&name) {
                let score = match outcome {
                    ReconcileOutcome::Matched { score, .. } => *score,
                    _ => 0,
                };
                *outcome = ReconcileOutcome::Ambiguous {
                    candidates: vec![pid],
                    score,
                };
            }
        }
    }

    for (name, outcome) in &outcomes {
        if let ReconcileOutcome::Ambiguous { candidates, .. } = outcome {
            info!(name = %name, ?candidates, "ambiguous PID reconciliation, skipping");
        }
    }
    outcomes
}
