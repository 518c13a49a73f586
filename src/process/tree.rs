use std::collections::{BTreeMap, HashMap};

use crate::platform::ProcessEntry;

/// How far below a shell wrapper we look for the real workload.
pub const MAX_LEAF_DEPTH: usize = 5;

/// Parent → children view of one process-table snapshot.
///
/// Commands are spawned through a shell wrapper, so the PID we get back
/// from spawn is often not the workload itself; the tree lets callers
/// resolve a wrapper to its deepest descendant.
#[derive(Debug, Default)]
pub struct ProcessTree {
    entries: HashMap<u32, ProcessEntry>,
    children: BTreeMap<u32, Vec<u32>>,
}

impl ProcessTree {
    pub fn from_entries(entries: Vec<ProcessEntry>) -> Self {
        let mut children: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for e in &entries {
            if e.pid != e.ppid {
                children.entry(e.ppid).or_default().push(e.pid);
            }
        }
        for kids in children.values_mut() {
            kids.sort_unstable();
        }
        Self {
            entries: entries.into_iter().map(|e| (e.pid, e)).collect(),
            children,
        }
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessEntry> {
        self.entries.get(&pid)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ProcessEntry> {
        self.entries.values()
    }

    /// Direct children, lowest PID first.
    pub fn children(&self, pid: u32) -> &[u32] {
        self.children.get(&pid).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All descendants, breadth-first.
    pub fn descendants(&self, pid: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let mut frontier = vec![pid];
        while let Some(next) = frontier.pop() {
            for &child in self.children(next) {
                if child != pid && !out.contains(&child) {
                    out.push(child);
                    frontier.push(child);
                }
            }
        }
        out
    }

    /// Follow the lowest-PID child down at most `max_depth` levels and
    /// return the deepest process reached, or `pid` itself when it has no
    /// children.
    pub fn resolve_leaf(&self, pid: u32, max_depth: usize) -> u32 {
        let mut current = pid;
        for _ in 0..max_depth {
            match self.children(current).first() {
                Some(&child) if child != pid => current = child,
                _ => break,
            }
        }
        current
    }
}
