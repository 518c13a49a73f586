pub mod ansi;
pub mod tail;

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use serde::Serialize;

use crate::registry::ProcessRecord;
use ansi::{parse_line, StyledLine};
pub use tail::{IncrementalTail, LogStream, TailDelta, TailLine};

/// Read a whole log file, keeping only the last `lines` lines when given.
/// A missing file reads as empty.
pub fn read_tail(path: &Path, lines: Option<usize>) -> std::io::Result<String> {
    let content = match std::fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
        Err(e) => return Err(e),
    };
    let Some(n) = lines else {
        return Ok(content);
    };
    let trimmed = content.strip_suffix('\n').unwrap_or(&content);
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    let all: Vec<&str> = trimmed.split('\n').collect();
    let start = all.len().saturating_sub(n);
    let mut out = all[start..].join("\n");
    out.push('\n');
    Ok(out)
}

/// Both log files of a record, rendered for a crash report.
pub fn dump_logs(record: &ProcessRecord, lines: Option<usize>) -> String {
    let mut out = String::new();
    for (label, path) in [("stdout", &record.stdout_path), ("stderr", &record.stderr_path)] {
        out.push_str(&format!("--- {} ({}) ---\n", label, path.display()));
        match read_tail(path, lines) {
            Ok(text) if text.is_empty() => out.push_str("(empty)\n"),
            Ok(text) => {
                out.push_str(&text);
                if !text.ends_with('\n') {
                    out.push('\n');
                }
            }
            Err(e) => out.push_str(&format!("(unreadable: {})\n", e)),
        }
    }
    out
}

/// Complete lines appended after `offset`, for stateless pollers.
#[derive(Debug, Clone, Serialize)]
pub struct LogChunk {
    pub lines: Vec<StyledLine>,
    /// Offset to pass on the next request. Stops before an unterminated
    /// final line so it is delivered whole later.
    pub next_offset: u64,
    /// The file is shorter than `offset`; the caller should start over.
    pub truncated: bool,
}

/// Read complete lines between `offset` and the end of the file, at most
/// `max_bytes` at a time, keeping those containing `filter`
/// (case-insensitive). A line longer than `max_bytes` is returned in
/// `max_bytes` pieces so the offset always advances.
pub fn read_since(
    path: &Path,
    offset: u64,
    filter: Option<&str>,
    max_bytes: u64,
) -> std::io::Result<LogChunk> {
    let size = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
        Err(e) => return Err(e),
    };
    if size < offset {
        return Ok(LogChunk {
            lines: Vec::new(),
            next_offset: 0,
            truncated: true,
        });
    }
    if size == offset {
        return Ok(LogChunk {
            lines: Vec::new(),
            next_offset: offset,
            truncated: false,
        });
    }

    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut bytes = Vec::new();
    file.take(max_bytes.min(size - offset)).read_to_end(&mut bytes)?;

    let complete = match bytes.iter().rposition(|b| *b == b'\n') {
        Some(i) => i + 1,
        None if bytes.len() as u64 >= max_bytes => bytes.len(),
        None => 0,
    };
    let text = String::from_utf8_lossy(&bytes[..complete]);
    let filter = filter.map(str::to_lowercase).filter(|f| !f.is_empty());
    let lines = text
        .lines()
        .map(parse_line)
        .filter(|l| {
            filter
                .as_ref()
                .is_none_or(|f| l.plain().to_lowercase().contains(f.as_str()))
        })
        .collect();
    Ok(LogChunk {
        lines,
        next_offset: offset + complete as u64,
        truncated: false,
    })
}
