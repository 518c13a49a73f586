//! Offset-based incremental log tailing.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::ansi::{parse_line, StyledLine};

/// On first read only this much of the end of a file is loaded.
pub const INITIAL_WINDOW_BYTES: u64 = 1 << 20;
/// Lines kept in memory per tail.
pub const MAX_LINES: usize = 5000;
const CACHE_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    #[default]
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogStream::Stdout => write!(f, "stdout"),
            LogStream::Stderr => write!(f, "stderr"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TailLine {
    pub raw: String,
    pub styled: StyledLine,
}

/// What changed since the previous poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TailDelta {
    /// Discard everything shown so far before applying this delta.
    pub reset: bool,
    /// Replacement for the last delivered line, which was incomplete and
    /// has grown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged: Option<TailLine>,
    pub appended: Vec<TailLine>,
    pub offset: u64,
}

/// Follows one of a process's two log files from a byte offset.
///
/// Each poll reads only bytes past the offset. A trailing line without a
/// newline is kept open and merged with the next chunk. Lines are
/// converted from ANSI once and cached by content. Changing stream or
/// filter starts over from scratch.
#[derive(Debug)]
pub struct IncrementalTail {
    stdout_path: PathBuf,
    stderr_path: PathBuf,
    stream: LogStream,
    filter: Option<String>,
    offset: u64,
    lines: Vec<TailLine>,
    /// The last stored line has no terminating newline yet.
    partial: bool,
    /// The partial line was handed to the caller.
    partial_delivered: bool,
    /// Undecodable trailing bytes (split UTF-8 sequence).
    carry: Vec<u8>,
    cache: HashMap<String, StyledLine>,
    parses: usize,
    needs_reset: bool,
}

impl IncrementalTail {
    pub fn new(stdout_path: impl Into<PathBuf>, stderr_path: impl Into<PathBuf>) -> Self {
        Self {
            stdout_path: stdout_path.into(),
            stderr_path: stderr_path.into(),
            stream: LogStream::Stdout,
            filter: None,
            offset: 0,
            lines: Vec::new(),
            partial: false,
            partial_delivered: false,
            carry: Vec::new(),
            cache: HashMap::new(),
            parses: 0,
            needs_reset: true,
        }
    }

    pub fn stream(&self) -> LogStream {
        self.stream
    }

    pub fn path(&self) -> &Path {
        match self.stream {
            LogStream::Stdout => &self.stdout_path,
            LogStream::Stderr => &self.stderr_path,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of ANSI conversions performed so far.
    pub fn parse_count(&self) -> usize {
        self.parses
    }

    pub fn set_stream(&mut self, stream: LogStream) {
        if stream != self.stream {
            self.stream = stream;
            self.reset();
        }
    }

    /// Case-insensitive substring filter; empty means none.
    pub fn set_filter(&mut self, filter: Option<String>) {
        let filter = filter
            .map(|f| f.trim().to_lowercase())
            .filter(|f| !f.is_empty());
        if filter != self.filter {
            self.filter = filter;
            self.reset();
        }
    }

    fn reset(&mut self) {
        self.offset = 0;
        self.lines.clear();
        self.partial = false;
        self.partial_delivered = false;
        self.carry.clear();
        self.cache.clear();
        self.needs_reset = true;
    }

    fn matches(&self, line: &TailLine) -> bool {
        match &self.filter {
            Some(f) => line.styled.plain().to_lowercase().contains(f),
            None => true,
        }
    }

    fn convert(&mut self, raw: &str) -> TailLine {
        let raw = raw.strip_suffix('\r').unwrap_or(raw).to_string();
        let styled = match self.cache.get(&raw) {
            Some(s) => s.clone(),
            None => {
                self.parses += 1;
                let s = parse_line(&raw);
                if self.cache.len() >= CACHE_LIMIT {
                    self.cache.clear();
                }
                self.cache.insert(raw.clone(), s.clone());
                s
            }
        };
        TailLine { raw, styled }
    }

    /// Lines currently visible under the filter.
    pub fn visible(&self) -> Vec<&TailLine> {
        self.lines.iter().filter(|l| self.matches(l)).collect()
    }

    /// Read what was appended since the last poll. `None` when the file did
    /// not grow (no read is performed). A file that shrank was truncated by
    /// a restart and is re-read from the start.
    pub fn poll(&mut self) -> std::io::Result<Option<TailDelta>> {
        let size = match std::fs::metadata(self.path()) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        if size < self.offset {
            self.reset();
        }
        if size == self.offset && !self.needs_reset {
            return Ok(None);
        }

        let mut delta = TailDelta {
            reset: std::mem::take(&mut self.needs_reset),
            ..Default::default()
        };
        if size == self.offset {
            delta.offset = self.offset;
            return Ok(Some(delta));
        }

        let mut start = self.offset;
        let mut skip_first = false;
        if start == 0 && size > INITIAL_WINDOW_BYTES {
            start = size - INITIAL_WINDOW_BYTES;
            skip_first = true;
        }

        let mut file = std::fs::File::open(self.path())?;
        file.seek(SeekFrom::Start(start))?;
        let mut bytes = std::mem::take(&mut self.carry);
        file.take(size - start).read_to_end(&mut bytes)?;
        self.offset = size;

        // Hold back an incomplete UTF-8 sequence at the end of the chunk.
        let valid = match std::str::from_utf8(&bytes) {
            Ok(_) => bytes.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => bytes.len(),
        };
        self.carry = bytes.split_off(valid);
        let text = String::from_utf8_lossy(&bytes).into_owned();

        let mut segments: Vec<&str> = text.split('\n').collect();
        if skip_first && segments.len() > 1 {
            // Started mid-line; drop the fragment.
            segments.remove(0);
        }
        let ends_open = !text.ends_with('\n');
        // `split` yields a trailing "" after a final newline.
        if !ends_open {
            segments.pop();
        }

        let mut iter = segments.into_iter();
        if self.partial {
            if let Some(first) = iter.next() {
                if let Some(last) = self.lines.pop() {
                    let joined = format!("{}{}", last.raw, first);
                    let line = self.convert(&joined);
                    if self.partial_delivered {
                        delta.merged = Some(line.clone());
                    } else if self.matches(&line) {
                        delta.appended.push(line.clone());
                    }
                    self.lines.push(line);
                }
            }
        }
        for segment in iter {
            let line = self.convert(segment);
            if self.matches(&line) {
                delta.appended.push(line.clone());
            }
            self.lines.push(line);
        }

        let last_visible = self.lines.last().is_some_and(|l| self.matches(l));
        self.partial = ends_open && !self.lines.is_empty();
        self.partial_delivered = self.partial && last_visible;

        if self.lines.len() > MAX_LINES {
            let excess = self.lines.len() - MAX_LINES;
            self.lines.drain(..excess);
        }
        delta.offset = self.offset;
        Ok(Some(delta))
    }
}
