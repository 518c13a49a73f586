use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::logs::{read_tail, IncrementalTail, LogStream, TailDelta};

const FOLLOW_INTERVAL: Duration = Duration::from_millis(250);

pub async fn run(
    home: Option<&Path>,
    name: &str,
    lines: Option<usize>,
    only: Option<LogStream>,
    follow: bool,
) -> Result<()> {
    let orch = super::open(home)?;
    let record = orch.record(name)?;

    if follow {
        let stream = only.unwrap_or(LogStream::Stdout);
        let mut tail = IncrementalTail::new(&record.stdout_path, &record.stderr_path);
        tail.set_stream(stream);
        return follow_tail(tail, lines).await;
    }

    for (stream, path) in [
        (LogStream::Stdout, &record.stdout_path),
        (LogStream::Stderr, &record.stderr_path),
    ] {
        if only.is_some_and(|s| s != stream) {
            continue;
        }
        let text = read_tail(path, lines)
            .with_context(|| format!("reading {}", path.display()))?;
        if only.is_none() {
            println!("--- {} ({}) ---", stream, path.display());
        }
        print!("{}", text);
    }
    Ok(())
}

/// Print the last `lines` lines, then new output until Ctrl+C.
async fn follow_tail(mut tail: IncrementalTail, lines: Option<usize>) -> Result<()> {
    let mut printer = FollowPrinter::default();

    if let Some(delta) = tail.poll()? {
        let skip = lines.map_or(0, |n| delta.appended.len().saturating_sub(n));
        for line in delta.appended.iter().skip(skip) {
            printer.line(&line.raw);
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(FOLLOW_INTERVAL) => {}
        }
        if let Some(delta) = tail.poll()? {
            printer.apply(&delta);
        }
    }
    printer.finish();
    Ok(())
}

/// Writes tail deltas to stdout. The newline after each line is held back
/// so a line that is still being written can be extended in place.
#[derive(Default)]
struct FollowPrinter {
    open_line: Option<String>,
}

impl FollowPrinter {
    fn apply(&mut self, delta: &TailDelta) {
        if delta.reset {
            self.finish();
            println!("--- log restarted ---");
        }
        if let Some(merged) = &delta.merged {
            let shown = self.open_line.as_deref().unwrap_or("");
            if let Some(rest) = merged.raw.strip_prefix(shown) {
                print!("{}", rest);
            } else {
                print!("\n{}", merged.raw);
            }
            self.open_line = Some(merged.raw.clone());
        }
        for line in &delta.appended {
            self.line(&line.raw);
        }
        let _ = std::io::stdout().flush();
    }

    fn line(&mut self, raw: &str) {
        if self.open_line.is_some() {
            println!();
        }
        print!("{}", raw);
        self.open_line = Some(raw.to_string());
    }

    fn finish(&mut self) {
        if self.open_line.take().is_some() {
            println!();
        }
    }
}
