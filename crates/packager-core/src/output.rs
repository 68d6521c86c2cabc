//! Line-oriented execution log.
//!
//! Everything the packager prints for CI consumers (matrix listing, the
//! exact container command line, streamed build output, upload decisions)
//! goes through an [`OutputSink`]. Diagnostics go to `tracing` instead.

use std::io::Write;
use std::sync::Mutex;

/// Destination for execution log lines.
pub trait OutputSink: Send + Sync {
    fn line(&self, line: &str);
}

/// Writes each line to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn line(&self, line: &str) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        // A closed stdout must not abort the build.
        let _ = writeln!(lock, "{line}");
    }
}

/// Collects lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// All lines joined with newlines.
    pub fn contents(&self) -> String {
        self.lines().join("\n")
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.contents().contains(needle)
    }
}

impl OutputSink for MemorySink {
    fn line(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}
