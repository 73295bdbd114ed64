//! Diagnostic output of the compiler module
//!
//! The binary module writes its own status text through the `print` and
//! `print_err` host imports. Those lines are routed to a `DiagnosticSink`,
//! by default the host's `tracing` output with a recognizable prefix.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which of the module's text streams a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticStream {
    Stdout,
    Stderr,
}

impl fmt::Display for DiagnosticStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticStream::Stdout => f.write_str("stdout"),
            DiagnosticStream::Stderr => f.write_str("stderr"),
        }
    }
}

/// Receiver for the module's diagnostic lines
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, stream: DiagnosticStream, line: &str);
}

/// Forwards module output to `tracing` as `[<prefix> <stream>] <line>`
#[derive(Debug, Clone)]
pub struct TracingSink {
    prefix: String,
}

impl TracingSink {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Render a line the way it is logged
    pub fn format_line(&self, stream: DiagnosticStream, line: &str) -> String {
        format!("[{} {}] {}", self.prefix, stream, line)
    }
}

impl Default for TracingSink {
    fn default() -> Self {
        Self::new("transpose-wasm")
    }
}

impl DiagnosticSink for TracingSink {
    fn emit(&self, stream: DiagnosticStream, line: &str) {
        if line.is_empty() {
            return;
        }
        let rendered = self.format_line(stream, line);
        match stream {
            DiagnosticStream::Stdout => tracing::info!("{}", rendered),
            DiagnosticStream::Stderr => tracing::warn!("{}", rendered),
        }
    }
}

/// A single line captured from the module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDiagnostic {
    pub stream: DiagnosticStream,
    pub line: String,
}

/// Sink that records module output in memory
#[derive(Debug, Default)]
pub struct DiagnosticCollector {
    lines: Mutex<Vec<ModuleDiagnostic>>,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines written to the given stream, in order
    pub fn lines(&self, stream: DiagnosticStream) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|d| d.stream == stream)
            .map(|d| d.line.clone())
            .collect()
    }
}

impl DiagnosticSink for DiagnosticCollector {
    fn emit(&self, stream: DiagnosticStream, line: &str) {
        if line.is_empty() {
            return;
        }
        self.lines.lock().push(ModuleDiagnostic {
            stream,
            line: line.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_sink_prefix() {
        let sink = TracingSink::default();
        assert_eq!(
            sink.format_line(DiagnosticStream::Stdout, "ready"),
            "[transpose-wasm stdout] ready"
        );
        assert_eq!(
            sink.format_line(DiagnosticStream::Stderr, "oops"),
            "[transpose-wasm stderr] oops"
        );
    }

    #[test]
    fn test_collector_skips_empty_lines() {
        let collector = DiagnosticCollector::new();
        collector.emit(DiagnosticStream::Stdout, "");
        collector.emit(DiagnosticStream::Stdout, "booted");
        collector.emit(DiagnosticStream::Stderr, "warning: slow path");

        assert_eq!(collector.lines(DiagnosticStream::Stdout), vec!["booted"]);
        assert_eq!(
            collector.lines(DiagnosticStream::Stderr),
            vec!["warning: slow path"]
        );
    }
}
