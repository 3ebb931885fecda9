//! Rendering of bus events for human-facing sinks.

use crate::event_bus::Event;
use std::io::IsTerminal;

pub const LINE_COLOR: &str = "\x1b[35m"; // magenta
pub const RESET_COLOR: &str = "\x1b[0m";

/// Whether rendered output carries ANSI color codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatterMode {
    /// Color when stderr is a terminal, plain otherwise.
    #[default]
    Auto,
    /// Color unconditionally.
    Colored,
    /// Plain unconditionally; use this when output lands in a file.
    Plain,
}

impl FormatterMode {
    /// `Auto` re-checks the terminal on every call; the scheduler may
    /// outlive a redirected stderr.
    pub fn is_colored(&self) -> bool {
        match self {
            FormatterMode::Auto => std::io::stderr().is_terminal(),
            FormatterMode::Colored => true,
            FormatterMode::Plain => false,
        }
    }
}

/// Install the global tracing subscriber, honoring `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("taskweave=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Lines produced by a formatter for one event, plus an optional
/// context label a sink may use for grouping.
#[derive(Clone, Debug, Default)]
pub struct EventRender {
    pub context: Option<String>,
    pub lines: Vec<String>,
}

impl EventRender {
    pub fn join_lines(&self) -> String {
        self.lines.join("")
    }
}

pub trait TelemetryFormatter: Send + Sync {
    fn render_event(&self, event: &Event) -> EventRender;
}

/// Plain text formatter with optional ANSI color codes.
pub struct PlainFormatter {
    mode: FormatterMode,
}

impl PlainFormatter {
    pub fn new() -> Self {
        Self {
            mode: FormatterMode::Auto,
        }
    }

    pub fn with_mode(mode: FormatterMode) -> Self {
        Self { mode }
    }
}

impl Default for PlainFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryFormatter for PlainFormatter {
    fn render_event(&self, event: &Event) -> EventRender {
        let line = if self.mode.is_colored() {
            format!("{LINE_COLOR}{event}{RESET_COLOR}\n")
        } else {
            format!("{event}\n")
        };
        EventRender {
            context: Some(event.scope_label().to_string()),
            lines: vec![line],
        }
    }
}

/// JSON-lines formatter for machine-readable sinks.
#[derive(Default)]
pub struct JsonFormatter;

impl TelemetryFormatter for JsonFormatter {
    fn render_event(&self, event: &Event) -> EventRender {
        let line = match event.to_json_string() {
            Ok(json) => format!("{json}\n"),
            Err(_) => format!("{event}\n"),
        };
        EventRender {
            context: Some(event.scope_label().to_string()),
            lines: vec![line],
        }
    }
}
