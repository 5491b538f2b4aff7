//! Logging and debugging facilities.
//!
//! The engine is instrumented with the `tracing` crate. Install a subscriber
//! in the application to see the output:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("horizon_waterfall=debug")
//!     .init();
//! ```
//!
//! [`LayoutDebug`] renders the current registry and column heights as a text
//! table, which is handy when a layout looks wrong.

use std::fmt::{self, Write as FmtWrite};

use crate::item::{ItemId, ItemRecord};

/// Target names for log filtering.
pub mod targets {
    /// Column placement and reflow passes.
    pub const LAYOUT: &str = "horizon_waterfall::layout";
    /// Item load, retry and fallback transitions.
    pub const LOAD: &str = "horizon_waterfall::load";
    /// Registry and driver lifecycle.
    pub const CONTEXT: &str = "horizon_waterfall::context";
    /// Signal emission.
    pub const SIGNAL: &str = "horizon_waterfall::signal";
    /// Pass timing spans.
    pub const PERF: &str = "horizon_waterfall::perf";
}

/// A guard that keeps a tracing span entered until dropped.
///
/// Used to time reflow passes.
#[derive(Debug)]
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Enter a new performance span.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::debug_span!(target: targets::PERF, "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}

/// Text dump of a grid's layout.
#[derive(Debug, Clone)]
pub struct LayoutDebug {
    items: Vec<(ItemId, ItemRecord)>,
    column_heights: Vec<f32>,
    column_width: f32,
}

impl LayoutDebug {
    /// Capture items (in layout order) and column state.
    pub fn new(items: Vec<(ItemId, ItemRecord)>, column_heights: Vec<f32>, column_width: f32) -> Self {
        Self {
            items,
            column_heights,
            column_width,
        }
    }

    /// Render the dump.
    pub fn format(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Waterfall: {} items, {} columns x {:.1}px",
            self.items.len(),
            self.column_heights.len(),
            self.column_width
        );
        let heights: Vec<String> = self
            .column_heights
            .iter()
            .map(|h| format!("{h:.1}"))
            .collect();
        let _ = writeln!(out, "columns: [{}]", heights.join(", "));

        for (position, (id, record)) in self.items.iter().enumerate() {
            let _ = write!(out, "{position:>3} {id:?} ");
            match record.column {
                Some(column) => {
                    let _ = write!(
                        out,
                        "col {column} @ ({:.1}, {:.1}) h {:.1}",
                        record.left, record.top, record.layout_height
                    );
                }
                None => out.push_str("unplaced"),
            }
            if record.has_error() {
                let _ = write!(out, " [{}]", record.error_type);
            }
            if record.retry_count > 0 {
                let _ = write!(out, " retries={}", record.retry_count);
            }
            if !record.visible {
                out.push_str(" hidden");
            }
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for LayoutDebug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}
