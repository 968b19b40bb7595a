//! Terminal output for cwtail
//!
//! This crate turns ordered [`DisplayRecord`]s into terminal lines: the
//! two-column layout, plain text, or JSON.

mod emitter;
mod format;
mod formatter;
mod terminal;
mod theme;

pub use emitter::{Emitter, EmitterOptions};
pub use format::DEFAULT_TIMESTAMP_FORMAT;
pub use formatter::{FormatterError, JsonFormatOptions, MessageFormatter};
pub use terminal::{Banner, scroll_up};
pub use theme::Theme;

// Re-export types used in our public API
pub use cwtail_types::{DisplayRecord, OutputFormat};
