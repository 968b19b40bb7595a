//! Log polling for cwtail
//!
//! This crate provides the polling loop, per-stream cursors and dedup,
//! filtering, and the per-tick merge buffer.

mod backoff;
mod cursor;
mod filter;
mod merge;
mod poller;
mod tailer;

#[cfg(test)]
mod testing;

pub use backoff::{Backoff, BackoffPolicy};
pub use cursor::{StreamCursor, StreamCursorTable};
pub use filter::{FilterEngine, FilterRules, MatchKind, TokenMatch};
pub use merge::MergeBuffer;
pub use poller::{PollSettings, Poller, Scope, TickReport};
pub use tailer::{EventSink, PollState, TailError, TailStats, Tailer};

// Re-export types used in our public API
pub use cwtail_types::{DisplayRecord, EpochMillis, LogEvent, PollWindow, Verdict};
