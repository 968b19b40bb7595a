//! Shared types for cwtail
//!
//! This crate contains data structures used across multiple cwtail crates.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Milliseconds since the Unix epoch, as reported by CloudWatch
pub type EpochMillis = i64;

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> EpochMillis {
    Utc::now().timestamp_millis()
}

/// A duration in milliseconds, saturating at `i64::MAX`
pub fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

// ============================================================================
// Log Types
// ============================================================================

/// A single log event returned by the remote source
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEvent {
    /// Originating log stream name
    pub stream_id: String,

    /// Event time reported by the source (not receipt time)
    pub timestamp: EpochMillis,

    /// Raw message payload
    pub message: String,

    /// Source-provided identifier, unique within a stream
    pub event_id: String,
}

impl LogEvent {
    pub fn new(
        stream_id: impl Into<String>,
        timestamp: EpochMillis,
        event_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            timestamp,
            message: message.into(),
            event_id: event_id.into(),
        }
    }

    /// Ordering key used everywhere events are merged: time, then stream, then id
    pub fn sort_key(&self) -> (EpochMillis, &str, &str) {
        (self.timestamp, &self.stream_id, &self.event_id)
    }
}

/// Get a short stream name: the last path segment, truncated to `width` chars.
///
/// ECS streams look like `prefix/container/task-id`; the task id is the useful
/// part. A width of zero keeps the whole segment.
pub fn short_stream_name(stream_id: &str, width: usize) -> &str {
    let last = stream_id.rsplit('/').next().unwrap_or(stream_id);
    if width == 0 {
        return last;
    }
    match last.char_indices().nth(width) {
        Some((idx, _)) => &last[..idx],
        None => last,
    }
}

/// Time range queried in a single tick
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PollWindow {
    /// Inclusive lower bound
    pub start: EpochMillis,

    /// Upper bound (wall-clock time at issuance)
    pub end: EpochMillis,
}

impl PollWindow {
    /// Create a window, clamping `end` so that `start <= end` holds under clock skew
    pub fn new(start: EpochMillis, end: EpochMillis) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn span(&self) -> Duration {
        Duration::from_millis((self.end - self.start).max(0) as u64)
    }

    pub fn contains(&self, timestamp: EpochMillis) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

impl fmt::Display for PollWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Filter decision for a single event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Suppress the event entirely
    Exclude,
    /// Show the event unmarked
    Pass,
    /// Show the event with a highlight marker
    Highlight,
}

/// What the emitter receives for each accepted event
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DisplayRecord {
    pub stream_id: String,
    pub timestamp: EpochMillis,
    pub event_id: String,
    pub message: String,
    pub highlighted: bool,
}

impl DisplayRecord {
    pub fn new(event: LogEvent, highlighted: bool) -> Self {
        Self {
            stream_id: event.stream_id,
            timestamp: event.timestamp,
            event_id: event.event_id,
            message: event.message,
            highlighted,
        }
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

// ============================================================================
// Settings Types
// ============================================================================

/// Output layout selected by the user
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Stream and timestamp in a left column, message on the right
    #[default]
    Columns,
    /// Single-line `timestamp stream message`, never coloured
    Plain,
    /// One JSON object per event
    Json,
}

impl OutputFormat {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Columns => "columns",
            Self::Plain => "plain",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "columns" | "column" | "default" => Ok(Self::Columns),
            "plain" | "text" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "unknown output format '{}' (expected columns, plain or json)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid duration '{input}': expected a number followed by ms, s, m, h or d (e.g. '15m')")]
pub struct DurationParseError {
    pub input: String,
}

/// Parse a duration like `10s`, `15m`, `2h`, `1d` or `500ms`
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let err = || DurationParseError {
        input: input.to_string(),
    };

    let trimmed = input.trim().to_lowercase();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(err)?;
    let (digits, unit) = trimmed.split_at(split);
    let value: u64 = digits.parse().map_err(|_| err())?;

    let millis_per_unit: u64 = match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return Err(err()),
    };

    value
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(err)
}
