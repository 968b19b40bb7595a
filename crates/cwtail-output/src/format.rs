//! Line formatting for each output layout.

use chrono::{DateTime, Local, Utc};
use crossterm::style::{Color, Stylize};
use serde::Serialize;
use unicode_width::UnicodeWidthStr;

use cwtail_logs::{FilterEngine, MatchKind};
use cwtail_types::{DisplayRecord, short_stream_name};

use crate::Theme;

pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SEPARATOR: &str = " | ";
const HIGHLIGHT_SEPARATOR: &str = " * ";

#[derive(Serialize)]
struct JsonLine<'a> {
    timestamp: String,
    timestamp_ms: i64,
    stream: &'a str,
    event_id: &'a str,
    message: &'a str,
    highlighted: bool,
}

pub(crate) fn format_timestamp(record: &DisplayRecord, utc: bool, format: &str) -> String {
    let Some(dt) = record.datetime() else {
        return record.timestamp.to_string();
    };
    if utc {
        dt.format(format).to_string()
    } else {
        dt.with_timezone(&Local).format(format).to_string()
    }
}

fn trim_message(message: &str) -> &str {
    message.trim_end_matches(['\n', '\r'])
}

/// Colour include/highlight token spans inside a message
pub(crate) fn colorize_tokens(message: &str, highlighter: &FilterEngine) -> String {
    let matches = highlighter.find_matches(message);
    if matches.is_empty() {
        return message.to_string();
    }

    let mut out = String::with_capacity(message.len() + matches.len() * 10);
    let mut pos = 0;
    for m in matches {
        out.push_str(&message[pos..m.start]);
        let color = match m.kind {
            MatchKind::Include => Theme::INCLUDE,
            MatchKind::Highlight => Theme::HIGHLIGHT,
        };
        out.push_str(&message[m.start..m.end].with(color).to_string());
        pos = m.end;
    }
    out.push_str(&message[pos..]);
    out
}

/// Two-column layout: `stream | timestamp | message`, continuation lines indented
pub(crate) fn columns(
    record: &DisplayRecord,
    timestamp: &str,
    stream_width: usize,
    stream_color: Option<Color>,
    highlighter: Option<&FilterEngine>,
) -> String {
    let stream = short_stream_name(&record.stream_id, stream_width);
    let first_sep = if record.highlighted && stream_color.is_none() {
        HIGHLIGHT_SEPARATOR
    } else {
        SEPARATOR
    };

    let left_plain = format!("{}{}{}{}", stream, first_sep, timestamp, SEPARATOR);
    let indent = " ".repeat(UnicodeWidthStr::width(left_plain.as_str()));

    let left = match stream_color {
        Some(color) => left_plain.as_str().with(color).to_string(),
        None => left_plain,
    };

    let message = trim_message(&record.message);
    let message = match highlighter {
        Some(h) => colorize_tokens(message, h),
        None => message.to_string(),
    };

    format!("{}{}\n", left, message.replace('\n', &format!("\n{}", indent)))
}

/// Single line `timestamp stream message`, never coloured
pub(crate) fn plain(record: &DisplayRecord, timestamp: &str) -> String {
    let marker = if record.highlighted { " *" } else { "" };
    format!(
        "{} {}{} {}\n",
        timestamp,
        record.stream_id,
        marker,
        trim_message(&record.message)
    )
}

pub(crate) fn json(record: &DisplayRecord) -> serde_json::Result<String> {
    let timestamp = DateTime::<Utc>::from_timestamp_millis(record.timestamp)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_default();
    let line = JsonLine {
        timestamp,
        timestamp_ms: record.timestamp,
        stream: &record.stream_id,
        event_id: &record.event_id,
        message: trim_message(&record.message),
        highlighted: record.highlighted,
    };
    let mut out = serde_json::to_string(&line)?;
    out.push('\n');
    Ok(out)
}
