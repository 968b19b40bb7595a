use std::borrow::Cow;
use std::collections::HashMap;
use std::io::{self, Write};

use crossterm::style::Color;

use cwtail_logs::{EventSink, FilterEngine};
use cwtail_types::{DisplayRecord, OutputFormat};

use crate::{MessageFormatter, Theme};
use crate::format::{self, DEFAULT_TIMESTAMP_FORMAT};

/// How records are rendered
#[derive(Clone, Debug)]
pub struct EmitterOptions {
    pub format: OutputFormat,
    /// ANSI colours for stream labels and matched tokens
    pub colorize: bool,
    /// Characters of the stream name shown in the left column (0 = all)
    pub stream_width: usize,
    /// Render timestamps in UTC instead of local time
    pub utc: bool,
    pub timestamp_format: String,
    /// Rewrites message payloads before layout
    pub formatter: MessageFormatter,
}

impl Default for EmitterOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Columns,
            colorize: true,
            stream_width: 9,
            utc: false,
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            formatter: MessageFormatter::Raw,
        }
    }
}

/// Writes records to a terminal (or any writer)
pub struct Emitter<W> {
    out: W,
    options: EmitterOptions,
    highlighter: FilterEngine,

    /// Stream label colours, assigned in first-seen order
    stream_colors: HashMap<String, Color>,
}

impl<W: Write> Emitter<W> {
    pub fn new(out: W, options: EmitterOptions, highlighter: FilterEngine) -> Self {
        Self {
            out,
            options,
            highlighter,
            stream_colors: HashMap::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn stream_color(&mut self, short_name: &str) -> Color {
        let next = self.stream_colors.len();
        *self
            .stream_colors
            .entry(short_name.to_string())
            .or_insert_with(|| Theme::stream_color(next))
    }

    /// Render a single record, including its trailing newline
    pub fn render(&mut self, record: &DisplayRecord) -> io::Result<String> {
        let formatted = match self.options.formatter.apply(&record.message) {
            Cow::Borrowed(_) => None,
            Cow::Owned(message) => Some(DisplayRecord {
                message,
                ..record.clone()
            }),
        };
        let record = formatted.as_ref().unwrap_or(record);

        match self.options.format {
            OutputFormat::Json => format::json(record).map_err(io::Error::other),
            OutputFormat::Plain => {
                let ts = format::format_timestamp(
                    record,
                    self.options.utc,
                    &self.options.timestamp_format,
                );
                Ok(format::plain(record, &ts))
            }
            OutputFormat::Columns => {
                let ts = format::format_timestamp(
                    record,
                    self.options.utc,
                    &self.options.timestamp_format,
                );
                let color = if self.options.colorize {
                    let short =
                        cwtail_types::short_stream_name(&record.stream_id, self.options.stream_width);
                    Some(self.stream_color(short))
                } else {
                    None
                };
                let highlighter = self.options.colorize.then_some(&self.highlighter);
                Ok(format::columns(
                    record,
                    &ts,
                    self.options.stream_width,
                    color,
                    highlighter,
                ))
            }
        }
    }
}

impl<W: Write> EventSink for Emitter<W> {
    fn emit(&mut self, records: &[DisplayRecord]) -> io::Result<()> {
        for record in records {
            let line = self.render(record)?;
            self.out.write_all(line.as_bytes())?;
        }
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cwtail_types::LogEvent;

    fn record(stream: &str, ts: i64, message: &str) -> DisplayRecord {
        DisplayRecord::new(LogEvent::new(stream, ts, "id", message), false)
    }

    fn options(format: OutputFormat, colorize: bool) -> EmitterOptions {
        EmitterOptions {
            format,
            colorize,
            utc: true,
            timestamp_format: "%H:%M:%S".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_emit_writes_in_order() {
        let mut emitter = Emitter::new(
            Vec::new(),
            options(OutputFormat::Columns, false),
            FilterEngine::pass_all(),
        );
        emitter
            .emit(&[record("ecs/a/1", 0, "first"), record("ecs/b/2", 1_000, "second\n")])
            .unwrap();

        let out = String::from_utf8(emitter.into_inner()).unwrap();
        assert_eq!(out, "1 | 00:00:00 | first\n2 | 00:00:01 | second\n");
    }

    #[test]
    fn test_stream_colors_are_stable_per_stream() {
        let mut emitter = Emitter::new(
            Vec::new(),
            options(OutputFormat::Columns, true),
            FilterEngine::pass_all(),
        );

        let a = emitter.stream_color("a");
        let b = emitter.stream_color("b");
        assert_eq!(a, Theme::stream_color(0));
        assert_eq!(b, Theme::stream_color(1));
        assert_eq!(emitter.stream_color("a"), a);
    }

    #[test]
    fn test_palette_wraps() {
        let len = Theme::STREAM_PALETTE.len();
        assert_eq!(Theme::stream_color(len), Theme::stream_color(0));
    }

    #[test]
    fn test_json_format_is_uncoloured() {
        let mut emitter = Emitter::new(
            Vec::new(),
            options(OutputFormat::Json, true),
            FilterEngine::pass_all(),
        );
        let line = emitter.render(&record("ecs/a/1", 0, "x")).unwrap();
        assert!(!line.contains('\u{1b}'));
        assert!(line.contains("\"stream\":\"ecs/a/1\""));
    }

    #[test]
    fn test_json_formatter_rewrites_message() {
        let formatter = MessageFormatter::Json(
            crate::JsonFormatOptions::parse_query("remove_keys=logger&key_value_pairs=level:info")
                .unwrap(),
        );
        let mut emitter = Emitter::new(
            Vec::new(),
            EmitterOptions {
                formatter,
                ..options(OutputFormat::Plain, false)
            },
            FilterEngine::pass_all(),
        );
        let line = emitter
            .render(&record("ecs/a/1", 0, r#"{"level":"info","logger":"x","msg":"hi"}"#))
            .unwrap();
        assert_eq!(line, "00:00:00 ecs/a/1 {\"msg\":\"hi\"}\n");

        let untouched = emitter.render(&record("ecs/a/1", 0, "not json")).unwrap();
        assert_eq!(untouched, "00:00:00 ecs/a/1 not json\n");
    }

    #[test]
    fn test_plain_format() {
        let mut emitter = Emitter::new(
            Vec::new(),
            options(OutputFormat::Plain, true),
            FilterEngine::pass_all(),
        );
        let line = emitter.render(&record("ecs/a/1", 0, "x")).unwrap();
        assert_eq!(line, "00:00:00 ecs/a/1 x\n");
    }
}
