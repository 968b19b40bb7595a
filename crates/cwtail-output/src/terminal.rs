use std::fmt;
use std::io::{self, Write};

use crossterm::style::Stylize;

use crate::Theme;

const FALLBACK_ROWS: u16 = 24;
const FALLBACK_COLS: u16 = 80;

fn terminal_size() -> (u16, u16) {
    crossterm::terminal::size().unwrap_or((FALLBACK_COLS, FALLBACK_ROWS))
}

/// Push existing terminal content off screen with blank lines
pub fn scroll_up<W: Write>(out: &mut W, min_lines: usize) -> io::Result<()> {
    let (_, rows) = terminal_size();
    let lines = (rows as usize).saturating_sub(5).max(min_lines);
    out.write_all("\n".repeat(lines).as_bytes())?;
    out.flush()
}

/// Startup summary printed above the first events
#[derive(Clone, Debug, Default)]
pub struct Banner {
    pub group: String,
    pub region: Option<String>,
    pub filter_pattern: Option<String>,
    pub highlight: Vec<String>,
    pub exclude: Vec<String>,
    pub exclude_streams: Vec<String>,
    pub since: String,
}

fn or_none(values: &[String]) -> String {
    if values.is_empty() {
        "(none)".to_string()
    } else {
        values.join(", ")
    }
}

impl Banner {
    pub fn write<W: Write>(&self, out: &mut W, colorize: bool) -> io::Result<()> {
        let (cols, _) = terminal_size();
        let rule = "=".repeat(cols as usize);
        let body = format!("{rule}\n{self}{rule}\n");
        if colorize {
            write!(out, "{}", body.as_str().with(Theme::BANNER))?;
        } else {
            out.write_all(body.as_bytes())?;
        }
        out.flush()
    }
}

impl fmt::Display for Banner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Starting tail of log group: {}", self.group)?;
        writeln!(
            f,
            "Region: {}",
            self.region.as_deref().unwrap_or("(default)")
        )?;
        writeln!(
            f,
            "Filter pattern: {}",
            self.filter_pattern.as_deref().unwrap_or("(none)")
        )?;
        writeln!(f, "Highlight tokens: {}", or_none(&self.highlight))?;
        writeln!(f, "Exclude tokens: {}", or_none(&self.exclude))?;
        writeln!(f, "Exclude streams: {}", or_none(&self.exclude_streams))?;
        writeln!(f, "Fetching logs since: {} ago", self.since)?;
        writeln!(f, "Press Ctrl+C to stop.")
    }
}
