//! Command-line arguments, config file and the resolved settings snapshot.
//!
//! Values are taken from the command line first, then the environment (clap
//! `env` fallbacks), then the config file, then built-in defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use clap::builder::BoolishValueParser;
use serde::Deserialize;
use thiserror::Error;

use cwtail_logs::FilterRules;
use cwtail_output::{FormatterError, JsonFormatOptions, MessageFormatter};
use cwtail_source::DEFAULT_DISCOVERY_LIMIT;
use cwtail_types::{DurationParseError, OutputFormat, parse_duration};

const DEFAULT_SINCE: &str = "1h";
const DEFAULT_INTERVAL: &str = "2s";
const DEFAULT_DEDUP_WINDOW: &str = "0s";
const DEFAULT_SETTLE_WINDOW: &str = "30s";
const DEFAULT_DISCOVERY_INTERVAL: &str = "30s";
const DEFAULT_QUERY_TIMEOUT: &str = "30s";
const DEFAULT_MAX_BACKOFF: &str = "30s";
const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_STREAM_WIDTH: usize = 9;

/// cwtail - tail an AWS CloudWatch log group in a compact two-column layout
#[derive(Parser, Debug, Default)]
#[command(name = "cwtail")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// CloudWatch log group to tail
    #[arg(short = 'g', long, env = "LOG_GROUP")]
    pub log_group: Option<String>,

    /// Only tail these comma-separated streams (disables discovery)
    #[arg(long, value_delimiter = ',')]
    pub streams: Vec<String>,

    /// AWS region passed to the aws CLI
    #[arg(long, env = "REGION")]
    pub region: Option<String>,

    /// AWS named profile passed to the aws CLI
    #[arg(long)]
    pub profile: Option<String>,

    /// Only fetch events containing any of these comma-separated tokens
    #[arg(long, alias = "include", env = "FILTER_PATTERN", value_delimiter = ',')]
    pub filter_tokens: Vec<String>,

    /// Highlight events containing any of these comma-separated tokens
    #[arg(long, env = "HIGHLIGHT_TOKENS", value_delimiter = ',')]
    pub highlight_tokens: Vec<String>,

    /// Drop events containing any of these comma-separated tokens
    #[arg(long, env = "EXCLUDE_TOKENS", value_delimiter = ',')]
    pub exclude_tokens: Vec<String>,

    /// Drop streams whose name contains any of these comma-separated tokens
    #[arg(long, env = "EXCLUDE_STREAMS", value_delimiter = ',')]
    pub exclude_streams: Vec<String>,

    /// How far back to start, e.g. 30s, 15m, 1h, 2d
    #[arg(long, env = "SINCE")]
    pub since: Option<String>,

    /// Colour stream labels and matched tokens
    #[arg(
        long,
        env = "COLORIZE",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new()
    )]
    pub colorize: Option<bool>,

    /// Output layout: columns, plain or json
    #[arg(long)]
    pub format: Option<OutputFormat>,

    /// Characters of the stream name shown in the left column (0 = full name)
    #[arg(long)]
    pub stream_width: Option<usize>,

    /// Show timestamps in UTC instead of local time
    #[arg(long)]
    pub utc: bool,

    /// strftime-style timestamp format
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Message formatter: json_formatter or raw
    #[arg(long, env = "FORMATTER")]
    pub formatter: Option<String>,

    /// Formatter options, e.g. remove_keys=logger&key_value_pairs=level:info&sort=true
    #[arg(long, env = "FORMAT_OPTIONS")]
    pub format_options: Option<String>,

    /// Delay between polls
    #[arg(long)]
    pub interval: Option<String>,

    /// How far behind a stream's newest event late arrivals are still accepted
    #[arg(long)]
    pub dedup_window: Option<String>,

    /// How far back silent streams are re-scanned for late events
    #[arg(long)]
    pub settle_window: Option<String>,

    /// How often the stream list is refreshed
    #[arg(long)]
    pub discovery_interval: Option<String>,

    /// Do not look for new streams after startup
    #[arg(long)]
    pub no_discovery: bool,

    /// Most recently active streams kept per discovery
    #[arg(long)]
    pub discovery_limit: Option<usize>,

    /// Parallel queries per poll
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Timeout for a single aws CLI call
    #[arg(long)]
    pub query_timeout: Option<String>,

    /// Upper bound on the retry delay after failed polls
    #[arg(long)]
    pub max_backoff: Option<String>,

    /// Config file (default: ~/.config/cwtail/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Named preset from the config file's [presets] table
    #[arg(long)]
    pub preset: Option<String>,

    /// Debug logging on stderr
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("log group is required: pass --log-group, set LOG_GROUP or add log_group to the config file")]
    MissingLogGroup,

    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("preset '{name}' not found in config file")]
    UnknownPreset { name: String },

    #[error("{field}: {source}")]
    InvalidDuration {
        field: &'static str,
        #[source]
        source: DurationParseError,
    },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} is too large")]
    OutOfRange { field: &'static str },

    #[error(transparent)]
    Formatter(#[from] FormatterError),
}

/// `[format_options]` as written in the config file
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileFormatOptions {
    pub remove_keys: Option<Vec<String>>,
    /// `key:value` entries
    pub key_value_pairs: Option<Vec<String>>,
    pub sort: Option<bool>,
}

/// One layer of settings as written in the config file
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub log_group: Option<String>,
    pub streams: Option<Vec<String>>,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub filter_tokens: Option<Vec<String>>,
    pub highlight_tokens: Option<Vec<String>>,
    pub exclude_tokens: Option<Vec<String>>,
    pub exclude_streams: Option<Vec<String>>,
    pub since: Option<String>,
    pub colorize: Option<bool>,
    pub format: Option<OutputFormat>,
    pub stream_width: Option<usize>,
    pub utc: Option<bool>,
    pub timestamp_format: Option<String>,
    pub formatter: Option<String>,
    pub format_options: Option<FileFormatOptions>,
    pub interval: Option<String>,
    pub dedup_window: Option<String>,
    pub settle_window: Option<String>,
    pub discover: Option<bool>,
    pub discovery_interval: Option<String>,
    pub discovery_limit: Option<usize>,
    pub concurrency: Option<usize>,
    pub query_timeout: Option<String>,
    pub max_backoff: Option<String>,
}

impl FileConfig {
    /// Layer `other` on top of `self`; fields set in `other` win
    pub fn overlay(self, other: FileConfig) -> FileConfig {
        FileConfig {
            log_group: other.log_group.or(self.log_group),
            streams: other.streams.or(self.streams),
            region: other.region.or(self.region),
            profile: other.profile.or(self.profile),
            filter_tokens: other.filter_tokens.or(self.filter_tokens),
            highlight_tokens: other.highlight_tokens.or(self.highlight_tokens),
            exclude_tokens: other.exclude_tokens.or(self.exclude_tokens),
            exclude_streams: other.exclude_streams.or(self.exclude_streams),
            since: other.since.or(self.since),
            colorize: other.colorize.or(self.colorize),
            format: other.format.or(self.format),
            stream_width: other.stream_width.or(self.stream_width),
            utc: other.utc.or(self.utc),
            timestamp_format: other.timestamp_format.or(self.timestamp_format),
            formatter: other.formatter.or(self.formatter),
            format_options: other.format_options.or(self.format_options),
            interval: other.interval.or(self.interval),
            dedup_window: other.dedup_window.or(self.dedup_window),
            settle_window: other.settle_window.or(self.settle_window),
            discover: other.discover.or(self.discover),
            discovery_interval: other.discovery_interval.or(self.discovery_interval),
            discovery_limit: other.discovery_limit.or(self.discovery_limit),
            concurrency: other.concurrency.or(self.concurrency),
            query_timeout: other.query_timeout.or(self.query_timeout),
            max_backoff: other.max_backoff.or(self.max_backoff),
        }
    }
}

/// Whole config file: top-level defaults plus named presets
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(flatten)]
    pub defaults: FileConfig,

    #[serde(default)]
    pub presets: HashMap<String, FileConfig>,
}

impl ConfigFile {
    pub fn from_toml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load the config file.
    ///
    /// An explicit path must exist; a missing default file means no file config.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;
        Self::from_toml(&content, &path)
    }

    /// The defaults with the named preset layered on top
    pub fn select(mut self, preset: Option<&str>) -> Result<FileConfig, ConfigError> {
        let Some(name) = preset else {
            return Ok(self.defaults);
        };
        let layer = self
            .presets
            .remove(name)
            .ok_or_else(|| ConfigError::UnknownPreset {
                name: name.to_string(),
            })?;
        Ok(self.defaults.overlay(layer))
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("cwtail").join("config.toml"))
}

/// Immutable snapshot of everything the tail loop needs
#[derive(Debug, Clone)]
pub struct Settings {
    pub log_group: String,
    pub streams: Vec<String>,
    pub region: Option<String>,
    pub profile: Option<String>,
    /// Lookback in milliseconds
    pub since_ms: i64,
    /// `since` as the user wrote it, for the banner
    pub since_label: String,
    pub filters: FilterRules,
    pub format: OutputFormat,
    pub colorize: bool,
    pub stream_width: usize,
    pub utc: bool,
    pub timestamp_format: String,
    pub formatter: MessageFormatter,
    pub interval: Duration,
    pub dedup_window: Duration,
    pub settle_window: Duration,
    pub discover: bool,
    pub discovery_interval: Duration,
    pub discovery_limit: usize,
    pub concurrency: usize,
    pub query_timeout: Duration,
    pub max_backoff: Duration,
    pub verbose: bool,
}

fn tokens(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

fn list(cli: Vec<String>, file: Option<Vec<String>>) -> Vec<String> {
    let cli = tokens(cli);
    if cli.is_empty() {
        tokens(file.unwrap_or_default())
    } else {
        cli
    }
}

fn duration(
    field: &'static str,
    cli: Option<String>,
    file: Option<String>,
    default: &str,
) -> Result<(Duration, String), ConfigError> {
    let raw = cli.or(file).unwrap_or_else(|| default.to_string());
    let value =
        parse_duration(&raw).map_err(|source| ConfigError::InvalidDuration { field, source })?;
    Ok((value, raw))
}

fn non_zero(field: &'static str, value: Duration) -> Result<Duration, ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::Zero { field });
    }
    Ok(value)
}

/// Command-line options replace the file's `[format_options]` as a whole
fn formatter(
    cli_name: Option<String>,
    cli_options: Option<String>,
    file_name: Option<String>,
    file_options: Option<FileFormatOptions>,
) -> Result<MessageFormatter, ConfigError> {
    let Some(name) = cli_name.or(file_name) else {
        return Ok(MessageFormatter::Raw);
    };
    let options = match (cli_options, file_options) {
        (Some(query), _) => JsonFormatOptions::parse_query(&query)?,
        (None, Some(file)) => JsonFormatOptions::new(
            &file.remove_keys.unwrap_or_default(),
            &file.key_value_pairs.unwrap_or_default(),
            file.sort.unwrap_or(false),
        )?,
        (None, None) => JsonFormatOptions::default(),
    };
    MessageFormatter::from_name(&name, options).map_err(ConfigError::from)
}

impl Settings {
    /// Load the config file named by `args` and resolve
    pub fn load(args: Args, stdout_is_terminal: bool) -> Result<Self, ConfigError> {
        let file = ConfigFile::load(args.config.as_deref())?.select(args.preset.as_deref())?;
        Self::resolve(args, file, stdout_is_terminal)
    }

    /// Merge command line (and environment) over a file layer over defaults.
    ///
    /// Colour defaults to on only when stdout is a terminal.
    pub fn resolve(
        args: Args,
        file: FileConfig,
        stdout_is_terminal: bool,
    ) -> Result<Self, ConfigError> {
        let log_group = args
            .log_group
            .or(file.log_group)
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .ok_or(ConfigError::MissingLogGroup)?;

        let (since, since_label) = duration("since", args.since, file.since, DEFAULT_SINCE)?;
        let since_ms = i64::try_from(since.as_millis())
            .map_err(|_| ConfigError::OutOfRange { field: "since" })?;
        let (interval, _) = duration("interval", args.interval, file.interval, DEFAULT_INTERVAL)?;
        let (dedup_window, _) = duration(
            "dedup_window",
            args.dedup_window,
            file.dedup_window,
            DEFAULT_DEDUP_WINDOW,
        )?;
        let (settle_window, _) = duration(
            "settle_window",
            args.settle_window,
            file.settle_window,
            DEFAULT_SETTLE_WINDOW,
        )?;
        let (discovery_interval, _) = duration(
            "discovery_interval",
            args.discovery_interval,
            file.discovery_interval,
            DEFAULT_DISCOVERY_INTERVAL,
        )?;
        let (query_timeout, _) = duration(
            "query_timeout",
            args.query_timeout,
            file.query_timeout,
            DEFAULT_QUERY_TIMEOUT,
        )?;
        let (max_backoff, _) = duration(
            "max_backoff",
            args.max_backoff,
            file.max_backoff,
            DEFAULT_MAX_BACKOFF,
        )?;

        let concurrency = args
            .concurrency
            .or(file.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(ConfigError::Zero {
                field: "concurrency",
            });
        }

        let discovery_limit = args
            .discovery_limit
            .or(file.discovery_limit)
            .unwrap_or(DEFAULT_DISCOVERY_LIMIT);
        if discovery_limit == 0 {
            return Err(ConfigError::Zero {
                field: "discovery_limit",
            });
        }

        let formatter = formatter(
            args.formatter,
            args.format_options,
            file.formatter,
            file.format_options,
        )?;

        let streams = list(args.streams, file.streams);
        let discover = !args.no_discovery && file.discover.unwrap_or(true) && streams.is_empty();

        Ok(Self {
            log_group,
            streams,
            region: args.region.or(file.region),
            profile: args.profile.or(file.profile),
            since_ms,
            since_label,
            filters: FilterRules {
                include: list(args.filter_tokens, file.filter_tokens),
                highlight: list(args.highlight_tokens, file.highlight_tokens),
                exclude: list(args.exclude_tokens, file.exclude_tokens),
                exclude_streams: list(args.exclude_streams, file.exclude_streams),
            },
            format: args.format.or(file.format).unwrap_or_default(),
            colorize: args
                .colorize
                .or(file.colorize)
                .unwrap_or(stdout_is_terminal),
            stream_width: args
                .stream_width
                .or(file.stream_width)
                .unwrap_or(DEFAULT_STREAM_WIDTH),
            utc: args.utc || file.utc.unwrap_or(false),
            timestamp_format: args
                .timestamp_format
                .or(file.timestamp_format)
                .unwrap_or_else(|| cwtail_output::DEFAULT_TIMESTAMP_FORMAT.to_string()),
            formatter,
            interval: non_zero("interval", interval)?,
            dedup_window,
            settle_window,
            discover,
            discovery_interval: non_zero("discovery_interval", discovery_interval)?,
            discovery_limit,
            concurrency,
            query_timeout: non_zero("query_timeout", query_timeout)?,
            max_backoff,
            verbose: args.verbose,
        })
    }
}
