//! CloudWatch Logs client backed by the `aws` command-line tool
//!
//! Shelling out keeps credential resolution (profiles, SSO, instance roles)
//! identical to what the user already has working in their shell.

use std::io;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, trace, warn};

use cwtail_types::LogEvent;

use crate::{LogSource, Page, QueryRequest, SourceError, StreamInfo};

/// `FilterLogEvents` accepts at most this many stream names per call
pub const MAX_STREAMS_PER_QUERY: usize = 100;

/// Default timeout for a single CLI invocation
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on streams returned by one discovery pass
pub const DEFAULT_DISCOVERY_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilterLogEventsOutput {
    #[serde(default)]
    events: Vec<FilteredLogEvent>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilteredLogEvent {
    log_stream_name: String,
    timestamp: i64,
    #[serde(default)]
    message: String,
    event_id: String,
}

impl From<FilteredLogEvent> for LogEvent {
    fn from(e: FilteredLogEvent) -> Self {
        LogEvent {
            stream_id: e.log_stream_name,
            timestamp: e.timestamp,
            message: e.message,
            event_id: e.event_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeLogStreamsOutput {
    #[serde(default)]
    log_streams: Vec<LogStreamDescription>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogStreamDescription {
    log_stream_name: String,
    last_event_timestamp: Option<i64>,
}

/// [`LogSource`] that runs `aws logs ...` subprocesses
#[derive(Clone, Debug)]
pub struct AwsCliSource {
    binary: String,
    region: Option<String>,
    profile: Option<String>,
    timeout: Duration,
    discovery_limit: usize,
}

impl AwsCliSource {
    pub fn new() -> Self {
        Self {
            binary: "aws".to_string(),
            region: None,
            profile: None,
            timeout: DEFAULT_TIMEOUT,
            discovery_limit: DEFAULT_DISCOVERY_LIMIT,
        }
    }

    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_discovery_limit(mut self, limit: usize) -> Self {
        self.discovery_limit = limit.max(1);
        self
    }

    /// Arguments shared by every invocation
    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "--output".to_string(),
            "json".to_string(),
            "--no-paginate".to_string(),
            "--no-cli-pager".to_string(),
        ];
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        if let Some(profile) = &self.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        args
    }

    fn filter_args(&self, request: &QueryRequest<'_>) -> Vec<String> {
        let mut args = vec![
            "logs".to_string(),
            "filter-log-events".to_string(),
            "--log-group-name".to_string(),
            request.group.to_string(),
            "--start-time".to_string(),
            request.window.start.to_string(),
            "--end-time".to_string(),
            request.window.end.to_string(),
        ];

        if !request.streams.is_empty() {
            args.push("--log-stream-names".to_string());
            args.extend(request.streams.iter().cloned());
        }
        if let Some(pattern) = request.filter_pattern.filter(|p| !p.is_empty()) {
            args.push("--filter-pattern".to_string());
            args.push(pattern.to_string());
        }
        if let Some(token) = request.next_token {
            args.push("--next-token".to_string());
            args.push(token.to_string());
        }

        args.extend(self.common_args());
        args
    }

    fn describe_args(&self, group: &str, next_token: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "logs".to_string(),
            "describe-log-streams".to_string(),
            "--log-group-name".to_string(),
            group.to_string(),
            "--order-by".to_string(),
            "LastEventTime".to_string(),
            "--descending".to_string(),
        ];
        if let Some(token) = next_token {
            args.push("--next-token".to_string());
            args.push(token.to_string());
        }
        args.extend(self.common_args());
        args
    }

    /// Run the CLI and return stdout, mapping failures onto [`SourceError`]
    async fn run(&self, group: &str, args: &[String]) -> Result<Vec<u8>, SourceError> {
        trace!(binary = %self.binary, ?args, "running aws cli");

        let mut command = Command::new(&self.binary);
        command.args(args).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SourceError::CliUnavailable(e));
            }
            Ok(Err(e)) => {
                return Err(SourceError::Transient {
                    message: e.to_string(),
                });
            }
            Err(_) => return Err(SourceError::Timeout(self.timeout)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceError::from_cli_stderr(group, &stderr));
        }

        Ok(output.stdout)
    }
}

impl Default for AwsCliSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSource for AwsCliSource {
    async fn query(&self, request: QueryRequest<'_>) -> Result<Page, SourceError> {
        let args = self.filter_args(&request);
        let stdout = self
            .run(request.group, &args)
            .await
            .map_err(|e| e.for_streams(request.streams))?;
        let page = decode_filter_output(&stdout)?;

        debug!(
            group = request.group,
            window = %request.window,
            span = ?request.window.span(),
            events = page.events.len(),
            more = page.next_token.is_some(),
            "fetched page"
        );

        Ok(page)
    }

    async fn list_streams(&self, group: &str) -> Result<Vec<StreamInfo>, SourceError> {
        let mut streams = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let args = self.describe_args(group, next_token.as_deref());
            let stdout = self.run(group, &args).await?;
            let (batch, token) = decode_describe_output(&stdout)?;
            streams.extend(batch);

            let more_pages = token.as_ref().is_some_and(|t| Some(t) != next_token.as_ref());
            if cap_streams(group, &mut streams, self.discovery_limit, more_pages) {
                break;
            }
            match token {
                Some(token) if more_pages => next_token = Some(token),
                _ => break,
            }
        }

        Ok(streams)
    }
}

/// Truncate a discovery listing to `limit` streams, warning about the rest.
///
/// Listings are newest-first, so the streams kept are the most recently active.
/// Returns whether the listing was cut short.
fn cap_streams(
    group: &str,
    streams: &mut Vec<StreamInfo>,
    limit: usize,
    more_pages: bool,
) -> bool {
    if streams.len() < limit || (streams.len() == limit && !more_pages) {
        return false;
    }
    let dropped = streams.len() - limit;
    streams.truncate(limit);
    warn!(
        group,
        limit,
        dropped,
        more_pages,
        "log group has more streams than the discovery limit, older streams are not tailed"
    );
    true
}

fn decode_filter_output(stdout: &[u8]) -> Result<Page, SourceError> {
    // An empty page can come back as an empty body
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Page::default());
    }
    let output: FilterLogEventsOutput = serde_json::from_slice(stdout)?;
    Ok(Page {
        events: output.events.into_iter().map(LogEvent::from).collect(),
        next_token: output.next_token,
    })
}

fn decode_describe_output(stdout: &[u8]) -> Result<(Vec<StreamInfo>, Option<String>), SourceError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok((Vec::new(), None));
    }
    let output: DescribeLogStreamsOutput = serde_json::from_slice(stdout)?;
    let streams = output
        .log_streams
        .into_iter()
        .map(|s| StreamInfo::new(s.log_stream_name, s.last_event_timestamp))
        .collect();
    Ok((streams, output.next_token))
}
