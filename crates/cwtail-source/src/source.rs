use std::future::Future;

use cwtail_types::{EpochMillis, LogEvent, PollWindow};

use crate::SourceError;

/// One `FilterLogEvents`-style request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryRequest<'a> {
    pub group: &'a str,
    /// Restrict to these streams (empty = whole group)
    pub streams: &'a [String],
    pub window: PollWindow,
    /// Server-side filter pattern (CloudWatch syntax)
    pub filter_pattern: Option<&'a str>,
    /// Continuation token from the previous page
    pub next_token: Option<&'a str>,
}

/// One page of query results
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Page {
    pub events: Vec<LogEvent>,
    pub next_token: Option<String>,
}

/// A log stream reported by the listing call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    pub name: String,
    pub last_event_timestamp: Option<EpochMillis>,
}

impl StreamInfo {
    pub fn new(name: impl Into<String>, last_event_timestamp: Option<EpochMillis>) -> Self {
        Self {
            name: name.into(),
            last_event_timestamp,
        }
    }

    /// Whether the stream may hold events at or after `since`
    pub fn active_since(&self, since: EpochMillis) -> bool {
        self.last_event_timestamp.is_none_or(|ts| ts >= since)
    }
}

/// Paginated remote log store
pub trait LogSource {
    /// Fetch a single page of events for the request
    fn query(
        &self,
        request: QueryRequest<'_>,
    ) -> impl Future<Output = Result<Page, SourceError>> + Send;

    /// List the streams of a group, most recently active first
    fn list_streams(
        &self,
        group: &str,
    ) -> impl Future<Output = Result<Vec<StreamInfo>, SourceError>> + Send;
}
