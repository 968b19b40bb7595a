//! Scripted [`LogSource`] used by the unit tests of this crate.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use cwtail_source::{LogSource, Page, QueryRequest, SourceError, StreamInfo};
use cwtail_types::{EpochMillis, LogEvent, PollWindow};

type Handler = Box<dyn Fn(&Recorded) -> Result<Page, SourceError> + Send + Sync>;

/// Owned copy of a query the poller issued
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recorded {
    pub streams: Vec<String>,
    pub window: PollWindow,
    pub filter_pattern: Option<String>,
    pub next_token: Option<String>,
}

pub struct FakeSource {
    handler: Handler,
    requests: Mutex<Vec<Recorded>>,
    streams: Mutex<Vec<StreamInfo>>,
    list_fails: bool,
    list_calls: AtomicUsize,
    throttle_first: usize,
    calls: AtomicUsize,
}

impl FakeSource {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Recorded) -> Result<Page, SourceError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
            list_fails: false,
            list_calls: AtomicUsize::new(0),
            throttle_first: 0,
            calls: AtomicUsize::new(0),
        }
    }

    /// Throttle the first `n` queries, then defer to `handler`
    pub fn failing_first<F>(n: usize, handler: F) -> Self
    where
        F: Fn(&Recorded) -> Result<Page, SourceError> + Send + Sync + 'static,
    {
        Self {
            throttle_first: n,
            ..Self::new(handler)
        }
    }

    pub fn with_streams(self, streams: Vec<StreamInfo>) -> Self {
        self.set_streams(streams);
        self
    }

    pub fn with_list_failure(mut self) -> Self {
        self.list_fails = true;
        self
    }

    pub fn set_streams(&self, streams: Vec<StreamInfo>) {
        *self.streams.lock().unwrap() = streams;
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

impl LogSource for FakeSource {
    async fn query(&self, request: QueryRequest<'_>) -> Result<Page, SourceError> {
        let recorded = Recorded {
            streams: request.streams.to_vec(),
            window: request.window,
            filter_pattern: request.filter_pattern.map(str::to_string),
            next_token: request.next_token.map(str::to_string),
        };
        self.requests.lock().unwrap().push(recorded.clone());

        if self.calls.fetch_add(1, Ordering::SeqCst) < self.throttle_first {
            return Err(SourceError::Throttled {
                message: "Rate exceeded".to_string(),
            });
        }
        (self.handler)(&recorded)
    }

    async fn list_streams(&self, group: &str) -> Result<Vec<StreamInfo>, SourceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.list_fails {
            return Err(SourceError::NotFound {
                group: group.to_string(),
            });
        }
        Ok(self.streams.lock().unwrap().clone())
    }
}

pub fn ev(stream: &str, timestamp: EpochMillis, id: &str) -> LogEvent {
    LogEvent::new(stream, timestamp, id, format!("{stream} says {id}"))
}

pub fn page(events: Vec<LogEvent>, next_token: Option<&str>) -> Page {
    Page {
        events,
        next_token: next_token.map(str::to_string),
    }
}
