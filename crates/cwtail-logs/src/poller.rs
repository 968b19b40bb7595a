use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use futures::{StreamExt, TryStreamExt, stream};
use tracing::{debug, info, warn};

use cwtail_source::{LogSource, MAX_STREAMS_PER_QUERY, QueryRequest, SourceError};
use cwtail_types::{EpochMillis, LogEvent, PollWindow, duration_millis, now_millis};

use crate::StreamCursorTable;

/// What to poll and how
#[derive(Clone, Debug)]
pub struct PollSettings {
    /// Log group name
    pub group: String,

    /// Explicit stream names (empty = the whole group)
    pub streams: Vec<String>,

    /// List the group's streams periodically when no explicit names are given
    pub discover: bool,

    pub discovery_interval: Duration,

    /// Concurrent chunk fetches within one tick
    pub max_concurrency: usize,

    /// Server-side filter pattern
    pub filter_pattern: Option<String>,

    /// Streams containing any of these tokens are never queried
    pub exclude_streams: Vec<String>,
}

impl PollSettings {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            streams: Vec::new(),
            discover: true,
            discovery_interval: Duration::from_secs(30),
            max_concurrency: 4,
            filter_pattern: None,
            exclude_streams: Vec::new(),
        }
    }

    fn is_excluded(&self, stream_id: &str) -> bool {
        self.exclude_streams
            .iter()
            .any(|t| !t.is_empty() && stream_id.contains(t.as_str()))
    }
}

/// One query target for a tick: a set of streams and the window to fetch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scope {
    /// Streams to restrict to (empty = whole group)
    pub streams: Vec<String>,
    pub window: PollWindow,
}

/// Result of a successful tick
#[derive(Clone, Debug, Default)]
pub struct TickReport {
    /// New events, ordered by `(timestamp, stream_id, event_id)`
    pub accepted: Vec<LogEvent>,
    /// Events returned by the source before dedup
    pub fetched: usize,
    pub pages: usize,
    pub scopes: usize,
    /// Whether this tick re-issued the windows of a failed one
    pub retried: bool,
}

struct ScopeFetch {
    events: Vec<LogEvent>,
    pages: usize,
}

/// Drives queries against a [`LogSource`] and owns the cursor table
pub struct Poller<S> {
    source: S,
    settings: PollSettings,
    table: StreamCursorTable,

    /// Streams queried by name on each tick
    known_streams: BTreeSet<String>,

    last_discovery: Option<EpochMillis>,

    /// Scopes of the last failed tick, re-issued verbatim
    pending: Option<Vec<Scope>>,
}

impl<S: LogSource> Poller<S> {
    pub fn new(source: S, settings: PollSettings, table: StreamCursorTable) -> Self {
        let mut table = table;
        let known_streams: BTreeSet<String> = settings
            .streams
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect();
        for stream_id in &known_streams {
            table.ensure(stream_id);
        }

        Self {
            source,
            settings,
            table,
            known_streams,
            last_discovery: None,
            pending: None,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    pub fn table(&self) -> &StreamCursorTable {
        &self.table
    }

    pub fn known_streams(&self) -> impl Iterator<Item = &str> {
        self.known_streams.iter().map(String::as_str)
    }

    /// Scopes that will be retried on the next tick, if the last one failed
    pub fn pending_scopes(&self) -> Option<&[Scope]> {
        self.pending.as_deref()
    }

    fn uses_discovery(&self) -> bool {
        self.settings.discover && self.settings.streams.is_empty()
    }

    /// Run one tick against the current wall-clock time
    pub async fn tick(&mut self) -> Result<TickReport, SourceError> {
        self.tick_at(now_millis()).await
    }

    /// Run one tick as if the wall clock read `now`.
    ///
    /// On failure the cursor table is untouched and the same scopes (with the
    /// same windows) are issued by the next call.
    pub async fn tick_at(&mut self, now: EpochMillis) -> Result<TickReport, SourceError> {
        let (scopes, retried) = match self.pending.take() {
            Some(scopes) => (scopes, true),
            None => {
                self.discover_if_due(now).await?;
                (self.plan(now), false)
            }
        };

        let fetched = match self.fetch_all(&scopes).await {
            Ok(fetched) => fetched,
            Err(e @ SourceError::StreamNotFound { .. }) if self.uses_discovery() => {
                self.pending = Some(scopes);
                let dropped = self.forget_deleted_streams(now).await?;
                if dropped.is_empty() {
                    return Err(e);
                }
                // Nothing was fetched; the next tick re-plans without them
                self.pending = None;
                return Ok(TickReport::default());
            }
            Err(e) => {
                self.pending = Some(scopes);
                return Err(e);
            }
        };

        let pages = fetched.iter().map(|f| f.pages).sum();
        let mut candidates: Vec<LogEvent> = fetched.into_iter().flat_map(|f| f.events).collect();
        let fetched_count = candidates.len();
        candidates.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let accepted = self.table.dedupe_and_advance(candidates);
        for scope in &scopes {
            self.table.mark_scanned(&scope.streams, scope.window.end);
        }

        if self.uses_discovery() {
            for event in &accepted {
                if !self.known_streams.contains(&event.stream_id)
                    && !self.settings.is_excluded(&event.stream_id)
                {
                    info!(stream = %event.stream_id, "new stream seen in results");
                    self.known_streams.insert(event.stream_id.clone());
                }
            }
        }

        debug!(
            scopes = scopes.len(),
            pages,
            fetched = fetched_count,
            accepted = accepted.len(),
            retried,
            "tick complete"
        );

        Ok(TickReport {
            accepted,
            fetched: fetched_count,
            pages,
            scopes: scopes.len(),
            retried,
        })
    }

    /// Refresh the stream list when discovery is enabled and due
    async fn discover_if_due(&mut self, now: EpochMillis) -> Result<(), SourceError> {
        if !self.uses_discovery() {
            return Ok(());
        }
        let interval_ms = duration_millis(self.settings.discovery_interval);
        if let Some(last) = self.last_discovery {
            if now.saturating_sub(last) < interval_ms {
                return Ok(());
            }
        }

        let listed = self.source.list_streams(&self.settings.group).await?;
        self.last_discovery = Some(now);

        let since = self.table.since();
        let mut added = 0;
        for info in listed {
            if !info.active_since(since) || self.settings.is_excluded(&info.name) {
                continue;
            }
            if self.known_streams.insert(info.name.clone()) {
                self.table.ensure(&info.name);
                added += 1;
                info!(stream = %info.name, "discovered stream");
            }
        }

        debug!(
            group = %self.settings.group,
            known = self.known_streams.len(),
            added,
            "stream discovery finished"
        );
        Ok(())
    }

    /// Drop discovered streams the group no longer lists (e.g. expired by retention)
    async fn forget_deleted_streams(&mut self, now: EpochMillis) -> Result<Vec<String>, SourceError> {
        let listed: HashSet<String> = self
            .source
            .list_streams(&self.settings.group)
            .await?
            .into_iter()
            .map(|info| info.name)
            .collect();
        self.last_discovery = Some(now);

        let deleted: Vec<String> = self
            .known_streams
            .iter()
            .filter(|name| !listed.contains(*name))
            .cloned()
            .collect();
        for name in &deleted {
            self.known_streams.remove(name);
            warn!(group = %self.settings.group, stream = %name, "log stream no longer exists, no longer tailing it");
        }
        Ok(deleted)
    }

    /// Build this tick's scopes from the known streams and the cursor table
    fn plan(&self, now: EpochMillis) -> Vec<Scope> {
        if self.known_streams.is_empty() {
            return vec![Scope {
                streams: Vec::new(),
                window: self.table.scope_window(&[], now),
            }];
        }

        let streams: Vec<String> = self.known_streams.iter().cloned().collect();
        streams
            .chunks(MAX_STREAMS_PER_QUERY)
            .map(|chunk| Scope {
                streams: chunk.to_vec(),
                window: self.table.scope_window(chunk, now),
            })
            .collect()
    }

    /// Fetch every scope, failing the whole batch on the first error
    async fn fetch_all(&self, scopes: &[Scope]) -> Result<Vec<ScopeFetch>, SourceError> {
        stream::iter(scopes)
            .map(|scope| self.fetch_scope(scope))
            .buffer_unordered(self.settings.max_concurrency.max(1))
            .try_collect()
            .await
    }

    /// Follow continuation tokens until the scope is exhausted
    async fn fetch_scope(&self, scope: &Scope) -> Result<ScopeFetch, SourceError> {
        let mut events = Vec::new();
        let mut pages = 0;
        let mut next_token: Option<String> = None;
        let mut seen_tokens = HashSet::new();

        loop {
            let request = QueryRequest {
                group: &self.settings.group,
                streams: &scope.streams,
                window: scope.window,
                filter_pattern: self.settings.filter_pattern.as_deref(),
                next_token: next_token.as_deref(),
            };
            let page = self.source.query(request).await?;
            pages += 1;
            events.extend(page.events);

            match page.next_token {
                Some(token) if seen_tokens.insert(token.clone()) => next_token = Some(token),
                Some(token) => {
                    warn!(%token, window = %scope.window, "source repeated a continuation token, stopping pagination");
                    break;
                }
                None => break,
            }
        }

        Ok(ScopeFetch { events, pages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSource, Recorded, ev, page};
    use cwtail_source::{Page, StreamInfo};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn poller(source: FakeSource, settings: PollSettings) -> Poller<FakeSource> {
        Poller::new(source, settings, StreamCursorTable::new(1_000))
    }

    fn group_settings() -> PollSettings {
        PollSettings {
            discover: false,
            ..PollSettings::new("grp")
        }
    }

    #[tokio::test]
    async fn test_first_tick_uses_initial_lookback() {
        let source = FakeSource::new(|_| Ok(Page::default()));
        let mut poller = poller(source, group_settings());

        poller.tick_at(5_000).await.unwrap();

        let requests = poller.source().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].window, PollWindow::new(1_000, 5_000));
        assert!(requests[0].streams.is_empty());
    }

    #[tokio::test]
    async fn test_pagination_is_exhausted() {
        let source = FakeSource::new(|req: &Recorded| {
            Ok(match req.next_token.as_deref() {
                None => page(vec![ev("a", 2_000, "1")], Some("p2")),
                Some("p2") => page(vec![ev("b", 1_500, "2")], Some("p3")),
                Some(_) => page(vec![ev("a", 2_500, "3")], None),
            })
        });
        let mut poller = poller(source, group_settings());

        let report = poller.tick_at(5_000).await.unwrap();
        assert_eq!(report.pages, 3);
        assert_eq!(report.fetched, 3);
        let order: Vec<_> = report.accepted.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(order, vec!["2", "1", "3"]);

        let requests = poller.source().requests();
        assert!(requests.iter().all(|r| r.window == requests[0].window));
    }

    #[tokio::test]
    async fn test_repeated_token_stops_pagination() {
        let source = FakeSource::new(|_| Ok(page(vec![ev("a", 2_000, "1")], Some("same"))));
        let mut poller = poller(source, group_settings());

        let report = poller.tick_at(5_000).await.unwrap();
        assert_eq!(report.pages, 2);
        assert_eq!(report.accepted.len(), 1);
    }

    #[tokio::test]
    async fn test_throttled_tick_retries_identical_window() {
        let source = FakeSource::failing_first(1, |_| Ok(page(vec![ev("a", 3_000, "1")], None)));
        let mut poller = poller(source, group_settings());

        let err = poller.tick_at(5_000).await.unwrap_err();
        assert!(err.is_throttle());
        assert!(poller.table().is_empty());
        assert!(poller.pending_scopes().is_some());

        // Later wall clock, but the failed window is re-issued as-is
        let report = poller.tick_at(9_000).await.unwrap();
        assert!(report.retried);
        assert_eq!(report.accepted.len(), 1);

        let requests = poller.source().requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].window, requests[1].window);
        assert_eq!(poller.table().cursor("a").unwrap().last_timestamp, 3_000);
        assert!(poller.pending_scopes().is_none());
    }

    #[tokio::test]
    async fn test_mid_pagination_failure_advances_nothing() {
        let source = FakeSource::new(|req: &Recorded| match req.next_token.as_deref() {
            None => Ok(page(vec![ev("a", 2_000, "1")], Some("p2"))),
            Some(_) => Err(SourceError::Transient {
                message: "connection reset".to_string(),
            }),
        });
        let mut poller = poller(source, group_settings());

        assert!(poller.tick_at(5_000).await.is_err());
        assert!(poller.table().cursor("a").is_none());
        assert_eq!(
            poller.pending_scopes().unwrap()[0].window,
            PollWindow::new(1_000, 5_000)
        );
    }

    #[tokio::test]
    async fn test_overlapping_windows_do_not_duplicate() {
        let source = FakeSource::new(|_| {
            Ok(page(vec![ev("a", 2_000, "1"), ev("a", 2_000, "2")], None))
        });
        let mut poller = poller(source, group_settings());

        assert_eq!(poller.tick_at(5_000).await.unwrap().accepted.len(), 2);
        assert!(poller.tick_at(7_000).await.unwrap().accepted.is_empty());
    }

    #[tokio::test]
    async fn test_discovery_queries_by_stream_and_skips_stale_and_excluded() {
        let source = FakeSource::new(|_| Ok(Page::default())).with_streams(vec![
            StreamInfo::new("web/1", Some(4_000)),
            StreamInfo::new("web/old", Some(10)),
            StreamInfo::new("sidecar/1", Some(4_000)),
            StreamInfo::new("web/2", None),
        ]);
        let settings = PollSettings {
            exclude_streams: vec!["sidecar".to_string()],
            ..PollSettings::new("grp")
        };
        let mut poller = poller(source, settings);

        poller.tick_at(5_000).await.unwrap();

        let known: Vec<_> = poller.known_streams().collect();
        assert_eq!(known, vec!["web/1", "web/2"]);
        let requests = poller.source().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].streams, vec!["web/1".to_string(), "web/2".to_string()]);
    }

    #[tokio::test]
    async fn test_discovery_picks_up_new_streams_when_due() {
        let source = FakeSource::new(|_| Ok(Page::default()))
            .with_streams(vec![StreamInfo::new("a", None)]);
        let settings = PollSettings {
            discovery_interval: Duration::from_secs(10),
            ..PollSettings::new("grp")
        };
        let mut poller = poller(source, settings);

        poller.tick_at(5_000).await.unwrap();
        poller
            .source()
            .set_streams(vec![StreamInfo::new("a", None), StreamInfo::new("b", None)]);

        // Not due yet
        poller.tick_at(8_000).await.unwrap();
        assert_eq!(poller.known_streams().count(), 1);
        assert_eq!(poller.source().list_calls(), 1);

        poller.tick_at(15_000).await.unwrap();
        assert_eq!(poller.known_streams().count(), 2);
        assert_eq!(poller.source().list_calls(), 2);

        let last = poller.source().requests().pop().unwrap();
        assert_eq!(last.streams, vec!["a".to_string(), "b".to_string()]);
        // The new stream starts from the initial lookback
        assert_eq!(last.window.start, 1_000);
    }

    #[tokio::test]
    async fn test_deleted_discovered_stream_is_dropped() {
        let deleted = Arc::new(AtomicBool::new(false));
        let flag = deleted.clone();
        let source = FakeSource::new(move |req: &Recorded| {
            if flag.load(Ordering::SeqCst) && req.streams.iter().any(|s| s == "web/gone") {
                return Err(SourceError::StreamNotFound {
                    group: "grp".to_string(),
                    streams: req.streams.clone(),
                });
            }
            Ok(page(vec![ev("web/1", 2_000, "1")], None))
        })
        .with_streams(vec![
            StreamInfo::new("web/1", None),
            StreamInfo::new("web/gone", None),
        ]);
        let mut poller = poller(source, PollSettings::new("grp"));
        poller.tick_at(5_000).await.unwrap();

        deleted.store(true, Ordering::SeqCst);
        poller.source().set_streams(vec![StreamInfo::new("web/1", None)]);

        let report = poller.tick_at(8_000).await.unwrap();
        assert!(report.accepted.is_empty());
        assert_eq!(poller.known_streams().collect::<Vec<_>>(), vec!["web/1"]);
        assert!(poller.pending_scopes().is_none());
        assert_eq!(poller.source().list_calls(), 2);

        poller.tick_at(9_000).await.unwrap();
        let last = poller.source().requests().pop().unwrap();
        assert_eq!(last.streams, vec!["web/1".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_explicit_stream_is_fatal() {
        let source = FakeSource::new(|req: &Recorded| {
            if req.streams.iter().any(|s| s == "web/typo") {
                return Err(SourceError::StreamNotFound {
                    group: "grp".to_string(),
                    streams: req.streams.clone(),
                });
            }
            Ok(Page::default())
        });
        let settings = PollSettings {
            streams: vec!["web/1".to_string(), "web/typo".to_string()],
            ..PollSettings::new("grp")
        };
        let mut poller = poller(source, settings);

        let err = poller.tick_at(5_000).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("web/typo"));
        assert_eq!(poller.source().list_calls(), 0);
        assert_eq!(poller.known_streams().count(), 2);
    }

    #[tokio::test]
    async fn test_discovery_failure_is_reported() {
        let source = FakeSource::new(|_| Ok(Page::default())).with_list_failure();
        let mut poller = poller(source, PollSettings::new("grp"));

        let err = poller.tick_at(5_000).await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound { .. }));
        assert!(poller.source().requests().is_empty());
    }

    #[tokio::test]
    async fn test_many_streams_are_chunked() {
        let names: Vec<String> = (0..250).map(|i| format!("s{i:03}")).collect();
        let source = FakeSource::new(|req: &Recorded| {
            let stream = req.streams[0].clone();
            Ok(page(vec![ev(&stream, 2_000, "x")], None))
        });
        let settings = PollSettings {
            streams: names,
            ..PollSettings::new("grp")
        };
        let mut poller = poller(source, settings);

        let report = poller.tick_at(5_000).await.unwrap();
        assert_eq!(report.scopes, 3);
        assert_eq!(report.accepted.len(), 3);

        let mut sizes: Vec<_> = poller
            .source()
            .requests()
            .iter()
            .map(|r| r.streams.len())
            .collect();
        sizes.sort();
        assert_eq!(sizes, vec![50, 100, 100]);
        assert_eq!(poller.source().list_calls(), 0);
    }

    #[tokio::test]
    async fn test_filter_pattern_is_forwarded() {
        let source = FakeSource::new(|_| Ok(Page::default()));
        let settings = PollSettings {
            filter_pattern: Some("?ERROR".to_string()),
            ..group_settings()
        };
        let mut poller = poller(source, settings);

        poller.tick_at(5_000).await.unwrap();
        assert_eq!(
            poller.source().requests()[0].filter_pattern.as_deref(),
            Some("?ERROR")
        );
    }
}
