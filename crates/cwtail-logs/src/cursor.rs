use std::collections::{HashMap, HashSet};
use std::time::Duration;

use cwtail_types::{EpochMillis, LogEvent, PollWindow, duration_millis};

/// Default overlap kept above a stream's scan point for late-arriving events
const DEFAULT_SETTLE_WINDOW: Duration = Duration::from_secs(30);

/// High-water mark and trailing dedup set for one log stream
#[derive(Clone, Debug)]
pub struct StreamCursor {
    pub stream_id: String,

    /// Latest event timestamp emitted for this stream
    pub last_timestamp: EpochMillis,

    /// Event ids near `last_timestamp`, with their timestamps
    seen: HashMap<String, EpochMillis>,

    /// End of the last successful query window covering this stream
    scanned_to: EpochMillis,

    /// Events accepted over the lifetime of the cursor
    accepted: u64,
}

impl StreamCursor {
    fn seeded(stream_id: String, since: EpochMillis) -> Self {
        Self {
            stream_id,
            last_timestamp: since,
            seen: HashMap::new(),
            scanned_to: since,
            accepted: 0,
        }
    }

    pub fn has_seen(&self, event_id: &str) -> bool {
        self.seen.contains_key(event_id)
    }

    /// Event ids currently held for dedup (unordered)
    pub fn seen_event_ids(&self) -> impl Iterator<Item = &str> {
        self.seen.keys().map(String::as_str)
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn scanned_to(&self) -> EpochMillis {
        self.scanned_to
    }

    /// Inclusive start for the next query of this stream
    pub fn resume_from(&self, settle_ms: i64) -> EpochMillis {
        self.last_timestamp
            .max(self.scanned_to.saturating_sub(settle_ms))
    }

    /// Older than anything the trailing set still remembers
    fn is_stale(&self, timestamp: EpochMillis, window_ms: i64) -> bool {
        timestamp < self.last_timestamp.saturating_sub(window_ms)
    }

    fn is_duplicate(&self, event: &LogEvent) -> bool {
        self.has_seen(&event.event_id) && event.timestamp <= self.last_timestamp
    }

    fn record(&mut self, event: &LogEvent) {
        self.seen.insert(event.event_id.clone(), event.timestamp);
        self.last_timestamp = self.last_timestamp.max(event.timestamp);
        self.accepted += 1;
    }

    fn prune(&mut self, window_ms: i64) {
        let floor = self.last_timestamp.saturating_sub(window_ms);
        self.seen.retain(|_, ts| *ts >= floor);
    }
}

/// Source of truth for what has already been emitted, per stream
#[derive(Clone, Debug)]
pub struct StreamCursorTable {
    cursors: HashMap<String, StreamCursor>,

    /// Seed timestamp for new cursors (now - lookback at startup)
    since: EpochMillis,

    /// End of the last successful group-wide scan
    scanned_to: EpochMillis,

    dedup_window_ms: i64,
    settle_window_ms: i64,
}

impl StreamCursorTable {
    /// Create an empty table; new cursors start at `since`
    pub fn new(since: EpochMillis) -> Self {
        Self {
            cursors: HashMap::new(),
            since,
            scanned_to: since,
            dedup_window_ms: 0,
            settle_window_ms: duration_millis(DEFAULT_SETTLE_WINDOW),
        }
    }

    /// Keep event ids this far below the high-water mark for dedup
    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window_ms = duration_millis(window);
        self
    }

    /// Re-scan this far below the last scan point on every query
    pub fn with_settle_window(mut self, window: Duration) -> Self {
        self.settle_window_ms = duration_millis(window);
        self
    }

    pub fn since(&self) -> EpochMillis {
        self.since
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    pub fn cursor(&self, stream_id: &str) -> Option<&StreamCursor> {
        self.cursors.get(stream_id)
    }

    pub fn streams(&self) -> impl Iterator<Item = &str> {
        self.cursors.keys().map(String::as_str)
    }

    /// Seed a cursor for the stream if missing; returns true when one was created
    pub fn ensure(&mut self, stream_id: &str) -> bool {
        if self.cursors.contains_key(stream_id) {
            return false;
        }
        self.cursors.insert(
            stream_id.to_string(),
            StreamCursor::seeded(stream_id.to_string(), self.since),
        );
        true
    }

    /// Drop already-emitted events and advance cursors for the rest.
    ///
    /// Input should be sorted by `(timestamp, stream_id, event_id)`; the
    /// returned events keep the input order.
    pub fn dedupe_and_advance(&mut self, events: Vec<LogEvent>) -> Vec<LogEvent> {
        let since = self.since;
        let window_ms = self.dedup_window_ms;
        let mut touched = HashSet::new();
        let mut accepted = Vec::with_capacity(events.len());

        for event in events {
            let cursor = self
                .cursors
                .entry(event.stream_id.clone())
                .or_insert_with(|| StreamCursor::seeded(event.stream_id.clone(), since));

            if cursor.is_stale(event.timestamp, window_ms) || cursor.is_duplicate(&event) {
                continue;
            }

            cursor.record(&event);
            touched.insert(event.stream_id.clone());
            accepted.push(event);
        }

        for stream_id in touched {
            if let Some(cursor) = self.cursors.get_mut(&stream_id) {
                cursor.prune(window_ms);
            }
        }

        accepted
    }

    /// Next query window for a single stream
    pub fn window_for(&self, stream_id: &str, now: EpochMillis) -> PollWindow {
        let start = self
            .cursors
            .get(stream_id)
            .map(|c| c.resume_from(self.settle_window_ms))
            .unwrap_or(self.since);
        PollWindow::new(start, now)
    }

    /// Next query window covering `streams` (empty = the whole group)
    pub fn scope_window(&self, streams: &[String], now: EpochMillis) -> PollWindow {
        let start = if streams.is_empty() {
            let floor = self
                .since
                .max(self.scanned_to.saturating_sub(self.settle_window_ms));
            self.cursors
                .values()
                .map(|c| c.resume_from(self.settle_window_ms))
                .fold(floor, EpochMillis::min)
        } else {
            streams
                .iter()
                .map(|s| self.window_for(s, now).start)
                .min()
                .unwrap_or(self.since)
        };
        PollWindow::new(start, now)
    }

    /// Record that a query covering `streams` (empty = whole group) succeeded up to `end`
    pub fn mark_scanned(&mut self, streams: &[String], end: EpochMillis) {
        if streams.is_empty() {
            self.scanned_to = self.scanned_to.max(end);
            for cursor in self.cursors.values_mut() {
                cursor.scanned_to = cursor.scanned_to.max(end);
            }
            return;
        }

        for stream_id in streams {
            self.ensure(stream_id);
            if let Some(cursor) = self.cursors.get_mut(stream_id) {
                cursor.scanned_to = cursor.scanned_to.max(end);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(stream: &str, ts: EpochMillis, id: &str) -> LogEvent {
        LogEvent::new(stream, ts, id, format!("msg {id}"))
    }

    fn ids(events: &[LogEvent]) -> Vec<&str> {
        events.iter().map(|e| e.event_id.as_str()).collect()
    }

    #[test]
    fn test_dedupe_scenario_from_cursor_at_100() {
        let mut table = StreamCursorTable::new(0);
        table.dedupe_and_advance(vec![ev("a", 100, "e1")]);

        let accepted = table.dedupe_and_advance(vec![
            ev("a", 100, "e1"),
            ev("a", 100, "e2"),
            ev("a", 105, "e3"),
        ]);

        assert_eq!(ids(&accepted), vec!["e2", "e3"]);
        let cursor = table.cursor("a").unwrap();
        assert_eq!(cursor.last_timestamp, 105);
        assert_eq!(cursor.seen_event_ids().collect::<Vec<_>>(), vec!["e3"]);
    }

    #[test]
    fn test_dedupe_is_idempotent() {
        let batch = vec![
            ev("a", 10, "1"),
            ev("b", 10, "2"),
            ev("a", 12, "3"),
            ev("a", 12, "4"),
            ev("b", 15, "5"),
        ];

        let mut table = StreamCursorTable::new(0);
        assert_eq!(table.dedupe_and_advance(batch.clone()).len(), 5);
        assert!(table.dedupe_and_advance(batch).is_empty());
    }

    #[test]
    fn test_same_timestamp_new_id_is_accepted() {
        let mut table = StreamCursorTable::new(0);
        table.dedupe_and_advance(vec![ev("a", 50, "x")]);
        let accepted = table.dedupe_and_advance(vec![ev("a", 50, "x"), ev("a", 50, "y")]);
        assert_eq!(ids(&accepted), vec!["y"]);

        let cursor = table.cursor("a").unwrap();
        assert!(cursor.has_seen("x"));
        assert!(cursor.has_seen("y"));
    }

    #[test]
    fn test_dedup_window_tolerates_late_events() {
        let mut strict = StreamCursorTable::new(0);
        strict.dedupe_and_advance(vec![ev("a", 100, "1")]);
        assert!(strict.dedupe_and_advance(vec![ev("a", 95, "late")]).is_empty());

        let mut lax = StreamCursorTable::new(0).with_dedup_window(Duration::from_millis(10));
        lax.dedupe_and_advance(vec![ev("a", 100, "1")]);
        assert_eq!(ids(&lax.dedupe_and_advance(vec![ev("a", 95, "late")])), vec!["late"]);
        // Still remembered, so a replay is dropped
        assert!(lax.dedupe_and_advance(vec![ev("a", 95, "late")]).is_empty());
        assert_eq!(lax.cursor("a").unwrap().last_timestamp, 100);
    }

    #[test]
    fn test_streams_are_independent() {
        let mut table = StreamCursorTable::new(0);
        table.dedupe_and_advance(vec![ev("a", 100, "1")]);
        let accepted = table.dedupe_and_advance(vec![ev("b", 50, "1")]);
        assert_eq!(accepted.len(), 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_events_before_since_are_dropped() {
        let mut table = StreamCursorTable::new(1_000);
        let accepted = table.dedupe_and_advance(vec![ev("a", 999, "old"), ev("a", 1_000, "edge")]);
        assert_eq!(ids(&accepted), vec!["edge"]);
    }

    #[test]
    fn test_window_start_is_monotonic_per_stream() {
        let mut table = StreamCursorTable::new(0).with_settle_window(Duration::ZERO);
        let mut previous = table.window_for("a", 10).start;

        let batches = [
            vec![ev("a", 5, "1")],
            vec![ev("a", 3, "old")],
            vec![],
            vec![ev("a", 20, "2"), ev("a", 20, "3")],
            vec![ev("a", 20, "3")],
        ];
        for (tick, batch) in batches.into_iter().enumerate() {
            let now = 100 + tick as i64;
            table.dedupe_and_advance(batch);
            table.mark_scanned(&["a".to_string()], now - 50);
            let start = table.window_for("a", now).start;
            assert!(start >= previous, "window start went back on tick {tick}");
            previous = start;
        }
    }

    #[test]
    fn test_scope_window_uses_oldest_stream() {
        let mut table = StreamCursorTable::new(0).with_settle_window(Duration::ZERO);
        table.dedupe_and_advance(vec![ev("a", 100, "1"), ev("b", 40, "2")]);

        let window = table.scope_window(&["a".to_string(), "b".to_string()], 200);
        assert_eq!(window, PollWindow::new(40, 200));
        // Unknown streams start at the initial lookback
        let window = table.scope_window(&["a".to_string(), "zzz".to_string()], 200);
        assert_eq!(window.start, 0);
    }

    #[test]
    fn test_silent_stream_advances_with_scans() {
        let mut table = StreamCursorTable::new(1_000).with_settle_window(Duration::from_millis(100));
        let streams = vec!["quiet".to_string()];
        table.ensure("quiet");
        assert_eq!(table.scope_window(&streams, 5_000).start, 1_000);

        table.mark_scanned(&streams, 5_000);
        assert_eq!(table.scope_window(&streams, 6_000).start, 4_900);
        // The high-water mark itself is untouched by scanning
        assert_eq!(table.cursor("quiet").unwrap().last_timestamp, 1_000);
    }

    #[test]
    fn test_group_scope_window() {
        let mut table = StreamCursorTable::new(1_000).with_settle_window(Duration::from_millis(100));
        assert_eq!(table.scope_window(&[], 2_000), PollWindow::new(1_000, 2_000));

        table.dedupe_and_advance(vec![ev("a", 1_500, "1")]);
        table.mark_scanned(&[], 2_000);
        assert_eq!(table.scope_window(&[], 3_000).start, 1_900);
        assert_eq!(table.cursor("a").unwrap().scanned_to(), 2_000);
    }

    #[test]
    fn test_ensure_seeds_once() {
        let mut table = StreamCursorTable::new(42);
        assert!(table.ensure("a"));
        assert!(!table.ensure("a"));
        let cursor = table.cursor("a").unwrap();
        assert_eq!(cursor.last_timestamp, 42);
        assert_eq!(cursor.seen_event_ids().count(), 0);
        assert_eq!(cursor.accepted(), 0);
    }
}
