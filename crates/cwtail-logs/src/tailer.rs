use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use cwtail_source::{LogSource, SourceError};
use cwtail_types::{DisplayRecord, EpochMillis, Verdict, now_millis};

use crate::{Backoff, BackoffPolicy, FilterEngine, MergeBuffer, Poller, TickReport};

/// Receives each tick's ordered, filtered records
pub trait EventSink {
    fn emit(&mut self, records: &[DisplayRecord]) -> io::Result<()>;
}

/// Errors that end the tail loop
#[derive(Debug, Error)]
pub enum TailError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

/// Where the loop goes next
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollState {
    /// Issue the next tick's queries now
    Querying,
    /// A tick failed; wait before re-issuing it
    Backoff(Duration),
    /// A tick succeeded; wait for the next one
    Idle(Duration),
}

/// Counters over the life of a [`Tailer`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TailStats {
    pub ticks: u64,
    pub failed_ticks: u64,
    pub accepted: u64,
    pub excluded: u64,
    pub emitted: u64,
}

/// Sequential tick loop: poll, dedupe, filter, merge, emit
pub struct Tailer<S> {
    poller: Poller<S>,
    filter: FilterEngine,
    merge: MergeBuffer,
    backoff: Backoff,
    interval: Duration,
    stats: TailStats,
}

impl<S: LogSource> Tailer<S> {
    pub fn new(poller: Poller<S>, filter: FilterEngine, interval: Duration) -> Self {
        Self {
            poller,
            filter,
            merge: MergeBuffer::new(),
            backoff: Backoff::default(),
            interval,
            stats: TailStats::default(),
        }
    }

    pub fn with_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff = Backoff::new(policy);
        self
    }

    pub fn poller(&self) -> &Poller<S> {
        &self.poller
    }

    pub fn stats(&self) -> &TailStats {
        &self.stats
    }

    /// Run one tick and hand its records to the sink
    pub async fn step<K: EventSink>(&mut self, sink: &mut K) -> Result<PollState, TailError> {
        self.step_at(now_millis(), sink).await
    }

    pub async fn step_at<K: EventSink>(
        &mut self,
        now: EpochMillis,
        sink: &mut K,
    ) -> Result<PollState, TailError> {
        self.stats.ticks += 1;

        match self.poller.tick_at(now).await {
            Ok(report) => {
                self.backoff.reset();
                self.deliver(report, sink)?;
                Ok(PollState::Idle(self.interval))
            }
            Err(e) if e.is_retryable() => {
                self.stats.failed_ticks += 1;
                let delay = self
                    .backoff
                    .record_failure(e.is_throttle())
                    .max(self.interval);
                warn!(
                    error = %e,
                    failures = self.backoff.failures(),
                    retry_in = ?delay,
                    "poll failed, retrying the same window"
                );
                Ok(PollState::Backoff(delay))
            }
            Err(e) => {
                error!(error = %e, group = %self.poller.settings().group, "unrecoverable source error");
                Err(e.into())
            }
        }
    }

    fn deliver<K: EventSink>(&mut self, report: TickReport, sink: &mut K) -> io::Result<()> {
        self.stats.accepted += report.accepted.len() as u64;

        for event in report.accepted {
            match self.filter.evaluate(&event) {
                Verdict::Exclude => self.stats.excluded += 1,
                verdict => self
                    .merge
                    .push(DisplayRecord::new(event, verdict == Verdict::Highlight)),
            }
        }

        let batch = self.merge.flush();
        if batch.is_empty() {
            return Ok(());
        }
        self.stats.emitted += batch.len() as u64;
        sink.emit(&batch)
    }

    /// Tick until cancelled or a fatal error occurs.
    ///
    /// Cancellation drops any in-flight query; its window was never committed
    /// so nothing is lost from the cursor table's point of view.
    pub async fn run<K: EventSink>(
        &mut self,
        sink: &mut K,
        cancel: &CancellationToken,
    ) -> Result<(), TailError> {
        let mut state = PollState::Querying;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            state = match state {
                PollState::Querying => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        result = self.step(sink) => result?,
                    }
                }
                PollState::Backoff(delay) | PollState::Idle(delay) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => PollState::Querying,
                    }
                }
            };
        }

        debug!(stats = ?self.stats, "tail loop stopped");
        Ok(())
    }
}
