//! CloudWatch Logs access for cwtail
//!
//! This crate defines the [`LogSource`] seam the poller queries through and
//! provides an implementation backed by the `aws` command-line client.

mod aws;
mod error;
mod source;

pub use aws::{AwsCliSource, DEFAULT_DISCOVERY_LIMIT, MAX_STREAMS_PER_QUERY};
pub use error::SourceError;
pub use source::{LogSource, Page, QueryRequest, StreamInfo};

// Re-export types used in our public API
pub use cwtail_types::{EpochMillis, LogEvent, PollWindow};
