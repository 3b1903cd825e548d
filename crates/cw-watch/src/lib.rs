//! Long-poll watch loop.
//!
//! Several Crosswire consumers share one pattern: repeatedly ask a remote
//! system "has anything changed since index N?" with a blocking
//! (bounded-wait) request, convert each answer into exchanges, then
//! immediately re-issue the poll with the updated index. This crate owns
//! that loop; components plug in a [`PollSource`] (one long poll against
//! their client) and a [`WatchSink`] (item-to-exchange delivery).
//!
//! Guarantees:
//! - the resume index never regresses; each successful response's index is
//!   applied with a monotonic max before the next poll is issued
//! - one outstanding poll per loop, so responses are processed in the order
//!   the remote returns them
//! - stopping is cooperative: an in-flight poll is allowed to finish and its
//!   completion is discarded, with no delivery and no further poll
//! - poll failures are reported and retried with bounded backoff for as long
//!   as the loop is running; they never terminate the consumer

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

mod runner;

pub use runner::WatchLoop;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("watch loop already running")]
    AlreadyRunning,
}

/// Outcome of a single long poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The remote reported changes past the polled index. `items` are in the
    /// order the remote returned them; `index` is the server-assigned resume
    /// index for the next poll.
    Changed { items: Vec<T>, index: u64 },
    /// The block duration elapsed with no change. The resume index is left
    /// untouched.
    Timeout,
}

/// One blocking poll against the remote system.
#[async_trait]
pub trait PollSource: Send + Sync + 'static {
    type Item: Send + 'static;

    /// Block until the watched key changes past `index` or `block` elapses.
    async fn poll(&self, index: u64, block: Duration) -> anyhow::Result<PollOutcome<Self::Item>>;
}

#[async_trait]
impl<T: PollSource> PollSource for Arc<T> {
    type Item = T::Item;

    async fn poll(&self, index: u64, block: Duration) -> anyhow::Result<PollOutcome<Self::Item>> {
        (**self).poll(index, block).await
    }
}

/// Converts polled items into exchanges and hands them downstream.
///
/// Delivery errors are reported through the loop's error channel and never
/// abort the loop.
#[async_trait]
pub trait WatchSink<T>: Send + Sync {
    /// Called once per changed entry, in remote order. `index` is the resume
    /// index of the response the entry arrived in.
    async fn deliver(&self, item: T, index: u64) -> anyhow::Result<()>;

    /// Called on a timed-out poll when the loop is configured to synthesize
    /// empty exchanges on timeout.
    async fn deliver_timeout(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Immutable-after-construction settings for one watch loop.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Name used in logs and metric labels.
    pub name: String,

    /// Server-side bound for one long poll.
    pub block: Duration,

    /// Index the first poll is issued with.
    pub first_index: u64,

    /// Synthesize one body-less exchange per timed-out poll.
    pub emit_on_timeout: bool,

    /// Wait after a failed poll before retrying.
    pub initial_backoff: Duration,

    /// Cap for the exponential retry backoff.
    pub max_backoff: Duration,
}

impl WatchConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            block: Duration::from_secs(10),
            first_index: 0,
            emit_on_timeout: false,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
        }
    }

    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub fn with_first_index(mut self, index: u64) -> Self {
        self.first_index = index;
        self
    }

    pub fn with_emit_on_timeout(mut self, emit: bool) -> Self {
        self.emit_on_timeout = emit;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }
}
