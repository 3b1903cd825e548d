//! The watch loop runner.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{PollOutcome, PollSource, WatchConfig, WatchError, WatchSink};

const BACKOFF_MULTIPLIER: u32 = 2;

/// Runs one poll → deliver → re-poll cycle until stopped.
///
/// State is single-writer: only the loop task mutates the resume index, and
/// the running flag is the only cross-task signal. There is no hard
/// cancellation of an in-flight poll; shutdown waits at most one block
/// duration for the outstanding request to complete and be discarded.
pub struct WatchLoop<S: PollSource> {
    source: S,
    sink: Arc<dyn WatchSink<S::Item>>,
    config: WatchConfig,
    index: AtomicU64,
    running: AtomicBool,
}

impl<S: PollSource> WatchLoop<S> {
    pub fn new(source: S, sink: Arc<dyn WatchSink<S::Item>>, config: WatchConfig) -> Arc<Self> {
        let first_index = config.first_index;
        Arc::new(Self {
            source,
            sink,
            config,
            index: AtomicU64::new(first_index),
            running: AtomicBool::new(false),
        })
    }

    /// The current resume index.
    pub fn index(&self) -> u64 {
        self.index.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the loop. Fails if it is already running.
    pub fn start(self: Arc<Self>) -> Result<JoinHandle<()>, WatchError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(WatchError::AlreadyRunning);
        }

        Ok(tokio::spawn(async move { self.run().await }))
    }

    /// Clear the running flag. An in-flight poll finishes on its own; its
    /// completion is discarded without delivering or re-polling.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn run(self: Arc<Self>) {
        let name = self.config.name.clone();
        let mut backoff = self.config.initial_backoff;

        info!(watcher = %name, index = self.index(), "watch loop started");

        while self.running.load(Ordering::SeqCst) {
            let since = self.index.load(Ordering::SeqCst);
            metrics::counter!("cw_watch_polls_total", "watcher" => name.clone()).increment(1);

            match self.source.poll(since, self.config.block).await {
                Ok(outcome) => {
                    // Stopped while the request was in flight: discard.
                    if !self.running.load(Ordering::SeqCst) {
                        debug!(watcher = %name, "discarding completion after stop");
                        break;
                    }

                    backoff = self.config.initial_backoff;

                    match outcome {
                        PollOutcome::Changed { items, index } => {
                            metrics::counter!("cw_watch_changes_total", "watcher" => name.clone())
                                .increment(items.len() as u64);

                            for item in items {
                                if let Err(e) = self.sink.deliver(item, index).await {
                                    metrics::counter!(
                                        "cw_watch_delivery_failures_total",
                                        "watcher" => name.clone()
                                    )
                                    .increment(1);
                                    error!(watcher = %name, error = %e, "error processing change");
                                }
                            }

                            self.advance_index(index);
                        }
                        PollOutcome::Timeout => {
                            metrics::counter!("cw_watch_timeouts_total", "watcher" => name.clone())
                                .increment(1);

                            if self.config.emit_on_timeout {
                                if let Err(e) = self.sink.deliver_timeout().await {
                                    error!(watcher = %name, error = %e, "error processing timeout");
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }

                    metrics::counter!("cw_watch_poll_failures_total", "watcher" => name.clone())
                        .increment(1);
                    warn!(
                        watcher = %name,
                        error = %e,
                        retry_in_ms = backoff.as_millis() as u64,
                        "poll failed, retrying"
                    );

                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * BACKOFF_MULTIPLIER).min(self.config.max_backoff);
                }
            }
        }

        info!(watcher = %name, index = self.index(), "watch loop stopped");
    }

    // The remote's index is authoritative but must never move backwards.
    fn advance_index(&self, index: u64) {
        self.index.fetch_max(index, Ordering::SeqCst);
    }
}
