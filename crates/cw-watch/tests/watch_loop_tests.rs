//! Watch loop behavior tests.
//!
//! Covers:
//! - resume index monotonicity across poll cycles
//! - per-entry emission in remote order for batch responses
//! - discard of completions that arrive after stop
//! - timeout handling with and without synthetic empty messages
//! - retry after poll failures and after delivery failures

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};

use cw_watch::{PollOutcome, PollSource, WatchConfig, WatchError, WatchLoop, WatchSink};

enum Step {
    Changed(Vec<&'static str>, u64),
    Timeout,
    Fail,
    /// Keep the poll outstanding until the gate is notified, then complete.
    Blocked(Arc<Notify>, Vec<&'static str>, u64),
}

struct ScriptedSource {
    steps: Mutex<VecDeque<Step>>,
    polls: AtomicU64,
}

impl ScriptedSource {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            polls: AtomicU64::new(0),
        }
    }

    fn polls(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PollSource for ScriptedSource {
    type Item = String;

    async fn poll(&self, _index: u64, block: Duration) -> anyhow::Result<PollOutcome<String>> {
        self.polls.fetch_add(1, Ordering::SeqCst);

        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Changed(items, index)) => Ok(PollOutcome::Changed {
                items: items.into_iter().map(String::from).collect(),
                index,
            }),
            Some(Step::Timeout) => Ok(PollOutcome::Timeout),
            Some(Step::Fail) => Err(anyhow::anyhow!("connection refused")),
            Some(Step::Blocked(gate, items, index)) => {
                gate.notified().await;
                Ok(PollOutcome::Changed {
                    items: items.into_iter().map(String::from).collect(),
                    index,
                })
            }
            // Script exhausted: behave like an idle remote.
            None => {
                sleep(block).await;
                Ok(PollOutcome::Timeout)
            }
        }
    }
}

#[derive(Default)]
struct CollectingSink {
    items: Mutex<Vec<(String, u64)>>,
    timeouts: AtomicU64,
    fail_on: Option<&'static str>,
}

impl CollectingSink {
    fn items(&self) -> Vec<(String, u64)> {
        self.items.lock().unwrap().clone()
    }

    fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WatchSink<String> for CollectingSink {
    async fn deliver(&self, item: String, index: u64) -> anyhow::Result<()> {
        if Some(item.as_str()) == self.fail_on {
            anyhow::bail!("downstream processing failed for {item}");
        }
        self.items.lock().unwrap().push((item, index));
        Ok(())
    }

    async fn deliver_timeout(&self) -> anyhow::Result<()> {
        self.timeouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn test_config(name: &str) -> WatchConfig {
    WatchConfig::new(name)
        .with_block(Duration::from_millis(20))
        .with_backoff(Duration::from_millis(5), Duration::from_millis(20))
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}

#[tokio::test]
async fn resume_index_is_monotonic() {
    let source = Arc::new(ScriptedSource::new(vec![
        Step::Changed(vec!["a"], 3),
        Step::Changed(vec!["b"], 7),
        Step::Changed(vec!["c"], 9),
        // A stale lower index must not move the resume token backwards.
        Step::Changed(vec!["d"], 5),
    ]));
    let sink = Arc::new(CollectingSink::default());
    let watcher = WatchLoop::new(source.clone(), sink.clone(), test_config("kv"));

    let handle = watcher.clone().start().unwrap();
    eventually("four deliveries", || sink.items().len() == 4).await;

    assert_eq!(watcher.index(), 9);
    let delivered: Vec<String> = sink.items().into_iter().map(|(i, _)| i).collect();
    assert_eq!(delivered, vec!["a", "b", "c", "d"]);

    watcher.stop();
    timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn batch_response_emits_one_message_per_entry_in_order() {
    let source = Arc::new(ScriptedSource::new(vec![Step::Changed(
        vec!["x", "y", "z"],
        4,
    )]));
    let sink = Arc::new(CollectingSink::default());
    let watcher = WatchLoop::new(source.clone(), sink.clone(), test_config("kv-recursive"));

    let handle = watcher.clone().start().unwrap();
    eventually("batch delivered", || sink.items().len() == 3).await;

    assert_eq!(
        sink.items(),
        vec![
            ("x".to_string(), 4),
            ("y".to_string(), 4),
            ("z".to_string(), 4)
        ]
    );

    watcher.stop();
    timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn completion_after_stop_is_discarded() {
    let gate = Arc::new(Notify::new());
    let source = Arc::new(ScriptedSource::new(vec![Step::Blocked(
        gate.clone(),
        vec!["late"],
        99,
    )]));
    let sink = Arc::new(CollectingSink::default());
    let watcher = WatchLoop::new(source.clone(), sink.clone(), test_config("kv"));

    let handle = watcher.clone().start().unwrap();
    eventually("poll outstanding", || source.polls() == 1).await;

    watcher.stop();
    gate.notify_one();
    timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

    // No delivery, no re-poll.
    assert!(sink.items().is_empty());
    assert_eq!(source.polls(), 1);
    assert_eq!(watcher.index(), 0);
}

#[tokio::test]
async fn timeout_without_emit_produces_no_messages() {
    let source = Arc::new(ScriptedSource::new(vec![Step::Timeout, Step::Timeout]));
    let sink = Arc::new(CollectingSink::default());
    let config = test_config("kv").with_first_index(5);
    let watcher = WatchLoop::new(source.clone(), sink.clone(), config);

    let handle = watcher.clone().start().unwrap();
    eventually("both timeouts polled", || source.polls() >= 2).await;

    assert!(sink.items().is_empty());
    assert_eq!(sink.timeouts(), 0);
    assert_eq!(watcher.index(), 5);

    watcher.stop();
    timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn timeout_with_emit_synthesizes_exactly_one_message() {
    let gate = Arc::new(Notify::new());
    let source = Arc::new(ScriptedSource::new(vec![
        Step::Timeout,
        // Park the next poll so the count stays observable.
        Step::Blocked(gate.clone(), vec![], 0),
    ]));
    let sink = Arc::new(CollectingSink::default());
    let config = test_config("events").with_emit_on_timeout(true);
    let watcher = WatchLoop::new(source.clone(), sink.clone(), config);

    let handle = watcher.clone().start().unwrap();
    eventually("timeout delivered", || sink.timeouts() == 1).await;

    sleep(Duration::from_millis(30)).await;
    assert_eq!(sink.timeouts(), 1);
    assert!(sink.items().is_empty());
    assert_eq!(watcher.index(), 0);

    watcher.stop();
    gate.notify_one();
    timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn poll_failure_is_retried() {
    let source = Arc::new(ScriptedSource::new(vec![
        Step::Fail,
        Step::Fail,
        Step::Changed(vec!["recovered"], 2),
    ]));
    let sink = Arc::new(CollectingSink::default());
    let watcher = WatchLoop::new(source.clone(), sink.clone(), test_config("kv"));

    let handle = watcher.clone().start().unwrap();
    eventually("recovery delivered", || sink.items().len() == 1).await;

    assert_eq!(sink.items(), vec![("recovered".to_string(), 2)]);
    assert_eq!(watcher.index(), 2);
    assert!(watcher.is_running());

    watcher.stop();
    timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn delivery_failure_does_not_abort_the_loop() {
    let source = Arc::new(ScriptedSource::new(vec![Step::Changed(
        vec!["bad", "good"],
        6,
    )]));
    let sink = Arc::new(CollectingSink {
        fail_on: Some("bad"),
        ..Default::default()
    });
    let watcher = WatchLoop::new(source.clone(), sink.clone(), test_config("kv"));

    let handle = watcher.clone().start().unwrap();
    eventually("surviving entry delivered", || sink.items().len() == 1).await;

    assert_eq!(sink.items(), vec![("good".to_string(), 6)]);
    assert_eq!(watcher.index(), 6);

    watcher.stop();
    timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn value_then_timeout_scenario() {
    // Start at index 0, observe (value "v1", index 5), then a timeout:
    // exactly one message with index 5, and the index stays at 5.
    let source = Arc::new(ScriptedSource::new(vec![
        Step::Changed(vec!["v1"], 5),
        Step::Timeout,
    ]));
    let sink = Arc::new(CollectingSink::default());
    let watcher = WatchLoop::new(source.clone(), sink.clone(), test_config("kv"));

    let handle = watcher.clone().start().unwrap();
    eventually("value delivered", || sink.items().len() == 1).await;
    eventually("timeout polled", || source.polls() >= 2).await;

    sleep(Duration::from_millis(30)).await;
    assert_eq!(sink.items(), vec![("v1".to_string(), 5)]);
    assert_eq!(watcher.index(), 5);

    watcher.stop();
    timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn starting_twice_fails() {
    let source = Arc::new(ScriptedSource::new(vec![]));
    let sink = Arc::new(CollectingSink::default());
    let watcher = WatchLoop::new(source.clone(), sink.clone(), test_config("kv"));

    let handle = watcher.clone().start().unwrap();
    assert!(matches!(watcher.clone().start(), Err(WatchError::AlreadyRunning)));

    watcher.stop();
    timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
}
