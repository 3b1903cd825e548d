//! Key/value store component (v2 keys API).
//!
//! - **Keys producer**: set/get/delete on a path, with optional TTL
//! - **Stats producer**: leader, self and store statistics
//! - **Watch consumer**: wait-for-change long poll on a path, resuming from
//!   the last delivered modification index; an elapsed client-side timeout
//!   optionally synthesizes an empty exchange

mod client;
mod error;
mod keys;
mod stats;
mod watch;

pub use client::{EtcdClient, EtcdNode, EtcdResponse};
pub use error::{EtcdError, Result};
pub use keys::{KeysAction, KeysProducer};
pub use stats::{StatsAction, StatsProducer};
pub use watch::WatchConsumer;

/// Exchange header names used by this component.
pub mod headers {
    pub const ACTION: &str = "etcd.action";
    pub const PATH: &str = "etcd.path";
    pub const TTL: &str = "etcd.ttl";
    pub const INDEX: &str = "etcd.index";
    pub const TIMEOUT: &str = "etcd.timeout";
}

/// Connection and default-behavior settings for the component.
#[derive(Debug, Clone)]
pub struct EtcdConfig {
    pub url: String,

    /// Default action for the producer.
    pub action: Option<String>,

    /// Default path (producer) / watched path (consumer).
    pub path: Option<String>,

    /// Watch or delete a whole subtree.
    pub recursive: bool,

    /// Default TTL for set operations, in seconds.
    pub ttl: Option<u64>,

    /// Client-side bound for one wait-for-change request, in milliseconds.
    pub timeout_ms: u64,

    /// Index the first watch is issued with; 0 waits for the next change.
    pub first_index: u64,

    /// Synthesize one body-less exchange per timed-out wait.
    pub send_empty_exchange_on_timeout: bool,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:2379".to_string(),
            action: None,
            path: None,
            recursive: false,
            ttl: None,
            timeout_ms: 30_000,
            first_index: 0,
            send_empty_exchange_on_timeout: false,
        }
    }
}

impl EtcdConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_first_index(mut self, index: u64) -> Self {
        self.first_index = index;
        self
    }

    pub fn with_send_empty_exchange_on_timeout(mut self, send: bool) -> Self {
        self.send_empty_exchange_on_timeout = send;
        self
    }
}
