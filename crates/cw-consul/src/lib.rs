//! Key/value coordination service component.
//!
//! Adapts exchanges onto a coordination agent's HTTP API:
//!
//! - **KV Producer**: header-selected actions against the KV store
//!   (put/get/delete, key listing, session lookup)
//! - **Event Producer**: fire user events
//! - **Agent Producer**: read the local agent's checks, services and members
//! - **KV watch consumer**: index-based long-poll on a key or prefix,
//!   one exchange per changed entry
//! - **Event watch consumer**: long-poll on the event log
//! - **Leader election**: session + advisory-lock based route policy,
//!   suspending managed routes while not leader
//!
//! The watch consumers are built on the shared loop in `cw-watch`; this
//! crate only contributes the poll sources and the entry-to-exchange
//! mapping.

mod agent;
mod client;
mod error;
mod event;
mod kv;
mod leader;

pub use agent::{AgentAction, AgentProducer};
pub use client::{BlockingQuery, ConsulClient, ConsulEvent, Indexed, KvPair, PutParams};
pub use error::{ConsulError, Result};
pub use event::{EventAction, EventProducer, EventWatchConsumer};
pub use kv::{KvAction, KvProducer, KvWatchConsumer};
pub use leader::{
    InMemoryLockService, LeaderElection, LeaderElectionConfig, LeadershipStatus, LockObservation,
    LockService, SuspendableRoute,
};

/// Exchange header names used by this component.
pub mod headers {
    pub const ACTION: &str = "consul.action";
    pub const KEY: &str = "consul.key";
    pub const RESULT: &str = "consul.result";
    pub const FLAGS: &str = "consul.flags";
    pub const INDEX: &str = "consul.index";
    pub const CREATE_INDEX: &str = "consul.create_index";
    pub const MODIFY_INDEX: &str = "consul.modify_index";
    pub const LOCK_INDEX: &str = "consul.lock_index";
    pub const SESSION: &str = "consul.session";
    pub const VALUE_AS_STRING: &str = "consul.value_as_string";
    pub const TIMEOUT: &str = "consul.timeout";

    pub const EVENT_ID: &str = "consul.event.id";
    pub const EVENT_NAME: &str = "consul.event.name";
    pub const EVENT_LTIME: &str = "consul.event.ltime";
    pub const EVENT_NODE_FILTER: &str = "consul.event.node_filter";
    pub const EVENT_SERVICE_FILTER: &str = "consul.event.service_filter";
    pub const EVENT_TAG_FILTER: &str = "consul.event.tag_filter";
    pub const EVENT_VERSION: &str = "consul.event.version";
}

/// Connection and default-behavior settings for the component.
///
/// Per-exchange headers override the defaults carried here; the watch
/// consumers read their key, block duration and starting index from this
/// configuration only.
#[derive(Debug, Clone)]
pub struct ConsulConfig {
    /// Agent URL.
    pub url: String,

    /// ACL token sent with every request, if set.
    pub acl_token: Option<String>,

    /// Default action for producers.
    pub action: Option<String>,

    /// Default key (producers) / watched key or prefix (consumers).
    pub key: Option<String>,

    /// Watch a whole prefix instead of a single key.
    pub recursive: bool,

    /// Transform KV values to UTF-8 strings instead of passing the raw
    /// transport encoding through.
    pub value_as_string: bool,

    /// Index the first poll is issued with.
    pub first_index: u64,

    /// Server-side bound for one blocking query, in seconds.
    pub block_seconds: u64,

    /// Synthesize one body-less exchange per timed-out poll.
    pub emit_on_timeout: bool,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8500".to_string(),
            acl_token: None,
            action: None,
            key: None,
            recursive: false,
            value_as_string: false,
            first_index: 0,
            block_seconds: 10,
            emit_on_timeout: false,
        }
    }
}

impl ConsulConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_acl_token(mut self, token: impl Into<String>) -> Self {
        self.acl_token = Some(token.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_value_as_string(mut self, value_as_string: bool) -> Self {
        self.value_as_string = value_as_string;
        self
    }

    pub fn with_first_index(mut self, index: u64) -> Self {
        self.first_index = index;
        self
    }

    pub fn with_block_seconds(mut self, seconds: u64) -> Self {
        self.block_seconds = seconds;
        self
    }

    pub fn with_emit_on_timeout(mut self, emit: bool) -> Self {
        self.emit_on_timeout = emit;
        self
    }
}
