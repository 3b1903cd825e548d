//! Tree data grid component.
//!
//! The remote registry speaks a vendor protocol; this component binds to the
//! [`AssetRegistry`] seam instead: push subscriptions deliver map-mutation,
//! topology and topic events over channels, and producers operate on named
//! maps and topics. [`InMemoryRegistry`] implements the seam for embedded
//! use and tests; embedders with a remote registry provide their own
//! implementation.

mod consumer;
mod error;
mod producer;
mod registry;

pub use consumer::GridConsumer;
pub use error::{GridError, Result};
pub use producer::{GridAction, GridProducer};
pub use registry::{
    AssetRegistry, InMemoryRegistry, MapEvent, MapEventKind, TopicEvent, TopologyEvent,
};

/// Exchange header names used by this component.
pub mod headers {
    pub const ACTION: &str = "grid.action";
    pub const PATH: &str = "grid.path";
    pub const KEY: &str = "grid.key";
    pub const OLD_VALUE: &str = "grid.old_value";
    pub const EVENT_TYPE: &str = "grid.event_type";
    pub const TOPOLOGY_NAME: &str = "grid.topology.name";
    pub const TOPOLOGY_FULL_NAME: &str = "grid.topology.full_name";
    pub const TOPOLOGY_ADDED: &str = "grid.topology.added";
    pub const TOPIC: &str = "grid.topic";
}

/// Connection and default-behavior settings for the component.
#[derive(Debug, Clone)]
pub struct GridConfig {
    /// Asset path the component operates on.
    pub path: Option<String>,

    /// Default action for the producer.
    pub action: Option<String>,

    /// Default map key for the producer.
    pub key: Option<String>,

    /// Subscribe to map-mutation events.
    pub subscribe_map_events: bool,

    /// Map-mutation kinds to drop instead of delivering.
    pub filtered_map_events: Vec<MapEventKind>,

    /// Subscribe to topology events.
    pub subscribe_topology_events: bool,

    /// Subscribe to topic events.
    pub subscribe_topic_events: bool,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            path: None,
            action: None,
            key: None,
            subscribe_map_events: true,
            filtered_map_events: Vec::new(),
            subscribe_topology_events: false,
            subscribe_topic_events: false,
        }
    }
}

impl GridConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_subscribe_map_events(mut self, subscribe: bool) -> Self {
        self.subscribe_map_events = subscribe;
        self
    }

    pub fn with_filtered_map_events(mut self, filtered: Vec<MapEventKind>) -> Self {
        self.filtered_map_events = filtered;
        self
    }

    pub fn with_subscribe_topology_events(mut self, subscribe: bool) -> Self {
        self.subscribe_topology_events = subscribe;
        self
    }

    pub fn with_subscribe_topic_events(mut self, subscribe: bool) -> Self {
        self.subscribe_topic_events = subscribe;
        self
    }
}
