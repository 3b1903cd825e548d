//! The asset-registry seam and its in-process implementation.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::GridError;

const SUBSCRIPTION_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapEventKind {
    Insert,
    Update,
    Remove,
}

impl MapEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Remove => "REMOVE",
        }
    }
}

impl FromStr for MapEventKind {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, GridError> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "REMOVE" => Ok(Self::Remove),
            other => Err(GridError::UnknownEventKind(other.to_string())),
        }
    }
}

/// A mutation of a named map.
#[derive(Debug, Clone)]
pub struct MapEvent {
    pub path: String,
    pub kind: MapEventKind,
    pub key: String,
    pub value: Option<Value>,
    pub old_value: Option<Value>,
}

/// An asset appearing in or leaving the tree.
#[derive(Debug, Clone)]
pub struct TopologyEvent {
    pub asset_name: String,
    pub full_name: String,
    pub added: bool,
}

/// A message published to a topic.
#[derive(Debug, Clone)]
pub struct TopicEvent {
    pub topic: String,
    pub message: Value,
}

/// Client interface of the remote tree/asset registry. Subscriptions push
/// events over a channel; map and topic operations are request/response.
#[async_trait]
pub trait AssetRegistry: Send + Sync + 'static {
    async fn subscribe_map_events(&self, path: &str) -> mpsc::Receiver<MapEvent>;
    async fn subscribe_topology_events(&self, path: &str) -> mpsc::Receiver<TopologyEvent>;
    async fn subscribe_topic_events(&self, path: &str) -> mpsc::Receiver<TopicEvent>;

    async fn publish(&self, path: &str, message: Value) -> anyhow::Result<()>;
    async fn map_put(&self, path: &str, key: &str, value: Value) -> anyhow::Result<Option<Value>>;
    async fn map_get(&self, path: &str, key: &str) -> anyhow::Result<Option<Value>>;
    async fn map_remove(&self, path: &str, key: &str) -> anyhow::Result<Option<Value>>;
    async fn map_size(&self, path: &str) -> anyhow::Result<u64>;
}

// ============================================================================
// In-memory registry
// ============================================================================

struct Subscribers<T> {
    by_path: Mutex<HashMap<String, Vec<mpsc::Sender<T>>>>,
}

impl<T: Clone> Subscribers<T> {
    fn new() -> Self {
        Self {
            by_path: Mutex::new(HashMap::new()),
        }
    }

    fn subscribe(&self, path: &str) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.by_path
            .lock()
            .entry(path.to_string())
            .or_default()
            .push(tx);
        rx
    }

    fn publish(&self, path: &str, event: T) {
        let mut by_path = self.by_path.lock();
        if let Some(senders) = by_path.get_mut(path) {
            senders.retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(path = %path, "dropping event for slow subscriber");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
    }
}

/// In-process [`AssetRegistry`] backed by concurrent maps. Serves embedded
/// deployments and tests.
pub struct InMemoryRegistry {
    maps: DashMap<String, DashMap<String, Value>>,
    map_subscribers: Subscribers<MapEvent>,
    topology_subscribers: Subscribers<TopologyEvent>,
    topic_subscribers: Subscribers<TopicEvent>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            maps: DashMap::new(),
            map_subscribers: Subscribers::new(),
            topology_subscribers: Subscribers::new(),
            topic_subscribers: Subscribers::new(),
        }
    }

    fn asset_name(path: &str) -> String {
        path.rsplit('/').next().unwrap_or(path).to_string()
    }

    /// Get or create the named map, announcing new assets to topology
    /// subscribers.
    fn map(&self, path: &str) -> dashmap::mapref::one::Ref<'_, String, DashMap<String, Value>> {
        let mut inserted = false;
        let entry = self.maps.entry(path.to_string()).or_insert_with(|| {
            inserted = true;
            DashMap::new()
        });
        drop(entry);

        if inserted {
            self.topology_subscribers.publish(
                path,
                TopologyEvent {
                    asset_name: Self::asset_name(path),
                    full_name: path.to_string(),
                    added: true,
                },
            );
        }

        self.maps.get(path).expect("map just ensured")
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssetRegistry for InMemoryRegistry {
    async fn subscribe_map_events(&self, path: &str) -> mpsc::Receiver<MapEvent> {
        self.map_subscribers.subscribe(path)
    }

    async fn subscribe_topology_events(&self, path: &str) -> mpsc::Receiver<TopologyEvent> {
        self.topology_subscribers.subscribe(path)
    }

    async fn subscribe_topic_events(&self, path: &str) -> mpsc::Receiver<TopicEvent> {
        self.topic_subscribers.subscribe(path)
    }

    async fn publish(&self, path: &str, message: Value) -> anyhow::Result<()> {
        self.topic_subscribers.publish(
            path,
            TopicEvent {
                topic: path.to_string(),
                message,
            },
        );
        Ok(())
    }

    async fn map_put(&self, path: &str, key: &str, value: Value) -> anyhow::Result<Option<Value>> {
        let old = self.map(path).insert(key.to_string(), value.clone());

        self.map_subscribers.publish(
            path,
            MapEvent {
                path: path.to_string(),
                kind: if old.is_some() {
                    MapEventKind::Update
                } else {
                    MapEventKind::Insert
                },
                key: key.to_string(),
                value: Some(value),
                old_value: old.clone(),
            },
        );
        Ok(old)
    }

    async fn map_get(&self, path: &str, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self
            .maps
            .get(path)
            .and_then(|map| map.get(key).map(|v| v.clone())))
    }

    async fn map_remove(&self, path: &str, key: &str) -> anyhow::Result<Option<Value>> {
        let old = self
            .maps
            .get(path)
            .and_then(|map| map.remove(key).map(|(_, v)| v));

        if old.is_some() {
            self.map_subscribers.publish(
                path,
                MapEvent {
                    path: path.to_string(),
                    kind: MapEventKind::Remove,
                    key: key.to_string(),
                    value: None,
                    old_value: old.clone(),
                },
            );
        }
        Ok(old)
    }

    async fn map_size(&self, path: &str) -> anyhow::Result<u64> {
        Ok(self.maps.get(path).map(|map| map.len() as u64).unwrap_or(0))
    }
}
