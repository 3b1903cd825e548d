//! Embeddable cache component.
//!
//! Wraps an in-process concurrent map behind the same producer contract as
//! the remote components: an action header selects the operation, result
//! headers report success and displaced values.

mod error;
mod producer;

pub use error::{CacheError, Result};
pub use producer::{CacheAction, CacheProducer};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

/// Exchange header names used by this component.
pub mod headers {
    pub const ACTION: &str = "cache.action";
    pub const KEY: &str = "cache.key";
    pub const KEYS: &str = "cache.keys";
    pub const VALUE: &str = "cache.value";
    pub const OLD_VALUE: &str = "cache.old_value";
    pub const SUCCESS: &str = "cache.success";
    pub const HAS_RESULT: &str = "cache.has_result";
}

/// Default-behavior settings for the component.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Default action for the producer.
    pub action: Option<String>,

    /// Default key for single-entry operations.
    pub key: Option<String>,
}

impl CacheConfig {
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

/// The embeddable cache: a string-keyed concurrent map of JSON values.
pub struct Cache {
    entries: DashMap<String, Value>,
}

impl Cache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn put(&self, key: &str, value: Value) -> Option<Value> {
        self.entries.insert(key.to_string(), value)
    }

    pub fn put_if_absent(&self, key: &str, value: Value) -> Option<Value> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(value);
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|v| v.clone())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    /// Remove only when the current value equals `expected`.
    pub fn remove_if(&self, key: &str, expected: &Value) -> bool {
        self.entries.remove_if(key, |_, v| v == expected).is_some()
    }

    /// Replace only when an entry exists, returning the displaced value.
    pub fn replace(&self, key: &str, value: Value) -> Option<Value> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => Some(entry.insert(value)),
            Entry::Vacant(_) => None,
        }
    }

    /// Replace only when the current value equals `expected`.
    pub fn replace_if(&self, key: &str, expected: &Value, value: Value) -> bool {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) if entry.get() == expected => {
                entry.insert(value);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}
