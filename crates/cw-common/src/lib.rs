use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

pub mod logging;

// ============================================================================
// Exchange
// ============================================================================

/// The unit of routed data handed to and produced by components.
///
/// An exchange is the host framework's envelope: a header map plus an
/// optional body. Components read their inputs from headers (falling back to
/// configured defaults) and write results back onto the same exchange.
/// Header values and bodies are JSON values so that components can carry
/// strings, numbers, and structured payloads without per-component codecs.
#[derive(Debug, Clone)]
pub struct Exchange {
    id: String,
    headers: HashMap<String, Value>,
    body: Option<Value>,
}

impl Exchange {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn headers(&self) -> &HashMap<String, Value> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.get(name)
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(Value::as_str)
    }

    pub fn header_u64(&self, name: &str) -> Option<u64> {
        self.headers.get(name).and_then(Value::as_u64)
    }

    pub fn header_bool(&self, name: &str) -> Option<bool> {
        self.headers.get(name).and_then(Value::as_bool)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn remove_header(&mut self, name: &str) -> Option<Value> {
        self.headers.remove(name)
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn body_str(&self) -> Option<&str> {
        self.body.as_ref().and_then(Value::as_str)
    }

    pub fn set_body(&mut self, body: impl Into<Value>) {
        self.body = Some(body.into());
    }

    pub fn clear_body(&mut self) {
        self.body = None;
    }

    pub fn take_body(&mut self) -> Option<Value> {
        self.body.take()
    }

    /// Builder-style header assignment, convenient for tests and producers
    /// that construct request exchanges inline.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Value>) -> Self {
        self.set_body(body);
        self
    }
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Component seams
// ============================================================================

/// Downstream callback invoked by consumers for every inbound exchange.
///
/// Errors returned here are reported through the consumer's error channel
/// and never abort the consumer.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, exchange: Exchange) -> anyhow::Result<()>;
}

/// Entry point of a component's outbound side. The producer mutates the
/// exchange in place: result headers and the response body are written back
/// onto it. Caller-input errors (missing mandatory header, unknown action)
/// propagate synchronously to the caller.
#[async_trait]
pub trait Producer: Send + Sync {
    async fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()>;
}
