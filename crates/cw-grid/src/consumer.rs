//! Subscription consumer: forwards registry events as exchanges.

use std::sync::Arc;

use async_trait::async_trait;
use cw_common::{Exchange, Processor};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::{GridError, Result};
use crate::registry::{AssetRegistry, MapEvent, TopicEvent, TopologyEvent};
use crate::{headers, GridConfig};

/// Forwards pushed registry events to the downstream processor, one
/// exchange per event. Each enabled subscription runs its own forwarding
/// task; processor failures are reported and never stop a subscription.
pub struct GridConsumer {
    registry: Arc<dyn AssetRegistry>,
    config: GridConfig,
    path: String,
    processor: Arc<dyn Processor>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl GridConsumer {
    pub fn new(
        registry: Arc<dyn AssetRegistry>,
        config: GridConfig,
        processor: Arc<dyn Processor>,
    ) -> Result<Self> {
        let path = config
            .path
            .clone()
            .ok_or_else(|| GridError::Config("consumer requires a path".to_string()))?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            registry,
            config,
            path,
            processor,
            shutdown_tx,
            tasks: parking_lot::Mutex::new(Vec::new()),
        })
    }

    pub async fn start(&self) -> Result<()> {
        if !self.tasks.lock().is_empty() {
            return Err(GridError::Config("consumer already started".to_string()));
        }

        info!(path = %self.path, "starting grid consumer");

        let mut handles = Vec::new();
        if self.config.subscribe_map_events {
            let events = self.registry.subscribe_map_events(&self.path).await;
            handles.push(self.forward_map_events(events));
        }
        if self.config.subscribe_topology_events {
            let events = self.registry.subscribe_topology_events(&self.path).await;
            handles.push(self.forward_topology_events(events));
        }
        if self.config.subscribe_topic_events {
            let events = self.registry.subscribe_topic_events(&self.path).await;
            handles.push(self.forward_topic_events(events));
        }

        self.tasks.lock().extend(handles);
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
        self.tasks.lock().clear();
    }

    fn forward_map_events(&self, mut events: mpsc::Receiver<MapEvent>) -> JoinHandle<()> {
        let processor = self.processor.clone();
        let path = self.path.clone();
        let filtered = self.config.filtered_map_events.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        if filtered.contains(&event.kind) {
                            continue;
                        }

                        let mut exchange = Exchange::new();
                        exchange.set_header(headers::PATH, path.clone());
                        exchange.set_header(headers::EVENT_TYPE, event.kind.name());
                        exchange.set_header(headers::KEY, event.key);
                        if let Some(old) = event.old_value {
                            exchange.set_header(headers::OLD_VALUE, old);
                        }
                        if let Some(value) = event.value {
                            exchange.set_body(value);
                        }

                        if let Err(e) = processor.process(exchange).await {
                            error!(path = %path, error = %e, "error processing map event");
                        }
                    }
                }
            }
        })
    }

    fn forward_topology_events(
        &self,
        mut events: mpsc::Receiver<TopologyEvent>,
    ) -> JoinHandle<()> {
        let processor = self.processor.clone();
        let path = self.path.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    event = events.recv() => {
                        let Some(event) = event else { break };

                        let mut exchange = Exchange::new();
                        exchange.set_header(headers::PATH, path.clone());
                        exchange.set_header(headers::TOPOLOGY_NAME, event.asset_name);
                        exchange.set_header(headers::TOPOLOGY_FULL_NAME, event.full_name);
                        exchange.set_header(headers::TOPOLOGY_ADDED, event.added);

                        if let Err(e) = processor.process(exchange).await {
                            error!(path = %path, error = %e, "error processing topology event");
                        }
                    }
                }
            }
        })
    }

    fn forward_topic_events(&self, mut events: mpsc::Receiver<TopicEvent>) -> JoinHandle<()> {
        let processor = self.processor.clone();
        let path = self.path.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    event = events.recv() => {
                        let Some(event) = event else { break };

                        let mut exchange = Exchange::new();
                        exchange.set_header(headers::PATH, path.clone());
                        exchange.set_header(headers::TOPIC, event.topic);
                        if event.message != Value::Null {
                            exchange.set_body(event.message);
                        }

                        if let Err(e) = processor.process(exchange).await {
                            error!(path = %path, error = %e, "error processing topic event");
                        }
                    }
                }
            }
        })
    }
}
