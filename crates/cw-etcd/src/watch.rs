//! Wait-for-change watch consumer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cw_common::{Exchange, Processor};
use cw_watch::{PollOutcome, PollSource, WatchConfig, WatchLoop, WatchSink};
use serde_json::Value;

use crate::client::{EtcdClient, EtcdResponse};
use crate::error::{EtcdError, Result};
use crate::{headers, EtcdConfig};

struct KeysPollSource {
    client: Arc<EtcdClient>,
    path: String,
    recursive: bool,
}

#[async_trait]
impl PollSource for KeysPollSource {
    type Item = EtcdResponse;

    async fn poll(&self, index: u64, block: Duration) -> anyhow::Result<PollOutcome<EtcdResponse>> {
        // The wait request has no server-side bound; the block duration is
        // enforced client-side and an elapsed wait is a plain timeout.
        let request = self.client.watch(&self.path, index, self.recursive);
        match tokio::time::timeout(block, request).await {
            Ok(Ok(response)) => {
                let next = response.node.modified_index + 1;
                Ok(PollOutcome::Changed {
                    items: vec![response],
                    index: next,
                })
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(PollOutcome::Timeout),
        }
    }
}

struct KeysExchangeSink {
    processor: Arc<dyn Processor>,
    path: String,
}

#[async_trait]
impl WatchSink<EtcdResponse> for KeysExchangeSink {
    async fn deliver(&self, response: EtcdResponse, _index: u64) -> anyhow::Result<()> {
        let mut exchange = Exchange::new();
        exchange.set_header(headers::PATH, response.node.key.clone());
        exchange.set_header(headers::ACTION, response.action.clone());
        exchange.set_header(headers::INDEX, response.node.modified_index);
        exchange.set_body(serde_json::to_value(&response.node).unwrap_or(Value::Null));

        self.processor.process(exchange).await
    }

    async fn deliver_timeout(&self) -> anyhow::Result<()> {
        let mut exchange = Exchange::new();
        exchange.set_header(headers::PATH, self.path.clone());
        exchange.set_header(headers::TIMEOUT, true);
        self.processor.process(exchange).await
    }
}

/// Watches a path for changes and emits one exchange per change, resuming
/// from the modification index after the last delivered one.
pub struct WatchConsumer {
    inner: Arc<WatchLoop<KeysPollSource>>,
}

impl WatchConsumer {
    pub fn new(
        client: Arc<EtcdClient>,
        config: EtcdConfig,
        processor: Arc<dyn Processor>,
    ) -> Result<Self> {
        let path = config
            .path
            .clone()
            .ok_or_else(|| EtcdError::Config("watch requires a path".to_string()))?;

        let source = KeysPollSource {
            client,
            path: path.clone(),
            recursive: config.recursive,
        };
        let sink = Arc::new(KeysExchangeSink {
            processor,
            path: path.clone(),
        });
        let watch_config = WatchConfig::new(format!("etcd:{path}"))
            .with_block(Duration::from_millis(config.timeout_ms))
            .with_first_index(config.first_index)
            .with_emit_on_timeout(config.send_empty_exchange_on_timeout);

        Ok(Self {
            inner: WatchLoop::new(source, sink, watch_config),
        })
    }

    pub fn start(&self) -> Result<()> {
        self.inner.clone().start()?;
        Ok(())
    }

    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// The index the next wait will be issued with.
    pub fn index(&self) -> u64 {
        self.inner.index()
    }
}
