//! Event producer and watch consumer.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cw_common::{Exchange, Processor, Producer};
use cw_watch::{PollOutcome, PollSource, WatchConfig, WatchLoop, WatchSink};
use serde_json::Value;

use crate::client::{BlockingQuery, ConsulClient, ConsulEvent};
use crate::error::{ConsulError, Result};
use crate::{headers, ConsulConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Fire,
}

impl FromStr for EventAction {
    type Err = ConsulError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fire" => Ok(Self::Fire),
            other => Err(ConsulError::UnknownAction(other.to_string())),
        }
    }
}

pub struct EventProducer {
    client: Arc<ConsulClient>,
    config: ConsulConfig,
}

impl EventProducer {
    pub fn new(client: Arc<ConsulClient>, config: ConsulConfig) -> Self {
        Self { client, config }
    }

    fn action(&self, exchange: &Exchange) -> Result<EventAction> {
        exchange
            .header_str(headers::ACTION)
            .or(self.config.action.as_deref())
            .ok_or(ConsulError::MissingHeader(headers::ACTION))?
            .parse()
    }

    fn name(&self, exchange: &Exchange) -> Result<String> {
        exchange
            .header_str(headers::KEY)
            .or(self.config.key.as_deref())
            .map(String::from)
            .ok_or(ConsulError::MissingHeader(headers::KEY))
    }

    async fn fire(&self, exchange: &mut Exchange) -> Result<()> {
        let name = self.name(exchange)?;
        let payload = exchange.body_str().map(String::from);

        let event = self.client.fire_event(&name, payload.as_deref()).await?;

        exchange.set_header(headers::RESULT, true);
        exchange.set_header(headers::EVENT_ID, event.id.clone());
        exchange.set_header(headers::EVENT_NAME, event.name.clone());
        exchange.set_body(serde_json::to_value(&event).unwrap_or(Value::Null));
        Ok(())
    }
}

#[async_trait]
impl Producer for EventProducer {
    async fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()> {
        match self.action(exchange)? {
            EventAction::Fire => self.fire(exchange).await?,
        }
        Ok(())
    }
}

// ============================================================================
// Watch consumer
// ============================================================================

pub(crate) struct EventPollSource {
    client: Arc<ConsulClient>,
    name: String,
}

#[async_trait]
impl PollSource for EventPollSource {
    type Item = ConsulEvent;

    async fn poll(&self, index: u64, block: Duration) -> anyhow::Result<PollOutcome<ConsulEvent>> {
        let query = BlockingQuery { index, wait: block };
        let page = self.client.list_events(&self.name, Some(&query)).await?;

        if page.index <= index {
            Ok(PollOutcome::Timeout)
        } else {
            Ok(PollOutcome::Changed {
                items: page.value,
                index: page.index,
            })
        }
    }
}

struct EventExchangeSink {
    processor: Arc<dyn Processor>,
    name: String,
}

#[async_trait]
impl WatchSink<ConsulEvent> for EventExchangeSink {
    async fn deliver(&self, event: ConsulEvent, index: u64) -> anyhow::Result<()> {
        let mut exchange = Exchange::new();
        exchange.set_header(headers::KEY, self.name.clone());
        exchange.set_header(headers::RESULT, true);
        exchange.set_header(headers::INDEX, index);
        exchange.set_header(headers::EVENT_ID, event.id.clone());
        exchange.set_header(headers::EVENT_NAME, event.name.clone());
        exchange.set_header(headers::EVENT_LTIME, event.l_time);
        exchange.set_header(headers::EVENT_VERSION, event.version);
        if let Some(filter) = &event.node_filter {
            exchange.set_header(headers::EVENT_NODE_FILTER, filter.clone());
        }
        if let Some(filter) = &event.service_filter {
            exchange.set_header(headers::EVENT_SERVICE_FILTER, filter.clone());
        }
        if let Some(filter) = &event.tag_filter {
            exchange.set_header(headers::EVENT_TAG_FILTER, filter.clone());
        }

        if let Some(payload) = event.payload_as_utf8()? {
            exchange.set_body(payload);
        }

        self.processor.process(exchange).await
    }

    async fn deliver_timeout(&self) -> anyhow::Result<()> {
        let mut exchange = Exchange::new();
        exchange.set_header(headers::KEY, self.name.clone());
        exchange.set_header(headers::TIMEOUT, true);
        self.processor.process(exchange).await
    }
}

/// Watches the event log for a named event and emits one exchange per event
/// in each batch, in remote order.
pub struct EventWatchConsumer {
    inner: Arc<WatchLoop<EventPollSource>>,
}

impl EventWatchConsumer {
    pub fn new(
        client: Arc<ConsulClient>,
        config: ConsulConfig,
        processor: Arc<dyn Processor>,
    ) -> Result<Self> {
        let name = config
            .key
            .clone()
            .ok_or_else(|| ConsulError::Config("event watch requires a name".to_string()))?;

        let source = EventPollSource {
            client,
            name: name.clone(),
        };
        let sink = Arc::new(EventExchangeSink {
            processor,
            name: name.clone(),
        });
        let watch_config = WatchConfig::new(format!("consul-event:{name}"))
            .with_block(Duration::from_secs(config.block_seconds))
            .with_first_index(config.first_index)
            .with_emit_on_timeout(config.emit_on_timeout);

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

    pub fn index(&self) -> u64 {
        self.inner.index()
    }
}
