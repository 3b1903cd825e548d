//! KV producer and watch consumer.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cw_common::{Exchange, Processor, Producer};
use cw_watch::{PollOutcome, PollSource, WatchConfig, WatchLoop, WatchSink};
use serde_json::Value;
use tracing::error;

use crate::client::{BlockingQuery, ConsulClient, KvPair, PutParams};
use crate::error::{ConsulError, Result};
use crate::{headers, ConsulConfig};

/// Actions the KV producer dispatches on. Parsed once per exchange from the
/// action header (falling back to the configured default); unknown strings
/// fail the request synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvAction {
    Put,
    GetValue,
    GetValues,
    GetKeys,
    GetSession,
    DeleteKey,
    DeleteKeys,
}

impl FromStr for KvAction {
    type Err = ConsulError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "put" => Ok(Self::Put),
            "get_value" => Ok(Self::GetValue),
            "get_values" => Ok(Self::GetValues),
            "get_keys" => Ok(Self::GetKeys),
            "get_session" => Ok(Self::GetSession),
            "delete_key" => Ok(Self::DeleteKey),
            "delete_keys" => Ok(Self::DeleteKeys),
            other => Err(ConsulError::UnknownAction(other.to_string())),
        }
    }
}

pub struct KvProducer {
    client: Arc<ConsulClient>,
    config: ConsulConfig,
}

impl KvProducer {
    pub fn new(client: Arc<ConsulClient>, config: ConsulConfig) -> Self {
        Self { client, config }
    }

    fn action(&self, exchange: &Exchange) -> Result<KvAction> {
        exchange
            .header_str(headers::ACTION)
            .or(self.config.action.as_deref())
            .ok_or(ConsulError::MissingHeader(headers::ACTION))?
            .parse()
    }

    fn key(&self, exchange: &Exchange) -> Result<String> {
        exchange
            .header_str(headers::KEY)
            .or(self.config.key.as_deref())
            .map(String::from)
            .ok_or(ConsulError::MissingHeader(headers::KEY))
    }

    fn value_as_string(&self, exchange: &Exchange) -> bool {
        exchange
            .header_bool(headers::VALUE_AS_STRING)
            .unwrap_or(self.config.value_as_string)
    }

    async fn put(&self, exchange: &mut Exchange) -> Result<()> {
        let key = self.key(exchange)?;
        let value = exchange
            .body_str()
            .map(String::from)
            .ok_or(ConsulError::MissingBody)?;
        let flags = exchange.header_u64(headers::FLAGS);

        let stored = self
            .client
            .put(&key, &value, flags, &PutParams::default())
            .await?;
        exchange.set_header(headers::RESULT, stored);
        Ok(())
    }

    async fn get_value(&self, exchange: &mut Exchange) -> Result<()> {
        let key = self.key(exchange)?;
        let page = self.client.get_value(&key, None).await?;
        let pair = page.value.into_iter().next();

        exchange.set_header(headers::RESULT, pair.is_some());
        match pair {
            Some(pair) if self.value_as_string(exchange) => match pair.value_as_utf8()? {
                Some(text) => exchange.set_body(text),
                None => exchange.clear_body(),
            },
            Some(pair) => exchange.set_body(serde_json::to_value(&pair).unwrap_or(Value::Null)),
            None => exchange.clear_body(),
        }
        Ok(())
    }

    async fn get_values(&self, exchange: &mut Exchange) -> Result<()> {
        let key = self.key(exchange)?;
        let page = self.client.get_values(&key, None).await?;

        exchange.set_header(headers::RESULT, !page.value.is_empty());
        if self.value_as_string(exchange) {
            let mut texts = Vec::with_capacity(page.value.len());
            for pair in &page.value {
                texts.push(pair.value_as_utf8()?.map(Value::from).unwrap_or(Value::Null));
            }
            exchange.set_body(Value::Array(texts));
        } else {
            exchange.set_body(serde_json::to_value(&page.value).unwrap_or(Value::Null));
        }
        Ok(())
    }

    async fn get_keys(&self, exchange: &mut Exchange) -> Result<()> {
        let key = self.key(exchange)?;
        let keys = self.client.get_keys(&key).await?;

        exchange.set_header(headers::RESULT, !keys.is_empty());
        exchange.set_body(serde_json::to_value(keys).unwrap_or(Value::Null));
        Ok(())
    }

    async fn get_session(&self, exchange: &mut Exchange) -> Result<()> {
        let key = self.key(exchange)?;
        let page = self.client.get_value(&key, None).await?;
        let session = page.value.into_iter().next().and_then(|pair| pair.session);

        exchange.set_header(headers::RESULT, session.is_some());
        match session {
            Some(session) => exchange.set_body(session),
            None => exchange.clear_body(),
        }
        Ok(())
    }

    async fn delete_key(&self, exchange: &mut Exchange) -> Result<()> {
        let key = self.key(exchange)?;
        self.client.delete(&key).await?;
        exchange.set_header(headers::RESULT, true);
        Ok(())
    }

    async fn delete_keys(&self, exchange: &mut Exchange) -> Result<()> {
        let key = self.key(exchange)?;
        self.client.delete_tree(&key).await?;
        exchange.set_header(headers::RESULT, true);
        Ok(())
    }
}

#[async_trait]
impl Producer for KvProducer {
    async fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()> {
        match self.action(exchange)? {
            KvAction::Put => self.put(exchange).await?,
            KvAction::GetValue => self.get_value(exchange).await?,
            KvAction::GetValues => self.get_values(exchange).await?,
            KvAction::GetKeys => self.get_keys(exchange).await?,
            KvAction::GetSession => self.get_session(exchange).await?,
            KvAction::DeleteKey => self.delete_key(exchange).await?,
            KvAction::DeleteKeys => self.delete_keys(exchange).await?,
        }
        Ok(())
    }
}

// ============================================================================
// Watch consumer
// ============================================================================

pub(crate) struct KvPollSource {
    client: Arc<ConsulClient>,
    key: String,
    recursive: bool,
}

#[async_trait]
impl PollSource for KvPollSource {
    type Item = KvPair;

    async fn poll(&self, index: u64, block: Duration) -> anyhow::Result<PollOutcome<KvPair>> {
        let query = BlockingQuery { index, wait: block };
        let page = if self.recursive {
            self.client.get_values(&self.key, Some(&query)).await?
        } else {
            self.client.get_value(&self.key, Some(&query)).await?
        };

        // An unchanged index means the wait elapsed with nothing new.
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

struct KvExchangeSink {
    processor: Arc<dyn Processor>,
    key: String,
    value_as_string: bool,
}

#[async_trait]
impl WatchSink<KvPair> for KvExchangeSink {
    async fn deliver(&self, pair: KvPair, index: u64) -> anyhow::Result<()> {
        let mut exchange = Exchange::new();
        exchange.set_header(headers::KEY, pair.key.clone());
        exchange.set_header(headers::RESULT, true);
        exchange.set_header(headers::FLAGS, pair.flags);
        exchange.set_header(headers::INDEX, index);
        exchange.set_header(headers::CREATE_INDEX, pair.create_index);
        exchange.set_header(headers::MODIFY_INDEX, pair.modify_index);
        exchange.set_header(headers::LOCK_INDEX, pair.lock_index);
        if let Some(session) = &pair.session {
            exchange.set_header(headers::SESSION, session.clone());
        }

        if self.value_as_string {
            match pair.value_as_utf8() {
                Ok(Some(text)) => exchange.set_body(text),
                Ok(None) => {}
                Err(e) => {
                    error!(key = %pair.key, error = %e, "undecodable value");
                    return Err(e.into());
                }
            }
        } else if let Some(raw) = pair.value {
            exchange.set_body(raw);
        }

        self.processor.process(exchange).await
    }

    async fn deliver_timeout(&self) -> anyhow::Result<()> {
        let mut exchange = Exchange::new();
        exchange.set_header(headers::KEY, self.key.clone());
        exchange.set_header(headers::TIMEOUT, true);
        self.processor.process(exchange).await
    }
}

/// Watches a key (or, recursively, a prefix) and emits one exchange per
/// changed entry.
pub struct KvWatchConsumer {
    inner: Arc<WatchLoop<KvPollSource>>,
}

impl KvWatchConsumer {
    pub fn new(
        client: Arc<ConsulClient>,
        config: ConsulConfig,
        processor: Arc<dyn Processor>,
    ) -> Result<Self> {
        let key = config
            .key
            .clone()
            .ok_or_else(|| ConsulError::Config("watch requires a key".to_string()))?;

        let source = KvPollSource {
            client,
            key: key.clone(),
            recursive: config.recursive,
        };
        let sink = Arc::new(KvExchangeSink {
            processor,
            key: key.clone(),
            value_as_string: config.value_as_string,
        });
        let watch_config = WatchConfig::new(format!("consul-kv:{key}"))
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

    /// The current resume index.
    pub fn index(&self) -> u64 {
        self.inner.index()
    }
}
