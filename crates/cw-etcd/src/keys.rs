//! Keys producer.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use cw_common::{Exchange, Producer};
use serde_json::Value;

use crate::client::{EtcdClient, EtcdResponse};
use crate::error::{EtcdError, Result};
use crate::{headers, EtcdConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeysAction {
    Set,
    Get,
    Delete,
}

impl FromStr for KeysAction {
    type Err = EtcdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "set" => Ok(Self::Set),
            "get" => Ok(Self::Get),
            "delete" => Ok(Self::Delete),
            other => Err(EtcdError::UnknownAction(other.to_string())),
        }
    }
}

pub struct KeysProducer {
    client: Arc<EtcdClient>,
    config: EtcdConfig,
}

impl KeysProducer {
    pub fn new(client: Arc<EtcdClient>, config: EtcdConfig) -> Self {
        Self { client, config }
    }

    fn action(&self, exchange: &Exchange) -> Result<KeysAction> {
        exchange
            .header_str(headers::ACTION)
            .or(self.config.action.as_deref())
            .ok_or(EtcdError::MissingHeader(headers::ACTION))?
            .parse()
    }

    fn path(&self, exchange: &Exchange) -> Result<String> {
        exchange
            .header_str(headers::PATH)
            .or(self.config.path.as_deref())
            .map(String::from)
            .ok_or(EtcdError::MissingHeader(headers::PATH))
    }

    fn apply_response(exchange: &mut Exchange, response: &EtcdResponse) {
        exchange.set_header(headers::PATH, response.node.key.clone());
        exchange.set_header(headers::ACTION, response.action.clone());
        exchange.set_header(headers::INDEX, response.node.modified_index);
        exchange.set_body(serde_json::to_value(&response.node).unwrap_or(Value::Null));
    }

    async fn set(&self, exchange: &mut Exchange) -> Result<()> {
        let path = self.path(exchange)?;
        let value = exchange
            .body_str()
            .map(String::from)
            .ok_or(EtcdError::MissingBody)?;
        let ttl = exchange.header_u64(headers::TTL).or(self.config.ttl);

        let response = self.client.put(&path, &value, ttl).await?;
        Self::apply_response(exchange, &response);
        Ok(())
    }

    async fn get(&self, exchange: &mut Exchange) -> Result<()> {
        let path = self.path(exchange)?;
        let response = self.client.get(&path, self.config.recursive).await?;
        Self::apply_response(exchange, &response);
        Ok(())
    }

    async fn delete(&self, exchange: &mut Exchange) -> Result<()> {
        let path = self.path(exchange)?;
        let response = self.client.delete(&path, self.config.recursive).await?;
        Self::apply_response(exchange, &response);
        Ok(())
    }
}

#[async_trait]
impl Producer for KeysProducer {
    async fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()> {
        match self.action(exchange)? {
            KeysAction::Set => self.set(exchange).await?,
            KeysAction::Get => self.get(exchange).await?,
            KeysAction::Delete => self.delete(exchange).await?,
        }
        Ok(())
    }
}
