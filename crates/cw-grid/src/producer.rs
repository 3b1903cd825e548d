//! Dispatching producer over named maps and topics.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use cw_common::{Exchange, Producer};

use crate::error::{GridError, Result};
use crate::registry::AssetRegistry;
use crate::{headers, GridConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridAction {
    Publish,
    Put,
    GetAndPut,
    Get,
    GetAndRemove,
    Remove,
    Size,
    IsEmpty,
}

impl FromStr for GridAction {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "publish" => Ok(Self::Publish),
            "put" => Ok(Self::Put),
            "get_and_put" => Ok(Self::GetAndPut),
            "get" => Ok(Self::Get),
            "get_and_remove" => Ok(Self::GetAndRemove),
            "remove" => Ok(Self::Remove),
            "size" => Ok(Self::Size),
            "is_empty" => Ok(Self::IsEmpty),
            other => Err(GridError::UnknownAction(other.to_string())),
        }
    }
}

pub struct GridProducer {
    registry: Arc<dyn AssetRegistry>,
    config: GridConfig,
    path: String,
}

impl GridProducer {
    pub fn new(registry: Arc<dyn AssetRegistry>, config: GridConfig) -> Result<Self> {
        let path = config
            .path
            .clone()
            .ok_or_else(|| GridError::Config("producer requires a path".to_string()))?;

        Ok(Self {
            registry,
            config,
            path,
        })
    }

    fn action(&self, exchange: &Exchange) -> Result<GridAction> {
        exchange
            .header_str(headers::ACTION)
            .or(self.config.action.as_deref())
            .ok_or(GridError::MissingHeader(headers::ACTION))?
            .parse()
    }

    fn key(&self, exchange: &Exchange) -> Result<String> {
        exchange
            .header_str(headers::KEY)
            .or(self.config.key.as_deref())
            .map(String::from)
            .ok_or(GridError::MissingHeader(headers::KEY))
    }

    async fn publish(&self, exchange: &mut Exchange) -> Result<()> {
        let message = exchange.take_body().ok_or(GridError::MissingBody)?;
        self.registry.publish(&self.path, message).await?;
        Ok(())
    }

    async fn put(&self, exchange: &mut Exchange) -> Result<()> {
        let key = self.key(exchange)?;
        let value = exchange.take_body().ok_or(GridError::MissingBody)?;

        let old = self.registry.map_put(&self.path, &key, value).await?;
        if let Some(old) = old {
            exchange.set_header(headers::OLD_VALUE, old);
        }
        Ok(())
    }

    async fn get_and_put(&self, exchange: &mut Exchange) -> Result<()> {
        let key = self.key(exchange)?;
        let value = exchange.take_body().ok_or(GridError::MissingBody)?;

        match self.registry.map_put(&self.path, &key, value).await? {
            Some(old) => exchange.set_body(old),
            None => exchange.clear_body(),
        }
        Ok(())
    }

    async fn get(&self, exchange: &mut Exchange) -> Result<()> {
        let key = self.key(exchange)?;
        match self.registry.map_get(&self.path, &key).await? {
            Some(value) => exchange.set_body(value),
            None => exchange.clear_body(),
        }
        Ok(())
    }

    async fn get_and_remove(&self, exchange: &mut Exchange) -> Result<()> {
        let key = self.key(exchange)?;
        match self.registry.map_remove(&self.path, &key).await? {
            Some(old) => exchange.set_body(old),
            None => exchange.clear_body(),
        }
        Ok(())
    }

    async fn remove(&self, exchange: &mut Exchange) -> Result<()> {
        let key = self.key(exchange)?;
        self.registry.map_remove(&self.path, &key).await?;
        exchange.clear_body();
        Ok(())
    }

    async fn size(&self, exchange: &mut Exchange) -> Result<()> {
        let size = self.registry.map_size(&self.path).await?;
        exchange.set_body(size);
        Ok(())
    }

    async fn is_empty(&self, exchange: &mut Exchange) -> Result<()> {
        let size = self.registry.map_size(&self.path).await?;
        exchange.set_body(size == 0);
        Ok(())
    }
}

#[async_trait]
impl Producer for GridProducer {
    async fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()> {
        match self.action(exchange)? {
            GridAction::Publish => self.publish(exchange).await?,
            GridAction::Put => self.put(exchange).await?,
            GridAction::GetAndPut => self.get_and_put(exchange).await?,
            GridAction::Get => self.get(exchange).await?,
            GridAction::GetAndRemove => self.get_and_remove(exchange).await?,
            GridAction::Remove => self.remove(exchange).await?,
            GridAction::Size => self.size(exchange).await?,
            GridAction::IsEmpty => self.is_empty(exchange).await?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parsing() {
        assert_eq!(
            GridAction::from_str("GET_AND_PUT").unwrap(),
            GridAction::GetAndPut
        );
        assert!(matches!(
            GridAction::from_str("flush"),
            Err(GridError::UnknownAction(_))
        ));
    }
}
