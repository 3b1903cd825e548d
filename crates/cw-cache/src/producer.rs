//! Dispatching producer over the cache.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use cw_common::{Exchange, Producer};
use serde_json::{Map, Value};

use crate::error::{CacheError, Result};
use crate::{headers, Cache, CacheConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    Clear,
    Put,
    PutAll,
    PutIfAbsent,
    Get,
    GetAll,
    Remove,
    RemoveAll,
    Replace,
}

impl FromStr for CacheAction {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "clear" => Ok(Self::Clear),
            "put" => Ok(Self::Put),
            "put_all" => Ok(Self::PutAll),
            "put_if_absent" => Ok(Self::PutIfAbsent),
            "get" => Ok(Self::Get),
            "get_all" => Ok(Self::GetAll),
            "remove" => Ok(Self::Remove),
            "remove_all" => Ok(Self::RemoveAll),
            "replace" => Ok(Self::Replace),
            other => Err(CacheError::UnknownAction(other.to_string())),
        }
    }
}

pub struct CacheProducer {
    cache: Arc<Cache>,
    config: CacheConfig,
}

impl CacheProducer {
    pub fn new(cache: Arc<Cache>, config: CacheConfig) -> Self {
        Self { cache, config }
    }

    fn action(&self, exchange: &Exchange) -> Result<CacheAction> {
        exchange
            .header_str(headers::ACTION)
            .or(self.config.action.as_deref())
            .ok_or(CacheError::MissingHeader(headers::ACTION))?
            .parse()
    }

    fn key(&self, exchange: &Exchange) -> Result<String> {
        exchange
            .header_str(headers::KEY)
            .or(self.config.key.as_deref())
            .map(String::from)
            .ok_or(CacheError::MissingHeader(headers::KEY))
    }

    /// The value header wins over the body, matching the producer contract
    /// of the other components.
    fn value(&self, exchange: &Exchange) -> Result<Value> {
        exchange
            .header(headers::VALUE)
            .cloned()
            .or_else(|| exchange.body().cloned())
            .ok_or(CacheError::MissingHeader(headers::VALUE))
    }

    fn keys(&self, exchange: &Exchange) -> Result<Vec<String>> {
        let value = exchange
            .header(headers::KEYS)
            .ok_or(CacheError::MissingHeader(headers::KEYS))?;

        value
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| {
                        entry
                            .as_str()
                            .map(String::from)
                            .ok_or(CacheError::InvalidKeys(headers::KEYS))
                    })
                    .collect()
            })
            .unwrap_or(Err(CacheError::InvalidKeys(headers::KEYS)))
    }

    fn set_result(
        exchange: &mut Exchange,
        success: bool,
        result: Option<Value>,
        old_value: Option<Value>,
    ) {
        exchange.set_header(headers::SUCCESS, success);
        exchange.set_header(
            headers::HAS_RESULT,
            result.is_some() || old_value.is_some(),
        );

        if let Some(old_value) = old_value {
            exchange.set_header(headers::OLD_VALUE, old_value);
        }
        match result {
            Some(result) => exchange.set_body(result),
            None => exchange.clear_body(),
        }
    }

    fn on_clear(&self, exchange: &mut Exchange) -> Result<()> {
        self.cache.clear();
        Self::set_result(exchange, true, None, None);
        Ok(())
    }

    fn on_put(&self, exchange: &mut Exchange) -> Result<()> {
        let key = self.key(exchange)?;
        let value = self.value(exchange)?;

        self.cache.put(&key, value);
        Self::set_result(exchange, true, None, None);
        Ok(())
    }

    fn on_put_all(&self, exchange: &mut Exchange) -> Result<()> {
        let value = self.value(exchange)?;
        let entries = value
            .as_object()
            .ok_or(CacheError::MissingHeader(headers::VALUE))?;

        for (key, value) in entries {
            self.cache.put(key, value.clone());
        }
        Self::set_result(exchange, true, None, None);
        Ok(())
    }

    fn on_put_if_absent(&self, exchange: &mut Exchange) -> Result<()> {
        let key = self.key(exchange)?;
        let value = self.value(exchange)?;

        let old_value = self.cache.put_if_absent(&key, value);
        Self::set_result(exchange, true, None, old_value);
        Ok(())
    }

    fn on_get(&self, exchange: &mut Exchange) -> Result<()> {
        let key = self.key(exchange)?;
        let result = self.cache.get(&key);
        Self::set_result(exchange, true, result, None);
        Ok(())
    }

    fn on_get_all(&self, exchange: &mut Exchange) -> Result<()> {
        let keys = self.keys(exchange)?;

        let mut entries = Map::new();
        for key in keys {
            entries.insert(key.clone(), self.cache.get(&key).unwrap_or(Value::Null));
        }
        Self::set_result(exchange, true, Some(Value::Object(entries)), None);
        Ok(())
    }

    fn on_remove(&self, exchange: &mut Exchange) -> Result<()> {
        let key = self.key(exchange)?;

        match exchange.header(headers::OLD_VALUE).cloned() {
            Some(expected) => {
                let success = self.cache.remove_if(&key, &expected);
                Self::set_result(exchange, success, None, None);
            }
            None => {
                self.cache.remove(&key);
                Self::set_result(exchange, true, None, None);
            }
        }
        Ok(())
    }

    fn on_remove_all(&self, exchange: &mut Exchange) -> Result<()> {
        let keys = self.keys(exchange)?;
        for key in keys {
            self.cache.remove(&key);
        }
        Self::set_result(exchange, true, None, None);
        Ok(())
    }

    fn on_replace(&self, exchange: &mut Exchange) -> Result<()> {
        let key = self.key(exchange)?;
        let value = self.value(exchange)?;

        match exchange.header(headers::OLD_VALUE).cloned() {
            Some(expected) => {
                let success = self.cache.replace_if(&key, &expected, value);
                Self::set_result(exchange, success, None, None);
            }
            None => {
                let old_value = self.cache.replace(&key, value);
                Self::set_result(exchange, true, None, old_value);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Producer for CacheProducer {
    async fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()> {
        match self.action(exchange)? {
            CacheAction::Clear => self.on_clear(exchange)?,
            CacheAction::Put => self.on_put(exchange)?,
            CacheAction::PutAll => self.on_put_all(exchange)?,
            CacheAction::PutIfAbsent => self.on_put_if_absent(exchange)?,
            CacheAction::Get => self.on_get(exchange)?,
            CacheAction::GetAll => self.on_get_all(exchange)?,
            CacheAction::Remove => self.on_remove(exchange)?,
            CacheAction::RemoveAll => self.on_remove_all(exchange)?,
            CacheAction::Replace => self.on_replace(exchange)?,
        }
        Ok(())
    }
}
