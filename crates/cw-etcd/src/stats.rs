//! Statistics producer: leader, self and store statistics.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use cw_common::{Exchange, Producer};

use crate::client::EtcdClient;
use crate::error::{EtcdError, Result};
use crate::{headers, EtcdConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsAction {
    Leader,
    SelfNode,
    Store,
}

impl StatsAction {
    fn path(&self) -> &'static str {
        match self {
            Self::Leader => "leader",
            Self::SelfNode => "self",
            Self::Store => "store",
        }
    }
}

impl FromStr for StatsAction {
    type Err = EtcdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "leader" => Ok(Self::Leader),
            "self" => Ok(Self::SelfNode),
            "store" => Ok(Self::Store),
            other => Err(EtcdError::UnknownAction(other.to_string())),
        }
    }
}

pub struct StatsProducer {
    client: Arc<EtcdClient>,
    config: EtcdConfig,
}

impl StatsProducer {
    pub fn new(client: Arc<EtcdClient>, config: EtcdConfig) -> Self {
        Self { client, config }
    }

    fn action(&self, exchange: &Exchange) -> Result<StatsAction> {
        exchange
            .header_str(headers::ACTION)
            .or(self.config.action.as_deref())
            .ok_or(EtcdError::MissingHeader(headers::ACTION))?
            .parse()
    }
}

#[async_trait]
impl Producer for StatsProducer {
    async fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()> {
        let action = self.action(exchange)?;
        let stats = self.client.stats(action.path()).await?;
        exchange.set_body(stats);
        Ok(())
    }
}
