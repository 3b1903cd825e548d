//! Agent informational producer: read-only queries against the local agent.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use cw_common::{Exchange, Producer};

use crate::client::ConsulClient;
use crate::error::{ConsulError, Result};
use crate::{headers, ConsulConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentAction {
    Checks,
    Services,
    Members,
    Agent,
}

impl FromStr for AgentAction {
    type Err = ConsulError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "checks" => Ok(Self::Checks),
            "services" => Ok(Self::Services),
            "members" => Ok(Self::Members),
            "agent" => Ok(Self::Agent),
            other => Err(ConsulError::UnknownAction(other.to_string())),
        }
    }
}

pub struct AgentProducer {
    client: Arc<ConsulClient>,
    config: ConsulConfig,
}

impl AgentProducer {
    pub fn new(client: Arc<ConsulClient>, config: ConsulConfig) -> Self {
        Self { client, config }
    }

    fn action(&self, exchange: &Exchange) -> Result<AgentAction> {
        exchange
            .header_str(headers::ACTION)
            .or(self.config.action.as_deref())
            .ok_or(ConsulError::MissingHeader(headers::ACTION))?
            .parse()
    }
}

#[async_trait]
impl Producer for AgentProducer {
    async fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()> {
        let body = match self.action(exchange)? {
            AgentAction::Checks => self.client.agent_checks().await?,
            AgentAction::Services => self.client.agent_services().await?,
            AgentAction::Members => self.client.agent_members().await?,
            AgentAction::Agent => self.client.agent_self().await?,
        };

        exchange.set_header(headers::RESULT, true);
        exchange.set_body(body);
        Ok(())
    }
}
