//! Resource- and action-dispatching producer.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use cw_common::{Exchange, Producer};

use crate::client::ServiceNowClient;
use crate::error::{Result, ServiceNowError};
use crate::{headers, ServiceNowConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Table,
    Aggregate,
    Import,
}

impl FromStr for Resource {
    type Err = ServiceNowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "aggregate" => Ok(Self::Aggregate),
            "import" => Ok(Self::Import),
            other => Err(ServiceNowError::UnknownResource(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableAction {
    Retrieve,
    Create,
    Modify,
    Update,
    Delete,
}

impl FromStr for TableAction {
    type Err = ServiceNowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "retrieve" => Ok(Self::Retrieve),
            "create" => Ok(Self::Create),
            "modify" => Ok(Self::Modify),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(ServiceNowError::UnknownAction(other.to_string())),
        }
    }
}

pub struct ServiceNowProducer {
    client: Arc<ServiceNowClient>,
    config: ServiceNowConfig,
}

impl ServiceNowProducer {
    pub fn new(client: Arc<ServiceNowClient>, config: ServiceNowConfig) -> Self {
        Self { client, config }
    }

    fn resource(&self, exchange: &Exchange) -> Result<Resource> {
        exchange
            .header_str(headers::RESOURCE)
            .or(self.config.resource.as_deref())
            .unwrap_or("table")
            .parse()
    }

    fn action(&self, exchange: &Exchange) -> Result<TableAction> {
        exchange
            .header_str(headers::ACTION)
            .or(self.config.action.as_deref())
            .ok_or(ServiceNowError::MissingHeader(headers::ACTION))?
            .parse()
    }

    fn table(&self, exchange: &Exchange) -> Result<String> {
        exchange
            .header_str(headers::TABLE)
            .or(self.config.table.as_deref())
            .map(String::from)
            .ok_or(ServiceNowError::MissingHeader(headers::TABLE))
    }

    fn sys_id(&self, exchange: &Exchange) -> Result<String> {
        exchange
            .header_str(headers::SYS_ID)
            .map(String::from)
            .ok_or(ServiceNowError::MissingHeader(headers::SYS_ID))
    }

    fn record(&self, exchange: &Exchange) -> Result<serde_json::Value> {
        exchange.body().cloned().ok_or(ServiceNowError::MissingBody)
    }

    /// Collect sysparm query parameters from headers, falling back to the
    /// configured defaults.
    fn query_params(&self, exchange: &Exchange) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();

        if let Some(query) = exchange.header_str(headers::QUERY) {
            params.push(("sysparm_query", query.to_string()));
        }
        if let Some(display_value) = exchange
            .header_str(headers::DISPLAY_VALUE)
            .map(String::from)
            .or_else(|| self.config.display_value.clone())
        {
            params.push(("sysparm_display_value", display_value));
        }
        if let Some(exclude) = exchange
            .header_bool(headers::EXCLUDE_REFERENCE_LINK)
            .or(self.config.exclude_reference_link)
        {
            params.push(("sysparm_exclude_reference_link", exclude.to_string()));
        }
        if let Some(fields) = exchange.header_str(headers::FIELDS) {
            params.push(("sysparm_fields", fields.to_string()));
        }
        if let Some(limit) = exchange.header_u64(headers::LIMIT) {
            params.push(("sysparm_limit", limit.to_string()));
        }
        if let Some(view) = exchange.header_str(headers::VIEW) {
            params.push(("sysparm_view", view.to_string()));
        }

        params
    }

    fn write_params(&self, exchange: &Exchange) -> Vec<(&'static str, String)> {
        let mut params = self.query_params(exchange);

        if let Some(input_display_value) = exchange
            .header_bool(headers::INPUT_DISPLAY_VALUE)
            .or(self.config.input_display_value)
        {
            params.push(("sysparm_input_display_value", input_display_value.to_string()));
        }
        if let Some(suppress) = exchange
            .header_bool(headers::SUPPRESS_AUTO_SYS_FIELD)
            .or(self.config.suppress_auto_sys_field)
        {
            params.push(("sysparm_suppress_auto_sys_field", suppress.to_string()));
        }

        params
    }

    fn aggregate_params(&self, exchange: &Exchange) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();

        if let Some(query) = exchange.header_str(headers::QUERY) {
            params.push(("sysparm_query", query.to_string()));
        }
        if let Some(count) = exchange.header_bool(headers::COUNT) {
            params.push(("sysparm_count", count.to_string()));
        }
        if let Some(group_by) = exchange.header_str(headers::GROUP_BY) {
            params.push(("sysparm_group_by", group_by.to_string()));
        }
        if let Some(fields) = exchange.header_str(headers::AVG_FIELDS) {
            params.push(("sysparm_avg_fields", fields.to_string()));
        }
        if let Some(fields) = exchange.header_str(headers::MIN_FIELDS) {
            params.push(("sysparm_min_fields", fields.to_string()));
        }
        if let Some(fields) = exchange.header_str(headers::MAX_FIELDS) {
            params.push(("sysparm_max_fields", fields.to_string()));
        }
        if let Some(fields) = exchange.header_str(headers::SUM_FIELDS) {
            params.push(("sysparm_sum_fields", fields.to_string()));
        }

        params
    }

    async fn process_table(&self, exchange: &mut Exchange) -> Result<()> {
        let action = self.action(exchange)?;
        let table = self.table(exchange)?;

        match action {
            TableAction::Retrieve => {
                let params = self.query_params(exchange);
                let result = match exchange.header_str(headers::SYS_ID) {
                    Some(sys_id) => {
                        self.client
                            .retrieve_record(&table, sys_id, &params)
                            .await?
                    }
                    None => self.client.retrieve_records(&table, &params).await?,
                };
                exchange.set_body(result);
            }
            TableAction::Create => {
                let params = self.write_params(exchange);
                let record = self.record(exchange)?;
                let result = self.client.create_record(&table, &params, &record).await?;
                exchange.set_body(result);
            }
            TableAction::Modify => {
                let sys_id = self.sys_id(exchange)?;
                let params = self.write_params(exchange);
                let record = self.record(exchange)?;
                let result = self
                    .client
                    .modify_record(&table, &sys_id, &params, &record)
                    .await?;
                exchange.set_body(result);
            }
            TableAction::Update => {
                let sys_id = self.sys_id(exchange)?;
                let params = self.write_params(exchange);
                let record = self.record(exchange)?;
                let result = self
                    .client
                    .update_record(&table, &sys_id, &params, &record)
                    .await?;
                exchange.set_body(result);
            }
            TableAction::Delete => {
                let sys_id = self.sys_id(exchange)?;
                match self.client.delete_record(&table, &sys_id).await? {
                    Some(result) => exchange.set_body(result),
                    None => exchange.clear_body(),
                }
            }
        }
        Ok(())
    }

    async fn process_import(&self, exchange: &mut Exchange) -> Result<()> {
        let action = self.action(exchange)?;
        let table = self.table(exchange)?;

        match action {
            TableAction::Retrieve => {
                let sys_id = self.sys_id(exchange)?;
                let result = self.client.retrieve_import_record(&table, &sys_id).await?;
                exchange.set_body(result);
            }
            TableAction::Create => {
                let record = self.record(exchange)?;
                let result = self.client.create_import_record(&table, &record).await?;
                exchange.set_body(result);
            }
            other => {
                return Err(ServiceNowError::UnknownAction(format!(
                    "{other:?} is not an import-set action"
                )));
            }
        }
        Ok(())
    }

    async fn process_aggregate(&self, exchange: &mut Exchange) -> Result<()> {
        let action = self.action(exchange)?;
        if action != TableAction::Retrieve {
            return Err(ServiceNowError::UnknownAction(format!(
                "{action:?} is not an aggregate action"
            )));
        }

        let table = self.table(exchange)?;
        let params = self.aggregate_params(exchange);
        let result = self.client.retrieve_stats(&table, &params).await?;
        exchange.set_body(result);
        Ok(())
    }
}

#[async_trait]
impl Producer for ServiceNowProducer {
    async fn process(&self, exchange: &mut Exchange) -> anyhow::Result<()> {
        match self.resource(exchange)? {
            Resource::Table => self.process_table(exchange).await?,
            Resource::Aggregate => self.process_aggregate(exchange).await?,
            Resource::Import => self.process_import(exchange).await?,
        }
        Ok(())
    }
}
