//! Ticketing/ITSM REST component.
//!
//! Adapts exchanges onto the platform's table, aggregate and import-set
//! REST APIs: records are retrieved, created, modified, updated and deleted
//! by table name and sys_id; aggregate statistics are retrieved per table;
//! import-set rows are staged and read back. Requests authenticate with
//! basic credentials or an OAuth2 password grant whose token is cached and
//! refreshed on expiry.

mod auth;
mod client;
mod error;
mod producer;

pub use auth::AuthMethod;
pub use client::ServiceNowClient;
pub use error::{Result, ServiceNowError};
pub use producer::{Resource, ServiceNowProducer, TableAction};

/// Exchange header names used by this component.
pub mod headers {
    pub const RESOURCE: &str = "servicenow.resource";
    pub const ACTION: &str = "servicenow.action";
    pub const TABLE: &str = "servicenow.table";
    pub const SYS_ID: &str = "servicenow.sys_id";

    pub const QUERY: &str = "servicenow.query";
    pub const DISPLAY_VALUE: &str = "servicenow.display_value";
    pub const EXCLUDE_REFERENCE_LINK: &str = "servicenow.exclude_reference_link";
    pub const FIELDS: &str = "servicenow.fields";
    pub const LIMIT: &str = "servicenow.limit";
    pub const VIEW: &str = "servicenow.view";
    pub const INPUT_DISPLAY_VALUE: &str = "servicenow.input_display_value";
    pub const SUPPRESS_AUTO_SYS_FIELD: &str = "servicenow.suppress_auto_sys_field";

    pub const COUNT: &str = "servicenow.count";
    pub const GROUP_BY: &str = "servicenow.group_by";
    pub const AVG_FIELDS: &str = "servicenow.avg_fields";
    pub const MIN_FIELDS: &str = "servicenow.min_fields";
    pub const MAX_FIELDS: &str = "servicenow.max_fields";
    pub const SUM_FIELDS: &str = "servicenow.sum_fields";
}

/// Connection, credential and default-behavior settings for the component.
#[derive(Debug, Clone)]
pub struct ServiceNowConfig {
    /// Instance base URL.
    pub instance_url: String,

    pub username: String,
    pub password: String,

    /// When set together with `oauth_client_secret`, requests use an OAuth2
    /// password grant instead of basic authentication.
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,

    /// Default resource for the producer ("table", "aggregate" or
    /// "import").
    pub resource: Option<String>,

    /// Default action for the producer.
    pub action: Option<String>,

    /// Default table name.
    pub table: Option<String>,

    /// Default `sysparm_display_value` ("true", "false" or "all").
    pub display_value: Option<String>,

    pub exclude_reference_link: Option<bool>,
    pub input_display_value: Option<bool>,
    pub suppress_auto_sys_field: Option<bool>,
}

impl ServiceNowConfig {
    pub fn new(
        instance_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            instance_url: instance_url.into(),
            username: username.into(),
            password: password.into(),
            oauth_client_id: None,
            oauth_client_secret: None,
            resource: None,
            action: None,
            table: None,
            display_value: None,
            exclude_reference_link: None,
            input_display_value: None,
            suppress_auto_sys_field: None,
        }
    }

    pub fn with_oauth(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.oauth_client_id = Some(client_id.into());
        self.oauth_client_secret = Some(client_secret.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_display_value(mut self, display_value: impl Into<String>) -> Self {
        self.display_value = Some(display_value.into());
        self
    }

    /// Credentials and the instance address are mandatory; missing values
    /// fail at startup, before any request is attempted.
    pub fn validate(&self) -> Result<()> {
        if self.instance_url.trim().is_empty() {
            return Err(ServiceNowError::Config("instance_url is required".into()));
        }
        if self.username.trim().is_empty() || self.password.trim().is_empty() {
            return Err(ServiceNowError::Config("credentials are required".into()));
        }
        if self.oauth_client_id.is_some() != self.oauth_client_secret.is_some() {
            return Err(ServiceNowError::Config(
                "oauth client id and secret must be set together".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_requires_credentials() {
        let config = ServiceNowConfig::new("https://example.service-now.com", "", "");
        assert!(config.validate().is_err());

        let config = ServiceNowConfig::new("https://example.service-now.com", "admin", "secret");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_requires_paired_oauth_settings() {
        let mut config =
            ServiceNowConfig::new("https://example.service-now.com", "admin", "secret");
        config.oauth_client_id = Some("client".into());
        assert!(config.validate().is_err());

        let config = ServiceNowConfig::new("https://example.service-now.com", "admin", "secret")
            .with_oauth("client", "secret");
        assert!(config.validate().is_ok());
    }
}
