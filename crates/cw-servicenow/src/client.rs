//! Thin typed client for the table and aggregate REST APIs.

use std::time::Duration;

use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::auth::AuthMethod;
use crate::error::{Result, ServiceNowError};
use crate::ServiceNowConfig;

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    detail: Option<String>,
}

pub struct ServiceNowClient {
    http: reqwest::Client,
    base: String,
    auth: AuthMethod,
}

impl ServiceNowClient {
    pub fn new(config: &ServiceNowConfig) -> Result<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            http,
            base: config.instance_url.trim_end_matches('/').to_string(),
            auth: AuthMethod::from_config(config),
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        params: &[(&'static str, String)],
        body: Option<&Value>,
    ) -> Result<Response> {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base, path))
            .query(params);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let builder = self.auth.apply(&self.http, builder).await?;
        Ok(builder.send().await?)
    }

    /// Unwrap the `{"result": ...}` envelope, or surface the platform's
    /// error envelope as a typed error.
    async fn read_result(response: Response) -> Result<Option<Value>> {
        let status = response.status();

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        if status.is_success() {
            let mut envelope: Value = response.json().await?;
            return match envelope.get_mut("result") {
                Some(result) => Ok(Some(result.take())),
                None => Ok(Some(envelope)),
            };
        }

        let url = response.url().to_string();
        match response.json::<ErrorEnvelope>().await {
            Ok(envelope) => Err(ServiceNowError::Api {
                status: status.as_u16(),
                message: envelope.error.message,
                detail: envelope.error.detail,
            }),
            Err(_) => Err(ServiceNowError::Status {
                status: status.as_u16(),
                url,
            }),
        }
    }

    // ------------------------------------------------------------------
    // Table API
    // ------------------------------------------------------------------

    pub async fn retrieve_records(
        &self,
        table: &str,
        params: &[(&'static str, String)],
    ) -> Result<Value> {
        let response = self
            .send(Method::GET, &format!("/api/now/table/{table}"), params, None)
            .await?;
        Ok(Self::read_result(response).await?.unwrap_or(Value::Null))
    }

    pub async fn retrieve_record(
        &self,
        table: &str,
        sys_id: &str,
        params: &[(&'static str, String)],
    ) -> Result<Value> {
        let response = self
            .send(
                Method::GET,
                &format!("/api/now/table/{table}/{sys_id}"),
                params,
                None,
            )
            .await?;
        Ok(Self::read_result(response).await?.unwrap_or(Value::Null))
    }

    pub async fn create_record(
        &self,
        table: &str,
        params: &[(&'static str, String)],
        record: &Value,
    ) -> Result<Value> {
        let response = self
            .send(
                Method::POST,
                &format!("/api/now/table/{table}"),
                params,
                Some(record),
            )
            .await?;
        Ok(Self::read_result(response).await?.unwrap_or(Value::Null))
    }

    pub async fn modify_record(
        &self,
        table: &str,
        sys_id: &str,
        params: &[(&'static str, String)],
        record: &Value,
    ) -> Result<Value> {
        let response = self
            .send(
                Method::PUT,
                &format!("/api/now/table/{table}/{sys_id}"),
                params,
                Some(record),
            )
            .await?;
        Ok(Self::read_result(response).await?.unwrap_or(Value::Null))
    }

    pub async fn update_record(
        &self,
        table: &str,
        sys_id: &str,
        params: &[(&'static str, String)],
        record: &Value,
    ) -> Result<Value> {
        let response = self
            .send(
                Method::PATCH,
                &format!("/api/now/table/{table}/{sys_id}"),
                params,
                Some(record),
            )
            .await?;
        Ok(Self::read_result(response).await?.unwrap_or(Value::Null))
    }

    pub async fn delete_record(&self, table: &str, sys_id: &str) -> Result<Option<Value>> {
        let response = self
            .send(
                Method::DELETE,
                &format!("/api/now/table/{table}/{sys_id}"),
                &[],
                None,
            )
            .await?;
        Self::read_result(response).await
    }

    // ------------------------------------------------------------------
    // Import-set API
    // ------------------------------------------------------------------

    pub async fn retrieve_import_record(&self, table: &str, sys_id: &str) -> Result<Value> {
        let response = self
            .send(
                Method::GET,
                &format!("/api/now/import/{table}/{sys_id}"),
                &[],
                None,
            )
            .await?;
        Ok(Self::read_result(response).await?.unwrap_or(Value::Null))
    }

    pub async fn create_import_record(&self, table: &str, record: &Value) -> Result<Value> {
        let response = self
            .send(
                Method::POST,
                &format!("/api/now/import/{table}"),
                &[],
                Some(record),
            )
            .await?;
        Ok(Self::read_result(response).await?.unwrap_or(Value::Null))
    }

    // ------------------------------------------------------------------
    // Aggregate API
    // ------------------------------------------------------------------

    pub async fn retrieve_stats(
        &self,
        table: &str,
        params: &[(&'static str, String)],
    ) -> Result<Value> {
        let response = self
            .send(Method::GET, &format!("/api/now/stats/{table}"), params, None)
            .await?;
        Ok(Self::read_result(response).await?.unwrap_or(Value::Null))
    }
}
