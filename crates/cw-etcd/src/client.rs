//! Thin typed client for the v2 keys HTTP API.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::{EtcdError, Result};
use crate::EtcdConfig;

const KEY_NOT_FOUND: u64 = 100;

/// One node of the key tree. Directory listings carry their children in
/// `nodes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtcdNode {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub dir: bool,
    #[serde(default)]
    pub modified_index: u64,
    #[serde(default)]
    pub created_index: u64,
    #[serde(default)]
    pub nodes: Vec<EtcdNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtcdResponse {
    pub action: String,
    pub node: EtcdNode,
    #[serde(default)]
    pub prev_node: Option<EtcdNode>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiError {
    error_code: u64,
    #[serde(default)]
    cause: String,
}

pub struct EtcdClient {
    http: reqwest::Client,
    base: String,
}

impl EtcdClient {
    pub fn new(config: &EtcdConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            base: config.url.trim_end_matches('/').to_string(),
        })
    }

    fn keys_url(&self, path: &str) -> String {
        format!("{}/v2/keys/{}", self.base, path.trim_start_matches('/'))
    }

    async fn read_response(response: Response) -> Result<EtcdResponse> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let url = response.url().to_string();
        if status == StatusCode::NOT_FOUND {
            if let Ok(error) = response.json::<ApiError>().await {
                if error.error_code == KEY_NOT_FOUND {
                    return Err(EtcdError::KeyNotFound(error.cause));
                }
            }
            return Err(EtcdError::Status {
                status: status.as_u16(),
                url,
            });
        }

        Err(EtcdError::Status {
            status: status.as_u16(),
            url,
        })
    }

    pub async fn get(&self, path: &str, recursive: bool) -> Result<EtcdResponse> {
        let mut builder = self.http.get(self.keys_url(path));
        if recursive {
            builder = builder.query(&[("recursive", "true")]);
        }

        Self::read_response(builder.send().await?).await
    }

    pub async fn put(&self, path: &str, value: &str, ttl: Option<u64>) -> Result<EtcdResponse> {
        let mut form = vec![("value", value.to_string())];
        if let Some(ttl) = ttl {
            form.push(("ttl", ttl.to_string()));
        }

        let response = self.http.put(self.keys_url(path)).form(&form).send().await?;
        Self::read_response(response).await
    }

    pub async fn delete(&self, path: &str, recursive: bool) -> Result<EtcdResponse> {
        let mut builder = self.http.delete(self.keys_url(path));
        if recursive {
            builder = builder.query(&[("recursive", "true")]);
        }

        Self::read_response(builder.send().await?).await
    }

    /// Read one of the statistics documents ("leader", "self" or "store").
    pub async fn stats(&self, kind: &str) -> Result<serde_json::Value> {
        let response = self
            .http
            .get(format!("{}/v2/stats/{}", self.base, kind))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EtcdError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }
        Ok(response.json().await?)
    }

    /// Block until the node at `path` changes. A `wait_index` of zero waits
    /// for the next change; otherwise changes from that index on are
    /// replayed. The request has no client-side bound here; callers wrap it
    /// in their own timeout.
    pub async fn watch(
        &self,
        path: &str,
        wait_index: u64,
        recursive: bool,
    ) -> Result<EtcdResponse> {
        let mut builder = self
            .http
            .get(self.keys_url(path))
            .query(&[("wait", "true")]);
        if wait_index > 0 {
            builder = builder.query(&[("waitIndex", wait_index.to_string())]);
        }
        if recursive {
            builder = builder.query(&[("recursive", "true")]);
        }

        Self::read_response(builder.send().await?).await
    }
}
