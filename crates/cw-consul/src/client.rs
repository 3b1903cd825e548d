//! Thin typed client for the coordination agent's HTTP API.
//!
//! Blocking (long-poll) reads send the resume index and wait bound as query
//! parameters; the server-assigned index of every indexed response is read
//! from the `X-Consul-Index` header.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{ConsulError, Result};
use crate::ConsulConfig;

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Resume parameters for one blocking read.
#[derive(Debug, Clone, Copy)]
pub struct BlockingQuery {
    pub index: u64,
    pub wait: Duration,
}

/// A response body paired with its server-assigned index.
#[derive(Debug, Clone)]
pub struct Indexed<T> {
    pub value: T,
    pub index: u64,
}

/// One KV entry as the wire reports it. `value` stays in the transport
/// encoding (base64); use [`KvPair::value_as_utf8`] to decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KvPair {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub flags: u64,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
    #[serde(default)]
    pub lock_index: u64,
    #[serde(default)]
    pub session: Option<String>,
}

impl KvPair {
    pub fn value_as_utf8(&self) -> Result<Option<String>> {
        match &self.value {
            None => Ok(None),
            Some(encoded) => {
                let bytes = BASE64
                    .decode(encoded)
                    .map_err(|e| ConsulError::Encoding(e.to_string()))?;
                let text = String::from_utf8(bytes)
                    .map_err(|e| ConsulError::Encoding(e.to_string()))?;
                Ok(Some(text))
            }
        }
    }
}

/// A user event. The payload stays base64-encoded on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConsulEvent {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub payload: Option<String>,
    #[serde(default)]
    pub node_filter: Option<String>,
    #[serde(default)]
    pub service_filter: Option<String>,
    #[serde(default)]
    pub tag_filter: Option<String>,
    #[serde(default)]
    pub version: u64,
    #[serde(default, rename = "LTime")]
    pub l_time: u64,
}

impl ConsulEvent {
    pub fn payload_as_utf8(&self) -> Result<Option<String>> {
        match &self.payload {
            None => Ok(None),
            Some(encoded) => {
                let bytes = BASE64
                    .decode(encoded)
                    .map_err(|e| ConsulError::Encoding(e.to_string()))?;
                let text = String::from_utf8(bytes)
                    .map_err(|e| ConsulError::Encoding(e.to_string()))?;
                Ok(Some(text))
            }
        }
    }
}

/// Optional modifiers for a KV put.
#[derive(Debug, Clone, Default)]
pub struct PutParams {
    /// Tie the write to a session: the put succeeds only if the lock is
    /// acquired for that session.
    pub acquire: Option<String>,
    /// Release a held lock.
    pub release: Option<String>,
    /// Check-and-set index.
    pub cas: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SessionCreated {
    #[serde(rename = "ID")]
    id: String,
}

pub struct ConsulClient {
    http: reqwest::Client,
    base: String,
    acl_token: Option<String>,
}

impl ConsulClient {
    pub fn new(config: &ConsulConfig) -> Result<Self> {
        // No overall request timeout: blocking queries are bounded by the
        // server-side wait parameter, not by the client.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            base: config.url.trim_end_matches('/').to_string(),
            acl_token: config.acl_token.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{}", self.base, path));
        if let Some(token) = &self.acl_token {
            builder = builder.header(TOKEN_HEADER, token);
        }
        builder
    }

    fn apply_blocking(
        builder: reqwest::RequestBuilder,
        query: Option<&BlockingQuery>,
    ) -> reqwest::RequestBuilder {
        match query {
            Some(q) => builder.query(&[
                ("index", q.index.to_string()),
                ("wait", format!("{}s", q.wait.as_secs().max(1))),
            ]),
            None => builder,
        }
    }

    fn response_index(response: &Response) -> u64 {
        response
            .headers()
            .get(INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    fn unexpected(response: Response) -> ConsulError {
        ConsulError::Status {
            status: response.status().as_u16(),
            url: response.url().to_string(),
        }
    }

    // ------------------------------------------------------------------
    // KV
    // ------------------------------------------------------------------

    /// Read a single key. An absent key yields an empty pair list, not an
    /// error; the response index is still meaningful for resumption.
    pub async fn get_value(
        &self,
        key: &str,
        query: Option<&BlockingQuery>,
    ) -> Result<Indexed<Vec<KvPair>>> {
        let builder = self.request(reqwest::Method::GET, &format!("/v1/kv/{key}"));
        let response = Self::apply_blocking(builder, query).send().await?;
        self.read_kv_response(response).await
    }

    /// Read every key under a prefix.
    pub async fn get_values(
        &self,
        prefix: &str,
        query: Option<&BlockingQuery>,
    ) -> Result<Indexed<Vec<KvPair>>> {
        let builder = self
            .request(reqwest::Method::GET, &format!("/v1/kv/{prefix}"))
            .query(&[("recurse", "true")]);
        let response = Self::apply_blocking(builder, query).send().await?;
        self.read_kv_response(response).await
    }

    async fn read_kv_response(&self, response: Response) -> Result<Indexed<Vec<KvPair>>> {
        let index = Self::response_index(&response);

        match response.status() {
            StatusCode::OK => {
                let pairs: Vec<KvPair> = response.json().await?;
                Ok(Indexed { value: pairs, index })
            }
            StatusCode::NOT_FOUND => Ok(Indexed {
                value: Vec::new(),
                index,
            }),
            _ => Err(Self::unexpected(response)),
        }
    }

    pub async fn get_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let response = self
            .request(reqwest::Method::GET, &format!("/v1/kv/{prefix}"))
            .query(&[("keys", "true")])
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            _ => Err(Self::unexpected(response)),
        }
    }

    pub async fn put(
        &self,
        key: &str,
        value: &str,
        flags: Option<u64>,
        params: &PutParams,
    ) -> Result<bool> {
        let mut builder = self.request(reqwest::Method::PUT, &format!("/v1/kv/{key}"));

        if let Some(flags) = flags {
            builder = builder.query(&[("flags", flags.to_string())]);
        }
        if let Some(session) = &params.acquire {
            builder = builder.query(&[("acquire", session)]);
        }
        if let Some(session) = &params.release {
            builder = builder.query(&[("release", session)]);
        }
        if let Some(cas) = params.cas {
            builder = builder.query(&[("cas", cas.to_string())]);
        }

        let response = builder.body(value.to_string()).send().await?;
        if !response.status().is_success() {
            return Err(Self::unexpected(response));
        }

        Ok(response.json().await?)
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/v1/kv/{key}"))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::unexpected(response));
        }
        Ok(())
    }

    pub async fn delete_tree(&self, prefix: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/v1/kv/{prefix}"))
            .query(&[("recurse", "true")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::unexpected(response));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub async fn fire_event(&self, name: &str, payload: Option<&str>) -> Result<ConsulEvent> {
        let mut builder = self.request(reqwest::Method::PUT, &format!("/v1/event/fire/{name}"));
        if let Some(payload) = payload {
            builder = builder.body(payload.to_string());
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(Self::unexpected(response));
        }

        Ok(response.json().await?)
    }

    pub async fn list_events(
        &self,
        name: &str,
        query: Option<&BlockingQuery>,
    ) -> Result<Indexed<Vec<ConsulEvent>>> {
        let builder = self
            .request(reqwest::Method::GET, "/v1/event/list")
            .query(&[("name", name)]);
        let response = Self::apply_blocking(builder, query).send().await?;

        let index = Self::response_index(&response);
        if !response.status().is_success() {
            return Err(Self::unexpected(response));
        }

        let events: Vec<ConsulEvent> = response.json().await?;
        Ok(Indexed {
            value: events,
            index,
        })
    }

    // ------------------------------------------------------------------
    // Agent
    // ------------------------------------------------------------------

    pub async fn agent_checks(&self) -> Result<Value> {
        self.agent_get("/v1/agent/checks").await
    }

    pub async fn agent_services(&self) -> Result<Value> {
        self.agent_get("/v1/agent/services").await
    }

    pub async fn agent_members(&self) -> Result<Value> {
        self.agent_get("/v1/agent/members").await
    }

    pub async fn agent_self(&self) -> Result<Value> {
        self.agent_get("/v1/agent/self").await
    }

    async fn agent_get(&self, path: &str) -> Result<Value> {
        let response = self.request(reqwest::Method::GET, path).send().await?;
        if !response.status().is_success() {
            return Err(Self::unexpected(response));
        }
        Ok(response.json().await?)
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub async fn create_session(&self, name: &str, ttl: Duration) -> Result<String> {
        let body = serde_json::json!({
            "Name": name,
            "TTL": format!("{}s", ttl.as_secs()),
        });

        let response = self
            .request(reqwest::Method::PUT, "/v1/session/create")
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::unexpected(response));
        }

        let created: SessionCreated = response.json().await?;
        debug!(session = %created.id, name = %name, "created session");
        Ok(created.id)
    }

    pub async fn renew_session(&self, session: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::PUT, &format!("/v1/session/renew/{session}"))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::unexpected(response));
        }
        Ok(())
    }

    pub async fn destroy_session(&self, session: &str) -> Result<()> {
        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/v1/session/destroy/{session}"),
            )
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::unexpected(response));
        }
        Ok(())
    }

    /// Acquire the advisory lock on `key` for `session`.
    pub async fn acquire_lock(&self, key: &str, session: &str) -> Result<bool> {
        self.put(
            key,
            "",
            None,
            &PutParams {
                acquire: Some(session.to_string()),
                ..Default::default()
            },
        )
        .await
    }

    /// Release the advisory lock on `key` held by `session`.
    pub async fn release_lock(&self, key: &str, session: &str) -> Result<bool> {
        self.put(
            key,
            "",
            None,
            &PutParams {
                release: Some(session.to_string()),
                ..Default::default()
            },
        )
        .await
    }
}
