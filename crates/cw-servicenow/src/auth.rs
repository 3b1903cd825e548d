//! Request authentication: basic credentials or a cached OAuth2
//! password-grant token.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, ServiceNowError};
use crate::ServiceNowConfig;

/// Renew the token this long before its reported expiry.
const EXPIRY_LEEWAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
enum Mode {
    Basic,
    OAuth2 {
        client_id: String,
        client_secret: String,
    },
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    token_type: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn default_expires_in() -> u64 {
    1800
}

/// Applies the configured authentication to outgoing requests.
pub struct AuthMethod {
    mode: Mode,
    instance_url: String,
    username: String,
    password: String,
    token: Mutex<Option<CachedToken>>,
}

impl AuthMethod {
    pub fn from_config(config: &ServiceNowConfig) -> Self {
        let mode = match (&config.oauth_client_id, &config.oauth_client_secret) {
            (Some(client_id), Some(client_secret)) => Mode::OAuth2 {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
            },
            _ => Mode::Basic,
        };

        Self {
            mode,
            instance_url: config.instance_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            token: Mutex::new(None),
        }
    }

    pub async fn apply(
        &self,
        http: &reqwest::Client,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder> {
        match &self.mode {
            Mode::Basic => Ok(builder.basic_auth(&self.username, Some(&self.password))),
            Mode::OAuth2 { .. } => {
                let token = self.token(http).await?;
                Ok(builder.header(reqwest::header::AUTHORIZATION, token))
            }
        }
    }

    async fn token(&self, http: &reqwest::Client) -> Result<String> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref() {
            if !token.is_expired() {
                return Ok(token.authorization());
            }
        }

        let token = self.fetch_token(http).await?;
        let authorization = token.authorization();
        *cached = Some(token);
        Ok(authorization)
    }

    async fn fetch_token(&self, http: &reqwest::Client) -> Result<CachedToken> {
        let Mode::OAuth2 {
            client_id,
            client_secret,
        } = &self.mode
        else {
            return Err(ServiceNowError::Auth("not an oauth configuration".into()));
        };

        let response = http
            .post(format!("{}/oauth_token.do", self.instance_url))
            .form(&[
                ("grant_type", "password"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ServiceNowError::Auth(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_LEEWAY);
        debug!(expires_in = token.expires_in, "fetched access token");

        Ok(CachedToken {
            access_token: token.access_token,
            token_type: token.token_type,
            expires_at: Instant::now() + lifetime,
        })
    }
}
