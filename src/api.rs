//! Resource API client
//!
//! Only the forwarding-rule listing is needed to connect. The HTTP client
//! retries transient failures itself; callers see a single result.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ApiError;

/// Initial retry delay for transient failures
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Total attempts per request
const MAX_ATTEMPTS: u32 = 3;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// A hostname/port mapping served through the tunnel
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ForwardingRule {
    pub hostname: String,
    pub protocol: String,
    #[serde(rename = "port_from")]
    pub external_port: u16,
    #[serde(rename = "port_to")]
    pub internal_port: u16,
    #[serde(rename = "proxy_to_http", default)]
    pub proxy_to_http_backend: bool,
    #[serde(default)]
    pub config: Option<RuleConfig>,
}

/// Tunnel configuration a rule belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub region: Option<String>,
}

impl ForwardingRule {
    pub fn region(&self) -> Option<&str> {
        self.config.as_ref().and_then(|c| c.region.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct RuleList {
    #[serde(alias = "rules", default)]
    data: Vec<ForwardingRule>,
}

#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Forwarding rules attached to a tunnel configuration
    async fn list_forwarding_rules(&self, resource_id: &str)
        -> Result<Vec<ForwardingRule>, ApiError>;
}

/// reqwest-backed client for the portmap.io API
pub struct HttpResourceApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpResourceApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
        })
    }

    async fn get_once(&self, path: &str, query: &[(&str, &str)]) -> Result<String, ApiError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status.as_u16() >= 400 {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    /// GET with exponential backoff on transient failures
    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<String, ApiError> {
        let mut delay = INITIAL_RETRY_DELAY;
        let mut attempt = 1;

        loop {
            match self.get_once(path, query).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    tracing::warn!("GET {} failed: {}. Retrying in {:?}...", path, e, delay);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ResourceApi for HttpResourceApi {
    async fn list_forwarding_rules(
        &self,
        resource_id: &str,
    ) -> Result<Vec<ForwardingRule>, ApiError> {
        let body = self.get("/mappings", &[("config_id", resource_id)]).await?;
        parse_rule_list(&body)
    }
}

fn parse_rule_list(body: &str) -> Result<Vec<ForwardingRule>, ApiError> {
    let list: RuleList = serde_json::from_str(body)?;
    Ok(list.data)
}
