use async_trait::async_trait;
use ragcite_core::{Error, Result, WebSearchClient};
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::{env_first, env_nonempty};

const DEFAULT_ENDPOINT: &str = "https://google.serper.dev/search";

pub(crate) fn serper_api_key_from_env() -> Option<String> {
    env_first(&["RAGCITE_SERPER_API_KEY", "SERPER_API_KEY"])
}

/// Serper (Google results) over its JSON API. Payloads come back untouched;
/// normalization uses the default Serper-shaped [`WebSearchClient::normalize`].
#[derive(Debug, Clone)]
pub struct SerperClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    num_results: Option<usize>,
    timeout: Duration,
}

impl SerperClient {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            endpoint: env_nonempty("RAGCITE_SERPER_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            num_results: None,
            timeout: Duration::from_secs(20),
        }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = serper_api_key_from_env().ok_or_else(|| {
            Error::NotConfigured("missing RAGCITE_SERPER_API_KEY (or SERPER_API_KEY)".to_string())
        })?;
        Ok(Self::new(client, api_key))
    }

    pub fn is_configured() -> bool {
        serper_api_key_from_env().is_some()
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Serper's `num`; capped at 100.
    pub fn with_num_results(mut self, n: usize) -> Self {
        self.num_results = Some(n.clamp(1, 100));
        self
    }

    /// Per-request timeout, clamped to 1..=60 seconds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.clamp(Duration::from_secs(1), Duration::from_secs(60));
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl WebSearchClient for SerperClient {
    fn name(&self) -> &'static str {
        "serper"
    }

    async fn get_raw(&self, query: &str) -> Result<Value> {
        let t0 = Instant::now();
        let mut body = serde_json::json!({ "q": query });
        if let Some(n) = self.num_results {
            body["num"] = Value::from(n);
        }

        let resp = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Search(format!("serper search HTTP {status}")));
        }

        let raw: Value = resp
            .json()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        tracing::debug!(
            provider = "serper",
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "web search done"
        );
        Ok(raw)
    }
}
