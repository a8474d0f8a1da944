use async_trait::async_trait;
use ragcite_core::{Error, Metadata, Result, ScrapeClient, ScrapeParams, ScrapedPage};
use serde::Deserialize;
use std::time::{Duration, Instant};

use crate::{env_first, env_nonempty};

const DEFAULT_ENDPOINT: &str = "https://api.firecrawl.dev/v2/scrape";

pub(crate) fn firecrawl_api_key_from_env() -> Option<String> {
    env_first(&["RAGCITE_FIRECRAWL_API_KEY", "FIRECRAWL_API_KEY"])
}

fn timeout_ms(params: &ScrapeParams) -> u64 {
    params.timeout_ms.unwrap_or(30_000).clamp(1_000, 120_000)
}

#[derive(Debug, Clone)]
pub struct FirecrawlClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl FirecrawlClient {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            endpoint: env_nonempty("RAGCITE_FIRECRAWL_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
        }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = firecrawl_api_key_from_env().ok_or_else(|| {
            Error::NotConfigured(
                "missing RAGCITE_FIRECRAWL_API_KEY (or FIRECRAWL_API_KEY)".to_string(),
            )
        })?;
        Ok(Self::new(client, api_key))
    }

    pub fn is_configured() -> bool {
        firecrawl_api_key_from_env().is_some()
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ScrapeClient for FirecrawlClient {
    async fn scrape_url(&self, url: &str, params: &ScrapeParams) -> Result<ScrapedPage> {
        let t0 = Instant::now();
        let timeout_ms = timeout_ms(params);
        let body = serde_json::json!({
            "url": url,
            "formats": params.formats,
            "onlyMainContent": params.only_main_content,
            "timeout": timeout_ms,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .json(&body)
            // Leave the server its own timeout plus some slack for the round trip.
            .timeout(Duration::from_millis(timeout_ms + 5_000))
            .send()
            .await
            .map_err(|e| Error::Scrape(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Scrape(format!("firecrawl scrape HTTP {status}")));
        }

        let parsed: FirecrawlScrapeResponse = resp
            .json()
            .await
            .map_err(|e| Error::Scrape(e.to_string()))?;
        if !parsed.success {
            return Err(Error::Scrape(format!(
                "firecrawl scrape returned success=false: {}",
                parsed.error.as_deref().unwrap_or("no details")
            )));
        }

        let data = parsed.data.unwrap_or_default();
        let markdown = data.markdown.unwrap_or_default();
        tracing::debug!(
            url,
            chars = markdown.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "firecrawl scrape done"
        );
        Ok(ScrapedPage {
            markdown,
            metadata: data.metadata,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FirecrawlScrapeResponse {
    success: bool,
    #[serde(default)]
    data: Option<FirecrawlScrapeData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FirecrawlScrapeData {
    markdown: Option<String>,
    #[serde(default)]
    metadata: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{EnvGuard, ENV_LOCK};
    use axum::{http::HeaderMap, http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::net::SocketAddr;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[test]
    fn empty_api_key_is_treated_as_missing() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _g1 = EnvGuard::set("RAGCITE_FIRECRAWL_API_KEY", "");
        let _g2 = EnvGuard::unset("FIRECRAWL_API_KEY");
        assert!(firecrawl_api_key_from_env().is_none());
        let err = FirecrawlClient::from_env(reqwest::Client::new()).unwrap_err();
        assert!(matches!(err, Error::NotConfigured(_)));
    }

    #[test]
    fn parses_firecrawl_response_shape() {
        let js = r##"
        { "success": true, "data": { "markdown": "# Hi", "metadata": {"title": "Hi", "statusCode": 200} } }
        "##;
        let parsed: FirecrawlScrapeResponse = serde_json::from_str(js).unwrap();
        assert!(parsed.success);
        let data = parsed.data.unwrap();
        assert_eq!(data.markdown.as_deref(), Some("# Hi"));
        assert_eq!(data.metadata["title"], "Hi");
    }

    #[test]
    fn timeout_is_clamped() {
        let mut p = ScrapeParams::default();
        assert_eq!(timeout_ms(&p), 30_000);
        p.timeout_ms = Some(10);
        assert_eq!(timeout_ms(&p), 1_000);
        p.timeout_ms = Some(10_000_000);
        assert_eq!(timeout_ms(&p), 120_000);
    }

    #[tokio::test]
    async fn scrapes_against_fixture_server() {
        let app = Router::new().route(
            "/v2/scrape",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                if auth != "Bearer fc-test" {
                    return (StatusCode::UNAUTHORIZED, Json(json!({"success": false})));
                }
                assert_eq!(body["formats"], json!(["markdown"]));
                assert_eq!(body["onlyMainContent"], json!(true));
                (
                    StatusCode::OK,
                    Json(json!({
                        "success": true,
                        "data": {
                            "markdown": format!("# Page for {}", body["url"].as_str().unwrap_or("")),
                            "metadata": {"title": "Fixture"}
                        }
                    })),
                )
            }),
        );
        let addr = serve(app).await;
        let client = FirecrawlClient::new(reqwest::Client::new(), "fc-test")
            .with_endpoint(format!("http://{addr}/v2/scrape"));

        let page = client
            .scrape_url("https://example.com/", &ScrapeParams::default())
            .await
            .unwrap();
        assert_eq!(page.markdown, "# Page for https://example.com/");
        assert_eq!(page.metadata["title"], "Fixture");

        let bad = FirecrawlClient::new(reqwest::Client::new(), "wrong")
            .with_endpoint(format!("http://{addr}/v2/scrape"));
        let err = bad
            .scrape_url("https://example.com/", &ScrapeParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Scrape(ref m) if m.contains("401")));
    }

    #[tokio::test]
    async fn success_false_is_an_error() {
        let app = Router::new().route(
            "/scrape",
            post(|| async { Json(json!({"success": false, "error": "blocked by robots.txt"})) }),
        );
        let addr = serve(app).await;
        let client = FirecrawlClient::new(reqwest::Client::new(), "k")
            .with_endpoint(format!("http://{addr}/scrape"));
        let err = client
            .scrape_url("https://example.com/", &ScrapeParams::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("blocked by robots.txt"));
    }
}
