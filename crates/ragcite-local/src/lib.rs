//! Concrete collaborators for `ragcite-core`: Serper web search, Firecrawl
//! scraping, and a JSON-file corpus standing in for a document store.

use ragcite_core::{Error, Result};
use std::time::Duration;

pub mod corpus;
pub mod firecrawl;
pub mod search;

pub use corpus::LocalCorpus;
pub use firecrawl::FirecrawlClient;
pub use search::SerperClient;

/// Read an env var, treating blank values as unset.
pub(crate) fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// First non-blank value among `names`.
pub(crate) fn env_first(names: &[&str]) -> Option<String> {
    names.iter().find_map(|n| env_nonempty(n))
}

/// Shared HTTP client for the remote collaborators.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("ragcite-local/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        // Avoid hanging forever on DNS/TLS/body stalls; requests set their own timeout too.
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| Error::Fetch(e.to_string()))
}
