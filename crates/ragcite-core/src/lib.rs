//! Backend-agnostic result model, collector, tool dispatch and citation mapping.
//!
//! Everything in this crate is IO-free: collaborators (search backends, web
//! search, scraping) are reached through the async traits defined here, and
//! concrete implementations live in `ragcite-local` or in the embedding
//! application.

use serde::{Deserialize, Serialize};

pub mod agent;
pub mod citations;
pub mod collector;
pub mod filters;
pub mod format;
pub mod results;
pub mod settings;
pub mod tools;
pub mod turn;

pub use agent::{
    AgentEvent, BufferedSink, ChannelSink, EventSink, InlineMarkupToolCalls, ModelOutput,
    NativeToolCalls, RagAgent, ToolCallParser, ToolMessage,
};
pub use citations::{
    extract_citations, finalize_citations_with_collector, map_citations_to_sources,
    reassign_citations_in_order, BibliographyEntry, CitationMap, CitationMarker,
    FinalizedCitations, MappedCitation, ReassignedCitations,
};
pub use collector::{CallRecord, CollectedSource, SearchResultsCollector, TurnSnapshot};
pub use filters::Filters;
pub use format::{ApproxTokenCounter, ContextFormatter, TokenCounter};
pub use results::{
    AggregateSearchResult, ChunkSearchResult, ContentItem, ContextDocumentResult,
    DocumentResult, GraphContent, GraphSearchResult, Metadata, ResultKind, SourceResult,
    WebResult, WebResultKind, WebSearchResponse,
};
pub use settings::{AgentSettings, ScrapeParams, SearchSettings};
pub use tools::{Collaborators, Tool, ToolCall, ToolDefinition, ToolName, ToolRegistry, ToolResult};
pub use turn::TurnContext;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unsupported tool name: {0}")]
    UnsupportedTool(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("scrape failed: {0}")]
    Scrape(String),
    #[error("tool {tool} failed: {source}")]
    ToolExecution {
        tool: String,
        #[source]
        source: Box<Error>,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Configuration errors fail the call (or registration) immediately and are
    /// never worth retrying.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::UnsupportedTool(_) | Error::NotConfigured(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// What a knowledge search collaborator hands back: either the canonical type
/// or a loosely shaped mapping with `chunk_search_results` / `graph_search_results`.
#[derive(Debug, Clone)]
pub enum KnowledgeResponse {
    Aggregate(AggregateSearchResult),
    Raw(serde_json::Value),
}

impl KnowledgeResponse {
    pub fn into_aggregate(self) -> Result<AggregateSearchResult> {
        match self {
            KnowledgeResponse::Aggregate(agg) => Ok(agg),
            KnowledgeResponse::Raw(raw) => AggregateSearchResult::from_loose_mapping(&raw),
        }
    }
}

#[async_trait::async_trait]
pub trait KnowledgeSearch: Send + Sync {
    async fn search(&self, query: &str, settings: &SearchSettings) -> Result<KnowledgeResponse>;
}

#[async_trait::async_trait]
pub trait ContentSource: Send + Sync {
    async fn content(
        &self,
        filters: &Filters,
        options: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<ContentItem>>;
}

#[async_trait::async_trait]
pub trait FileSearch: Send + Sync {
    async fn search_files(
        &self,
        query: &str,
        settings: &SearchSettings,
    ) -> Result<Vec<DocumentResult>>;
}

#[async_trait::async_trait]
pub trait WebSearchClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Provider-specific payload, untouched.
    async fn get_raw(&self, query: &str) -> Result<serde_json::Value>;

    fn normalize(&self, raw: &serde_json::Value) -> Result<WebSearchResponse> {
        WebSearchResponse::from_serper_results(raw)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapedPage {
    pub markdown: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[async_trait::async_trait]
pub trait ScrapeClient: Send + Sync {
    async fn scrape_url(&self, url: &str, params: &ScrapeParams) -> Result<ScrapedPage>;
}
