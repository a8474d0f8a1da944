//! The fixed tool set exposed to the model, and the registry that dispatches
//! calls to it.
//!
//! A tool's job ends at producing an [`AggregateSearchResult`]; the registry
//! records it in the turn's collector (once, after the collaborator returned)
//! and renders the model-facing text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tracing::Instrument;

use crate::collector::CallRecord;
use crate::filters::{decode_filters, merge_content_filters};
use crate::format::{cap_scraped_markdown, ContextFormatter};
use crate::results::{AggregateSearchResult, ContextDocumentResult, WebResult, WebResultKind};
use crate::settings::{AgentSettings, ScrapeParams, SearchSettings};
use crate::turn::TurnContext;
use crate::{
    ContentSource, Error, FileSearch, KnowledgeSearch, Result, ScrapeClient, WebSearchClient,
};

const UNTITLED_PAGE: &str = "Untitled page";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    Content,
    FirecrawlScrape,
    SearchFileKnowledge,
    SearchFileDescriptions,
    WebSearch,
}

impl ToolName {
    pub const ALL: [ToolName; 5] = [
        ToolName::Content,
        ToolName::FirecrawlScrape,
        ToolName::SearchFileKnowledge,
        ToolName::SearchFileDescriptions,
        ToolName::WebSearch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::Content => "content",
            ToolName::FirecrawlScrape => "firecrawl_scrape",
            ToolName::SearchFileKnowledge => "search_file_knowledge",
            ToolName::SearchFileDescriptions => "search_file_descriptions",
            ToolName::WebSearch => "web_search",
        }
    }
}

impl FromStr for ToolName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ToolName::ALL
            .into_iter()
            .find(|n| n.as_str() == s.trim())
            .ok_or_else(|| Error::UnsupportedTool(s.to_string()))
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Function-calling contract published to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema (`type: object`) for the call arguments.
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn required(&self) -> Vec<String> {
        self.parameters
            .get("required")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// One tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// An object, or (as many providers send it) a JSON-encoded object string.
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    fn parsed_arguments(&self) -> Result<Value> {
        match &self.arguments {
            Value::Null => Ok(Value::Object(Default::default())),
            Value::String(s) if s.trim().is_empty() => Ok(Value::Object(Default::default())),
            Value::String(s) => serde_json::from_str(s).map_err(|e| Error::InvalidArguments {
                tool: self.name.clone(),
                message: format!("arguments are not valid JSON: {e}"),
            }),
            other => Ok(other.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: ToolName,
    pub record: CallRecord,
    /// Rendered and budget-truncated text for the model.
    pub llm_text: String,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> ToolName;

    fn definition(&self) -> ToolDefinition;

    /// Validate `args`, call the bound collaborator, and normalize what it
    /// returned. Must not touch the collector.
    async fn results(&self, args: &Value) -> Result<AggregateSearchResult>;

    /// Run the tool and record its results in the turn. Collaborator failures
    /// come back as [`Error::ToolExecution`]; nothing is recorded on failure.
    async fn invoke(&self, turn: &TurnContext, args: &Value) -> Result<CallRecord> {
        let agg = match self.results(args).await {
            Ok(agg) => agg,
            Err(e @ (Error::UnsupportedTool(_)
            | Error::NotConfigured(_)
            | Error::InvalidArguments { .. }
            | Error::InvalidUrl(_))) => return Err(e),
            Err(e) => {
                tracing::warn!(tool = %self.name(), error = %e, "tool collaborator failed");
                return Err(Error::ToolExecution {
                    tool: self.name().to_string(),
                    source: Box::new(e),
                });
            }
        };
        Ok(turn.collector().add_aggregate_result(agg))
    }
}

/// External functions the tools are bound to. Any of them may be absent; a
/// tool whose collaborator is absent fails at call time with
/// [`Error::NotConfigured`].
#[derive(Clone, Default)]
pub struct Collaborators {
    pub knowledge: Option<Arc<dyn KnowledgeSearch>>,
    pub content: Option<Arc<dyn ContentSource>>,
    pub files: Option<Arc<dyn FileSearch>>,
    pub web: Option<Arc<dyn WebSearchClient>>,
    pub scrape: Option<Arc<dyn ScrapeClient>>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeSearch>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn with_content(mut self, content: Arc<dyn ContentSource>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_files(mut self, files: Arc<dyn FileSearch>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn with_web(mut self, web: Arc<dyn WebSearchClient>) -> Self {
        self.web = Some(web);
        self
    }

    pub fn with_scrape(mut self, scrape: Arc<dyn ScrapeClient>) -> Self {
        self.scrape = Some(scrape);
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("knowledge", &self.knowledge.is_some())
            .field("content", &self.content.is_some())
            .field("files", &self.files.is_some())
            .field("web", &self.web.as_ref().map(|w| w.name()))
            .field("scrape", &self.scrape.is_some())
            .finish()
    }
}

fn bound<'a, T: ?Sized>(slot: &'a Option<Arc<T>>, what: &str) -> Result<&'a T> {
    slot.as_deref()
        .ok_or_else(|| Error::NotConfigured(what.to_string()))
}

fn required_str<'a>(tool: ToolName, args: &'a Value, key: &str) -> Result<&'a str> {
    match args.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim()),
        Some(Value::String(_)) | None | Some(Value::Null) => Err(Error::InvalidArguments {
            tool: tool.to_string(),
            message: format!("missing required parameter `{key}`"),
        }),
        Some(_) => Err(Error::InvalidArguments {
            tool: tool.to_string(),
            message: format!("`{key}` must be a string"),
        }),
    }
}

fn query_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {"type": "string", "description": description}
        },
        "required": ["query"]
    })
}

pub struct FileKnowledgeTool {
    knowledge: Option<Arc<dyn KnowledgeSearch>>,
    settings: SearchSettings,
}

#[async_trait]
impl Tool for FileKnowledgeTool {
    fn name(&self) -> ToolName {
        ToolName::SearchFileKnowledge
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "Search the local knowledge base. Use this when you want relevant \
                          text chunks or knowledge graph data."
                .to_string(),
            parameters: query_schema("User query to search in the local knowledge base."),
        }
    }

    async fn results(&self, args: &Value) -> Result<AggregateSearchResult> {
        let knowledge = bound(&self.knowledge, "knowledge search")?;
        let query = required_str(self.name(), args, "query")?;
        knowledge
            .search(query, &self.settings)
            .await?
            .into_aggregate()
    }
}

pub struct ContentTool {
    content: Option<Arc<dyn ContentSource>>,
    baseline: crate::Filters,
    structured_parameters: bool,
}

#[async_trait]
impl Tool for ContentTool {
    fn name(&self) -> ToolName {
        ToolName::Content
    }

    fn definition(&self) -> ToolDefinition {
        let filters_type = if self.structured_parameters {
            "object"
        } else {
            "string"
        };
        ToolDefinition {
            name: self.name().to_string(),
            description: "Fetch the complete contents of documents from the local database. \
                          Filter criteria (document ids, collection ids, ...) restrict the \
                          result; a single document is returned by a filter like \
                          {\"document_id\": {\"$eq\": \"...\"}}."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "filters": {
                        "type": filters_type,
                        "description": "Filter criteria, such as {\"$and\": [{\"document_id\": \
                                        {\"$eq\": \"6c9d1c39...\"}}, {\"collection_ids\": \
                                        {\"$overlap\": [\"...\"]}}]}"
                    }
                },
                "required": ["filters"]
            }),
        }
    }

    async fn results(&self, args: &Value) -> Result<AggregateSearchResult> {
        let content = bound(&self.content, "content source")?;
        let caller = decode_filters(self.name().as_str(), args.get("filters"))?;
        let filters = merge_content_filters(caller, &self.baseline);
        let options = args
            .get("options")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        let items = content.content(&filters, &options).await?;
        Ok(AggregateSearchResult::default().with_context_documents(
            items
                .into_iter()
                .map(ContextDocumentResult::from_content_item)
                .collect(),
        ))
    }
}

pub struct WebSearchTool {
    web: Option<Arc<dyn WebSearchClient>>,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> ToolName {
        ToolName::WebSearch
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "Search the web. Use this when the question needs live or recent \
                          information from the internet."
                .to_string(),
            parameters: query_schema("The query to send to the web search API."),
        }
    }

    async fn results(&self, args: &Value) -> Result<AggregateSearchResult> {
        let web = bound(&self.web, "web search client")?;
        let query = required_str(self.name(), args, "query")?;
        let raw = web.get_raw(query).await?;
        let response = web.normalize(&raw)?;
        Ok(AggregateSearchResult::default().with_web(response.organic_results))
    }
}

pub struct FileDescriptionsTool {
    files: Option<Arc<dyn FileSearch>>,
    settings: SearchSettings,
}

#[async_trait]
impl Tool for FileDescriptionsTool {
    fn name(&self) -> ToolName {
        ToolName::SearchFileDescriptions
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "Search over document-level summaries. Does not return chunk \
                          contents or knowledge graph relationships; use it for an overview \
                          of which files might be relevant."
                .to_string(),
            parameters: query_schema(
                "What to look for across available files, e.g. 'documents about XYZ'.",
            ),
        }
    }

    async fn results(&self, args: &Value) -> Result<AggregateSearchResult> {
        let files = bound(&self.files, "file search")?;
        let query = required_str(self.name(), args, "query")?;
        let docs = files.search_files(query, &self.settings).await?;
        Ok(AggregateSearchResult::default().with_documents(docs))
    }
}

pub struct FirecrawlScrapeTool {
    scrape: Option<Arc<dyn ScrapeClient>>,
    params: ScrapeParams,
}

#[async_trait]
impl Tool for FirecrawlScrapeTool {
    fn name(&self) -> ToolName {
        ToolName::FirecrawlScrape
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: "Scrape a single web page and return its contents as clean markdown. \
                          Use it when you need the whole page body rather than a search snippet."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "Absolute URL of the page to scrape, e.g. \
                                        'https://docs.firecrawl.dev/getting-started'"
                    }
                },
                "required": ["url"]
            }),
        }
    }

    async fn results(&self, args: &Value) -> Result<AggregateSearchResult> {
        let scrape = bound(&self.scrape, "scrape client")?;
        let raw = required_str(self.name(), args, "url")?;
        let url = url::Url::parse(raw).map_err(|e| Error::InvalidUrl(format!("{raw}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::InvalidUrl(format!(
                "{raw}: only http and https are supported"
            )));
        }

        tracing::debug!(url = %url, "scraping page");
        let page = scrape.scrape_url(url.as_str(), &self.params).await?;
        let title = page
            .metadata
            .get("title")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(UNTITLED_PAGE)
            .to_string();
        Ok(AggregateSearchResult::default().with_web(vec![WebResult {
            title,
            link: raw.to_string(),
            snippet: cap_scraped_markdown(page.markdown),
            position: 0,
            date: None,
            kind: WebResultKind::Scrape,
        }]))
    }
}

fn build_tool(name: ToolName, collab: &Collaborators, settings: &AgentSettings) -> Box<dyn Tool> {
    match name {
        ToolName::Content => Box::new(ContentTool {
            content: collab.content.clone(),
            baseline: settings.search_settings.filters.clone(),
            structured_parameters: settings.structured_parameters,
        }),
        ToolName::FirecrawlScrape => Box::new(FirecrawlScrapeTool {
            scrape: collab.scrape.clone(),
            params: settings.scrape.clone(),
        }),
        ToolName::SearchFileKnowledge => Box::new(FileKnowledgeTool {
            knowledge: collab.knowledge.clone(),
            settings: settings.search_settings.clone(),
        }),
        ToolName::SearchFileDescriptions => Box::new(FileDescriptionsTool {
            files: collab.files.clone(),
            settings: settings.search_settings.clone(),
        }),
        ToolName::WebSearch => Box::new(WebSearchTool {
            web: collab.web.clone(),
        }),
    }
}

/// Tools available to the agent for a conversation, plus the formatter that
/// turns their results into model input.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    formatter: ContextFormatter,
}

impl ToolRegistry {
    /// Build the named tools. Any unknown name fails the whole registration;
    /// duplicates register once, in first-appearance order.
    pub fn register<S: AsRef<str>>(
        names: &[S],
        collab: &Collaborators,
        settings: &AgentSettings,
    ) -> Result<Self> {
        let mut parsed: Vec<ToolName> = Vec::with_capacity(names.len());
        for name in names {
            let name: ToolName = name.as_ref().parse()?;
            if !parsed.contains(&name) {
                parsed.push(name);
            }
        }
        let tools = parsed
            .into_iter()
            .map(|n| build_tool(n, collab, settings))
            .collect();
        Ok(Self {
            tools,
            formatter: ContextFormatter::new(settings.tool_budget()),
        })
    }

    /// Register `settings.tools`.
    pub fn from_settings(collab: &Collaborators, settings: &AgentSettings) -> Result<Self> {
        Self::register(&settings.tools, collab, settings)
    }

    pub fn with_formatter(mut self, formatter: ContextFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn formatter(&self) -> &ContextFormatter {
        &self.formatter
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name().as_str() == name)
            .map(|t| t.as_ref())
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<ToolName> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub async fn execute(&self, turn: &TurnContext, call: &ToolCall) -> Result<ToolResult> {
        let tool = self
            .get(call.name.trim())
            .ok_or_else(|| Error::UnsupportedTool(call.name.clone()))?;
        let args = call.parsed_arguments()?;
        let span = tracing::info_span!("tool_call", tool = %tool.name(), call_id = %call.id);
        let record = tool.invoke(turn, &args).instrument(span).await?;
        let llm_text = self.formatter.format_for_llm(&record);
        Ok(ToolResult {
            call_id: call.id.clone(),
            tool: tool.name(),
            record,
            llm_text,
        })
    }

    /// Run every call of one model step concurrently. Results come back in
    /// request order; one call failing does not affect the others.
    pub async fn execute_all(
        &self,
        turn: &TurnContext,
        calls: &[ToolCall],
    ) -> Vec<Result<ToolResult>> {
        futures::future::join_all(calls.iter().map(|c| self.execute(turn, c))).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .field("formatter", &self.formatter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SCRAPE_TRUNCATION_SUFFIX;
    use crate::results::{ContentChunk, ContentItem, DocumentResult, Metadata};
    use crate::{Filters, KnowledgeResponse, ScrapedPage};
    use std::sync::Mutex;
    use std::time::Duration;

    struct RecordingContent {
        seen: Mutex<Option<Filters>>,
    }

    #[async_trait]
    impl ContentSource for RecordingContent {
        async fn content(
            &self,
            filters: &Filters,
            _options: &serde_json::Map<String, Value>,
        ) -> Result<Vec<ContentItem>> {
            *self.seen.lock().unwrap() = Some(filters.clone());
            Ok(vec![ContentItem {
                document: DocumentResult {
                    id: "X".into(),
                    title: Some("Guide".into()),
                    summary: None,
                    collection_ids: vec![],
                    owner_id: None,
                    metadata: Metadata::new(),
                },
                chunks: vec![ContentChunk::Text("body".into())],
            }])
        }
    }

    struct StaticKnowledge(Value);

    #[async_trait]
    impl KnowledgeSearch for StaticKnowledge {
        async fn search(&self, _query: &str, _s: &SearchSettings) -> Result<KnowledgeResponse> {
            Ok(KnowledgeResponse::Raw(self.0.clone()))
        }
    }

    struct FailingWeb;

    #[async_trait]
    impl WebSearchClient for FailingWeb {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn get_raw(&self, _query: &str) -> Result<Value> {
            Err(Error::Search("HTTP 503".into()))
        }
    }

    struct SlowWeb(Duration);

    #[async_trait]
    impl WebSearchClient for SlowWeb {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn get_raw(&self, query: &str) -> Result<Value> {
            tokio::time::sleep(self.0).await;
            Ok(json!({"organic": [{"title": query, "link": format!("https://example.com/{query}")}]}))
        }
    }

    struct BarrierWeb(tokio::sync::Barrier);

    #[async_trait]
    impl WebSearchClient for BarrierWeb {
        fn name(&self) -> &'static str {
            "barrier"
        }

        async fn get_raw(&self, query: &str) -> Result<Value> {
            self.0.wait().await;
            Ok(json!({"organic": [{"title": query, "link": format!("https://example.com/{query}")}]}))
        }
    }

    struct RecordingFiles {
        seen: Mutex<Option<(String, SearchSettings)>>,
    }

    #[async_trait]
    impl FileSearch for RecordingFiles {
        async fn search_files(
            &self,
            query: &str,
            settings: &SearchSettings,
        ) -> Result<Vec<DocumentResult>> {
            *self.seen.lock().unwrap() = Some((query.to_string(), settings.clone()));
            Ok(["guide", "faq"]
                .iter()
                .map(|id| DocumentResult {
                    id: id.to_string(),
                    title: Some(format!("{id} title")),
                    summary: Some(format!("summary of {id}")),
                    collection_ids: vec![],
                    owner_id: None,
                    metadata: Metadata::new(),
                })
                .collect())
        }
    }

    struct StaticScrape(ScrapedPage);

    #[async_trait]
    impl ScrapeClient for StaticScrape {
        async fn scrape_url(&self, _url: &str, _params: &ScrapeParams) -> Result<ScrapedPage> {
            Ok(self.0.clone())
        }
    }

    fn settings_with(tools: &[&str]) -> AgentSettings {
        AgentSettings {
            tools: tools.iter().map(|s| s.to_string()).collect(),
            ..AgentSettings::default()
        }
    }

    #[test]
    fn unknown_tool_name_fails_registration() {
        let err = ToolRegistry::register(
            &["web_search", "summarize"],
            &Collaborators::new(),
            &AgentSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnsupportedTool(ref n) if n == "summarize"));
        assert!(err.is_configuration());
    }

    #[test]
    fn duplicate_names_register_once_in_order() {
        let reg = ToolRegistry::register(
            &["web_search", "content", "web_search"],
            &Collaborators::new(),
            &AgentSettings::default(),
        )
        .unwrap();
        assert_eq!(reg.names(), vec![ToolName::WebSearch, ToolName::Content]);
        assert!(reg.get("content").is_some());
        assert!(reg.get("firecrawl_scrape").is_none());
    }

    #[test]
    fn content_schema_follows_structured_parameters_flag() {
        let collab = Collaborators::new();
        let mut settings = settings_with(&["content"]);
        let structured = ToolRegistry::from_settings(&collab, &settings).unwrap();
        settings.structured_parameters = false;
        let flat = ToolRegistry::from_settings(&collab, &settings).unwrap();

        let def = &structured.definitions()[0];
        assert_eq!(def.parameters["properties"]["filters"]["type"], "object");
        assert_eq!(def.required(), vec!["filters".to_string()]);
        let def = &flat.definitions()[0];
        assert_eq!(def.parameters["properties"]["filters"]["type"], "string");
    }

    #[test]
    fn formatter_budget_never_exceeds_context_window() {
        let mut settings = settings_with(&["web_search"]);
        settings.max_tool_context_length = 20_000;
        settings.max_context_window_tokens = 4_096;
        let reg = ToolRegistry::from_settings(&Collaborators::new(), &settings).unwrap();
        assert_eq!(reg.formatter().max_tool_context_length(), 4_096);

        settings.max_tool_context_length = 1_000;
        let reg = ToolRegistry::from_settings(&Collaborators::new(), &settings).unwrap();
        assert_eq!(reg.formatter().max_tool_context_length(), 1_000);
    }

    #[tokio::test]
    async fn content_filters_rename_document_id() {
        let source = Arc::new(RecordingContent {
            seen: Mutex::new(None),
        });
        let collab = Collaborators::new().with_content(source.clone());
        let reg = ToolRegistry::from_settings(&collab, &settings_with(&["content"])).unwrap();
        let turn = TurnContext::new();

        let out = reg
            .execute(
                &turn,
                &ToolCall::new("1", "content", json!({"filters": {"document_id": {"$eq": "X"}}})),
            )
            .await
            .unwrap();
        let seen = source.seen.lock().unwrap().clone().unwrap();
        assert_eq!(Value::Object(seen), json!({"id": {"$eq": "X"}}));
        assert_eq!(out.record.source_ids, vec!["x001"]);
        assert!(out.llm_text.contains("[x001]"));
    }

    #[tokio::test]
    async fn flat_and_structured_filters_reach_the_source_identically() {
        let run = |structured: bool, filters: Value| async move {
            let source = Arc::new(RecordingContent {
                seen: Mutex::new(None),
            });
            let collab = Collaborators::new().with_content(source.clone());
            let mut settings = settings_with(&["content"]);
            settings.structured_parameters = structured;
            settings.search_settings.filters = match json!({"owner_id": {"$eq": "u1"}}) {
                Value::Object(m) => m,
                _ => unreachable!(),
            };
            let reg = ToolRegistry::from_settings(&collab, &settings).unwrap();
            reg.execute(&TurnContext::new(), &ToolCall::new("1", "content", json!({"filters": filters})))
                .await
                .unwrap();
            let seen = source.seen.lock().unwrap().clone().unwrap();
            seen
        };
        let filters = json!({"document_id": {"$eq": "X"}});
        let a = run(true, filters.clone()).await;
        let b = run(false, Value::String(filters.to_string())).await;
        assert_eq!(a, b);
        assert_eq!(
            Value::Object(a),
            json!({"$and": [{"id": {"$eq": "X"}}, {"owner_id": {"$eq": "u1"}}]})
        );
    }

    #[tokio::test]
    async fn knowledge_search_normalizes_loose_mapping() {
        let collab = Collaborators::new().with_knowledge(Arc::new(StaticKnowledge(json!({
            "chunk_search_results": [{"id": "a", "document_id": "d", "text": "Ferris"}],
            "graph_search_results": [{"content": {"type": "entity", "name": "Ferris"}}]
        }))));
        let reg =
            ToolRegistry::from_settings(&collab, &settings_with(&["search_file_knowledge"]))
                .unwrap();
        let turn = TurnContext::new();
        let out = reg
            .execute(
                &turn,
                &ToolCall::new("k", "search_file_knowledge", json!({"query": "crab"})),
            )
            .await
            .unwrap();
        assert_eq!(out.record.source_ids, vec!["c001", "g001"]);
        assert_eq!(turn.collector().len(), 2);
    }

    #[tokio::test]
    async fn missing_query_is_invalid_arguments() {
        let collab = Collaborators::new().with_web(Arc::new(FailingWeb));
        let reg = ToolRegistry::from_settings(&collab, &settings_with(&["web_search"])).unwrap();
        let err = reg
            .execute(&TurnContext::new(), &ToolCall::new("1", "web_search", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn unbound_collaborator_is_not_configured() {
        let reg = ToolRegistry::from_settings(&Collaborators::new(), &settings_with(&["web_search"]))
            .unwrap();
        let turn = TurnContext::new();
        let err = reg
            .execute(&turn, &ToolCall::new("1", "web_search", json!({"query": "q"})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConfigured(_)));
        assert_eq!(turn.collector().call_count(), 0);
    }

    #[tokio::test]
    async fn failing_web_search_adds_nothing() {
        let collab = Collaborators::new().with_web(Arc::new(FailingWeb));
        let reg = ToolRegistry::from_settings(&collab, &settings_with(&["web_search"])).unwrap();
        let turn = TurnContext::new();
        let err = reg
            .execute(&turn, &ToolCall::new("1", "web_search", json!({"query": "rust"})))
            .await
            .unwrap_err();
        match err {
            Error::ToolExecution { tool, source } => {
                assert_eq!(tool, "web_search");
                assert!(matches!(*source, Error::Search(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(turn.collector().call_count(), 0);
        assert!(turn.collector().is_empty());
    }

    #[tokio::test]
    async fn cancelled_call_adds_nothing() {
        let collab = Collaborators::new().with_web(Arc::new(SlowWeb(Duration::from_secs(5))));
        let reg = ToolRegistry::from_settings(&collab, &settings_with(&["web_search"])).unwrap();
        let turn = TurnContext::new();
        let call = ToolCall::new("1", "web_search", json!({"query": "slow"}));
        let res = tokio::time::timeout(Duration::from_millis(20), reg.execute(&turn, &call)).await;
        assert!(res.is_err());
        assert_eq!(turn.collector().call_count(), 0);
    }

    #[tokio::test]
    async fn oversized_scrape_is_capped() {
        let mut metadata = Metadata::new();
        metadata.insert("title".into(), json!("Big page"));
        let page = ScrapedPage {
            markdown: "a".repeat(150_000),
            metadata,
        };
        let collab = Collaborators::new().with_scrape(Arc::new(StaticScrape(page)));
        let reg =
            ToolRegistry::from_settings(&collab, &settings_with(&["firecrawl_scrape"])).unwrap();
        let turn = TurnContext::new();
        let out = reg
            .execute(
                &turn,
                &ToolCall::new("s", "firecrawl_scrape", json!({"url": "https://example.com/big"})),
            )
            .await
            .unwrap();
        let web = &out.record.aggregate.web_search_results[0];
        assert_eq!(web.kind, WebResultKind::Scrape);
        assert_eq!(web.position, 0);
        assert_eq!(web.title, "Big page");
        assert_eq!(web.snippet.len(), 100_000 + SCRAPE_TRUNCATION_SUFFIX.len());
        assert!(web.snippet.ends_with(SCRAPE_TRUNCATION_SUFFIX));
        assert_eq!(out.record.source_ids, vec!["w001"]);
    }

    #[tokio::test]
    async fn scrape_rejects_non_http_urls_and_defaults_title() {
        let page = ScrapedPage {
            markdown: "# hi".into(),
            metadata: Metadata::new(),
        };
        let collab = Collaborators::new().with_scrape(Arc::new(StaticScrape(page)));
        let reg =
            ToolRegistry::from_settings(&collab, &settings_with(&["firecrawl_scrape"])).unwrap();
        let turn = TurnContext::new();

        for bad in ["not a url", "ftp://example.com/file"] {
            let err = reg
                .execute(&turn, &ToolCall::new("s", "firecrawl_scrape", json!({"url": bad})))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidUrl(_)), "{bad}: {err}");
        }

        let out = reg
            .execute(
                &turn,
                &ToolCall::new("s", "firecrawl_scrape", json!({"url": "https://example.com"})),
            )
            .await
            .unwrap();
        assert_eq!(out.record.aggregate.web_search_results[0].title, UNTITLED_PAGE);
    }

    #[tokio::test]
    async fn string_encoded_arguments_are_accepted() {
        let collab = Collaborators::new().with_web(Arc::new(SlowWeb(Duration::ZERO)));
        let reg = ToolRegistry::from_settings(&collab, &settings_with(&["web_search"])).unwrap();
        let out = reg
            .execute(
                &TurnContext::new(),
                &ToolCall::new("1", "web_search", Value::String(r#"{"query":"ferris"}"#.into())),
            )
            .await
            .unwrap();
        assert_eq!(out.call_id, "1");
        assert_eq!(out.tool, ToolName::WebSearch);
        assert_eq!(out.record.aggregate.web_search_results[0].title, "ferris");
    }

    #[tokio::test]
    async fn execute_all_runs_calls_concurrently_in_request_order() {
        // Both calls must be in flight at once for the barrier to release.
        let collab = Collaborators::new()
            .with_web(Arc::new(BarrierWeb(tokio::sync::Barrier::new(2))));
        let reg = ToolRegistry::from_settings(&collab, &settings_with(&["web_search"])).unwrap();
        let turn = TurnContext::new();
        let calls = vec![
            ToolCall::new("a", "web_search", json!({"query": "first"})),
            ToolCall::new("b", "web_search", json!({"query": "second"})),
        ];
        let results = tokio::time::timeout(Duration::from_secs(5), reg.execute_all(&turn, &calls))
            .await
            .expect("calls did not run concurrently");
        let ids: Vec<&str> = results
            .iter()
            .map(|r| r.as_ref().unwrap().call_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(turn.collector().call_count(), 2);
        let mut all: Vec<String> = turn.collector().all_results().into_iter().map(|s| s.id).collect();
        all.sort();
        assert_eq!(all, vec!["w001", "w002"]);
    }

    #[tokio::test]
    async fn file_descriptions_yield_document_ids() {
        let files = Arc::new(RecordingFiles {
            seen: Mutex::new(None),
        });
        let collab = Collaborators::new().with_files(files.clone());
        let mut settings = settings_with(&["search_file_descriptions"]);
        settings.search_settings.limit = 3;
        let reg = ToolRegistry::from_settings(&collab, &settings).unwrap();
        let turn = TurnContext::new();

        let out = reg
            .execute(
                &turn,
                &ToolCall::new("f", "search_file_descriptions", json!({"query": "onboarding"})),
            )
            .await
            .unwrap();
        assert_eq!(out.tool, ToolName::SearchFileDescriptions);
        assert_eq!(out.record.source_ids, vec!["d001", "d002"]);
        assert!(out.llm_text.contains("[d001]"));
        assert!(out.llm_text.contains("guide title"));
        let (query, seen) = files.seen.lock().unwrap().clone().unwrap();
        assert_eq!(query, "onboarding");
        assert_eq!(seen.limit, 3);
        assert_eq!(turn.collector().lookup("d002").unwrap().call_index, 0);
    }

    #[tokio::test]
    async fn file_descriptions_need_query_and_collaborator() {
        let files = Arc::new(RecordingFiles {
            seen: Mutex::new(None),
        });
        let settings = settings_with(&["search_file_descriptions"]);
        let turn = TurnContext::new();

        let collab = Collaborators::new().with_files(files.clone());
        let bound = ToolRegistry::from_settings(&collab, &settings).unwrap();
        let err = bound
            .execute(&turn, &ToolCall::new("f", "search_file_descriptions", json!({})))
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::InvalidArguments { ref tool, .. } if tool == "search_file_descriptions")
        );
        assert!(files.seen.lock().unwrap().is_none());

        let unbound = ToolRegistry::from_settings(&Collaborators::new(), &settings).unwrap();
        let err = unbound
            .execute(
                &turn,
                &ToolCall::new("f", "search_file_descriptions", json!({"query": "q"})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotConfigured(_)));
        assert!(turn.collector().is_empty());
    }

    #[tokio::test]
    async fn unregistered_call_is_unsupported() {
        let reg = ToolRegistry::from_settings(&Collaborators::new(), &settings_with(&["content"]))
            .unwrap();
        let err = reg
            .execute(&TurnContext::new(), &ToolCall::new("1", "web_search", json!({"query": "q"})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedTool(_)));
    }
}
