use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

pub type Metadata = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Chunk,
    Graph,
    Web,
    Document,
    ContextDocument,
}

impl ResultKind {
    pub const ALL: [ResultKind; 5] = [
        ResultKind::Chunk,
        ResultKind::Graph,
        ResultKind::Web,
        ResultKind::Document,
        ResultKind::ContextDocument,
    ];

    /// Leading character of every collector id of this kind.
    pub fn id_prefix(self) -> char {
        match self {
            ResultKind::Chunk => 'c',
            ResultKind::Graph => 'g',
            ResultKind::Web => 'w',
            ResultKind::Document => 'd',
            ResultKind::ContextDocument => 'x',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResultKind::Chunk => "chunk",
            ResultKind::Graph => "graph",
            ResultKind::Web => "web",
            ResultKind::Document => "document",
            ResultKind::ContextDocument => "context_document",
        }
    }

    pub(crate) fn slot(self) -> usize {
        match self {
            ResultKind::Chunk => 0,
            ResultKind::Graph => 1,
            ResultKind::Web => 2,
            ResultKind::Document => 3,
            ResultKind::ContextDocument => 4,
        }
    }
}

impl std::fmt::Display for ResultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSearchResult {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub collection_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphContent {
    Entity {
        name: String,
        #[serde(default)]
        description: String,
    },
    Relationship {
        subject: String,
        predicate: String,
        object: String,
        #[serde(default)]
        description: String,
    },
    Community {
        name: String,
        #[serde(default)]
        summary: String,
    },
}

impl GraphContent {
    /// One-line relation summary shown to the model.
    pub fn summary_line(&self) -> String {
        match self {
            GraphContent::Entity { name, description } if description.is_empty() => name.clone(),
            GraphContent::Entity { name, description } => format!("{name}: {description}"),
            GraphContent::Relationship {
                subject,
                predicate,
                object,
                description,
            } => {
                if description.is_empty() {
                    format!("{subject} {predicate} {object}")
                } else {
                    format!("{subject} {predicate} {object} ({description})")
                }
            }
            GraphContent::Community { name, summary } if summary.is_empty() => name.clone(),
            GraphContent::Community { name, summary } => format!("{name}: {summary}"),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            GraphContent::Entity { name, .. } | GraphContent::Community { name, .. } => name,
            GraphContent::Relationship { subject, .. } => subject,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSearchResult {
    pub content: GraphContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default)]
    pub chunk_ids: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebResultKind {
    #[default]
    Organic,
    /// Full-page scrape; `snippet` holds the page markdown.
    Scrape,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebResult {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub position: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: WebResultKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeopleAlsoAsk {
    pub question: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebSearchResponse {
    pub organic_results: Vec<WebResult>,
    #[serde(default)]
    pub people_also_ask: Vec<PeopleAlsoAsk>,
    #[serde(default)]
    pub related_searches: Vec<String>,
}

impl WebSearchResponse {
    /// Build from a Serper-shaped payload (`organic`, `peopleAlsoAsk`, `relatedSearches`).
    ///
    /// Entries without a link are dropped; missing positions fall back to the
    /// 1-based index in the `organic` list.
    pub fn from_serper_results(raw: &Value) -> Result<Self> {
        let Some(obj) = raw.as_object() else {
            return Err(Error::Search(
                "web search payload is not a JSON object".to_string(),
            ));
        };

        let mut organic_results = Vec::new();
        if let Some(items) = obj.get("organic").and_then(|v| v.as_array()) {
            for (i, item) in items.iter().enumerate() {
                let Some(link) = item.get("link").and_then(|v| v.as_str()) else {
                    continue;
                };
                organic_results.push(WebResult {
                    title: str_field(item, "title").unwrap_or_default(),
                    link: link.to_string(),
                    snippet: str_field(item, "snippet").unwrap_or_default(),
                    position: item
                        .get("position")
                        .and_then(|v| v.as_u64())
                        .map(|p| p as usize)
                        .unwrap_or(i + 1),
                    date: str_field(item, "date"),
                    kind: WebResultKind::Organic,
                });
            }
        }

        let mut people_also_ask = Vec::new();
        if let Some(items) = obj.get("peopleAlsoAsk").and_then(|v| v.as_array()) {
            for item in items {
                let Some(question) = str_field(item, "question") else {
                    continue;
                };
                people_also_ask.push(PeopleAlsoAsk {
                    question,
                    snippet: str_field(item, "snippet").unwrap_or_default(),
                    link: str_field(item, "link"),
                });
            }
        }

        let related_searches = obj
            .get("relatedSearches")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| str_field(item, "query"))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            organic_results,
            people_also_ask,
            related_searches,
        })
    }
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(|x| x.as_str())
        .map(|s| s.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub collection_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A chunk as handed back by a content collaborator: bare text or a record with `text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentChunk {
    Text(String),
    Record { text: String },
}

impl ContentChunk {
    pub fn into_text(self) -> String {
        match self {
            ContentChunk::Text(t) | ContentChunk::Record { text: t } => t,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub document: DocumentResult,
    #[serde(default)]
    pub chunks: Vec<ContentChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDocumentResult {
    pub document: DocumentResult,
    pub chunks: Vec<String>,
}

impl ContextDocumentResult {
    /// Per-chunk metadata copied onto the document is noise for the model; drop it.
    pub fn from_content_item(item: ContentItem) -> Self {
        let mut document = item.document;
        document.metadata.remove("chunk_metadata");
        Self {
            document,
            chunks: item.chunks.into_iter().map(ContentChunk::into_text).collect(),
        }
    }
}

/// Everything one tool call produced. Sequences the producing tool does not
/// fill stay empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateSearchResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunk_search_results: Vec<ChunkSearchResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub graph_search_results: Vec<GraphSearchResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub web_search_results: Vec<WebResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub document_search_results: Vec<DocumentResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_document_results: Vec<ContextDocumentResult>,
}

impl AggregateSearchResult {
    pub fn with_chunks(mut self, chunks: Vec<ChunkSearchResult>) -> Self {
        self.chunk_search_results = chunks;
        self
    }

    pub fn with_graph(mut self, graph: Vec<GraphSearchResult>) -> Self {
        self.graph_search_results = graph;
        self
    }

    pub fn with_web(mut self, web: Vec<WebResult>) -> Self {
        self.web_search_results = web;
        self
    }

    pub fn with_documents(mut self, documents: Vec<DocumentResult>) -> Self {
        self.document_search_results = documents;
        self
    }

    pub fn with_context_documents(mut self, docs: Vec<ContextDocumentResult>) -> Self {
        self.context_document_results = docs;
        self
    }

    /// Only `chunk_search_results` and `graph_search_results` are read; other keys are ignored.
    pub fn from_loose_mapping(raw: &Value) -> Result<Self> {
        let Some(obj) = raw.as_object() else {
            return Err(Error::Search(
                "knowledge search returned a non-object payload".to_string(),
            ));
        };
        Ok(Self::default()
            .with_chunks(list_field(obj, "chunk_search_results")?)
            .with_graph(list_field(obj, "graph_search_results")?))
    }

    pub fn count(&self, kind: ResultKind) -> usize {
        match kind {
            ResultKind::Chunk => self.chunk_search_results.len(),
            ResultKind::Graph => self.graph_search_results.len(),
            ResultKind::Web => self.web_search_results.len(),
            ResultKind::Document => self.document_search_results.len(),
            ResultKind::ContextDocument => self.context_document_results.len(),
        }
    }

    /// Total number of individual results across all kinds.
    pub fn len(&self) -> usize {
        ResultKind::ALL.iter().map(|k| self.count(*k)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Results in canonical order: chunks, graph, web, documents, context documents.
    /// Collector ids are assigned in this order.
    pub fn sources(&self) -> Vec<SourceResult> {
        let mut out = Vec::with_capacity(self.len());
        out.extend(self.chunk_search_results.iter().cloned().map(SourceResult::Chunk));
        out.extend(self.graph_search_results.iter().cloned().map(SourceResult::Graph));
        out.extend(self.web_search_results.iter().cloned().map(SourceResult::Web));
        out.extend(
            self.document_search_results
                .iter()
                .cloned()
                .map(SourceResult::Document),
        );
        out.extend(
            self.context_document_results
                .iter()
                .cloned()
                .map(SourceResult::ContextDocument),
        );
        out
    }
}

fn list_field<T: DeserializeOwned>(
    obj: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<Vec<T>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(v) => Ok(serde_json::from_value(v.clone())?),
    }
}

/// A single result of any kind, as stored by the collector.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "result", rename_all = "snake_case")]
pub enum SourceResult {
    Chunk(ChunkSearchResult),
    Graph(GraphSearchResult),
    Web(WebResult),
    Document(DocumentResult),
    ContextDocument(ContextDocumentResult),
}

impl SourceResult {
    pub fn kind(&self) -> ResultKind {
        match self {
            SourceResult::Chunk(_) => ResultKind::Chunk,
            SourceResult::Graph(_) => ResultKind::Graph,
            SourceResult::Web(_) => ResultKind::Web,
            SourceResult::Document(_) => ResultKind::Document,
            SourceResult::ContextDocument(_) => ResultKind::ContextDocument,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            SourceResult::Chunk(c) => c.metadata.get("title").and_then(|v| v.as_str()),
            SourceResult::Graph(g) => Some(g.content.label()),
            SourceResult::Web(w) => Some(w.title.as_str()),
            SourceResult::Document(d) => d.title.as_deref(),
            SourceResult::ContextDocument(d) => d.document.title.as_deref(),
        }
    }

    pub fn link(&self) -> Option<&str> {
        match self {
            SourceResult::Web(w) => Some(w.link.as_str()),
            _ => None,
        }
    }

    /// First `max_chars` characters of the most representative text.
    pub fn excerpt(&self, max_chars: usize) -> String {
        let text = match self {
            SourceResult::Chunk(c) => c.text.clone(),
            SourceResult::Graph(g) => g.content.summary_line(),
            SourceResult::Web(w) => w.snippet.clone(),
            SourceResult::Document(d) => d.summary.clone().unwrap_or_default(),
            SourceResult::ContextDocument(d) => d
                .document
                .summary
                .clone()
                .or_else(|| d.chunks.first().cloned())
                .unwrap_or_default(),
        };
        text.chars().take(max_chars).collect()
    }
}
