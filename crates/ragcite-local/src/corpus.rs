//! A small document store backed by one JSON file.
//!
//! ```json
//! {
//!   "documents": [
//!     {"id": "rust-book", "title": "The Rust Book", "summary": "...",
//!      "collection_ids": ["docs"], "owner_id": "u1", "metadata": {"lang": "en"},
//!      "chunks": ["plain text", {"id": "c-1", "text": "...", "metadata": {}}]}
//!   ],
//!   "graph": [
//!     {"content": {"type": "entity", "name": "Ferris", "description": "the crab"}}
//!   ]
//! }
//! ```
//!
//! Documents and chunks without an `id` get one derived from a sha256 of their
//! content, so ids are stable across loads. Scoring is lexical: the fraction
//! of distinct query terms present in the text.

use async_trait::async_trait;
use ragcite_core::results::ContentChunk;
use ragcite_core::{
    AggregateSearchResult, ChunkSearchResult, ContentItem, ContentSource, DocumentResult, Error,
    FileSearch, Filters, GraphSearchResult, KnowledgeResponse, KnowledgeSearch, Metadata, Result,
    SearchSettings,
};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;

#[derive(Debug, Deserialize)]
struct CorpusFile {
    #[serde(default)]
    documents: Vec<RawDocument>,
    #[serde(default)]
    graph: Vec<GraphSearchResult>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    collection_ids: Vec<String>,
    #[serde(default)]
    owner_id: Option<String>,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    chunks: Vec<RawChunk>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawChunk {
    Text(String),
    Record {
        #[serde(default)]
        id: Option<String>,
        text: String,
        #[serde(default)]
        metadata: Metadata,
    },
}

#[derive(Debug, Clone)]
struct StoredDocument {
    document: DocumentResult,
    chunks: Vec<ChunkSearchResult>,
}

#[derive(Debug, Clone, Default)]
pub struct LocalCorpus {
    documents: Vec<StoredDocument>,
    graph: Vec<GraphSearchResult>,
}

fn short_hash(parts: &[&str]) -> String {
    let mut h = Sha256::new();
    for p in parts {
        h.update(p.as_bytes());
        h.update(b"\n");
    }
    hex::encode(&h.finalize()[..8])
}

impl LocalCorpus {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let file: CorpusFile = serde_json::from_slice(&bytes)?;
        let corpus = Self::from_file(file);
        tracing::debug!(
            path = %path.as_ref().display(),
            documents = corpus.documents.len(),
            graph = corpus.graph.len(),
            "loaded corpus"
        );
        Ok(corpus)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(Self::from_file(serde_json::from_str(s)?))
    }

    fn from_file(file: CorpusFile) -> Self {
        let documents = file
            .documents
            .into_iter()
            .map(|raw| {
                let texts: Vec<&str> = raw
                    .chunks
                    .iter()
                    .map(|c| match c {
                        RawChunk::Text(t) | RawChunk::Record { text: t, .. } => t.as_str(),
                    })
                    .collect();
                let id = raw.id.clone().filter(|s| !s.trim().is_empty()).unwrap_or_else(|| {
                    let mut parts = vec![raw.title.as_deref().unwrap_or("")];
                    parts.extend(texts.iter().copied());
                    format!("doc-{}", short_hash(&parts))
                });
                let document = DocumentResult {
                    id: id.clone(),
                    title: raw.title,
                    summary: raw.summary,
                    collection_ids: raw.collection_ids,
                    owner_id: raw.owner_id,
                    metadata: raw.metadata,
                };
                let chunks = raw
                    .chunks
                    .into_iter()
                    .enumerate()
                    .map(|(i, c)| {
                        let (chunk_id, text, mut metadata) = match c {
                            RawChunk::Text(t) => (None, t, Metadata::new()),
                            RawChunk::Record { id, text, metadata } => (id, text, metadata),
                        };
                        if let Some(title) = &document.title {
                            metadata
                                .entry("title")
                                .or_insert_with(|| Value::String(title.clone()));
                        }
                        ChunkSearchResult {
                            id: chunk_id.filter(|s| !s.trim().is_empty()).unwrap_or_else(|| {
                                format!(
                                    "chunk-{}",
                                    short_hash(&[id.as_str(), i.to_string().as_str(), text.as_str()])
                                )
                            }),
                            document_id: id.clone(),
                            owner_id: document.owner_id.clone(),
                            collection_ids: document.collection_ids.clone(),
                            score: None,
                            text,
                            metadata,
                        }
                    })
                    .collect();
                StoredDocument { document, chunks }
            })
            .collect();
        Self {
            documents,
            graph: file.graph,
        }
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.documents.iter().map(|d| d.chunks.len()).sum()
    }

    fn filtered<'a>(
        &'a self,
        filters: &'a Filters,
    ) -> impl Iterator<Item = Result<&'a StoredDocument>> + 'a {
        self.documents.iter().filter_map(move |d| match matches(filters, &d.document) {
            Ok(true) => Some(Ok(d)),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        })
    }
}

fn terms(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for t in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_lowercase())
    {
        if !out.contains(&t) {
            out.push(t);
        }
    }
    out
}

fn lexical_score(query_terms: &[String], text: &str) -> f64 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let haystack = terms(text);
    let hits = query_terms.iter().filter(|t| haystack.contains(t)).count();
    hits as f64 / query_terms.len() as f64
}

/// Highest score first; ties keep corpus order.
fn rank<T>(mut scored: Vec<(f64, usize, T)>, settings: &SearchSettings) -> Vec<(f64, T)> {
    scored.retain(|(s, _, _)| *s > 0.0);
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    scored
        .into_iter()
        .skip(settings.offset)
        .take(settings.limit)
        .map(|(s, _, t)| (s, t))
        .collect()
}

#[async_trait]
impl KnowledgeSearch for LocalCorpus {
    async fn search(&self, query: &str, settings: &SearchSettings) -> Result<KnowledgeResponse> {
        let q = terms(query);
        let mut chunks = Vec::new();
        for doc in self.filtered(&settings.filters) {
            for chunk in &doc?.chunks {
                chunks.push((lexical_score(&q, &chunk.text), chunks.len(), chunk));
            }
        }
        let chunks = rank(chunks, settings)
            .into_iter()
            .map(|(score, c)| ChunkSearchResult {
                score: Some(score),
                ..c.clone()
            })
            .collect();

        let graph = if settings.include_graph {
            let scored = self
                .graph
                .iter()
                .enumerate()
                .map(|(i, g)| (lexical_score(&q, &g.content.summary_line()), i, g))
                .collect();
            rank(scored, settings)
                .into_iter()
                .map(|(score, g)| GraphSearchResult {
                    score: Some(score),
                    ..g.clone()
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(KnowledgeResponse::Aggregate(
            AggregateSearchResult::default()
                .with_chunks(chunks)
                .with_graph(graph),
        ))
    }
}

#[async_trait]
impl ContentSource for LocalCorpus {
    async fn content(
        &self,
        filters: &Filters,
        options: &serde_json::Map<String, Value>,
    ) -> Result<Vec<ContentItem>> {
        let offset = options.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let limit = options
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(usize::MAX);
        // Evaluate the filter on every document first so a bad filter fails
        // regardless of paging.
        let docs: Vec<&StoredDocument> = self.filtered(filters).collect::<Result<_>>()?;
        Ok(docs
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|doc| ContentItem {
                document: doc.document.clone(),
                chunks: doc
                    .chunks
                    .iter()
                    .map(|c| ContentChunk::Text(c.text.clone()))
                    .collect(),
            })
            .collect())
    }
}

#[async_trait]
impl FileSearch for LocalCorpus {
    async fn search_files(
        &self,
        query: &str,
        settings: &SearchSettings,
    ) -> Result<Vec<DocumentResult>> {
        let q = terms(query);
        let mut scored = Vec::new();
        for (i, doc) in self.filtered(&settings.filters).enumerate() {
            let d = &doc?.document;
            let text = format!(
                "{} {}",
                d.title.as_deref().unwrap_or(""),
                d.summary.as_deref().unwrap_or("")
            );
            scored.push((lexical_score(&q, &text), i, d));
        }
        Ok(rank(scored, settings)
            .into_iter()
            .map(|(_, d)| d.clone())
            .collect())
    }
}

fn field_value(doc: &DocumentResult, key: &str) -> Option<Value> {
    match key {
        "id" | "document_id" => Some(Value::String(doc.id.clone())),
        "title" => doc.title.clone().map(Value::String),
        "summary" => doc.summary.clone().map(Value::String),
        "owner_id" => doc.owner_id.clone().map(Value::String),
        "collection_ids" => Some(Value::from(doc.collection_ids.clone())),
        other => doc
            .metadata
            .get(other.strip_prefix("metadata.").unwrap_or(other))
            .cloned(),
    }
}

fn bad_filter(message: String) -> Error {
    Error::Search(format!("invalid filter: {message}"))
}

fn sub_filters<'a>(op: &str, v: &'a Value) -> Result<Vec<&'a Filters>> {
    let Some(items) = v.as_array() else {
        return Err(bad_filter(format!("{op} expects an array")));
    };
    items
        .iter()
        .map(|f| {
            f.as_object()
                .ok_or_else(|| bad_filter(format!("{op} entries must be objects")))
        })
        .collect()
}

/// Evaluate a filter expression against a document's fields.
pub fn matches(filters: &Filters, doc: &DocumentResult) -> Result<bool> {
    for (key, cond) in filters {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for f in sub_filters("$and", cond)? {
                    if !matches(f, doc)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for f in sub_filters("$or", cond)? {
                    if matches(f, doc)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            field => field_matches(field_value(doc, field).as_ref(), cond)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn field_matches(value: Option<&Value>, cond: &Value) -> Result<bool> {
    let Some(ops) = cond.as_object().filter(|m| m.keys().all(|k| k.starts_with('$'))) else {
        return Ok(op_eq(value, cond));
    };
    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$eq" => op_eq(value, operand),
            "$ne" => !op_eq(value, operand),
            "$in" | "$overlap" => {
                let Some(list) = operand.as_array() else {
                    return Err(bad_filter(format!("{op} expects an array")));
                };
                match value {
                    Some(Value::Array(have)) => have.iter().any(|h| list.contains(h)),
                    Some(v) => list.contains(v),
                    None => false,
                }
            }
            other => return Err(bad_filter(format!("unsupported operator {other}"))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Array fields match `$eq` when they contain the operand.
fn op_eq(value: Option<&Value>, operand: &Value) -> bool {
    match value {
        Some(Value::Array(have)) if !operand.is_array() => have.contains(operand),
        Some(v) => v == operand,
        None => operand.is_null(),
    }
}
