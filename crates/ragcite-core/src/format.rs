//! Model-facing rendering of tool results, and the budget cut applied to it.

use std::sync::Arc;

use crate::collector::CallRecord;
use crate::results::WebResultKind;

/// Hard cap (in characters) for scraped page markdown, applied before the
/// result reaches the collector.
pub const SCRAPE_MAX_CHARS: usize = 100_000;
pub const SCRAPE_TRUNCATION_SUFFIX: &str = "...FURTHER CONTENT TRUNCATED...";

pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Character-ratio estimate. Good enough for budgeting; not a tokenizer.
#[derive(Debug, Clone, Copy)]
pub struct ApproxTokenCounter {
    pub chars_per_token: usize,
}

impl Default for ApproxTokenCounter {
    fn default() -> Self {
        Self { chars_per_token: 4 }
    }
}

impl TokenCounter for ApproxTokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        text.chars().count().div_ceil(self.chars_per_token.max(1))
    }
}

/// Cap scraped markdown at [`SCRAPE_MAX_CHARS`], appending the truncation marker when cut.
pub fn cap_scraped_markdown(markdown: String) -> String {
    match markdown.char_indices().nth(SCRAPE_MAX_CHARS) {
        None => markdown,
        Some((cut, _)) => {
            let mut out = String::with_capacity(cut + SCRAPE_TRUNCATION_SUFFIX.len());
            out.push_str(&markdown[..cut]);
            out.push_str(SCRAPE_TRUNCATION_SUFFIX);
            out
        }
    }
}

/// Scale the context down to the budget.
///
/// `tokens = count + 1`; when `budget / tokens >= 1` the context is returned
/// as-is, otherwise the first `floor(budget / tokens * chars)` characters.
/// The cut is character-based and may land mid-word or inside a citation marker.
pub fn truncate_to_budget(context: &str, budget: usize, counter: &dyn TokenCounter) -> String {
    let tokens = counter.count_tokens(context) + 1;
    if budget >= tokens {
        return context.to_string();
    }
    let chars = context.chars().count();
    let keep = (budget as u128 * chars as u128 / tokens as u128) as usize;
    tracing::debug!(budget, tokens, chars, keep, "truncating tool context");
    match context.char_indices().nth(keep) {
        Some((cut, _)) => context[..cut].to_string(),
        None => context.to_string(),
    }
}

/// Render one call's results with their collector ids as citation tags.
pub fn render_for_llm(record: &CallRecord) -> String {
    let agg = record.aggregate.as_ref();
    let mut ids = record.source_ids.iter();
    let mut next_id = || ids.next().map(String::as_str).unwrap_or("unknown");
    let mut out = String::new();

    if !agg.chunk_search_results.is_empty() {
        out.push_str("Vector Search Results:\n");
        for c in &agg.chunk_search_results {
            out.push_str(&format!("Source ID [{}]:\n{}\n\n", next_id(), c.text));
        }
    }

    if !agg.graph_search_results.is_empty() {
        out.push_str("Knowledge Graph Results:\n");
        for g in &agg.graph_search_results {
            out.push_str(&format!(
                "Source ID [{}]:\n{}\n\n",
                next_id(),
                g.content.summary_line()
            ));
        }
    }

    if !agg.web_search_results.is_empty() {
        out.push_str("Web Search Results:\n");
        for w in &agg.web_search_results {
            match w.kind {
                WebResultKind::Organic => {
                    out.push_str(&format!(
                        "Source ID [{}]:\nTitle: {}\nLink: {}\nSnippet: {}\n",
                        next_id(),
                        w.title,
                        w.link,
                        w.snippet
                    ));
                    if let Some(date) = &w.date {
                        out.push_str(&format!("Date: {date}\n"));
                    }
                    out.push('\n');
                }
                WebResultKind::Scrape => {
                    out.push_str(&format!(
                        "Source ID [{}]:\nTitle: {}\nLink: {}\nContent:\n{}\n\n",
                        next_id(),
                        w.title,
                        w.link,
                        w.snippet
                    ));
                }
            }
        }
    }

    if !agg.document_search_results.is_empty() {
        out.push_str("Document Search Results:\n");
        for d in &agg.document_search_results {
            out.push_str(&format!(
                "Source ID [{}]:\nTitle: {}\nSummary: {}\n\n",
                next_id(),
                d.title.as_deref().unwrap_or("Untitled"),
                d.summary.as_deref().unwrap_or("(no summary)")
            ));
        }
    }

    if !agg.context_document_results.is_empty() {
        out.push_str("Local Context Documents:\n");
        for d in &agg.context_document_results {
            out.push_str(&format!(
                "Full Document [{}]:\nDocument ID: {}\nDocument Title: {}\n",
                next_id(),
                d.document.id,
                d.document.title.as_deref().unwrap_or("Untitled")
            ));
            if let Some(summary) = &d.document.summary {
                out.push_str(&format!("Summary: {summary}\n"));
            }
            for (i, chunk) in d.chunks.iter().enumerate() {
                out.push_str(&format!("Chunk {}: {}\n", i + 1, chunk));
            }
            out.push('\n');
        }
    }

    if out.is_empty() {
        return "No results found.".to_string();
    }
    out.truncate(out.trim_end().len());
    out
}

#[derive(Clone)]
pub struct ContextFormatter {
    max_tool_context_length: usize,
    counter: Arc<dyn TokenCounter>,
}

impl std::fmt::Debug for ContextFormatter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextFormatter")
            .field("max_tool_context_length", &self.max_tool_context_length)
            .finish_non_exhaustive()
    }
}

impl ContextFormatter {
    pub fn new(max_tool_context_length: usize) -> Self {
        Self::with_counter(max_tool_context_length, Arc::new(ApproxTokenCounter::default()))
    }

    pub fn with_counter(max_tool_context_length: usize, counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            max_tool_context_length,
            counter,
        }
    }

    pub fn max_tool_context_length(&self) -> usize {
        self.max_tool_context_length
    }

    pub fn format_for_llm(&self, record: &CallRecord) -> String {
        self.truncate(&render_for_llm(record))
    }

    pub fn truncate(&self, context: &str) -> String {
        truncate_to_budget(context, self.max_tool_context_length, self.counter.as_ref())
    }
}
