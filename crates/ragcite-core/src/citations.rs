//! Citation markers in generated text: extraction, resolution against the
//! collector, and first-appearance renumbering.
//!
//! A marker is `[` + a letter + 2..=15 alphanumerics + `]`, e.g. `[c001]` or
//! `[abc1234]`. Renumbered citations (`[1]`) never match, which is what makes
//! renumbering idempotent.

use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::LazyLock;

use crate::collector::{CollectedSource, SearchResultsCollector};
use crate::results::ResultKind;

static CITATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([A-Za-z][A-Za-z0-9]{2,15})\]").expect("invalid CITATION_RE regex")
});

const EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CitationMarker {
    /// The id between the brackets, as written.
    pub id: String,
    /// Byte range of the full `[id]` token in the source text.
    pub span: Range<usize>,
    /// Character offset of the opening bracket.
    pub char_offset: usize,
}

impl CitationMarker {
    pub fn raw(&self) -> String {
        format!("[{}]", self.id)
    }
}

pub fn extract_citations(text: &str) -> Vec<CitationMarker> {
    let mut out = Vec::new();
    let mut last_byte = 0;
    let mut last_char = 0;
    for caps in CITATION_RE.captures_iter(text) {
        let (Some(whole), Some(id)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        last_char += text[last_byte..whole.start()].chars().count();
        last_byte = whole.start();
        out.push(CitationMarker {
            id: id.as_str().to_string(),
            span: whole.range(),
            char_offset: last_char,
        });
    }
    out
}

/// Models occasionally upper-case ids; collector ids are lower-case.
fn resolve(id: &str, collector: &SearchResultsCollector) -> Option<CollectedSource> {
    collector
        .lookup(id)
        .or_else(|| collector.lookup(&id.to_ascii_lowercase()))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedCitation {
    pub marker: CitationMarker,
    pub source: Option<CollectedSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CitationMap {
    pub citations: Vec<MappedCitation>,
}

impl CitationMap {
    pub fn resolved(&self) -> impl Iterator<Item = (&CitationMarker, &CollectedSource)> {
        self.citations
            .iter()
            .filter_map(|c| c.source.as_ref().map(|s| (&c.marker, s)))
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &CitationMarker> {
        self.citations
            .iter()
            .filter(|c| c.source.is_none())
            .map(|c| &c.marker)
    }

    pub fn unresolved_count(&self) -> usize {
        self.unresolved().count()
    }
}

/// Resolve each marker; unknown ids are kept (unresolved), never an error.
pub fn map_citations_to_sources(
    markers: &[CitationMarker],
    collector: &SearchResultsCollector,
) -> CitationMap {
    let citations: Vec<MappedCitation> = markers
        .iter()
        .map(|m| MappedCitation {
            marker: m.clone(),
            source: resolve(&m.id, collector),
        })
        .collect();
    let unresolved = citations.iter().filter(|c| c.source.is_none()).count();
    if unresolved > 0 {
        tracing::debug!(unresolved, total = citations.len(), "unresolved citation markers");
    }
    CitationMap { citations }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReassignedCitations {
    pub text: String,
    /// `sources[n - 1]` is the source now cited as `[n]`.
    pub sources: Vec<CollectedSource>,
}

/// Replace every resolvable marker with `[n]`, numbering sources by first
/// appearance in `text`. Unresolvable markers stay verbatim.
pub fn reassign_citations_in_order(
    text: &str,
    collector: &SearchResultsCollector,
) -> ReassignedCitations {
    let mut numbers: HashMap<String, usize> = HashMap::new();
    let mut sources: Vec<CollectedSource> = Vec::new();
    let replaced = CITATION_RE.replace_all(text, |caps: &Captures| {
        let Some(source) = caps.get(1).and_then(|m| resolve(m.as_str(), collector)) else {
            return caps[0].to_string();
        };
        let n = match numbers.get(&source.id) {
            Some(n) => *n,
            None => {
                sources.push(source.clone());
                numbers.insert(source.id.clone(), sources.len());
                sources.len()
            }
        };
        format!("[{n}]")
    });
    ReassignedCitations {
        text: replaced.into_owned(),
        sources,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BibliographyEntry {
    pub number: usize,
    pub id: String,
    pub kind: ResultKind,
    pub title: Option<String>,
    pub link: Option<String>,
    pub excerpt: String,
    /// How many markers in the original text pointed at this source.
    pub occurrences: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizedCitations {
    pub text: String,
    pub citations: Vec<MappedCitation>,
    pub bibliography: Vec<BibliographyEntry>,
    pub unresolved: Vec<CitationMarker>,
}

/// Extraction + resolution + renumbering, with a bibliography drawn from the
/// collector's results in citation-number order.
pub fn finalize_citations_with_collector(
    text: &str,
    collector: &SearchResultsCollector,
) -> FinalizedCitations {
    let markers = extract_citations(text);
    let map = map_citations_to_sources(&markers, collector);
    let reassigned = reassign_citations_in_order(text, collector);

    let numbers: HashMap<&str, usize> = reassigned
        .sources
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i + 1))
        .collect();
    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    for (_, source) in map.resolved() {
        *occurrences.entry(source.id.as_str()).or_default() += 1;
    }

    let mut bibliography: Vec<BibliographyEntry> = collector
        .all_results()
        .into_iter()
        .filter_map(|s| {
            let number = *numbers.get(s.id.as_str())?;
            Some(BibliographyEntry {
                number,
                occurrences: occurrences.get(s.id.as_str()).copied().unwrap_or(0),
                kind: s.kind,
                title: s.result.title().map(str::to_string),
                link: s.result.link().map(str::to_string),
                excerpt: s.result.excerpt(EXCERPT_CHARS),
                id: s.id,
            })
        })
        .collect();
    bibliography.sort_by_key(|e| e.number);

    let unresolved = map.unresolved().cloned().collect();
    FinalizedCitations {
        text: reassigned.text,
        citations: map.citations,
        bibliography,
        unresolved,
    }
}
