//! Per-turn registry of every result surfaced to the model.
//!
//! Ids are `<kind prefix><ordinal>` (`c001`, `w002`, ...), assigned at insertion,
//! gap-free and monotonic per kind. The append is the only mutation and runs
//! under a single lock, so concurrent tool completions never collide.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::results::{AggregateSearchResult, ResultKind, SourceResult};

/// Format a collector id for the `ordinal`-th (1-based) result of `kind`.
pub fn format_source_id(kind: ResultKind, ordinal: usize) -> String {
    format!("{}{:03}", kind.id_prefix(), ordinal)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectedSource {
    pub id: String,
    pub kind: ResultKind,
    pub call_index: usize,
    pub result: SourceResult,
}

/// What one `add_aggregate_result` call produced. `source_ids` lines up with
/// `aggregate.sources()`.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub call_index: usize,
    pub aggregate: Arc<AggregateSearchResult>,
    pub source_ids: Vec<String>,
}

/// Serializable form of a turn: the aggregates in call order. Replaying them
/// through a fresh collector reproduces the same ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnSnapshot {
    pub schema_version: u64,
    pub calls: Vec<AggregateSearchResult>,
}

impl TurnSnapshot {
    pub const SCHEMA_VERSION: u64 = 1;
}

#[derive(Debug, Default)]
struct CollectorState {
    calls: Vec<CallRecord>,
    sources: Vec<CollectedSource>,
    by_id: HashMap<String, usize>,
    ordinals: [usize; 5],
}

#[derive(Debug, Default)]
pub struct SearchResultsCollector {
    state: Mutex<CollectorState>,
}

impl SearchResultsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: TurnSnapshot) -> Self {
        let collector = Self::new();
        for agg in snapshot.calls {
            collector.add_aggregate_result(agg);
        }
        collector
    }

    fn state(&self) -> MutexGuard<'_, CollectorState> {
        // The state is append-only; a panic elsewhere cannot leave it half-written
        // in a way readers would misinterpret.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append one tool call's results and assign ids, as a single atomic step.
    pub fn add_aggregate_result(&self, agg: AggregateSearchResult) -> CallRecord {
        let sources = agg.sources();
        let aggregate = Arc::new(agg);

        let mut guard = self.state();
        let state = &mut *guard;
        let call_index = state.calls.len();
        let mut source_ids = Vec::with_capacity(sources.len());
        for result in sources {
            let kind = result.kind();
            let ordinal = &mut state.ordinals[kind.slot()];
            *ordinal += 1;
            let id = format_source_id(kind, *ordinal);
            state.by_id.insert(id.clone(), state.sources.len());
            state.sources.push(CollectedSource {
                id: id.clone(),
                kind,
                call_index,
                result,
            });
            source_ids.push(id);
        }
        let record = CallRecord {
            call_index,
            aggregate,
            source_ids,
        };
        state.calls.push(record.clone());
        drop(guard);

        tracing::debug!(
            call_index,
            sources = record.source_ids.len(),
            "collected tool results"
        );
        record
    }

    pub fn lookup(&self, id: &str) -> Option<CollectedSource> {
        let state = self.state();
        state
            .by_id
            .get(id)
            .and_then(|&i| state.sources.get(i))
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state().by_id.contains_key(id)
    }

    /// Every collected result in insertion order.
    pub fn all_results(&self) -> Vec<CollectedSource> {
        self.state().sources.clone()
    }

    pub fn call(&self, call_index: usize) -> Option<CallRecord> {
        self.state().calls.get(call_index).cloned()
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.state().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    /// Number of individual results (not calls).
    pub fn len(&self) -> usize {
        self.state().sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> TurnSnapshot {
        TurnSnapshot {
            schema_version: TurnSnapshot::SCHEMA_VERSION,
            calls: self
                .state()
                .calls
                .iter()
                .map(|c| c.aggregate.as_ref().clone())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{
        ChunkSearchResult, ContextDocumentResult, DocumentResult, GraphContent, GraphSearchResult,
        Metadata, WebResult, WebResultKind,
    };
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn chunk(text: &str) -> ChunkSearchResult {
        ChunkSearchResult {
            id: format!("chunk-{text}"),
            document_id: "doc".into(),
            owner_id: None,
            collection_ids: vec![],
            score: Some(0.5),
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    fn web(link: &str) -> WebResult {
        WebResult {
            title: link.into(),
            link: link.into(),
            snippet: "snippet".into(),
            position: 1,
            date: None,
            kind: WebResultKind::Organic,
        }
    }

    fn doc(id: &str) -> DocumentResult {
        DocumentResult {
            id: id.into(),
            title: Some(id.into()),
            summary: None,
            collection_ids: vec![],
            owner_id: None,
            metadata: Metadata::new(),
        }
    }

    fn graph(name: &str) -> GraphSearchResult {
        GraphSearchResult {
            content: GraphContent::Entity {
                name: name.into(),
                description: String::new(),
            },
            score: None,
            chunk_ids: vec![],
            metadata: Metadata::new(),
        }
    }

    fn context_doc(id: &str) -> ContextDocumentResult {
        ContextDocumentResult {
            document: doc(id),
            chunks: vec![format!("body of {id}")],
        }
    }

    /// One aggregate with `[chunks, graph, web, documents, context documents]` results.
    fn shaped(counts: [usize; 5]) -> AggregateSearchResult {
        let [chunks, graphs, webs, docs, ctx] = counts;
        AggregateSearchResult::default()
            .with_chunks((0..chunks).map(|i| chunk(&i.to_string())).collect())
            .with_graph((0..graphs).map(|i| graph(&format!("g{i}"))).collect())
            .with_web((0..webs).map(|i| web(&format!("https://w/{i}"))).collect())
            .with_documents((0..docs).map(|i| doc(&format!("d{i}"))).collect())
            .with_context_documents((0..ctx).map(|i| context_doc(&format!("x{i}"))).collect())
    }

    fn mixed(chunks: usize, webs: usize, docs: usize) -> AggregateSearchResult {
        shaped([chunks, 0, webs, docs, 0])
    }

    #[test]
    fn every_kind_gets_its_own_prefix() {
        let c = SearchResultsCollector::new();
        let r1 = c.add_aggregate_result(shaped([1, 2, 1, 1, 1]));
        let r2 = c.add_aggregate_result(shaped([0, 1, 0, 0, 2]));
        assert_eq!(r1.source_ids, vec!["c001", "g001", "g002", "w001", "d001", "x001"]);
        assert_eq!(r2.source_ids, vec!["g003", "x002", "x003"]);
        assert_eq!(c.lookup("g003").unwrap().kind, ResultKind::Graph);
        assert_eq!(c.lookup("x003").unwrap().kind, ResultKind::ContextDocument);
    }

    #[test]
    fn ids_are_per_kind_and_monotonic() {
        let c = SearchResultsCollector::new();
        let r1 = c.add_aggregate_result(mixed(2, 1, 0));
        let r2 = c.add_aggregate_result(mixed(1, 0, 1));
        assert_eq!(r1.call_index, 0);
        assert_eq!(r1.source_ids, vec!["c001", "c002", "w001"]);
        assert_eq!(r2.call_index, 1);
        assert_eq!(r2.source_ids, vec!["c003", "d001"]);
        assert_eq!(c.len(), 5);
        assert_eq!(c.call_count(), 2);
    }

    #[test]
    fn lookup_returns_inserted_object() {
        let c = SearchResultsCollector::new();
        let rec = c.add_aggregate_result(mixed(1, 1, 0));
        let hit = c.lookup("w001").unwrap();
        assert_eq!(hit.kind, ResultKind::Web);
        assert_eq!(hit.call_index, rec.call_index);
        assert_eq!(hit.result, SourceResult::Web(web("https://w/0")));
        assert!(c.lookup("w002").is_none());
        assert!(c.lookup("zzz999").is_none());
    }

    #[test]
    fn empty_aggregate_still_counts_as_a_call() {
        let c = SearchResultsCollector::new();
        let rec = c.add_aggregate_result(AggregateSearchResult::default());
        assert!(rec.source_ids.is_empty());
        assert_eq!(c.call_count(), 1);
        assert!(c.is_empty());
    }

    #[test]
    fn ordinals_widen_past_three_digits() {
        assert_eq!(format_source_id(ResultKind::Chunk, 7), "c007");
        assert_eq!(format_source_id(ResultKind::ContextDocument, 1000), "x1000");
    }

    #[test]
    fn snapshot_replay_reproduces_ids() {
        let c = SearchResultsCollector::new();
        c.add_aggregate_result(mixed(2, 0, 1));
        c.add_aggregate_result(mixed(0, 3, 0));
        let snap = c.snapshot();
        let json = serde_json::to_string(&snap).unwrap();
        let back: TurnSnapshot = serde_json::from_str(&json).unwrap();
        let replayed = SearchResultsCollector::from_snapshot(back);
        let ids = |c: &SearchResultsCollector| {
            c.all_results().into_iter().map(|s| s.id).collect::<Vec<_>>()
        };
        assert_eq!(ids(&c), ids(&replayed));
        assert_eq!(replayed.lookup("w003"), c.lookup("w003"));
    }

    #[test]
    fn concurrent_adds_never_collide_or_lose_entries() {
        let c = SearchResultsCollector::new();
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..25 {
                        c.add_aggregate_result(mixed(2, 1, 1));
                    }
                });
            }
        });
        let all = c.all_results();
        assert_eq!(c.call_count(), 200);
        assert_eq!(all.len(), 800);
        let unique: HashSet<&str> = all.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(unique.len(), 800);
        for i in 1..=400 {
            assert!(c.contains(&format_source_id(ResultKind::Chunk, i)));
        }
        assert!(!c.contains(&format_source_id(ResultKind::Chunk, 401)));
        // Each call's ids stay contiguous within the call's own record.
        for rec in c.calls() {
            for id in &rec.source_ids {
                assert_eq!(c.lookup(id).unwrap().call_index, rec.call_index);
            }
        }
    }

    proptest! {
        #[test]
        fn ids_are_unique_gap_free_and_complete(
            shapes in prop::collection::vec(prop::array::uniform5(0usize..4), 0..20),
        ) {
            let c = SearchResultsCollector::new();
            let mut records = Vec::new();
            for counts in &shapes {
                records.push(c.add_aggregate_result(shaped(*counts)));
            }

            let expected_total: usize = shapes.iter().flatten().sum();
            let all = c.all_results();
            prop_assert_eq!(all.len(), expected_total);

            let unique: HashSet<&str> = all.iter().map(|s| s.id.as_str()).collect();
            prop_assert_eq!(unique.len(), expected_total);

            for kind in [
                ResultKind::Chunk,
                ResultKind::Graph,
                ResultKind::Web,
                ResultKind::Document,
                ResultKind::ContextDocument,
            ] {
                let n = all.iter().filter(|s| s.kind == kind).count();
                for ordinal in 1..=n {
                    prop_assert!(c.contains(&format_source_id(kind, ordinal)));
                }
                prop_assert!(!c.contains(&format_source_id(kind, n + 1)));
            }

            for rec in &records {
                let sources = rec.aggregate.sources();
                prop_assert_eq!(sources.len(), rec.source_ids.len());
                for (id, expected) in rec.source_ids.iter().zip(sources) {
                    let hit = c.lookup(id).unwrap();
                    prop_assert_eq!(hit.result, expected);
                }
            }
        }
    }
}
