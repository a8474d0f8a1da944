use crate::collector::{SearchResultsCollector, TurnSnapshot};

/// State scoped to one conversation turn. Build one per turn and pass it to
/// every tool call of that turn; drop it when the turn ends.
#[derive(Debug, Default)]
pub struct TurnContext {
    collector: SearchResultsCollector,
}

impl TurnContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume a turn persisted with [`TurnContext::snapshot`].
    pub fn from_snapshot(snapshot: TurnSnapshot) -> Self {
        Self {
            collector: SearchResultsCollector::from_snapshot(snapshot),
        }
    }

    pub fn collector(&self) -> &SearchResultsCollector {
        &self.collector
    }

    pub fn snapshot(&self) -> TurnSnapshot {
        self.collector.snapshot()
    }

    pub fn into_collector(self) -> SearchResultsCollector {
        self.collector
    }
}
