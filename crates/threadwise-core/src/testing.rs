//! Store doubles and fixtures shared by the aggregator and engine tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use threadwise_types::context::{ContextCandidate, ContextItem, SourceKind};
use threadwise_types::error::StoreError;
use threadwise_types::message::{ChannelKind, ChatMessage};

use crate::store::{MemoryStore, QueryScope, RelationshipStore, StoreQuery};

/// Shared record of every query a store received.
#[derive(Debug, Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<StoreQuery>>>);

impl CallLog {
    fn push(&self, query: &StoreQuery) {
        self.0.lock().unwrap().push(query.clone());
    }

    pub(crate) fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub(crate) fn count_for(&self, source: SourceKind) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.scope.source_kind() == source)
            .count()
    }

    pub(crate) fn queries(&self) -> Vec<StoreQuery> {
        self.0.lock().unwrap().clone()
    }
}

/// Returns canned candidates per source kind, optionally after a delay or
/// with a fixed error.
pub(crate) struct ScriptedStore {
    name: &'static str,
    results: HashMap<SourceKind, Vec<ContextCandidate>>,
    delay: Option<Duration>,
    failure: Option<StoreError>,
    calls: CallLog,
}

impl ScriptedStore {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            results: HashMap::new(),
            delay: None,
            failure: None,
            calls: CallLog::default(),
        }
    }

    pub(crate) fn with(mut self, source: SourceKind, candidates: Vec<ContextCandidate>) -> Self {
        self.results.insert(source, candidates);
        self
    }

    pub(crate) fn sleeping(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.failure = Some(StoreError::Unavailable {
            store: self.name.to_string(),
            reason: "connection refused".to_string(),
        });
        self
    }

    pub(crate) fn calls(&self) -> CallLog {
        self.calls.clone()
    }
}

impl MemoryStore for ScriptedStore {
    fn name(&self) -> &str {
        self.name
    }

    async fn query(&self, query: &StoreQuery) -> Result<Vec<ContextCandidate>, StoreError> {
        self.calls.push(query);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let mut candidates = self
            .results
            .get(&query.scope.source_kind())
            .cloned()
            .unwrap_or_default();
        if let QueryScope::KnowledgeBase { source, .. } = &query.scope {
            for c in &mut candidates {
                c.item.channel_id = Some(source.clone());
            }
        }
        candidates.truncate(query.top_k);
        Ok(candidates)
    }
}

/// Graph double with fixed per-node distances.
pub(crate) struct StaticGraph {
    distances: HashMap<String, u32>,
    delay: Option<Duration>,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl StaticGraph {
    pub(crate) fn new(distances: &[(&str, u32)]) -> Self {
        Self {
            distances: distances
                .iter()
                .map(|(node, d)| (node.to_string(), *d))
                .collect(),
            delay: None,
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    pub(crate) fn sleeping(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl RelationshipStore for StaticGraph {
    fn name(&self) -> &str {
        "graph"
    }

    async fn distances(
        &self,
        _origins: &BTreeSet<String>,
        targets: &BTreeSet<String>,
    ) -> Result<HashMap<String, u32>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(StoreError::Unavailable {
                store: "graph".to_string(),
                reason: "graph offline".to_string(),
            });
        }
        Ok(targets
            .iter()
            .filter_map(|t| self.distances.get(t).map(|d| (t.clone(), *d)))
            .collect())
    }
}

pub(crate) fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub(crate) fn message(id: &str, thread_id: Option<&str>, author: &str, text: &str) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        channel_id: "C1".to_string(),
        thread_id: thread_id.map(str::to_string),
        author_id: author.to_string(),
        timestamp: base_time(),
        text: text.to_string(),
        mentions: BTreeSet::new(),
        reaction_count: 0,
        channel_kind: ChannelKind::Channel,
        is_bot: false,
    }
}

pub(crate) fn candidate(
    source: SourceKind,
    id: &str,
    author: &str,
    text: &str,
    raw_score: f32,
    age_secs: u64,
) -> ContextCandidate {
    ContextCandidate {
        source,
        item: ContextItem {
            id: id.to_string(),
            channel_id: Some("C1".to_string()),
            thread_id: None,
            author_id: Some(author.to_string()),
            text: text.to_string(),
            topics: BTreeSet::new(),
            reaction_count: 2,
            thread_length: 3,
        },
        raw_score,
        participants: BTreeSet::from([author.to_string()]),
        age: Duration::from_secs(age_secs),
        graph_distance: None,
    }
}
