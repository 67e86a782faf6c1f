//! Context retrieval and scoring types for Threadwise.
//!
//! A `ContextCandidate` is what a memory store hands back; the relevance
//! scorer turns it into a `ScoredContextItem`; the aggregator collects
//! scored items into a budget-bounded `ContextWindow`.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which aggregation stage produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Thread,
    Channel,
    CrossChannel,
    KnowledgeBase,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Thread => write!(f, "thread"),
            SourceKind::Channel => write!(f, "channel"),
            SourceKind::CrossChannel => write!(f, "cross_channel"),
            SourceKind::KnowledgeBase => write!(f, "knowledge_base"),
        }
    }
}

/// Reference to the underlying message or document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    /// Stable identifier, used as the final tie-breaker when ranking.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Message author. `None` for knowledge-base documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub topics: BTreeSet<String>,
    #[serde(default)]
    pub reaction_count: u32,
    /// Number of messages in the thread this item belongs to.
    #[serde(default)]
    pub thread_length: u32,
}

/// A retrieved, not yet scored, piece of context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextCandidate {
    pub source: SourceKind,
    pub item: ContextItem,
    /// Similarity as reported by the originating store.
    pub raw_score: f32,
    pub participants: BTreeSet<String>,
    /// Time between the item's creation and the message under evaluation.
    pub age: Duration,
    /// Graph distance to the message's participants, resolved during
    /// aggregation. `None` when no path exists or the graph was unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_distance: Option<u32>,
}

impl ContextCandidate {
    /// Estimated prompt cost of this candidate in tokens.
    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.item.text)
    }
}

/// Rough token estimate: ~4 characters per token, at least one token.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() / 4).max(1)
}

/// The four independent sub-scores, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SubScores {
    pub recency: f32,
    pub relevance: f32,
    pub importance: f32,
    pub relationship: f32,
}

/// A candidate together with its sub-scores and composite score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredContextItem {
    pub candidate: ContextCandidate,
    pub scores: SubScores,
    pub composite: f32,
}

impl ScoredContextItem {
    pub fn id(&self) -> &str {
        &self.candidate.item.id
    }

    pub fn tokens(&self) -> usize {
        self.candidate.estimated_tokens()
    }
}

/// Ranking order: composite descending, then recency descending, then id
/// ascending. Total, so sorting is deterministic.
pub fn rank_order(a: &ScoredContextItem, b: &ScoredContextItem) -> Ordering {
    b.composite
        .total_cmp(&a.composite)
        .then_with(|| b.scores.recency.total_cmp(&a.scores.recency))
        .then_with(|| a.id().cmp(b.id()))
}

/// Outcome of one aggregation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    /// The store timed out or failed; the stage contributed nothing.
    Failed { reason: String },
    /// The stage was not attempted.
    Skipped { reason: String },
}

/// Per-stage bookkeeping for observability and tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub source: SourceKind,
    pub status: StageStatus,
    /// Candidates returned by the store(s).
    pub fetched: usize,
    /// Candidates admitted into the window.
    pub admitted: usize,
    /// Window relevance after this stage.
    pub accumulated_relevance: f32,
}

/// A store call that timed out or failed during aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreFailure {
    pub source: SourceKind,
    pub store: String,
    pub error: String,
}

/// Bounded, scored context assembled for one decision.
///
/// Owned by a single evaluation; never shared across evaluations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextWindow {
    items: Vec<ScoredContextItem>,
    token_budget: usize,
    tokens_used: usize,
    /// Set when at least one store call timed out or failed.
    pub degraded: bool,
    pub stages: Vec<StageReport>,
    pub failures: Vec<StoreFailure>,
}

impl ContextWindow {
    pub fn new(token_budget: usize) -> Self {
        Self {
            items: Vec::new(),
            token_budget,
            tokens_used: 0,
            degraded: false,
            stages: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Record a failed store call and mark the window degraded.
    pub fn record_failure(&mut self, failure: StoreFailure) {
        self.degraded = true;
        self.failures.push(failure);
    }

    /// Admit an item if it fits the remaining budget.
    ///
    /// Returns `false` (and leaves the window unchanged) when it does not fit.
    pub fn try_admit(&mut self, item: ScoredContextItem) -> bool {
        let cost = item.tokens();
        if cost > self.remaining() {
            return false;
        }
        self.tokens_used += cost;
        self.items.push(item);
        true
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.items.iter().any(|i| i.id() == item_id)
    }

    /// Items in admission order.
    pub fn items(&self) -> &[ScoredContextItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<ScoredContextItem> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn token_budget(&self) -> usize {
        self.token_budget
    }

    pub fn tokens_used(&self) -> usize {
        self.tokens_used
    }

    pub fn remaining(&self) -> usize {
        self.token_budget.saturating_sub(self.tokens_used)
    }

    /// Sum of composite scores of every admitted item.
    pub fn accumulated_relevance(&self) -> f32 {
        self.items.iter().map(|i| i.composite).sum()
    }

    /// Items ranked by [`rank_order`].
    pub fn ranked(&self) -> Vec<&ScoredContextItem> {
        let mut ranked: Vec<&ScoredContextItem> = self.items.iter().collect();
        ranked.sort_by(|a, b| rank_order(a, b));
        ranked
    }

    /// The best `k` items that together fit within `token_budget`.
    ///
    /// Walks the ranking greedily; an item that does not fit is skipped and
    /// smaller, lower-ranked items may still be taken.
    pub fn select_top(&self, k: usize, token_budget: usize) -> Vec<ScoredContextItem> {
        let mut used = 0usize;
        let mut selected = Vec::with_capacity(k.min(self.items.len()));
        for item in self.ranked() {
            if selected.len() >= k {
                break;
            }
            let cost = item.tokens();
            if used + cost > token_budget {
                continue;
            }
            used += cost;
            selected.push(item.clone());
        }
        selected
    }
}
