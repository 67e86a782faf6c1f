//! Staged context aggregation.
//!
//! Expansion runs thread -> channel -> cross-channel -> knowledge base. Before
//! each stage the aggregator checks whether the accumulated relevance already
//! meets the channel target or the token budget is spent; if so, every
//! remaining stage is skipped without a store call.
//!
//! Store failures never propagate: the failing call is recorded on the
//! window, the window is marked degraded, and aggregation carries on with
//! whatever it has.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use threadwise_types::channel::ChannelConfig;
use threadwise_types::config::EngineConfig;
use threadwise_types::context::{
    ContextCandidate, ContextWindow, SourceKind, StageReport, StageStatus, StoreFailure,
};
use threadwise_types::message::ChatMessage;

use crate::scoring::RelevanceScorer;
use crate::store::{
    BoxMemoryStore, BoxRelationshipStore, QueryScope, StoreQuery, timed, topic_node,
};

/// Stage order. Always walked front to back.
pub const STAGES: [SourceKind; 4] = [
    SourceKind::Thread,
    SourceKind::Channel,
    SourceKind::CrossChannel,
    SourceKind::KnowledgeBase,
];

/// The external stores the aggregator reads from.
#[derive(Debug)]
pub struct MemoryStores {
    /// Message log: serves the thread and channel stages.
    pub relational: BoxMemoryStore,
    /// Vector index: serves the cross-channel and knowledge-base stages.
    pub semantic: BoxMemoryStore,
    /// Participant/topic graph used for relationship scores.
    pub relationship: BoxRelationshipStore,
}

/// Builds a bounded [`ContextWindow`] for one message.
#[derive(Debug)]
pub struct ContextAggregator {
    config: Arc<EngineConfig>,
    scorer: RelevanceScorer,
    stores: MemoryStores,
}

/// Results of one stage's store calls.
struct StageFetch {
    candidates: Vec<ContextCandidate>,
    failures: Vec<StoreFailure>,
    calls: usize,
}

impl ContextAggregator {
    pub fn new(config: Arc<EngineConfig>, stores: MemoryStores) -> Self {
        let scorer = RelevanceScorer::new(&config.scoring);
        Self {
            config,
            scorer,
            stores,
        }
    }

    pub fn scorer(&self) -> &RelevanceScorer {
        &self.scorer
    }

    /// Assemble context for `message` within `token_budget` tokens.
    ///
    /// Never fails; check `degraded` and `failures` on the returned window.
    #[tracing::instrument(
        skip_all,
        fields(message_id = %message.id, channel_id = %message.channel_id, token_budget = token_budget)
    )]
    pub async fn aggregate(
        &self,
        message: &ChatMessage,
        channel: &ChannelConfig,
        token_budget: usize,
    ) -> ContextWindow {
        let mut window = ContextWindow::new(token_budget);
        let target = self.config.relevance_target_for(channel);
        let query_text = message.clean_text();
        let origins = self.origins(message, channel);
        let mut budget_exhausted = false;

        for stage in STAGES {
            if window.accumulated_relevance() >= target {
                skip(&mut window, stage, "relevance target reached");
                continue;
            }
            if budget_exhausted || window.remaining() == 0 {
                skip(&mut window, stage, "token budget exhausted");
                continue;
            }

            let queries = match self.plan(stage, message, channel, &query_text) {
                Ok(queries) => queries,
                Err(reason) => {
                    skip(&mut window, stage, reason);
                    continue;
                }
            };

            let fetch = self.fetch(stage, &queries).await;
            let fetched = fetch.candidates.len();
            let all_failed = fetch.failures.len() == fetch.calls;
            let stage_error = fetch
                .failures
                .iter()
                .map(|f| f.error.clone())
                .collect::<Vec<_>>()
                .join("; ");
            for failure in fetch.failures {
                tracing::warn!(
                    stage = %stage,
                    store = %failure.store,
                    error = %failure.error,
                    "store call failed, continuing degraded"
                );
                window.record_failure(failure);
            }

            if all_failed {
                window.stages.push(StageReport {
                    source: stage,
                    status: StageStatus::Failed {
                        reason: stage_error,
                    },
                    fetched: 0,
                    admitted: 0,
                    accumulated_relevance: window.accumulated_relevance(),
                });
                continue;
            }

            let mut candidates = self.admissible(stage, message, &window, fetch.candidates);
            self.resolve_distances(stage, &origins, &mut candidates, &mut window)
                .await;

            let mut admitted = 0;
            for item in self.scorer.score_batch(candidates, channel) {
                if window.try_admit(item) {
                    admitted += 1;
                } else {
                    budget_exhausted = true;
                    break;
                }
            }

            tracing::debug!(
                stage = %stage,
                fetched,
                admitted,
                accumulated = window.accumulated_relevance(),
                tokens_used = window.tokens_used(),
                "aggregation stage completed"
            );
            window.stages.push(StageReport {
                source: stage,
                status: StageStatus::Completed,
                fetched,
                admitted,
                accumulated_relevance: window.accumulated_relevance(),
            });
        }

        window
    }

    /// Build the store queries for a stage, or the reason it is skipped.
    fn plan(
        &self,
        stage: SourceKind,
        message: &ChatMessage,
        channel: &ChannelConfig,
        query_text: &str,
    ) -> Result<Vec<StoreQuery>, &'static str> {
        let agg = &self.config.aggregation;
        let query = |scope: QueryScope, top_k: usize, since: Option<DateTime<Utc>>| StoreQuery {
            text: query_text.to_string(),
            message_id: message.id.clone(),
            scope,
            top_k,
            since,
            reference_time: message.timestamp,
        };

        match stage {
            SourceKind::Thread => Ok(vec![query(
                QueryScope::Thread {
                    channel_id: message.channel_id.clone(),
                    thread_id: message.thread_key().to_string(),
                },
                agg.thread_limit,
                None,
            )]),
            SourceKind::Channel => {
                let since = chrono::Duration::from_std(channel.context_window.duration())
                    .ok()
                    .and_then(|span| message.timestamp.checked_sub_signed(span));
                Ok(vec![query(
                    QueryScope::Channel {
                        channel_id: message.channel_id.clone(),
                    },
                    agg.channel_limit,
                    since,
                )])
            }
            SourceKind::CrossChannel => {
                if channel.topic_tags.is_empty() {
                    return Err("channel has no topic tags");
                }
                Ok(vec![query(
                    QueryScope::CrossChannel {
                        exclude_channel_id: message.channel_id.clone(),
                        topics: channel.topic_tags.clone(),
                    },
                    agg.cross_channel_limit,
                    None,
                )])
            }
            SourceKind::KnowledgeBase => {
                if channel.knowledge_sources.is_empty() {
                    return Err("no knowledge sources enabled");
                }
                Ok(channel
                    .knowledge_sources
                    .iter()
                    .map(|source| {
                        query(
                            QueryScope::KnowledgeBase {
                                source: source.clone(),
                                min_similarity: agg.knowledge_similarity_floor,
                            },
                            agg.knowledge_limit,
                            None,
                        )
                    })
                    .collect())
            }
        }
    }

    /// Run a stage's queries concurrently, each under the store timeout.
    async fn fetch(&self, stage: SourceKind, queries: &[StoreQuery]) -> StageFetch {
        let store = match stage {
            SourceKind::Thread | SourceKind::Channel => &self.stores.relational,
            SourceKind::CrossChannel | SourceKind::KnowledgeBase => &self.stores.semantic,
        };
        let timeout = self.config.aggregation.store_timeout();

        let results = join_all(
            queries
                .iter()
                .map(|q| timed(store.name(), timeout, store.query(q))),
        )
        .await;

        let mut fetch = StageFetch {
            candidates: Vec::new(),
            failures: Vec::new(),
            calls: queries.len(),
        };
        for result in results {
            match result {
                Ok(candidates) => fetch.candidates.extend(candidates),
                Err(e) => fetch.failures.push(StoreFailure {
                    source: stage,
                    store: store.name().to_string(),
                    error: e.to_string(),
                }),
            }
        }
        fetch
    }

    /// Drop the message itself, items already in the window, duplicates
    /// within the stage, and knowledge matches under the similarity floor.
    fn admissible(
        &self,
        stage: SourceKind,
        message: &ChatMessage,
        window: &ContextWindow,
        candidates: Vec<ContextCandidate>,
    ) -> Vec<ContextCandidate> {
        let floor = self.config.aggregation.knowledge_similarity_floor;
        let mut seen = HashSet::new();
        candidates
            .into_iter()
            .filter(|c| c.item.id != message.id && !window.contains(&c.item.id))
            .filter(|c| stage != SourceKind::KnowledgeBase || c.raw_score >= floor)
            .filter(|c| seen.insert(c.item.id.clone()))
            .map(|mut c| {
                c.source = stage;
                c
            })
            .collect()
    }

    /// Resolve graph distances for a stage's candidates in one batched call.
    ///
    /// On failure every distance stays `None` (relationship score 0) and the
    /// window is marked degraded.
    async fn resolve_distances(
        &self,
        stage: SourceKind,
        origins: &BTreeSet<String>,
        candidates: &mut [ContextCandidate],
        window: &mut ContextWindow,
    ) {
        if candidates.is_empty() || origins.is_empty() {
            return;
        }

        let targets: BTreeSet<String> = candidates.iter().flat_map(graph_nodes).collect();
        let graph = &self.stores.relationship;
        let timeout = self.config.aggregation.store_timeout();

        match timed(graph.name(), timeout, graph.distances(origins, &targets)).await {
            Ok(distances) => {
                for candidate in candidates.iter_mut() {
                    candidate.graph_distance = nearest(&distances, candidate);
                }
            }
            Err(e) => {
                tracing::warn!(
                    stage = %stage,
                    store = %graph.name(),
                    error = %e,
                    "relationship lookup failed, relationship scores left at 0"
                );
                window.record_failure(StoreFailure {
                    source: stage,
                    store: graph.name().to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    /// Graph nodes the message starts from: its participants (minus the bot)
    /// and the channel's topic tags.
    fn origins(&self, message: &ChatMessage, channel: &ChannelConfig) -> BTreeSet<String> {
        let mut origins = message.participants();
        origins.remove(&self.config.bot.user_id);
        origins.extend(channel.topic_tags.iter().map(|t| topic_node(t)));
        origins
    }
}

fn skip(window: &mut ContextWindow, stage: SourceKind, reason: &str) {
    tracing::debug!(stage = %stage, reason, "aggregation stage skipped");
    let accumulated_relevance = window.accumulated_relevance();
    window.stages.push(StageReport {
        source: stage,
        status: StageStatus::Skipped {
            reason: reason.to_string(),
        },
        fetched: 0,
        admitted: 0,
        accumulated_relevance,
    });
}

/// Graph nodes representing a candidate: participants, author and topics.
fn graph_nodes(candidate: &ContextCandidate) -> Vec<String> {
    let mut nodes: Vec<String> = candidate.participants.iter().cloned().collect();
    nodes.extend(candidate.item.author_id.iter().cloned());
    nodes.extend(candidate.item.topics.iter().map(|t| topic_node(t)));
    nodes
}

fn nearest(distances: &HashMap<String, u32>, candidate: &ContextCandidate) -> Option<u32> {
    graph_nodes(candidate)
        .iter()
        .filter_map(|node| distances.get(node).copied())
        .min()
}
