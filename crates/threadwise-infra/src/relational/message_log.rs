//! In-process message log keyed by channel.
//!
//! A cheap-to-clone handle: clones share the same underlying maps, so the
//! ingest side and the aggregator's store handle see the same history.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use threadwise_core::store::{MemoryStore, QueryScope, StoreQuery};
use threadwise_types::context::{ContextCandidate, ContextItem};
use threadwise_types::error::StoreError;
use threadwise_types::message::ChatMessage;

use crate::text::lexical_overlap;

/// Name reported in logs and degraded-store events.
pub const MESSAGE_LOG_STORE: &str = "message_log";

#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    channels: Arc<DashMap<String, Vec<ChatMessage>>>,
    topics: Arc<DashMap<String, BTreeSet<String>>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Redelivered message IDs are ignored.
    pub fn insert(&self, message: ChatMessage) -> bool {
        let mut log = self.channels.entry(message.channel_id.clone()).or_default();
        if log.iter().any(|m| m.id == message.id) {
            return false;
        }
        log.push(message);
        true
    }

    /// Tag a channel; returned items inherit its topics.
    pub fn set_channel_topics(&self, channel_id: &str, topics: BTreeSet<String>) {
        self.topics.insert(channel_id.to_string(), topics);
    }

    /// Messages stored for a channel.
    pub fn len(&self, channel_id: &str) -> usize {
        self.channels.get(channel_id).map_or(0, |log| log.len())
    }

    pub fn is_empty(&self) -> bool {
        self.channels.iter().all(|log| log.is_empty())
    }

    fn candidate(
        &self,
        message: &ChatMessage,
        query: &StoreQuery,
        thread_length: u32,
        raw_score: f32,
    ) -> ContextCandidate {
        let topics = self
            .topics
            .get(&message.channel_id)
            .map(|t| t.value().clone())
            .unwrap_or_default();
        ContextCandidate {
            source: query.scope.source_kind(),
            item: ContextItem {
                id: message.id.clone(),
                channel_id: Some(message.channel_id.clone()),
                thread_id: Some(message.thread_key().to_string()),
                author_id: Some(message.author_id.clone()),
                text: message.clean_text(),
                topics,
                reaction_count: message.reaction_count,
                thread_length,
            },
            raw_score,
            participants: message.participants(),
            age: (query.reference_time - message.timestamp)
                .to_std()
                .unwrap_or_default(),
            graph_distance: None,
        }
    }
}

fn in_range(ts: DateTime<Utc>, since: Option<DateTime<Utc>>, until: DateTime<Utc>) -> bool {
    ts <= until && since.is_none_or(|since| ts >= since)
}

impl MemoryStore for MessageLog {
    fn name(&self) -> &str {
        MESSAGE_LOG_STORE
    }

    async fn query(&self, query: &StoreQuery) -> Result<Vec<ContextCandidate>, StoreError> {
        let channel_id = match &query.scope {
            QueryScope::Thread { channel_id, .. } | QueryScope::Channel { channel_id } => channel_id,
            other => {
                return Err(StoreError::Query(format!(
                    "{MESSAGE_LOG_STORE} cannot serve {} queries",
                    other.source_kind()
                )));
            }
        };
        let Some(log) = self.channels.get(channel_id) else {
            return Ok(Vec::new());
        };

        let thread_length = |key: &str| log.iter().filter(|m| m.thread_key() == key).count() as u32;
        let visible = log
            .iter()
            .filter(|m| m.id != query.message_id)
            .filter(|m| in_range(m.timestamp, query.since, query.reference_time));

        let mut hits: Vec<(&ChatMessage, f32)> = match &query.scope {
            QueryScope::Thread { thread_id, .. } => visible
                .filter(|m| m.thread_key() == thread_id)
                .map(|m| (m, lexical_overlap(&query.text, &m.text)))
                .collect(),
            _ => visible
                .map(|m| (m, lexical_overlap(&query.text, &m.text)))
                .collect(),
        };

        match query.scope {
            // Thread history is ordered newest first; everything in it is on topic.
            QueryScope::Thread { .. } => hits.sort_by(|a, b| b.0.timestamp.cmp(&a.0.timestamp)),
            _ => hits.sort_by(|a, b| {
                b.1.total_cmp(&a.1)
                    .then_with(|| b.0.timestamp.cmp(&a.0.timestamp))
                    .then_with(|| a.0.id.cmp(&b.0.id))
            }),
        }
        hits.truncate(query.top_k);

        let candidates = hits
            .into_iter()
            .map(|(m, score)| self.candidate(m, query, thread_length(m.thread_key()), score))
            .collect::<Vec<_>>();

        tracing::debug!(
            store = MESSAGE_LOG_STORE,
            scope = %query.scope.source_kind(),
            channel_id = %channel_id,
            returned = candidates.len(),
            "message log query"
        );
        Ok(candidates)
    }
}
