//! In-process vector index over past discussions and knowledge documents.
//!
//! Vectors are computed once at index time; a query embeds its text and
//! scans the matching entries with cosine similarity. Handles are cheap to
//! clone and share the same index.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use threadwise_core::store::embedder::cosine_similarity;
use threadwise_core::store::{Embedder, MemoryStore, QueryScope, StoreQuery};
use threadwise_types::context::{ContextCandidate, ContextItem};
use threadwise_types::error::StoreError;
use threadwise_types::message::ChatMessage;

/// Name reported in logs and degraded-store events.
pub const VECTOR_STORE: &str = "vector_index";

/// A document from a knowledge source (wiki page, runbook, FAQ entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: String,
    /// Knowledge source the document belongs to, matched against a
    /// channel's `knowledge_sources`.
    pub source: String,
    #[serde(default)]
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub topics: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
enum EntryKind {
    Discussion {
        channel_id: String,
        thread_id: String,
        author_id: String,
        participants: BTreeSet<String>,
        reaction_count: u32,
        timestamp: DateTime<Utc>,
    },
    Document {
        source: String,
        updated_at: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone)]
struct VectorEntry {
    id: String,
    kind: EntryKind,
    text: String,
    topics: BTreeSet<String>,
    embedding: Vec<f32>,
}

pub struct VectorMemoryStore<E> {
    embedder: Arc<E>,
    entries: Arc<DashMap<String, VectorEntry>>,
}

impl<E> Clone for VectorMemoryStore<E> {
    fn clone(&self) -> Self {
        Self {
            embedder: Arc::clone(&self.embedder),
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<E> std::fmt::Debug for VectorMemoryStore<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorMemoryStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl<E: Embedder> VectorMemoryStore<E> {
    pub fn new(embedder: E) -> Self {
        Self {
            embedder: Arc::new(embedder),
            entries: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index a chat message as a past discussion tagged with `topics`.
    pub async fn index_message(
        &self,
        message: &ChatMessage,
        topics: &BTreeSet<String>,
    ) -> Result<(), StoreError> {
        let text = message.clean_text();
        let embedding = self.embed_single(&text).await?;
        self.entries.insert(
            message.id.clone(),
            VectorEntry {
                id: message.id.clone(),
                kind: EntryKind::Discussion {
                    channel_id: message.channel_id.clone(),
                    thread_id: message.thread_key().to_string(),
                    author_id: message.author_id.clone(),
                    participants: message.participants(),
                    reaction_count: message.reaction_count,
                    timestamp: message.timestamp,
                },
                text,
                topics: normalize_topics(topics),
                embedding,
            },
        );
        Ok(())
    }

    /// Index a knowledge-base document. Re-indexing an ID replaces it.
    pub async fn index_document(&self, document: &KnowledgeDocument) -> Result<(), StoreError> {
        let text = if document.title.is_empty() {
            document.text.clone()
        } else {
            format!("{}\n{}", document.title, document.text)
        };
        let embedding = self.embed_single(&text).await?;
        self.entries.insert(
            document.id.clone(),
            VectorEntry {
                id: document.id.clone(),
                kind: EntryKind::Document {
                    source: document.source.clone(),
                    updated_at: document.updated_at,
                },
                text,
                topics: normalize_topics(&document.topics),
                embedding,
            },
        );
        Ok(())
    }

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>, StoreError> {
        let vectors = self.embedder.embed(&[text.to_string()]).await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Query("embedder returned no vector".to_string()))?;
        if vector.len() != self.embedder.dimension() {
            return Err(StoreError::Query(format!(
                "embedding dimension {} does not match {} ({})",
                vector.len(),
                self.embedder.dimension(),
                self.embedder.model_name()
            )));
        }
        Ok(vector)
    }

    fn to_candidate(entry: &VectorEntry, query: &StoreQuery, similarity: f32) -> ContextCandidate {
        let (item, participants, age) = match &entry.kind {
            EntryKind::Discussion {
                channel_id,
                thread_id,
                author_id,
                participants,
                reaction_count,
                timestamp,
            } => (
                ContextItem {
                    id: entry.id.clone(),
                    channel_id: Some(channel_id.clone()),
                    thread_id: Some(thread_id.clone()),
                    author_id: Some(author_id.clone()),
                    text: entry.text.clone(),
                    topics: entry.topics.clone(),
                    reaction_count: *reaction_count,
                    thread_length: 0,
                },
                participants.clone(),
                (query.reference_time - *timestamp).to_std().unwrap_or_default(),
            ),
            EntryKind::Document { updated_at, .. } => (
                ContextItem {
                    id: entry.id.clone(),
                    channel_id: None,
                    thread_id: None,
                    author_id: None,
                    text: entry.text.clone(),
                    topics: entry.topics.clone(),
                    reaction_count: 0,
                    thread_length: 0,
                },
                BTreeSet::new(),
                updated_at
                    .and_then(|at| (query.reference_time - at).to_std().ok())
                    .unwrap_or_default(),
            ),
        };
        ContextCandidate {
            source: query.scope.source_kind(),
            item,
            raw_score: similarity,
            participants,
            age,
            graph_distance: None,
        }
    }
}

fn normalize_topics(topics: &BTreeSet<String>) -> BTreeSet<String> {
    topics.iter().map(|t| t.to_lowercase()).collect()
}

/// Whether `entry` belongs to the slice of memory `query` targets.
fn in_scope(entry: &VectorEntry, query: &StoreQuery) -> bool {
    match (&query.scope, &entry.kind) {
        (
            QueryScope::CrossChannel {
                exclude_channel_id,
                topics,
            },
            EntryKind::Discussion {
                channel_id,
                timestamp,
                ..
            },
        ) => {
            channel_id != exclude_channel_id
                && entry.id != query.message_id
                && *timestamp <= query.reference_time
                && query.since.is_none_or(|since| *timestamp >= since)
                && topics.iter().any(|t| entry.topics.contains(&t.to_lowercase()))
        }
        (QueryScope::KnowledgeBase { source, .. }, EntryKind::Document { source: doc_source, .. }) => {
            doc_source == source
        }
        _ => false,
    }
}

impl<E: Embedder> MemoryStore for VectorMemoryStore<E> {
    fn name(&self) -> &str {
        VECTOR_STORE
    }

    async fn query(&self, query: &StoreQuery) -> Result<Vec<ContextCandidate>, StoreError> {
        let min_similarity = match &query.scope {
            QueryScope::CrossChannel { .. } => f32::MIN_POSITIVE,
            QueryScope::KnowledgeBase { min_similarity, .. } => *min_similarity,
            other => {
                return Err(StoreError::Query(format!(
                    "{VECTOR_STORE} cannot serve {} queries",
                    other.source_kind()
                )));
            }
        };

        let query_vector = self.embed_single(&query.text).await?;
        let mut hits: Vec<(VectorEntry, f32)> = self
            .entries
            .iter()
            .filter(|entry| in_scope(entry.value(), query))
            .filter_map(|entry| {
                let similarity = cosine_similarity(&query_vector, &entry.embedding);
                (similarity >= min_similarity).then(|| (entry.value().clone(), similarity))
            })
            .collect();

        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
        hits.truncate(query.top_k);

        tracing::debug!(
            store = VECTOR_STORE,
            scope = %query.scope.source_kind(),
            returned = hits.len(),
            "vector index query"
        );
        Ok(hits
            .iter()
            .map(|(entry, similarity)| Self::to_candidate(entry, query, *similarity))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::HashingEmbedder;
    use chrono::TimeZone;
    use threadwise_types::context::SourceKind;
    use threadwise_types::message::ChannelKind;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn msg(id: &str, channel: &str, at: i64, text: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            channel_id: channel.to_string(),
            thread_id: None,
            author_id: "U2".to_string(),
            timestamp: t(at),
            text: text.to_string(),
            mentions: BTreeSet::new(),
            reaction_count: 3,
            channel_kind: ChannelKind::Channel,
            is_bot: false,
        }
    }

    fn topics(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn query(scope: QueryScope, text: &str) -> StoreQuery {
        StoreQuery {
            text: text.to_string(),
            message_id: "current".to_string(),
            scope,
            top_k: 5,
            since: None,
            reference_time: t(1_000),
        }
    }

    async fn seeded() -> VectorMemoryStore<HashingEmbedder> {
        let store = VectorMemoryStore::new(HashingEmbedder::default());
        store
            .index_message(&msg("a", "C-ops", 0, "canary deploy rollback steps"), &topics(&["Deploys"]))
            .await
            .unwrap();
        store
            .index_message(&msg("b", "C-home", 10, "canary deploy rollback again"), &topics(&["deploys"]))
            .await
            .unwrap();
        store
            .index_message(&msg("c", "C-fun", 20, "canary deploy memes"), &topics(&["random"]))
            .await
            .unwrap();
        store
            .index_document(&KnowledgeDocument {
                id: "kb-1".to_string(),
                source: "runbooks".to_string(),
                title: "Canary rollback".to_string(),
                text: "rollback canary deploy with the release tool".to_string(),
                topics: topics(&["deploys"]),
                updated_at: Some(t(400)),
            })
            .await
            .unwrap();
        store
            .index_document(&KnowledgeDocument {
                id: "kb-2".to_string(),
                source: "runbooks".to_string(),
                title: String::new(),
                text: "expense report approvals".to_string(),
                topics: BTreeSet::new(),
                updated_at: None,
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn cross_channel_excludes_home_channel_and_untagged_channels() {
        let store = seeded().await;
        let q = query(
            QueryScope::CrossChannel {
                exclude_channel_id: "C-home".to_string(),
                topics: vec!["deploys".to_string()],
            },
            "canary rollback",
        );
        let hits = store.query(&q).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|c| c.item.id.as_str()).collect();
        assert_eq!(ids, ["a"]);
        assert_eq!(hits[0].source, SourceKind::CrossChannel);
        assert_eq!(hits[0].item.reaction_count, 3);
        assert_eq!(hits[0].age, std::time::Duration::from_secs(1_000));
        assert!(hits[0].raw_score > 0.0);
    }

    #[tokio::test]
    async fn knowledge_base_applies_similarity_floor() {
        let store = seeded().await;
        let q = query(
            QueryScope::KnowledgeBase {
                source: "runbooks".to_string(),
                min_similarity: 0.6,
            },
            "canary rollback deploy",
        );
        let hits = store.query(&q).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].item.id, "kb-1");
        assert!(hits[0].raw_score >= 0.6);
        assert!(hits[0].item.author_id.is_none());
        assert_eq!(hits[0].age, std::time::Duration::from_secs(600));

        let other_source = query(
            QueryScope::KnowledgeBase {
                source: "wiki".to_string(),
                min_similarity: 0.0,
            },
            "canary rollback deploy",
        );
        assert!(store.query(&other_source).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn relational_scopes_are_rejected() {
        let store = seeded().await;
        let q = query(
            QueryScope::Channel {
                channel_id: "C-ops".to_string(),
            },
            "deploy",
        );
        assert!(matches!(store.query(&q).await, Err(StoreError::Query(_))));
    }

    #[tokio::test]
    async fn reindexing_replaces_entries() {
        let store = seeded().await;
        let before = store.len();
        store
            .index_message(&msg("a", "C-ops", 0, "changed text"), &topics(&["deploys"]))
            .await
            .unwrap();
        assert_eq!(store.len(), before);
        assert_eq!(format!("{store:?}"), format!("VectorMemoryStore {{ entries: {before} }}"));
    }
}
