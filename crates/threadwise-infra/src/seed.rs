//! In-memory store bundle seeded from a recorded history.
//!
//! Wires the message log, vector index and relationship graph together so
//! one [`InMemoryStores::ingest`] call keeps all three consistent.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use threadwise_core::aggregate::MemoryStores;
use threadwise_core::store::{BoxMemoryStore, BoxRelationshipStore, Embedder};
use threadwise_types::error::StoreError;
use threadwise_types::message::ChatMessage;

use crate::graph::RelationshipGraph;
use crate::relational::MessageLog;
use crate::vector::{KnowledgeDocument, VectorMemoryStore};

/// Recorded workspace history used to seed the stores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub documents: Vec<KnowledgeDocument>,
    /// Topic tags per channel ID.
    #[serde(default)]
    pub channel_topics: HashMap<String, BTreeSet<String>>,
}

impl History {
    /// Read a history from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Add topic tags for a channel, keeping any already recorded.
    pub fn tag_channel<I, S>(&mut self, channel_id: &str, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channel_topics
            .entry(channel_id.to_string())
            .or_default()
            .extend(topics.into_iter().map(Into::into));
    }
}

pub struct InMemoryStores<E> {
    pub log: MessageLog,
    pub vectors: VectorMemoryStore<E>,
    pub graph: RelationshipGraph,
    channel_topics: HashMap<String, BTreeSet<String>>,
}

impl<E: Embedder + 'static> InMemoryStores<E> {
    /// Build empty stores and ingest everything in `history`.
    pub async fn from_history(history: &History, embedder: E) -> Result<Self, StoreError> {
        let stores = Self {
            log: MessageLog::new(),
            vectors: VectorMemoryStore::new(embedder),
            graph: RelationshipGraph::new(),
            channel_topics: history.channel_topics.clone(),
        };
        for (channel_id, topics) in &stores.channel_topics {
            stores.log.set_channel_topics(channel_id, topics.clone());
        }

        let mut messages: Vec<&ChatMessage> = history.messages.iter().collect();
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        for message in messages {
            stores.ingest(message).await?;
        }
        for document in &history.documents {
            stores.vectors.index_document(document).await?;
        }

        tracing::info!(
            messages = history.messages.len(),
            documents = history.documents.len(),
            channels = stores.channel_topics.len(),
            "seeded in-memory stores"
        );
        Ok(stores)
    }

    /// Record a new message in every store.
    pub async fn ingest(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let topics = self.topics_for(&message.channel_id);
        if !self.log.insert(message.clone()) {
            tracing::debug!(message_id = %message.id, "message already ingested");
            return Ok(());
        }
        self.vectors.index_message(message, &topics).await?;
        self.graph.record_message(message, &topics).await;
        Ok(())
    }

    pub fn topics_for(&self, channel_id: &str) -> BTreeSet<String> {
        self.channel_topics.get(channel_id).cloned().unwrap_or_default()
    }

    /// Boxed handles for the decision engine. They share state with `self`.
    pub fn memory_stores(&self) -> MemoryStores {
        MemoryStores {
            relational: BoxMemoryStore::new(self.log.clone()),
            semantic: BoxMemoryStore::new(self.vectors.clone()),
            relationship: BoxRelationshipStore::new(self.graph.clone()),
        }
    }
}
