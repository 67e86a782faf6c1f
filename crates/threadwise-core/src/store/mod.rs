//! Memory store ports.
//!
//! The aggregator reads from three kinds of external store through two
//! traits: [`MemoryStore`] (the relational message log and the semantic
//! vector index share it) and [`RelationshipStore`] (the participant/topic
//! graph). Implementations live in threadwise-infra.
//!
//! Every call is wrapped in [`timed`] by the caller, so a slow store turns
//! into `StoreError::Timeout` instead of stalling an evaluation.

pub mod box_store;
pub mod embedder;

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use threadwise_types::context::{ContextCandidate, SourceKind};
use threadwise_types::error::StoreError;

pub use box_store::{BoxMemoryStore, BoxRelationshipStore};
pub use embedder::Embedder;

/// Which slice of memory a query targets.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryScope {
    /// Messages of one thread.
    Thread { channel_id: String, thread_id: String },
    /// Recent activity of one channel.
    Channel { channel_id: String },
    /// Topically similar discussions outside `exclude_channel_id`, restricted
    /// to channels tagged with at least one of `topics`.
    CrossChannel {
        exclude_channel_id: String,
        topics: Vec<String>,
    },
    /// Documents of one knowledge source with similarity at least
    /// `min_similarity`.
    KnowledgeBase { source: String, min_similarity: f32 },
}

impl QueryScope {
    pub fn source_kind(&self) -> SourceKind {
        match self {
            QueryScope::Thread { .. } => SourceKind::Thread,
            QueryScope::Channel { .. } => SourceKind::Channel,
            QueryScope::CrossChannel { .. } => SourceKind::CrossChannel,
            QueryScope::KnowledgeBase { .. } => SourceKind::KnowledgeBase,
        }
    }
}

/// A read-only retrieval request.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreQuery {
    /// Query text (the message with mentions stripped).
    pub text: String,
    /// ID of the message under evaluation. Stores should not return it.
    pub message_id: String,
    pub scope: QueryScope,
    pub top_k: usize,
    /// Only items created at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Ages are measured against this instant (the message timestamp), and
    /// items created after it are excluded.
    pub reference_time: DateTime<Utc>,
}

/// Retrieval port shared by the relational and semantic stores.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// Results are ordered by the store's own score, best first. A store that is
/// partially degraded should return what it has rather than fail.
pub trait MemoryStore: Send + Sync {
    /// Short identifier used in logs, errors and degraded reports.
    fn name(&self) -> &str;

    fn query(
        &self,
        query: &StoreQuery,
    ) -> impl Future<Output = Result<Vec<ContextCandidate>, StoreError>> + Send;
}

/// Graph port resolving how closely candidates relate to a message.
pub trait RelationshipStore: Send + Sync {
    fn name(&self) -> &str;

    /// Shortest-path distance from any node in `origins` to each node in
    /// `targets`. Unreachable or unknown targets are absent from the map.
    fn distances(
        &self,
        origins: &BTreeSet<String>,
        targets: &BTreeSet<String>,
    ) -> impl Future<Output = Result<HashMap<String, u32>, StoreError>> + Send;
}

/// Node key under which a topic is stored in the relationship graph.
pub fn topic_node(topic: &str) -> String {
    format!("topic:{}", topic.to_lowercase())
}

/// Await `fut`, failing with `StoreError::Timeout` once `timeout` elapses.
pub async fn timed<T, F>(store: &str, timeout: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            store: store.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn timed_maps_elapsed_deadline_to_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, StoreError>(1)
        };
        let err = timed("semantic", Duration::from_millis(100), slow)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Timeout { ref store, timeout_ms: 100 } if store == "semantic"
        ));
    }

    #[tokio::test]
    async fn timed_passes_through_results() {
        let ok = timed("relational", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let failed = timed::<u8, _>("relational", Duration::from_secs(1), async {
            Err(StoreError::Query("bad filter".to_string()))
        })
        .await;
        assert!(matches!(failed, Err(StoreError::Query(_))));
    }

    #[test]
    fn scope_maps_to_source_kind() {
        let scope = QueryScope::KnowledgeBase {
            source: "wiki".to_string(),
            min_similarity: 0.6,
        };
        assert_eq!(scope.source_kind(), SourceKind::KnowledgeBase);
        assert_eq!(topic_node("Deploys"), "topic:deploys");
    }
}
