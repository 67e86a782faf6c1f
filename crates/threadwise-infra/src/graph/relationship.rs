//! Undirected graph linking users to the people and topics they talk with.
//!
//! Nodes are user IDs and `topic:{name}` keys. Every recorded message links
//! its author to each mentioned user, to the root author of its thread and to
//! the topics of its channel. Distances are hop counts.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use petgraph::algo::dijkstra;
use petgraph::graph::{NodeIndex, UnGraph};
use tokio::sync::RwLock;

use threadwise_core::store::{RelationshipStore, topic_node};
use threadwise_types::error::StoreError;
use threadwise_types::message::ChatMessage;

/// Name reported in logs and degraded-store events.
pub const RELATIONSHIP_STORE: &str = "relationship_graph";

#[derive(Debug, Default)]
struct GraphInner {
    graph: UnGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
    /// Root author per (channel, thread key).
    thread_roots: HashMap<(String, String), String>,
}

impl GraphInner {
    fn node(&mut self, key: &str) -> NodeIndex {
        if let Some(idx) = self.nodes.get(key) {
            return *idx;
        }
        let idx = self.graph.add_node(key.to_string());
        self.nodes.insert(key.to_string(), idx);
        idx
    }

    fn link(&mut self, a: &str, b: &str) {
        if a == b {
            return;
        }
        let (a, b) = (self.node(a), self.node(b));
        if self.graph.find_edge(a, b).is_none() {
            self.graph.add_edge(a, b, ());
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    inner: Arc<RwLock<GraphInner>>,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the relationships a message implies.
    pub async fn record_message(&self, message: &ChatMessage, topics: &BTreeSet<String>) {
        let mut inner = self.inner.write().await;
        let author = message.author_id.as_str();
        inner.node(author);

        for participant in message.participants() {
            inner.link(author, &participant);
        }
        for topic in topics {
            inner.link(author, &topic_node(topic));
        }

        let thread = (message.channel_id.clone(), message.thread_key().to_string());
        let root_author = inner.thread_roots.get(&thread).cloned();
        match root_author {
            Some(root_author) => inner.link(author, &root_author),
            None => {
                inner.thread_roots.insert(thread, author.to_string());
            }
        }
    }

    /// Link two nodes directly, e.g. from an org chart import.
    pub async fn connect(&self, a: &str, b: &str) {
        self.inner.write().await.link(a, b);
    }

    pub async fn node_count(&self) -> usize {
        self.inner.read().await.graph.node_count()
    }

    pub async fn edge_count(&self) -> usize {
        self.inner.read().await.graph.edge_count()
    }
}

impl RelationshipStore for RelationshipGraph {
    fn name(&self) -> &str {
        RELATIONSHIP_STORE
    }

    async fn distances(
        &self,
        origins: &BTreeSet<String>,
        targets: &BTreeSet<String>,
    ) -> Result<HashMap<String, u32>, StoreError> {
        let inner = self.inner.read().await;
        let mut found: HashMap<String, u32> = HashMap::new();

        for origin in origins {
            let Some(&start) = inner.nodes.get(origin) else {
                continue;
            };
            let reached = dijkstra(&inner.graph, start, None, |_| 1_u32);
            for target in targets {
                let Some(idx) = inner.nodes.get(target) else {
                    continue;
                };
                if let Some(&hops) = reached.get(idx) {
                    found
                        .entry(target.clone())
                        .and_modify(|d| *d = (*d).min(hops))
                        .or_insert(hops);
                }
            }
        }

        tracing::trace!(
            store = RELATIONSHIP_STORE,
            origins = origins.len(),
            targets = targets.len(),
            resolved = found.len(),
            "graph distances"
        );
        Ok(found)
    }
}
