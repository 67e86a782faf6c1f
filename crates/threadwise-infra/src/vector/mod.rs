//! Semantic memory: embeddings and similarity search.
//!
//! Serves the cross-channel and knowledge-base aggregation stages. Vectors
//! come from any [`Embedder`](threadwise_core::store::Embedder); the bundled
//! [`HashingEmbedder`] needs no model files.

pub mod hashing;
pub mod store;

pub use hashing::HashingEmbedder;
pub use store::{KnowledgeDocument, VectorMemoryStore};
