//! Relevance scoring for retrieved context.

pub mod scorer;

pub use scorer::RelevanceScorer;
