//! Embedder trait for text-to-vector conversion.
//!
//! The semantic store embeds documents at insert time and the query text at
//! search time. How embeddings are computed is outside the core; this is the
//! contract the vector adapter expects.

use threadwise_types::error::StoreError;

/// Converts text into embedding vectors.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input.
    fn embed(
        &self,
        texts: &[String],
    ) -> impl std::future::Future<Output = Result<Vec<Vec<f32>>, StoreError>> + Send;

    fn model_name(&self) -> &str;

    /// Dimensionality of the output vectors.
    fn dimension(&self) -> usize;
}

/// Cosine similarity of two vectors, `0.0` when either is zero or the
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
