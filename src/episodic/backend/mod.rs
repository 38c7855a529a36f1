//! The vector-index contract, uniform across the three concrete backends.

pub mod external;
pub mod local;
pub mod memory;

use crate::error::GraphResult;
use async_trait::async_trait;
use serde_json::Value;

/// One scored result from [`VectorBackend::query`].
#[derive(Debug, Clone)]
pub struct QueryMatch {
    /// The matched record's id.
    pub id: String,
    /// Similarity score, higher is more similar.
    pub similarity: f32,
    /// The record's stored metadata.
    pub metadata: Value,
    /// The record's stored document text, if any.
    pub document: Option<String>,
}

/// A pluggable implementation of the vector-index contract used by the
/// episodic-memory store. Implementations must be idempotent on id for
/// `upsert` and safe for concurrent callers.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Insert or replace records by id.
    async fn upsert(
        &self,
        ids: Vec<String>,
        embeddings: Vec<Vec<f32>>,
        metadatas: Vec<Value>,
        documents: Vec<Option<String>>,
    ) -> GraphResult<()>;

    /// Query for the `n` most similar records to `embedding`, optionally
    /// restricted by a metadata `where` clause. Ranked by similarity
    /// descending.
    async fn query(
        &self,
        embedding: &[f32],
        n: usize,
        r#where: Option<&Value>,
    ) -> GraphResult<Vec<QueryMatch>>;

    /// Fetch specific records by id; missing ids are simply absent from the
    /// result.
    async fn fetch(&self, ids: &[String]) -> GraphResult<Vec<QueryMatch>>;

    /// Delete records by id. Deleting an absent id is a no-op.
    async fn delete(&self, ids: &[String]) -> GraphResult<()>;

    /// Total number of stored records.
    async fn count(&self) -> GraphResult<usize>;

    /// Remove all stored records.
    async fn clear(&self) -> GraphResult<()>;
}

/// Cosine similarity between two equal-length vectors. Returns 0.0 if either
/// vector has zero magnitude or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn mismatched_lengths_are_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
    }
}
