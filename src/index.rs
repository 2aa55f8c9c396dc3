//! Nearest-neighbor search over the three logical vector collections.
//!
//! The [`VectorSearcher`] trait is the seam to whatever index actually holds
//! the vectors (pgvector, a hosted store, ...). [`InMemoryVectorIndex`] is
//! the bundled implementation: per-collection rows behind an `RwLock`,
//! cosine similarity scored as `1 - cosine_distance`, results filtered to
//! the threshold and truncated to `top_k`. Zero rows above threshold is a
//! normal empty result, never an error.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::types::{CollectionTag, DocumentChunk, RetrievalMatch};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Similarity search over one collection.
///
/// Implementations must return matches sorted by descending similarity
/// score; that ordering is a correctness contract, not best-effort.
#[async_trait]
pub trait VectorSearcher: Send + Sync {
    /// Search `collection` for the nearest neighbors of `query_vector`.
    ///
    /// Returns at most `top_k` matches with `similarity_score >= threshold`,
    /// sorted by descending score.
    async fn search(
        &self,
        collection: CollectionTag,
        query_vector: &[f32],
        threshold: f64,
        top_k: usize,
    ) -> Result<Vec<RetrievalMatch>, CoreError>;
}

// ---------------------------------------------------------------------------
// Cosine similarity
// ---------------------------------------------------------------------------

/// Cosine similarity between two vectors, or `None` when undefined
/// (length mismatch, empty input, zero magnitude).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x64 = f64::from(x);
        let y64 = f64::from(y);
        dot += x64 * y64;
        norm_a += x64 * x64;
        norm_b += y64 * y64;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some(dot / denom)
}

// ---------------------------------------------------------------------------
// In-memory index
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct IndexRow {
    id: String,
    vector: Vec<f32>,
    excerpt: String,
}

/// In-memory vector index over the three logical collections.
///
/// Safe for concurrent reads; writes take the collection lock briefly.
/// Inserting an id that already exists replaces the previous row.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    collections: RwLock<HashMap<CollectionTag, Vec<IndexRow>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row in `collection`.
    pub fn upsert(
        &self,
        collection: CollectionTag,
        id: impl Into<String>,
        vector: Vec<f32>,
        excerpt: impl Into<String>,
    ) {
        let row = IndexRow {
            id: id.into(),
            vector,
            excerpt: excerpt.into(),
        };
        let mut collections = self.collections.write().expect("index lock poisoned");
        let rows = collections.entry(collection).or_default();
        match rows.iter_mut().find(|r| r.id == row.id) {
            Some(existing) => *existing = row,
            None => rows.push(row),
        }
    }

    /// Index a document chunk under its own id, using its precomputed
    /// embedding and full text.
    pub fn insert_document(&self, chunk: &DocumentChunk) {
        self.upsert(
            CollectionTag::Documents,
            chunk.id.clone(),
            chunk.embedding.clone(),
            chunk.text.clone(),
        );
    }

    /// Index an entity's descriptive text under its canonical name.
    pub fn insert_entity(&self, canonical_name: &str, vector: Vec<f32>, descriptive_text: &str) {
        self.upsert(
            CollectionTag::Entities,
            canonical_name,
            vector,
            descriptive_text,
        );
    }

    /// Number of rows in `collection`.
    pub fn len(&self, collection: CollectionTag) -> usize {
        self.collections
            .read()
            .expect("index lock poisoned")
            .get(&collection)
            .map(|rows| rows.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: CollectionTag) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl VectorSearcher for InMemoryVectorIndex {
    async fn search(
        &self,
        collection: CollectionTag,
        query_vector: &[f32],
        threshold: f64,
        top_k: usize,
    ) -> Result<Vec<RetrievalMatch>, CoreError> {
        let collections = self.collections.read().expect("index lock poisoned");
        let rows = match collections.get(&collection) {
            Some(rows) => rows,
            None => return Ok(Vec::new()),
        };

        let mut matches: Vec<RetrievalMatch> = Vec::new();
        for row in rows {
            let Some(score) = cosine_similarity(query_vector, &row.vector) else {
                log::debug!(
                    "skipping row '{}' in {}: similarity undefined",
                    row.id,
                    collection.as_str()
                );
                continue;
            };
            // Clamp tiny floating-point overshoots so scores stay in [0, 1].
            let score = score.clamp(-1.0, 1.0);
            if score >= threshold {
                matches.push(RetrievalMatch {
                    record_ref: row.id.clone(),
                    excerpt: row.excerpt.clone(),
                    similarity_score: score,
                    collection,
                });
            }
        }

        matches.sort_by(|a, b| {
            b.similarity_score
                .partial_cmp(&a.similarity_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record_ref.cmp(&b.record_ref))
        });
        matches.truncate(top_k);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with_rows() -> InMemoryVectorIndex {
        let index = InMemoryVectorIndex::new();
        index.upsert(CollectionTag::Documents, "a", vec![1.0, 0.0, 0.0], "doc a");
        index.upsert(CollectionTag::Documents, "b", vec![0.9, 0.1, 0.0], "doc b");
        index.upsert(CollectionTag::Documents, "c", vec![0.0, 1.0, 0.0], "doc c");
        index.upsert(CollectionTag::Documents, "d", vec![-1.0, 0.0, 0.0], "doc d");
        index
    }

    #[test]
    fn test_cosine_similarity_basics() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), Some(1.0));
        let orthogonal = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!(orthogonal.abs() < 1e-9);
        assert_eq!(cosine_similarity(&[], &[]), None);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
    }

    #[tokio::test]
    async fn test_search_sorted_filtered_truncated() {
        let index = index_with_rows();
        let results = index
            .search(CollectionTag::Documents, &[1.0, 0.0, 0.0], 0.5, 10)
            .await
            .unwrap();

        // "a" (1.0) then "b" (~0.994); "c" and "d" fall below threshold.
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].record_ref, "a");
        assert_eq!(results[1].record_ref, "b");
        assert!(results[0].similarity_score >= results[1].similarity_score);
        for m in &results {
            assert!(m.similarity_score >= 0.5);
        }
    }

    #[tokio::test]
    async fn test_search_respects_top_k() {
        let index = index_with_rows();
        let results = index
            .search(CollectionTag::Documents, &[1.0, 0.0, 0.0], 0.0, 1)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record_ref, "a");
    }

    #[tokio::test]
    async fn test_threshold_above_one_always_empty() {
        let index = index_with_rows();
        let results = index
            .search(CollectionTag::Documents, &[1.0, 0.0, 0.0], 1.1, 10)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_empty_collection_is_not_an_error() {
        let index = InMemoryVectorIndex::new();
        let results = index
            .search(CollectionTag::Entities, &[1.0, 0.0], 0.5, 5)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_row() {
        let index = InMemoryVectorIndex::new();
        index.upsert(CollectionTag::Entities, "x", vec![1.0, 0.0], "old");
        index.upsert(CollectionTag::Entities, "x", vec![1.0, 0.0], "new");
        assert_eq!(index.len(CollectionTag::Entities), 1);

        let results = index
            .search(CollectionTag::Entities, &[1.0, 0.0], 0.5, 5)
            .await
            .unwrap();
        assert_eq!(results[0].excerpt, "new");
    }
}
