use crate::error::StoreError;
use crate::models::{ChunkRecord, ScoredChunk};
use async_trait::async_trait;

/// Persisted chunk storage with similarity search. Implementations must make
/// an inserted record visible to `search` atomically.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn contains(&self, chunk_id: &str) -> Result<bool, StoreError>;

    async fn insert(&self, record: ChunkRecord) -> Result<(), StoreError>;

    /// Up to `limit` best matches. Ordering is finalized by the index.
    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;

    /// Flushes and releases the underlying handle.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl<S: ChunkStore + ?Sized> ChunkStore for Box<S> {
    async fn contains(&self, chunk_id: &str) -> Result<bool, StoreError> {
        (**self).contains(chunk_id).await
    }

    async fn insert(&self, record: ChunkRecord) -> Result<(), StoreError> {
        (**self).insert(record).await
    }

    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        (**self).search(query_vector, limit).await
    }

    async fn len(&self) -> Result<usize, StoreError> {
        (**self).len().await
    }

    async fn close(&self) -> Result<(), StoreError> {
        (**self).close().await
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if left_norm < f32::EPSILON || right_norm < f32::EPSILON {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}
