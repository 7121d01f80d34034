pub mod jsonl;
pub mod memory;
pub mod qdrant;

pub use jsonl::JsonlChunkStore;
pub use memory::InMemoryChunkStore;
pub use qdrant::QdrantStore;

use crate::error::StoreError;
use crate::models::{ChunkRecord, ScoredChunk};
use crate::traits::cosine_similarity;

/// Brute-force cosine ranking shared by the local stores.
pub(crate) fn rank_records<'a>(
    records: impl Iterator<Item = &'a ChunkRecord>,
    query_vector: &[f32],
    limit: usize,
) -> Vec<ScoredChunk> {
    let mut scored: Vec<ScoredChunk> = records
        .map(|record| ScoredChunk {
            chunk: record.chunk.clone(),
            score: cosine_similarity(&record.embedding, query_vector),
        })
        .collect();

    scored.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| left.chunk.chunk_id.cmp(&right.chunk.chunk_id))
    });
    scored.truncate(limit);
    scored
}

pub(crate) fn poisoned<T>(_: T) -> StoreError {
    StoreError::Request("chunk store lock poisoned".to_string())
}
