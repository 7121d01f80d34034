use crate::embeddings::Embedder;
use crate::error::{EmbeddingError, StoreError};
use crate::models::{Chunk, ChunkRecord, ScoredChunk};
use crate::traits::ChunkStore;
use chrono::Utc;
use tracing::{debug, warn};

const TIE_HEADROOM: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub added: usize,
    pub skipped: usize,
}

/// Deduplicating front of a [`ChunkStore`]. Owns the embedder so indexing and
/// query embedding always share one vector space.
pub struct ChunkIndex<S, E> {
    store: S,
    embedder: E,
}

impl<S, E> ChunkIndex<S, E>
where
    S: ChunkStore,
    E: Embedder,
{
    pub fn new(store: S, embedder: E) -> Self {
        Self { store, embedder }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embedder.embed(text).await
    }

    /// Stores every chunk whose id is not present yet. Embedding failures skip
    /// the chunk; store failures abort.
    pub async fn upsert(&self, chunks: &[Chunk]) -> Result<UpsertOutcome, StoreError> {
        let mut outcome = UpsertOutcome::default();

        for chunk in chunks {
            if self.store.contains(&chunk.chunk_id).await? {
                outcome.skipped += 1;
                continue;
            }

            let embedding = match self.embedder.embed(&chunk.text).await {
                Ok(embedding) => embedding,
                Err(error) => {
                    warn!(
                        chunk_id = %chunk.chunk_id,
                        source_file = %chunk.source_file,
                        page = chunk.page_number,
                        %error,
                        "embedding failed, chunk skipped"
                    );
                    outcome.skipped += 1;
                    continue;
                }
            };

            self.store
                .insert(ChunkRecord {
                    chunk: chunk.clone(),
                    embedding,
                    indexed_at: Utc::now(),
                })
                .await?;
            outcome.added += 1;
        }

        debug!(added = outcome.added, skipped = outcome.skipped, "upsert finished");
        Ok(outcome)
    }

    /// The `k` most similar chunks, best first, ties by ascending chunk id.
    pub async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        // Remote stores order equal scores arbitrarily, so the id tie-break
        // needs candidates from beyond the cut. Ties wider than the headroom
        // still depend on store order.
        let mut hits = self
            .store
            .search(query_embedding, k.saturating_add(TIE_HEADROOM))
            .await?;
        hits.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.chunk.chunk_id.cmp(&right.chunk.chunk_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    pub async fn len(&self) -> Result<usize, StoreError> {
        self.store.len().await
    }

    pub async fn close(&self) -> Result<(), StoreError> {
        self.store.close().await
    }
}
