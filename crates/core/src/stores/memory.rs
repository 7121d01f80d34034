//! Process-local store. Nothing survives a restart.

use super::{poisoned, rank_records};
use crate::error::StoreError;
use crate::models::{ChunkRecord, ScoredChunk};
use crate::traits::ChunkStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct InMemoryChunkStore {
    records: RwLock<HashMap<String, ChunkRecord>>,
}

impl InMemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn contains(&self, chunk_id: &str) -> Result<bool, StoreError> {
        Ok(self.records.read().map_err(poisoned)?.contains_key(chunk_id))
    }

    async fn insert(&self, record: ChunkRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .map_err(poisoned)?
            .entry(record.chunk.chunk_id.clone())
            .or_insert(record);
        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(rank_records(records.values(), query_vector, limit))
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records.read().map_err(poisoned)?.len())
    }
}
