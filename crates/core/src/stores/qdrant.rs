use crate::error::StoreError;
use crate::models::{Chunk, ChunkRecord, ScoredChunk};
use crate::traits::ChunkStore;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        }
    }

    /// Creates the collection with cosine distance when it does not exist yet.
    pub async fn ensure_collection(&self) -> Result<(), StoreError> {
        let url = format!("{}/collections/{}", self.endpoint, self.collection);
        let response = self.client.get(&url).send().await?;

        if response.status().is_success() {
            let parsed: Value = response.json().await?;
            let size = parsed
                .pointer("/result/config/params/vectors/size")
                .and_then(Value::as_u64);
            return match size {
                Some(size) if size as usize != self.vector_size => Err(StoreError::Request(format!(
                    "collection {} has vector size {} but embedder produces {}",
                    self.collection, size, self.vector_size
                ))),
                _ => Ok(()),
            };
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(&url)
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        Ok(())
    }
}

/// Qdrant only accepts integers or UUIDs as point ids, so the leading 128
/// bits of the hex chunk id become a UUID.
pub fn point_id(chunk_id: &str) -> Result<Uuid, StoreError> {
    let prefix = chunk_id
        .get(..32)
        .ok_or_else(|| StoreError::Request(format!("chunk id too short: {chunk_id}")))?;
    let bits = u128::from_str_radix(prefix, 16)
        .map_err(|error| StoreError::Request(format!("chunk id {chunk_id} is not hex: {error}")))?;
    Ok(Uuid::from_u128(bits))
}

fn backend_error(status: StatusCode) -> StoreError {
    StoreError::BackendResponse {
        backend: "qdrant".to_string(),
        details: status.to_string(),
    }
}

fn chunk_from_payload(payload: &Value) -> Option<Chunk> {
    Some(Chunk {
        chunk_id: payload.get("chunk_id")?.as_str()?.to_string(),
        source_file: payload.get("source_file")?.as_str()?.to_string(),
        page_number: u32::try_from(payload.get("page_number")?.as_u64()?).ok()?,
        text: payload.get("text")?.as_str()?.to_string(),
    })
}

#[async_trait]
impl ChunkStore for QdrantStore {
    async fn contains(&self, chunk_id: &str) -> Result<bool, StoreError> {
        let response = self
            .client
            .get(format!(
                "{}/collections/{}/points/{}",
                self.endpoint,
                self.collection,
                point_id(chunk_id)?
            ))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(backend_error(status)),
        }
    }

    async fn insert(&self, record: ChunkRecord) -> Result<(), StoreError> {
        if record.embedding.len() != self.vector_size {
            return Err(StoreError::Request(format!(
                "embedding dimension {} != {}",
                record.embedding.len(),
                self.vector_size
            )));
        }

        let point = json!({
            "id": point_id(&record.chunk.chunk_id)?,
            "vector": record.embedding,
            "payload": {
                "chunk_id": record.chunk.chunk_id,
                "source_file": record.chunk.source_file,
                "page_number": record.chunk.page_number,
                "text": record.chunk.text,
                "indexed_at": record.indexed_at.to_rfc3339(),
            },
        });

        // wait=true: the point is fully applied before the call returns.
        let response = self
            .client
            .put(format!(
                "{}/collections/{}/points?wait=true",
                self.endpoint, self.collection
            ))
            .json(&json!({ "points": [point] }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        if query_vector.len() != self.vector_size {
            return Err(StoreError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }

        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/search",
                self.endpoint, self.collection
            ))
            .json(&json!({
                "vector": query_vector,
                "limit": limit,
                "with_payload": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        Ok(parse_search_hits(&parsed))
    }

    async fn len(&self) -> Result<usize, StoreError> {
        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/count",
                self.endpoint, self.collection
            ))
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| StoreError::BackendResponse {
                backend: "qdrant".to_string(),
                details: "count response has no result.count".to_string(),
            })
    }
}

fn parse_search_hits(parsed: &Value) -> Vec<ScoredChunk> {
    parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| {
                    let chunk = chunk_from_payload(hit.get("payload")?)?;
                    let score = hit.get("score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
                    Some(ScoredChunk { chunk, score })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_id_is_derived_from_chunk_id_prefix() {
        let chunk_id = "0123456789abcdef0123456789abcdef00ff";
        let id = point_id(chunk_id).unwrap();
        assert_eq!(id.to_string(), "01234567-89ab-cdef-0123-456789abcdef");
        assert!(point_id("short").is_err());
        assert!(point_id("zz23456789abcdef0123456789abcdef").is_err());
    }

    #[test]
    fn search_hits_without_full_payload_are_dropped() {
        let parsed = json!({
            "result": [
                {
                    "id": "x",
                    "score": 0.92,
                    "payload": {
                        "chunk_id": "abc",
                        "source_file": "specs.pdf",
                        "page_number": 3,
                        "text": "Concrete grade M35"
                    }
                },
                { "id": "y", "score": 0.5, "payload": { "chunk_id": "partial" } }
            ]
        });

        let hits = parse_search_hits(&parsed);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.page_number, 3);
        assert!((hits[0].score - 0.92).abs() < 1e-6);
    }
}
