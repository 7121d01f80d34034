use crate::error::EmbeddingError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// The embedding service. Indexing and querying must share one instance so
/// vectors live in the same space.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

#[async_trait]
impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn dimensions(&self) -> usize {
        (**self).dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        (**self).embed(text).await
    }
}

/// Hashed character trigram counts, L2-normalized. Needs no credential.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_text(text))
    }
}

#[derive(Debug, Clone)]
pub struct GeminiEmbedderConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub dimensions: usize,
    pub timeout: Duration,
}

/// Remote embedding service speaking the Gemini `embedContent` protocol.
pub struct GeminiEmbedder {
    client: Client,
    config: GeminiEmbedderConfig,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    content: EmbedContent<'a>,
    #[serde(rename = "outputDimensionality")]
    output_dimensionality: usize,
}

#[derive(Debug, Serialize)]
struct EmbedContent<'a> {
    parts: Vec<EmbedPart<'a>>,
}

#[derive(Debug, Serialize)]
struct EmbedPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Option<EmbedValues>,
}

#[derive(Debug, Deserialize)]
struct EmbedValues {
    values: Vec<f32>,
}

impl GeminiEmbedder {
    pub fn new(config: GeminiEmbedderConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> Result<Url, EmbeddingError> {
        let base = Url::parse(&self.config.base_url)?;
        Ok(base.join(&format!("v1beta/models/{}:embedContent", self.config.model))?)
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(EmbeddingError::MissingCredential)?;

        let response = self
            .client
            .post(self.endpoint()?)
            .header("x-goog-api-key", api_key)
            .json(&EmbedRequest {
                content: EmbedContent {
                    parts: vec![EmbedPart { text }],
                },
                output_dimensionality: self.config.dimensions,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Backend {
                status: status.as_u16(),
                details,
            });
        }

        let payload: EmbedResponse = response.json().await?;
        parse_embedding(payload, self.config.dimensions)
    }
}

fn parse_embedding(payload: EmbedResponse, dimensions: usize) -> Result<Vec<f32>, EmbeddingError> {
    let values = payload
        .embedding
        .map(|embedding| embedding.values)
        .ok_or_else(|| EmbeddingError::Malformed("response has no embedding".to_string()))?;

    if values.len() != dimensions {
        return Err(EmbeddingError::Malformed(format!(
            "embedding dimension {} != {}",
            values.len(),
            dimensions
        )));
    }

    Ok(values)
}
