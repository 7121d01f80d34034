//! Runtime settings for ingestion, OCR, retrieval and generation, with
//! validation that separates hard errors from advisories.

use crate::chunking::ChunkingConfig;
use crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS;
use crate::error::ConfigError;
use crate::extractor::OcrOptions;
use crate::generation::GenerationOptions;
use crate::models::IngestionOptions;
use crate::query::QueryOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Jsonl,
    Memory,
    Qdrant,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "jsonl" => Ok(Self::Jsonl),
            "memory" => Ok(Self::Memory),
            "qdrant" => Ok(Self::Qdrant),
            other => Err(format!("unknown store backend '{other}' (expected jsonl|memory|qdrant)")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    #[default]
    Ngram,
    Gemini,
}

impl FromStr for EmbeddingBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ngram" => Ok(Self::Ngram),
            "gemini" => Ok(Self::Gemini),
            other => Err(format!("unknown embedding backend '{other}' (expected ngram|gemini)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub path: PathBuf,
    pub qdrant_url: String,
    pub qdrant_collection: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Jsonl,
            path: PathBuf::from("data/index.jsonl"),
            qdrant_url: "http://localhost:6333".to_string(),
            qdrant_collection: "pdf_chunks".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    pub model: String,
    pub dimensions: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Ngram,
            model: "text-embedding-004".to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub ingestion: IngestionOptions,
    pub ocr: OcrOptions,
    pub query: QueryOptions,
    pub generation: GenerationOptions,
    pub store: StoreSettings,
    pub embedding: EmbeddingSettings,
}

/// A setting that works but will likely disappoint at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub setting: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.setting, self.message)
    }
}

fn invalid(name: &'static str, details: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        details: details.into(),
    }
}

impl Settings {
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        ChunkingConfig::from(&self.ingestion)
            .validate()
            .map_err(|error| invalid("CHUNK_OVERLAP", error.to_string()))?;

        if self.ocr.dpi == 0 {
            return Err(invalid("OCR_DPI", "must be positive"));
        }
        if self.ocr.enabled && self.ocr.rotations.is_empty() {
            return Err(invalid("OCR_ROTATIONS", "at least one rotation is required"));
        }
        if let Some(rotation) = self
            .ocr
            .rotations
            .iter()
            .find(|rotation| **rotation % 90 != 0 || **rotation >= 360)
        {
            return Err(invalid(
                "OCR_ROTATIONS",
                format!("{rotation} is not one of 0, 90, 180, 270"),
            ));
        }
        if self.ocr.language.trim().is_empty() {
            return Err(invalid("OCR_LANG", "must not be empty"));
        }

        if self.query.top_k == 0 {
            return Err(invalid("TOP_K", "must be positive"));
        }
        if self.query.max_context_chars == 0 {
            return Err(invalid("MAX_CONTEXT_CHARS", "must be positive"));
        }
        if !(-1.0..1.0).contains(&self.query.min_similarity) {
            return Err(invalid("MIN_SIMILARITY", "must be in [-1, 1)"));
        }

        Url::parse(&self.generation.base_url)
            .map_err(|error| invalid("GEMINI_BASE_URL", error.to_string()))?;
        if self.generation.timeout.is_zero() {
            return Err(invalid("GENERATION_TIMEOUT_SECS", "must be positive"));
        }

        if self.store.backend == StoreBackend::Qdrant {
            Url::parse(&self.store.qdrant_url)
                .map_err(|error| invalid("QDRANT_URL", error.to_string()))?;
        }
        if self.embedding.dimensions == 0 {
            return Err(invalid("EMBEDDING_DIMENSIONS", "must be positive"));
        }

        let mut warnings = Vec::new();
        if self.generation.api_key.is_none() {
            warnings.push(ConfigWarning {
                setting: "GEMINI_API_KEY",
                message: "not set; questions with retrieved evidence will fail".to_string(),
            });
        }
        if self.embedding.backend == EmbeddingBackend::Gemini && self.generation.api_key.is_none() {
            warnings.push(ConfigWarning {
                setting: "EMBEDDING_BACKEND",
                message: "gemini embeddings need GEMINI_API_KEY; every chunk will be skipped"
                    .to_string(),
            });
        }
        if !self.ocr.enabled {
            warnings.push(ConfigWarning {
                setting: "OCR_ENABLED",
                message: "scanned pages will be indexed as empty".to_string(),
            });
        }

        Ok(warnings)
    }
}

/// Parses a comma-separated rotation list such as `0,90,180,270`.
pub fn parse_rotations(value: &str) -> Result<Vec<u16>, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u16>()
                .map_err(|error| format!("invalid rotation '{part}': {error}"))
        })
        .collect()
}
