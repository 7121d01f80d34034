use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One uploaded PDF. Identity is the file name, not the content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub source_file: String,
    pub pages: Vec<Page>,
}

impl Document {
    pub fn empty_pages(&self) -> usize {
        self.pages.iter().filter(|page| page.is_empty()).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page {
    pub page_number: u32,
    pub raw_text: String,
    pub ocr_used: bool,
}

impl Page {
    pub fn is_empty(&self) -> bool {
        self.raw_text.trim().is_empty()
    }
}

/// A page-bounded piece of text. `chunk_id` is the dedup key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: String,
    pub source_file: String,
    pub page_number: u32,
    pub text: String,
}

/// What the index persists for every chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Citation {
    pub id: usize,
    pub source_file: String,
    pub page_number: u32,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer_text: String,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestStats {
    pub pages: usize,
    pub chunks_added: usize,
    pub chunks_skipped: usize,
    pub empty_pages: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DedupMode {
    /// Hash the exact chunk text.
    #[default]
    Exact,
    /// Hash case-folded alphanumeric tokens, so punctuation or casing drift
    /// between extractions of the same page does not create new entries.
    Normalized,
}

impl std::str::FromStr for DedupMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "normalized" => Ok(Self::Normalized),
            other => Err(format!("unknown dedup mode '{other}' (expected exact|normalized)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub dedup: DedupMode,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1_000,
            chunk_overlap_chars: 150,
            dedup: DedupMode::Exact,
        }
    }
}
