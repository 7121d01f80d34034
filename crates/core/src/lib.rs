pub mod chunking;
pub mod citation;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod models;
pub mod query;
pub mod stores;
pub mod traits;

#[cfg(test)]
mod test_support;

pub use chunking::{chunk_page, make_chunk_id, normalize_whitespace, ChunkingConfig};
pub use config::{
    parse_rotations, ConfigWarning, EmbeddingBackend, EmbeddingSettings, Settings, StoreBackend,
    StoreSettings,
};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, GeminiEmbedder, GeminiEmbedderConfig,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{
    ConfigError, EmbeddingError, ExtractError, GenerationError, IngestError, QueryError, StoreError,
};
pub use extractor::{load_pdf, Extractor, OcrOptions, PdfPage, StrategyKind};
pub use generation::{GeminiGenerator, GenerationOptions, Generator};
pub use index::{ChunkIndex, UpsertOutcome};
pub use ingest::{discover_pdf_files, sanitize_upload_name, FolderReport, Ingestor, SkippedPdf};
pub use models::{
    Chunk, ChunkRecord, Citation, DedupMode, Document, IngestStats, IngestionOptions, Page,
    QueryResponse, ScoredChunk,
};
pub use query::{QueryEngine, QueryOptions, RetryPolicy, NO_CONTEXT_ANSWER};
pub use stores::{InMemoryChunkStore, JsonlChunkStore, QdrantStore};
pub use traits::{cosine_similarity, ChunkStore};
