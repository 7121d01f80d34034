use anyhow::Context;
use chrono::Utc;
use clap::{ArgAction, ArgGroup, Parser, Subcommand};
use pdf_rag_core::extractor::{PageRenderer, PdftoppmRenderer, TesseractRecognizer, TextRecognizer};
use pdf_rag_core::{
    parse_rotations, CharacterNgramEmbedder, ChunkIndex, ChunkStore, DedupMode, Embedder,
    EmbeddingBackend, Extractor, GeminiEmbedder, GeminiEmbedderConfig, GeminiGenerator,
    InMemoryChunkStore, Ingestor, JsonlChunkStore, QdrantStore, QueryEngine, RetryPolicy,
    Settings, StoreBackend,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type DynIndex = ChunkIndex<Box<dyn ChunkStore>, Box<dyn Embedder>>;

#[derive(Parser)]
#[command(name = "pdf-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Credential for the generative and embedding service
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    /// Generative model name
    #[arg(long, env = "GEMINI_MODEL", default_value = "gemini-2.5-flash")]
    gemini_model: String,

    /// Embedding model name, used when the embedding backend is gemini
    #[arg(long, env = "GEMINI_EMBEDDING_MODEL", default_value = "text-embedding-004")]
    gemini_embedding_model: String,

    /// Base URL of the generative service
    #[arg(
        long,
        env = "GEMINI_BASE_URL",
        default_value = "https://generativelanguage.googleapis.com/"
    )]
    gemini_base_url: String,

    /// Maximum characters per chunk
    #[arg(long, env = "CHUNK_SIZE", default_value = "1000")]
    chunk_size: usize,

    /// Characters shared by consecutive chunks of a page
    #[arg(long, env = "CHUNK_OVERLAP", default_value = "150")]
    chunk_overlap: usize,

    /// exact or normalized
    #[arg(long, env = "DEDUP_MODE", default_value = "exact")]
    dedup_mode: DedupMode,

    /// Render resolution for OCR
    #[arg(long, env = "OCR_DPI", default_value = "300")]
    ocr_dpi: u32,

    /// Comma-separated orientations tried by OCR
    #[arg(long, env = "OCR_ROTATIONS", default_value = "0,90,180,270")]
    ocr_rotations: String,

    /// Tesseract language
    #[arg(long, env = "OCR_LANG", default_value = "eng")]
    ocr_lang: String,

    #[arg(long, env = "OCR_ENABLED", default_value_t = true, action = ArgAction::Set)]
    ocr_enabled: bool,

    /// Chunks retrieved per question
    #[arg(long, env = "TOP_K", default_value = "15")]
    top_k: usize,

    /// Character budget for chunk text in the prompt
    #[arg(long, env = "MAX_CONTEXT_CHARS", default_value = "12000")]
    max_context_chars: usize,

    /// Hits at or below this cosine similarity are ignored
    #[arg(long, env = "MIN_SIMILARITY", default_value = "0.35")]
    min_similarity: f32,

    #[arg(long, env = "GENERATION_TIMEOUT_SECS", default_value = "60")]
    generation_timeout_secs: u64,

    /// Retries for timeouts, rate limits and 5xx responses
    #[arg(long, env = "GENERATION_MAX_RETRIES", default_value = "0")]
    generation_max_retries: u32,

    /// jsonl, memory or qdrant
    #[arg(long, env = "STORE_BACKEND", default_value = "jsonl")]
    store_backend: StoreBackend,

    /// Index file for the jsonl backend
    #[arg(long, env = "STORE_PATH", default_value = "data/index.jsonl")]
    store_path: PathBuf,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, env = "QDRANT_COLLECTION", default_value = "pdf_chunks")]
    qdrant_collection: String,

    /// ngram or gemini
    #[arg(long, env = "EMBEDDING_BACKEND", default_value = "ngram")]
    embedding_backend: EmbeddingBackend,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk and index a PDF or every PDF under a folder.
    #[command(group(ArgGroup::new("source").required(true).args(["file", "folder"])))]
    Ingest {
        #[arg(long)]
        file: Option<PathBuf>,
        /// Folder that contains PDFs recursively.
        #[arg(long)]
        folder: Option<PathBuf>,
    },
    /// Answer a question from indexed documents with page citations.
    Query {
        #[arg(long)]
        question: String,
    },
    /// Print the extracted pages of a PDF without indexing them.
    Extract {
        #[arg(long)]
        file: PathBuf,
    },
    /// Report whether the OCR tools are installed.
    CheckOcr,
}

impl Cli {
    fn settings(&self) -> anyhow::Result<Settings> {
        let mut settings = Settings::default();

        settings.ingestion.chunk_max_chars = self.chunk_size;
        settings.ingestion.chunk_overlap_chars = self.chunk_overlap;
        settings.ingestion.dedup = self.dedup_mode;

        settings.ocr.enabled = self.ocr_enabled;
        settings.ocr.dpi = self.ocr_dpi;
        settings.ocr.rotations = parse_rotations(&self.ocr_rotations).map_err(anyhow::Error::msg)?;
        settings.ocr.language = self.ocr_lang.clone();

        settings.query.top_k = self.top_k;
        settings.query.max_context_chars = self.max_context_chars;
        settings.query.min_similarity = self.min_similarity;
        settings.query.retry = RetryPolicy {
            max_retries: self.generation_max_retries,
            ..RetryPolicy::default()
        };

        settings.generation.api_key = self
            .gemini_api_key
            .clone()
            .filter(|key| !key.trim().is_empty());
        settings.generation.model = self.gemini_model.clone();
        settings.generation.base_url = self.gemini_base_url.clone();
        settings.generation.timeout = Duration::from_secs(self.generation_timeout_secs);

        settings.store.backend = self.store_backend;
        settings.store.path = self.store_path.clone();
        settings.store.qdrant_url = self.qdrant_url.clone();
        settings.store.qdrant_collection = self.qdrant_collection.clone();

        settings.embedding.backend = self.embedding_backend;
        settings.embedding.model = self.gemini_embedding_model.clone();

        Ok(settings)
    }
}

fn build_embedder(settings: &Settings) -> anyhow::Result<Box<dyn Embedder>> {
    let embedder: Box<dyn Embedder> = match settings.embedding.backend {
        EmbeddingBackend::Ngram => Box::new(CharacterNgramEmbedder {
            dimensions: settings.embedding.dimensions,
        }),
        EmbeddingBackend::Gemini => Box::new(GeminiEmbedder::new(GeminiEmbedderConfig {
            base_url: settings.generation.base_url.clone(),
            model: settings.embedding.model.clone(),
            api_key: settings.generation.api_key.clone(),
            dimensions: settings.embedding.dimensions,
            timeout: settings.generation.timeout,
        })?),
    };
    Ok(embedder)
}

async fn build_store(settings: &Settings) -> anyhow::Result<Box<dyn ChunkStore>> {
    let store: Box<dyn ChunkStore> = match settings.store.backend {
        StoreBackend::Memory => Box::new(InMemoryChunkStore::new()),
        StoreBackend::Jsonl => Box::new(
            JsonlChunkStore::open(&settings.store.path)
                .with_context(|| format!("opening index {}", settings.store.path.display()))?,
        ),
        StoreBackend::Qdrant => {
            let store = QdrantStore::new(
                &settings.store.qdrant_url,
                &settings.store.qdrant_collection,
                settings.embedding.dimensions,
            );
            store
                .ensure_collection()
                .await
                .context("preparing qdrant collection")?;
            Box::new(store)
        }
    };
    Ok(store)
}

async fn build_index(settings: &Settings) -> anyhow::Result<Arc<DynIndex>> {
    let store = build_store(settings).await?;
    let embedder = build_embedder(settings)?;
    Ok(Arc::new(ChunkIndex::new(store, embedder)))
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let settings = cli.settings()?;
    for warning in settings.validate()? {
        warn!(setting = warning.setting, "{}", warning.message);
    }

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        store = ?settings.store.backend,
        embedding = ?settings.embedding.backend,
        "pdf-rag boot"
    );

    match cli.command {
        Command::Ingest { file, folder } => {
            let index = build_index(&settings).await?;
            let ingestor = Ingestor::new(
                Extractor::with_defaults(&settings.ocr),
                Arc::clone(&index),
                settings.ingestion.clone(),
            )?;

            let outcome = match (file, folder) {
                (Some(file), _) => {
                    let stats = ingestor
                        .ingest_file(&file)
                        .await
                        .with_context(|| format!("ingesting {}", file.display()));
                    stats.map(|stats| json!({ "file": file.display().to_string(), "stats": stats }))
                }
                (None, Some(folder)) => {
                    let report = ingestor.ingest_folder(&folder).await;
                    report.map_err(anyhow::Error::from).map(|report| {
                        for skipped in &report.skipped_files {
                            warn!(
                                path = %skipped.path.display(),
                                reason = %skipped.reason,
                                "skipped pdf"
                            );
                        }
                        json!({
                            "folder": folder.display().to_string(),
                            "documents": report
                                .documents
                                .iter()
                                .map(|(name, stats)| json!({ "file": name, "stats": stats }))
                                .collect::<Vec<_>>(),
                            "skipped_files": report
                                .skipped_files
                                .iter()
                                .map(|skipped| json!({
                                    "path": skipped.path.display().to_string(),
                                    "reason": skipped.reason,
                                }))
                                .collect::<Vec<_>>(),
                            "totals": report.totals(),
                        })
                    })
                }
                (None, None) => Err(anyhow::anyhow!("either --file or --folder is required")),
            };

            index.close().await?;
            print_json(&outcome?)?;
        }
        Command::Query { question } => {
            let index = build_index(&settings).await?;
            let generator = GeminiGenerator::new(settings.generation.clone())?;
            let engine = QueryEngine::new(Arc::clone(&index), generator, settings.query.clone());

            let response = engine.answer(&question).await;
            index.close().await?;
            print_json(&response?)?;
        }
        Command::Extract { file } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let source_file = file
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            let extractor = Extractor::with_defaults(&settings.ocr);
            let document = tokio::task::spawn_blocking(move || {
                extractor.extract_document(&bytes, &source_file)
            })
            .await??;

            info!(
                pages = document.pages.len(),
                empty_pages = document.empty_pages(),
                "document extracted"
            );
            print_json(&document)?;
        }
        Command::CheckOcr => {
            let renderer = PdftoppmRenderer::default();
            let recognizer = TesseractRecognizer::new(&settings.ocr.language);
            print_json(&json!({
                "enabled": settings.ocr.enabled,
                "renderer": { "name": renderer.name(), "available": renderer.is_available() },
                "recognizer": { "name": recognizer.name(), "available": recognizer.is_available() },
                "language": settings.ocr.language,
                "dpi": settings.ocr.dpi,
                "rotations": settings.ocr.rotations,
            }))?;
        }
    }

    Ok(())
}
