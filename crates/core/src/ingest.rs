use crate::chunking::{chunk_page, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::extractor::{load_pdf, Extractor, PdfPage};
use crate::index::ChunkIndex;
use crate::models::{IngestStats, IngestionOptions};
use crate::traits::ChunkStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Reduces an uploaded name to its final path component and requires a
/// `.pdf` extension.
pub fn sanitize_upload_name(name: &str) -> Result<String, IngestError> {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if base.is_empty() || base == "." || base == ".." {
        return Err(IngestError::MissingFileName(name.to_string()));
    }

    let is_pdf = Path::new(base)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !is_pdf {
        return Err(IngestError::InvalidArgument(format!(
            "only .pdf files can be ingested, got {base}"
        )));
    }

    Ok(base.to_string())
}

pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

pub struct FolderReport {
    pub documents: Vec<(String, IngestStats)>,
    pub skipped_files: Vec<SkippedPdf>,
}

impl FolderReport {
    pub fn totals(&self) -> IngestStats {
        self.documents
            .iter()
            .fold(IngestStats::default(), |mut total, (_, stats)| {
                total.pages += stats.pages;
                total.chunks_added += stats.chunks_added;
                total.chunks_skipped += stats.chunks_skipped;
                total.empty_pages += stats.empty_pages;
                total
            })
    }
}

/// Extraction, chunking and indexing of whole documents, one page at a time.
pub struct Ingestor<S, E> {
    extractor: Extractor,
    index: Arc<ChunkIndex<S, E>>,
    options: IngestionOptions,
}

impl<S, E> Ingestor<S, E>
where
    S: ChunkStore,
    E: Embedder,
{
    pub fn new(
        extractor: Extractor,
        index: Arc<ChunkIndex<S, E>>,
        options: IngestionOptions,
    ) -> Result<Self, IngestError> {
        ChunkingConfig::from(&options).validate()?;
        Ok(Self {
            extractor,
            index,
            options,
        })
    }

    pub fn index(&self) -> &Arc<ChunkIndex<S, E>> {
        &self.index
    }

    /// Ingests one uploaded document. Pages nobody can read count as empty;
    /// chunks already in the index count as skipped.
    pub async fn ingest_bytes(
        &self,
        bytes: &[u8],
        filename: &str,
    ) -> Result<IngestStats, IngestError> {
        let source_file = sanitize_upload_name(filename)?;
        let document = load_pdf(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut stats = IngestStats::default();
        let mut ocr_pages = 0usize;

        for (number, id) in document.get_pages() {
            let pdf_page = PdfPage {
                document: &document,
                number,
                id,
            };
            let page = run_blocking(|| self.extractor.extract(&pdf_page));

            stats.pages += 1;
            if page.ocr_used {
                ocr_pages += 1;
            }
            if page.is_empty() {
                stats.empty_pages += 1;
                continue;
            }

            let chunks = chunk_page(&page, &source_file, &self.options)?;
            let outcome = self.index.upsert(&chunks).await?;
            stats.chunks_added += outcome.added;
            stats.chunks_skipped += outcome.skipped;
        }

        info!(
            source_file = %source_file,
            pages = stats.pages,
            ocr_pages,
            empty_pages = stats.empty_pages,
            chunks_added = stats.chunks_added,
            chunks_skipped = stats.chunks_skipped,
            "document ingested"
        );

        Ok(stats)
    }

    pub async fn ingest_file(&self, path: &Path) -> Result<IngestStats, IngestError> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;
        let bytes = tokio::fs::read(path).await?;
        self.ingest_bytes(&bytes, filename).await
    }

    /// Ingests every PDF under `folder`. Unreadable documents are reported,
    /// not fatal; store failures are.
    pub async fn ingest_folder(&self, folder: &Path) -> Result<FolderReport, IngestError> {
        let files = discover_pdf_files(folder);

        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pdf files found in {}",
                folder.display()
            )));
        }

        let mut documents = Vec::new();
        let mut skipped_files = Vec::new();

        for path in files {
            match self.ingest_file(&path).await {
                Ok(stats) => {
                    let name = path
                        .file_name()
                        .map(|name| name.to_string_lossy().to_string())
                        .unwrap_or_default();
                    documents.push((name, stats));
                }
                Err(IngestError::Store(error)) => return Err(IngestError::Store(error)),
                Err(error) => {
                    warn!(path = %path.display(), %error, "pdf skipped");
                    skipped_files.push(SkippedPdf {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(FolderReport {
            documents,
            skipped_files,
        })
    }
}

/// Extraction may shell out to OCR tools; keep it off the async workers when
/// the runtime can spare the thread.
fn run_blocking<T>(work: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}
