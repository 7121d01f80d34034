//! Page text extraction as an ordered cascade of strategies. The first
//! strategy that yields non-blank text wins; a page nobody can read is empty.

pub mod layout;
pub mod ocr;
pub mod text_layer;

pub use layout::{LayoutStrategy, TableStrategy};
pub use ocr::{
    coherence_score, isolate_page, select_orientation, OcrOptions, OcrStrategy,
    OrientationCandidate, PageRenderer, PdftoppmRenderer, RenderedPage, TesseractRecognizer,
    TextRecognizer,
};
pub use text_layer::TextLayerStrategy;

use crate::error::ExtractError;
use crate::models::{Document, Page};
use lopdf::ObjectId;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    TextLayer,
    Layout,
    Table,
    Ocr,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextLayer => "text_layer",
            Self::Layout => "layout",
            Self::Table => "table",
            Self::Ocr => "ocr",
        }
    }
}

/// One page of a loaded PDF.
#[derive(Clone, Copy)]
pub struct PdfPage<'a> {
    pub document: &'a lopdf::Document,
    pub number: u32,
    pub id: ObjectId,
}

pub trait ExtractionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn extract(&self, page: &PdfPage<'_>) -> Result<String, ExtractError>;
}

pub struct Extractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl Extractor {
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Text layer, layout, table, then OCR through `pdftoppm` and `tesseract`
    /// when enabled.
    pub fn with_defaults(ocr: &OcrOptions) -> Self {
        let mut strategies: Vec<Box<dyn ExtractionStrategy>> = vec![
            Box::new(TextLayerStrategy),
            Box::new(LayoutStrategy),
            Box::new(TableStrategy),
        ];
        if ocr.enabled {
            strategies.push(Box::new(OcrStrategy::new(
                Box::new(PdftoppmRenderer::default()),
                Box::new(TesseractRecognizer::new(&ocr.language)),
                ocr.clone(),
            )));
        }
        Self::new(strategies)
    }

    pub fn strategy_kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|strategy| strategy.kind()).collect()
    }

    /// Never fails: strategy errors cascade, exhaustion yields an empty page.
    pub fn extract(&self, page: &PdfPage<'_>) -> Page {
        for strategy in &self.strategies {
            let kind = strategy.kind();
            match strategy.extract(page) {
                Ok(text) if !text.trim().is_empty() => {
                    debug!(page = page.number, strategy = kind.as_str(), "page extracted");
                    return Page {
                        page_number: page.number,
                        raw_text: text,
                        ocr_used: kind == StrategyKind::Ocr,
                    };
                }
                Ok(_) => {
                    debug!(page = page.number, strategy = kind.as_str(), "no text");
                }
                Err(ExtractError::OcrUnavailable(reason)) => {
                    warn!(page = page.number, %reason, "ocr unavailable, page left empty");
                }
                Err(error) => {
                    debug!(page = page.number, strategy = kind.as_str(), %error, "strategy failed");
                }
            }
        }

        Page {
            page_number: page.number,
            raw_text: String::new(),
            ocr_used: false,
        }
    }

    /// Extracts every page, in order, into memory. Ingestion walks pages one
    /// at a time instead; this is for inspection.
    pub fn extract_document(
        &self,
        bytes: &[u8],
        source_file: &str,
    ) -> Result<Document, ExtractError> {
        let document = load_pdf(bytes)?;
        let pages = document
            .get_pages()
            .into_iter()
            .map(|(number, id)| {
                self.extract(&PdfPage {
                    document: &document,
                    number,
                    id,
                })
            })
            .collect();

        Ok(Document {
            source_file: source_file.to_string(),
            pages,
        })
    }
}

pub fn load_pdf(bytes: &[u8]) -> Result<lopdf::Document, ExtractError> {
    lopdf::Document::load_mem(bytes).map_err(|error| ExtractError::PdfParse(error.to_string()))
}
