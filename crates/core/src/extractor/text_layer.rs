use super::{ExtractionStrategy, PdfPage, StrategyKind};
use crate::error::ExtractError;

/// The embedded text layer, decoded through the page fonts by `lopdf`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextLayerStrategy;

impl ExtractionStrategy for TextLayerStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TextLayer
    }

    fn extract(&self, page: &PdfPage<'_>) -> Result<String, ExtractError> {
        page.document
            .extract_text(&[page.number])
            .map_err(|error| ExtractError::Strategy {
                strategy: self.kind().as_str(),
                details: error.to_string(),
            })
    }
}
