//! OCR fallback for scanned pages.
//!
//! The page is cut out into a one-page PDF, rendered once per candidate
//! rotation (by rewriting `/Rotate`), and recognized. The rotation whose text
//! scores highest on [`coherence_score`] wins.

use super::{ExtractionStrategy, PdfPage, StrategyKind};
use crate::error::ExtractError;
use lopdf::{Document, Object};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use tempfile::TempDir;
use tracing::debug;

pub const DEFAULT_OCR_DPI: u32 = 300;
pub const DEFAULT_ROTATIONS: [u16; 4] = [0, 90, 180, 270];

#[derive(Debug, Clone)]
pub struct OcrOptions {
    pub enabled: bool,
    pub dpi: u32,
    /// Tried in order; on equal scores the earlier rotation wins.
    pub rotations: Vec<u16>,
    pub language: String,
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            dpi: DEFAULT_OCR_DPI,
            rotations: DEFAULT_ROTATIONS.to_vec(),
            language: "eng".to_string(),
        }
    }
}

/// A rendered page image. Owns the scratch directory it lives in, if any.
#[derive(Debug)]
pub struct RenderedPage {
    pub image_path: PathBuf,
    pub rotation: u16,
    _workspace: Option<TempDir>,
}

impl RenderedPage {
    pub fn new(image_path: impl Into<PathBuf>, rotation: u16) -> Self {
        Self {
            image_path: image_path.into(),
            rotation,
            _workspace: None,
        }
    }

    fn in_workspace(image_path: PathBuf, rotation: u16, workspace: TempDir) -> Self {
        Self {
            image_path,
            rotation,
            _workspace: Some(workspace),
        }
    }
}

pub trait PageRenderer: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool;

    /// Renders the only page of `single_page`, turned by `rotation` degrees.
    fn render(
        &self,
        single_page: &Document,
        dpi: u32,
        rotation: u16,
    ) -> Result<RenderedPage, ExtractError>;
}

pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool;

    fn recognize(&self, image: &RenderedPage) -> Result<String, ExtractError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrientationCandidate {
    pub rotation: u16,
    pub text: String,
}

pub struct OcrStrategy {
    renderer: Box<dyn PageRenderer>,
    recognizer: Box<dyn TextRecognizer>,
    options: OcrOptions,
}

impl OcrStrategy {
    pub fn new(
        renderer: Box<dyn PageRenderer>,
        recognizer: Box<dyn TextRecognizer>,
        options: OcrOptions,
    ) -> Self {
        Self {
            renderer,
            recognizer,
            options,
        }
    }
}

impl ExtractionStrategy for OcrStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Ocr
    }

    fn extract(&self, page: &PdfPage<'_>) -> Result<String, ExtractError> {
        if !self.renderer.is_available() {
            return Err(ExtractError::OcrUnavailable(format!(
                "page renderer {} is not installed",
                self.renderer.name()
            )));
        }
        if !self.recognizer.is_available() {
            return Err(ExtractError::OcrUnavailable(format!(
                "text recognizer {} is not installed",
                self.recognizer.name()
            )));
        }

        let single_page = isolate_page(page)?;
        let mut candidates = Vec::with_capacity(self.options.rotations.len());
        let mut last_error = None;

        for &rotation in &self.options.rotations {
            let recognized = self
                .renderer
                .render(&single_page, self.options.dpi, rotation)
                .and_then(|image| self.recognizer.recognize(&image));

            match recognized {
                Ok(text) => {
                    debug!(
                        page = page.number,
                        rotation,
                        score = coherence_score(&text),
                        "ocr orientation tried"
                    );
                    candidates.push(OrientationCandidate { rotation, text });
                }
                Err(error) => {
                    debug!(page = page.number, rotation, %error, "ocr orientation failed");
                    last_error = Some(error);
                }
            }
        }

        match select_orientation(candidates) {
            Some(best) => Ok(best.text),
            None => Err(last_error.unwrap_or_else(|| {
                ExtractError::OcrFailed(format!("no rotations configured for page {}", page.number))
            })),
        }
    }
}

/// Characters in word-like tokens: at least two characters, at least half
/// of them alphanumeric. Recognizing a page at the wrong angle mostly yields
/// punctuation noise and single glyphs, which this ignores.
pub fn coherence_score(text: &str) -> usize {
    text.split_whitespace()
        .map(|token| {
            let total = token.chars().count();
            let alphanumeric = token.chars().filter(|c| c.is_alphanumeric()).count();
            if total >= 2 && alphanumeric * 2 >= total {
                alphanumeric
            } else {
                0
            }
        })
        .sum()
}

/// The best-scoring candidate; ties go to the earliest. Candidates scoring
/// zero are never selected.
pub fn select_orientation(candidates: Vec<OrientationCandidate>) -> Option<OrientationCandidate> {
    let mut best: Option<(usize, OrientationCandidate)> = None;
    for candidate in candidates {
        let score = coherence_score(&candidate.text);
        if score == 0 {
            continue;
        }
        if best.as_ref().map_or(true, |(top, _)| score > *top) {
            best = Some((score, candidate));
        }
    }
    best.map(|(_, candidate)| candidate)
}

/// Copy of the document holding only `page`, small enough to re-save per
/// rotation.
pub fn isolate_page(page: &PdfPage<'_>) -> Result<Document, ExtractError> {
    let mut single = page.document.clone();
    let others: Vec<u32> = single
        .get_pages()
        .keys()
        .copied()
        .filter(|number| *number != page.number)
        .collect();
    if !others.is_empty() {
        single.delete_pages(&others);
    }
    single.prune_objects();
    Ok(single)
}

fn set_rotation(document: &mut Document, rotation: u16) -> Result<(), ExtractError> {
    let page_id = document
        .get_pages()
        .values()
        .next()
        .copied()
        .ok_or_else(|| ExtractError::OcrFailed("isolated document has no page".to_string()))?;

    let current = match document.get_dictionary(page_id)?.get(b"Rotate") {
        Ok(Object::Integer(value)) => *value,
        _ => 0,
    };
    let turned = (current + i64::from(rotation)).rem_euclid(360);
    document
        .get_object_mut(page_id)?
        .as_dict_mut()?
        .set("Rotate", Object::Integer(turned));
    Ok(())
}

fn command_available(program: &str, version_arg: &str) -> bool {
    Command::new(program).arg(version_arg).output().is_ok()
}

/// Poppler's `pdftoppm`.
#[derive(Debug, Default)]
pub struct PdftoppmRenderer {
    available: OnceLock<bool>,
}

impl PageRenderer for PdftoppmRenderer {
    fn name(&self) -> &'static str {
        "pdftoppm"
    }

    fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| command_available("pdftoppm", "-v"))
    }

    fn render(
        &self,
        single_page: &Document,
        dpi: u32,
        rotation: u16,
    ) -> Result<RenderedPage, ExtractError> {
        let workspace = tempfile::tempdir()?;
        let pdf_path = workspace.path().join("page.pdf");
        let prefix = workspace.path().join("page");

        let mut rotated = single_page.clone();
        set_rotation(&mut rotated, rotation)?;
        rotated
            .save(&pdf_path)
            .map_err(|error| {
                ExtractError::OcrFailed(format!("could not write page pdf: {error}"))
            })?;

        let output = Command::new("pdftoppm")
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-singlefile")
            .arg("-png")
            .arg(&pdf_path)
            .arg(&prefix)
            .output()
            .map_err(|error| {
                ExtractError::OcrUnavailable(format!("failed to execute pdftoppm: {error}"))
            })?;

        if !output.status.success() {
            return Err(ExtractError::OcrFailed(format!(
                "pdftoppm returned non-zero exit status: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let image_path = prefix.with_extension("png");
        if !image_path.exists() {
            return Err(ExtractError::OcrFailed(format!(
                "pdftoppm did not produce {}",
                image_path.display()
            )));
        }

        Ok(RenderedPage::in_workspace(image_path, rotation, workspace))
    }
}

/// The `tesseract` CLI with the LSTM engine in uniform-block mode.
#[derive(Debug)]
pub struct TesseractRecognizer {
    language: String,
    available: OnceLock<bool>,
}

impl TesseractRecognizer {
    pub fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
            available: OnceLock::new(),
        }
    }

    fn run(&self, image_path: &Path) -> Result<String, ExtractError> {
        let output = Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("--oem")
            .arg("3")
            .arg("--psm")
            .arg("6")
            .output()
            .map_err(|error| {
                ExtractError::OcrUnavailable(format!("failed to execute tesseract: {error}"))
            })?;

        if !output.status.success() {
            return Err(ExtractError::OcrFailed(format!(
                "tesseract returned non-zero exit status for {}: {}",
                image_path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .replace('\u{0000}', "")
            .trim()
            .to_string())
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| command_available("tesseract", "--version"))
    }

    fn recognize(&self, image: &RenderedPage) -> Result<String, ExtractError> {
        self.run(&image.image_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::load_pdf;
    use crate::test_support::{build_pdf, FakeRecognizer, FakeRenderer, TestPage};

    fn candidate(rotation: u16, text: &str) -> OrientationCandidate {
        OrientationCandidate {
            rotation,
            text: text.to_string(),
        }
    }

    fn run_ocr(strategy: &OcrStrategy) -> Result<String, ExtractError> {
        let bytes = build_pdf(&[TestPage::Text(vec!["cover"]), TestPage::ImageOnly]);
        let document = load_pdf(&bytes).unwrap();
        let id = document.get_pages()[&2];
        strategy.extract(&PdfPage {
            document: &document,
            number: 2,
            id,
        })
    }

    #[test]
    fn coherent_words_outscore_noise() {
        assert_eq!(coherence_score("Concrete grade M35"), 16);
        assert_eq!(coherence_score("| ~ ' , . -- ;;"), 0);
        assert!(coherence_score("Concrete grade") > coherence_score("~~ )( Conc ||| .."));
    }

    #[test]
    fn longest_coherent_rotation_is_selected() {
        let best = select_orientation(vec![
            candidate(0, "| ~ ' , ."),
            candidate(90, "Concrete grade shall be M35 for all footings"),
            candidate(180, "ǝpɐɹƃ ~ |"),
            candidate(270, "Con ~ crete"),
        ])
        .unwrap();
        assert_eq!(best.rotation, 90);
    }

    #[test]
    fn equal_scores_prefer_the_earlier_rotation() {
        let best = select_orientation(vec![candidate(0, "abcd"), candidate(90, "wxyz")]).unwrap();
        assert_eq!(best.rotation, 0);
    }

    #[test]
    fn nothing_readable_selects_nothing() {
        assert!(select_orientation(vec![candidate(0, ""), candidate(90, "~ |")]).is_none());
    }

    #[test]
    fn strategy_returns_text_of_best_rotation() {
        let strategy = OcrStrategy::new(
            Box::new(FakeRenderer::available()),
            Box::new(FakeRecognizer::by_rotation(&[
                (0, "~~ | ,"),
                (90, "!! ||"),
                (180, "Concrete grade M35 as per drawing S-101"),
                (270, "Con | gr"),
            ])),
            OcrOptions::default(),
        );

        assert_eq!(
            run_ocr(&strategy).unwrap(),
            "Concrete grade M35 as per drawing S-101"
        );
    }

    #[test]
    fn missing_renderer_reports_unavailable() {
        let strategy = OcrStrategy::new(
            Box::new(FakeRenderer::unavailable()),
            Box::new(FakeRecognizer::by_rotation(&[(0, "text")])),
            OcrOptions::default(),
        );
        assert!(matches!(run_ocr(&strategy), Err(ExtractError::OcrUnavailable(_))));
    }

    #[test]
    fn only_configured_rotations_are_rendered() {
        let renderer = FakeRenderer::available();
        let rendered = renderer.rendered();
        let strategy = OcrStrategy::new(
            Box::new(renderer),
            Box::new(FakeRecognizer::by_rotation(&[
                (0, "upright text"),
                (180, "flipped text here"),
            ])),
            OcrOptions {
                rotations: vec![0, 180],
                ..OcrOptions::default()
            },
        );

        assert_eq!(run_ocr(&strategy).unwrap(), "flipped text here");
        assert_eq!(*rendered.lock().unwrap(), vec![0, 180]);
    }

    #[test]
    fn isolated_page_keeps_only_the_target() {
        let bytes = build_pdf(&[
            TestPage::Text(vec!["one"]),
            TestPage::Text(vec!["two"]),
            TestPage::Text(vec!["three"]),
        ]);
        let document = load_pdf(&bytes).unwrap();
        let id = document.get_pages()[&2];
        let single = isolate_page(&PdfPage {
            document: &document,
            number: 2,
            id,
        })
        .unwrap();

        let pages = single.get_pages();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages.values().next(), Some(&id));
    }

    #[test]
    fn rotation_is_added_to_existing_page_rotation() {
        let bytes = build_pdf(&[TestPage::Text(vec!["rotated"])]);
        let mut document = load_pdf(&bytes).unwrap();
        set_rotation(&mut document, 270).unwrap();
        set_rotation(&mut document, 180).unwrap();

        let id = *document.get_pages().values().next().unwrap();
        let rotate = document.get_dictionary(id).unwrap().get(b"Rotate").unwrap();
        assert_eq!(rotate, &Object::Integer(90));
    }
}
