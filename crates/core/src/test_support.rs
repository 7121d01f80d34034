use crate::chunking::make_chunk_id;
use crate::embeddings::{CharacterNgramEmbedder, Embedder};
use crate::error::{EmbeddingError, ExtractError, GenerationError};
use crate::extractor::{PageRenderer, RenderedPage, TextRecognizer};
use crate::generation::Generator;
use crate::models::{Chunk, DedupMode, ScoredChunk};
use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) enum TestPage {
    /// One line per entry, top to bottom, on the page content stream.
    Text(Vec<&'static str>),
    /// No text operators at all, like a scanned sheet.
    ImageOnly,
    /// Rows of cells drawn inside a Form XObject.
    FormTable(Vec<Vec<&'static str>>),
}

fn text_line_operations(lines: &[&str]) -> Vec<Operation> {
    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 12.into()]),
        Operation::new("Td", vec![72.into(), 720.into()]),
    ];
    for (index, line) in lines.iter().enumerate() {
        if index > 0 {
            operations.push(Operation::new("Td", vec![0.into(), (-18).into()]));
        }
        operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
    }
    operations.push(Operation::new("ET", vec![]));
    operations
}

fn table_operations(rows: &[Vec<&str>]) -> Vec<Operation> {
    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 12.into()]),
    ];
    for (row_index, row) in rows.iter().enumerate() {
        let y = 700 - 20 * row_index as i64;
        for (column, cell) in row.iter().enumerate() {
            let x = 72 + 200 * column as i64;
            operations.push(Operation::new(
                "Tm",
                vec![1.into(), 0.into(), 0.into(), 1.into(), x.into(), y.into()],
            ));
            operations.push(Operation::new("Tj", vec![Object::string_literal(*cell)]));
        }
    }
    operations.push(Operation::new("ET", vec![]));
    operations
}

fn encode(operations: Vec<Operation>) -> Vec<u8> {
    Content { operations }.encode().expect("content encodes")
}

pub(crate) fn build_pdf(pages: &[TestPage]) -> Vec<u8> {
    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();
    let font_id = document.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut kids: Vec<Object> = Vec::new();
    for page in pages {
        let mut resources = dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        };

        let operations = match page {
            TestPage::Text(lines) => text_line_operations(lines),
            TestPage::ImageOnly => vec![
                Operation::new("q", vec![]),
                Operation::new("Q", vec![]),
            ],
            TestPage::FormTable(rows) => {
                let form = Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Form",
                        "BBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                        "Resources" => dictionary! {
                            "Font" => dictionary! { "F1" => font_id },
                        },
                    },
                    encode(table_operations(rows)),
                );
                let form_id = document.add_object(form);
                resources.set("XObject", dictionary! { "Tbl" => form_id });
                vec![
                    Operation::new("q", vec![]),
                    Operation::new("Do", vec!["Tbl".into()]),
                    Operation::new("Q", vec![]),
                ]
            }
        };

        let content_id = document.add_object(Stream::new(dictionary! {}, encode(operations)));
        let page_id = document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    document.save_to(&mut bytes).expect("pdf serializes");
    bytes
}

pub(crate) fn chunk(source_file: &str, page_number: u32, text: &str) -> Chunk {
    Chunk {
        chunk_id: make_chunk_id(source_file, page_number, text, DedupMode::Exact),
        source_file: source_file.to_string(),
        page_number,
        text: text.to_string(),
    }
}

pub(crate) fn scored(source_file: &str, page_number: u32, text: &str, score: f32) -> ScoredChunk {
    ScoredChunk {
        chunk: chunk(source_file, page_number, text),
        score,
    }
}

/// Character n-gram embeddings, except for texts containing the marker.
pub(crate) struct FlakyEmbedder {
    inner: CharacterNgramEmbedder,
    marker: &'static str,
}

impl FlakyEmbedder {
    pub(crate) fn failing_on(marker: &'static str) -> Self {
        Self {
            inner: CharacterNgramEmbedder::default(),
            marker,
        }
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    fn dimensions(&self) -> usize {
        self.inner.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.contains(self.marker) {
            return Err(EmbeddingError::Backend {
                status: 503,
                details: "scripted failure".to_string(),
            });
        }
        Ok(self.inner.embed_text(text))
    }
}

enum Script {
    Answer(String),
    Fail(fn() -> GenerationError),
    RateLimitedThen { answer: String, failures: usize },
}

pub(crate) struct ScriptedGenerator {
    script: Script,
    calls: Arc<AtomicUsize>,
}

impl ScriptedGenerator {
    fn with(script: Script) -> Self {
        Self {
            script,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn answering(answer: &str) -> Self {
        Self::with(Script::Answer(answer.to_string()))
    }

    pub(crate) fn failing(error: fn() -> GenerationError) -> Self {
        Self::with(Script::Fail(error))
    }

    pub(crate) fn rate_limited_then(answer: &str, failures: usize) -> Self {
        Self::with(Script::RateLimitedThen {
            answer: answer.to_string(),
            failures,
        })
    }

    pub(crate) fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Answer(answer) => Ok(answer.clone()),
            Script::Fail(error) => Err(error()),
            Script::RateLimitedThen { answer, failures } => {
                if call < *failures {
                    Err(GenerationError::RateLimited("quota exhausted".to_string()))
                } else {
                    Ok(answer.clone())
                }
            }
        }
    }
}

/// Records requested rotations and hands back a placeholder image.
pub(crate) struct FakeRenderer {
    available: bool,
    rendered: Arc<Mutex<Vec<u16>>>,
}

impl FakeRenderer {
    pub(crate) fn available() -> Self {
        Self {
            available: true,
            rendered: Arc::default(),
        }
    }

    pub(crate) fn unavailable() -> Self {
        Self {
            available: false,
            rendered: Arc::default(),
        }
    }

    pub(crate) fn rendered(&self) -> Arc<Mutex<Vec<u16>>> {
        Arc::clone(&self.rendered)
    }
}

impl PageRenderer for FakeRenderer {
    fn name(&self) -> &'static str {
        "fake-renderer"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn render(
        &self,
        _single_page: &Document,
        _dpi: u32,
        rotation: u16,
    ) -> Result<RenderedPage, ExtractError> {
        self.rendered.lock().expect("render log").push(rotation);
        Ok(RenderedPage::new(format!("fake-{rotation}.png"), rotation))
    }
}

/// Returns canned text per rotation; unknown rotations fail.
pub(crate) struct FakeRecognizer {
    by_rotation: HashMap<u16, String>,
}

impl FakeRecognizer {
    pub(crate) fn by_rotation(texts: &[(u16, &str)]) -> Self {
        Self {
            by_rotation: texts
                .iter()
                .map(|(rotation, text)| (*rotation, text.to_string()))
                .collect(),
        }
    }
}

impl TextRecognizer for FakeRecognizer {
    fn name(&self) -> &'static str {
        "fake-recognizer"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn recognize(&self, image: &RenderedPage) -> Result<String, ExtractError> {
        self.by_rotation
            .get(&image.rotation)
            .cloned()
            .ok_or_else(|| {
                ExtractError::OcrFailed(format!("no text scripted for {}", image.rotation))
            })
    }
}
