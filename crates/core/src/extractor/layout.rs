//! Geometry-aware strategies built on a walk of the page content stream.
//! Show-text operators become positioned fragments, which are grouped into
//! rows top-to-bottom and ordered left-to-right.

use super::{ExtractionStrategy, PdfPage, StrategyKind};
use crate::error::ExtractError;
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};

const ROW_TOLERANCE: f64 = 2.0;
const MAX_FORM_DEPTH: usize = 4;
const TJ_SPACE_THRESHOLD: f64 = -200.0;
const CELL_GAP_FONT_SIZES: f64 = 2.0;

/// Lines rebuilt from text positioning operators on the page itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct LayoutStrategy;

impl ExtractionStrategy for LayoutStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Layout
    }

    fn extract(&self, page: &PdfPage<'_>) -> Result<String, ExtractError> {
        let fragments = collect_fragments(page, false)?;
        Ok(group_rows(fragments)
            .iter()
            .map(|row| join_fragments(row))
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// Rows with two or more separated cells, rendered `a | b | c`. Also walks
/// Form XObjects, where generated PDFs often draw their tables. Yields
/// nothing unless at least two tabular rows are found.
#[derive(Debug, Default, Clone, Copy)]
pub struct TableStrategy;

impl ExtractionStrategy for TableStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Table
    }

    fn extract(&self, page: &PdfPage<'_>) -> Result<String, ExtractError> {
        let rows = group_rows(collect_fragments(page, true)?);
        let cells: Vec<Vec<String>> = rows.iter().map(|row| split_cells(row)).collect();

        if cells.iter().filter(|row| row.len() >= 2).count() < 2 {
            return Ok(String::new());
        }

        Ok(cells
            .iter()
            .map(|row| row.join(" | "))
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

#[derive(Debug, Clone)]
struct Fragment {
    x: f64,
    y: f64,
    font_size: f64,
    sequence: usize,
    text: String,
}

impl Fragment {
    fn estimated_width(&self) -> f64 {
        self.text.chars().count() as f64 * self.font_size * 0.5
    }
}

#[derive(Debug, Clone, Copy)]
struct TextState {
    line_x: f64,
    line_y: f64,
    x: f64,
    leading: f64,
    font_size: f64,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            line_x: 0.0,
            line_y: 0.0,
            x: 0.0,
            leading: 0.0,
            font_size: 12.0,
        }
    }
}

impl TextState {
    fn move_line(&mut self, tx: f64, ty: f64) {
        self.line_x += tx;
        self.line_y += ty;
        self.x = self.line_x;
    }

    fn set_line(&mut self, x: f64, y: f64) {
        self.line_x = x;
        self.line_y = y;
        self.x = x;
    }

    fn next_line(&mut self) {
        self.move_line(0.0, -self.leading);
    }
}

struct Walker<'a> {
    document: &'a Document,
    follow_forms: bool,
    fragments: Vec<Fragment>,
}

fn collect_fragments(
    page: &PdfPage<'_>,
    follow_forms: bool,
) -> Result<Vec<Fragment>, ExtractError> {
    let content = page.document.get_page_content(page.id)?;
    let mut walker = Walker {
        document: page.document,
        follow_forms,
        fragments: Vec::new(),
    };
    walker.walk(&content, page_resources(page.document, page.id), 0)?;
    Ok(walker.fragments)
}

impl<'a> Walker<'a> {
    fn walk(
        &mut self,
        content: &[u8],
        resources: Option<&'a Dictionary>,
        depth: usize,
    ) -> Result<(), ExtractError> {
        let content = Content::decode(content)?;
        let mut state = TextState::default();

        for operation in &content.operations {
            let operands = &operation.operands;
            match operation.operator.as_str() {
                "BT" => state.set_line(0.0, 0.0),
                "Tf" => {
                    if let Some(size) = operands.get(1).and_then(number) {
                        state.font_size = size.abs().max(1.0);
                    }
                }
                "TL" => {
                    if let Some(leading) = operands.first().and_then(number) {
                        state.leading = leading;
                    }
                }
                "Tm" => {
                    if let (Some(x), Some(y)) = (
                        operands.get(4).and_then(number),
                        operands.get(5).and_then(number),
                    ) {
                        state.set_line(x, y);
                    }
                }
                "Td" | "TD" => {
                    if let (Some(tx), Some(ty)) = (
                        operands.first().and_then(number),
                        operands.get(1).and_then(number),
                    ) {
                        if operation.operator == "TD" {
                            state.leading = -ty;
                        }
                        state.move_line(tx, ty);
                    }
                }
                "T*" => state.next_line(),
                "Tj" => self.show(&mut state, operands.first().map(string_text)),
                "TJ" => self.show(&mut state, operands.first().map(array_text)),
                "'" => {
                    state.next_line();
                    self.show(&mut state, operands.first().map(string_text));
                }
                "\"" => {
                    state.next_line();
                    self.show(&mut state, operands.get(2).map(string_text));
                }
                "Do" if self.follow_forms && depth < MAX_FORM_DEPTH => {
                    if let Some(Object::Name(name)) = operands.first() {
                        self.walk_form(name, resources, depth)?;
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn show(&mut self, state: &mut TextState, text: Option<String>) {
        let Some(text) = text else {
            return;
        };
        if text.trim().is_empty() {
            return;
        }
        let fragment = Fragment {
            x: state.x,
            y: state.line_y,
            font_size: state.font_size,
            sequence: self.fragments.len(),
            text,
        };
        state.x += fragment.estimated_width();
        self.fragments.push(fragment);
    }

    fn walk_form(
        &mut self,
        name: &[u8],
        resources: Option<&'a Dictionary>,
        depth: usize,
    ) -> Result<(), ExtractError> {
        let document = self.document;
        let stream = resources
            .and_then(|resources| resources.get(b"XObject").ok())
            .and_then(|xobjects| resolve_dict(document, xobjects))
            .and_then(|xobjects| xobjects.get(name).ok())
            .and_then(|object| resolve(document, object))
            .and_then(|object| object.as_stream().ok());

        let Some(stream) = stream else {
            return Ok(());
        };
        let is_form = matches!(
            stream.dict.get(b"Subtype"),
            Ok(Object::Name(subtype)) if subtype.as_slice() == b"Form"
        );
        if !is_form {
            return Ok(());
        }

        let content = stream
            .decompressed_content()
            .unwrap_or_else(|_| stream.content.clone());
        let form_resources = stream
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|object| resolve_dict(document, object))
            .or(resources);

        self.walk(&content, form_resources, depth + 1)
    }
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => document.get_object(*id).ok(),
        other => Some(other),
    }
}

fn resolve_dict<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    resolve(document, object)?.as_dict().ok()
}

/// Resources of the page, inherited from ancestors in the page tree if absent.
fn page_resources(document: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut current = document.get_dictionary(page_id).ok()?;
    for _ in 0..8 {
        if let Some(resources) = current
            .get(b"Resources")
            .ok()
            .and_then(|object| resolve_dict(document, object))
        {
            return Some(resources);
        }
        let Ok(Object::Reference(parent)) = current.get(b"Parent") else {
            return None;
        };
        current = document.get_dictionary(*parent).ok()?;
    }
    None
}

fn number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(value) => Some(*value as f64),
        Object::Real(value) => Some(f64::from(*value)),
        _ => None,
    }
}

fn string_text(object: &Object) -> String {
    match object {
        Object::String(bytes, _) => decode_pdf_string(bytes),
        _ => String::new(),
    }
}

fn array_text(object: &Object) -> String {
    let Object::Array(items) = object else {
        return String::new();
    };
    let mut text = String::new();
    for item in items {
        match item {
            Object::String(bytes, _) => text.push_str(&decode_pdf_string(bytes)),
            other => {
                if number(other).is_some_and(|adjust| adjust < TJ_SPACE_THRESHOLD) {
                    text.push(' ');
                }
            }
        }
    }
    text
}

/// UTF-16BE when BOM-prefixed, otherwise single-byte.
fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes
        .iter()
        .map(|&byte| byte as char)
        .filter(|character| !character.is_control())
        .collect()
}

fn group_rows(mut fragments: Vec<Fragment>) -> Vec<Vec<Fragment>> {
    fragments.sort_by(|left, right| {
        right
            .y
            .total_cmp(&left.y)
            .then(left.x.total_cmp(&right.x))
            .then(left.sequence.cmp(&right.sequence))
    });

    let mut rows: Vec<Vec<Fragment>> = Vec::new();
    for fragment in fragments {
        match rows.last_mut() {
            Some(row) if (row[0].y - fragment.y).abs() <= ROW_TOLERANCE => row.push(fragment),
            _ => rows.push(vec![fragment]),
        }
    }

    for row in &mut rows {
        row.sort_by(|left, right| {
            left.x
                .total_cmp(&right.x)
                .then(left.sequence.cmp(&right.sequence))
        });
    }
    rows
}

fn join_fragments(row: &[Fragment]) -> String {
    row.iter()
        .map(|fragment| fragment.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn split_cells(row: &[Fragment]) -> Vec<String> {
    let mut cells: Vec<Vec<Fragment>> = Vec::new();
    for fragment in row {
        let starts_cell = match cells.last().and_then(|cell| cell.last()) {
            Some(previous) => {
                let gap = fragment.x - (previous.x + previous.estimated_width());
                gap > previous.font_size * CELL_GAP_FONT_SIZES
            }
            None => true,
        };
        if starts_cell {
            cells.push(vec![fragment.clone()]);
        } else if let Some(cell) = cells.last_mut() {
            cell.push(fragment.clone());
        }
    }

    cells
        .iter()
        .map(|cell| join_fragments(cell))
        .filter(|cell| !cell.is_empty())
        .collect()
}
