use crate::error::IngestError;
use crate::models::{Chunk, DedupMode, IngestionOptions, Page};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub dedup: DedupMode,
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
            dedup: value.dedup,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Packs words into windows of at most `max_chars` characters. Each window
/// after the first restarts with the trailing words of its predecessor, up to
/// `overlap_chars` characters.
pub fn split_into_windows(normalized: &str, config: ChunkingConfig) -> Vec<String> {
    let mut pieces: Vec<String> = Vec::new();
    for word in normalized.split_whitespace() {
        let chars: Vec<char> = word.chars().collect();
        if chars.len() <= config.max_chars {
            pieces.push(word.to_string());
        } else {
            pieces.extend(
                chars
                    .chunks(config.max_chars)
                    .map(|slice| slice.iter().collect::<String>()),
            );
        }
    }

    let lengths: Vec<usize> = pieces.iter().map(|piece| piece.chars().count()).collect();
    let mut windows = Vec::new();
    let mut start = 0;

    while start < pieces.len() {
        let mut end = start;
        let mut used = 0;
        while end < pieces.len() {
            let separator = usize::from(end > start);
            if end > start && used + separator + lengths[end] > config.max_chars {
                break;
            }
            used += separator + lengths[end];
            end += 1;
        }

        windows.push(pieces[start..end].join(" "));
        if end == pieces.len() {
            break;
        }

        let mut next = end;
        let mut overlap = 0;
        while next > start + 1 {
            let cost = lengths[next - 1] + 1;
            if overlap + cost > config.overlap_chars {
                break;
            }
            overlap += cost;
            next -= 1;
        }
        // Overlap that leaves no room for the next piece would repeat a
        // window already emitted.
        if next < end && overlap + lengths[end] > config.max_chars {
            next = end;
        }
        start = next;
    }

    windows
}

/// Splits one page into chunks. Empty pages produce no chunks.
pub fn chunk_page(
    page: &Page,
    source_file: &str,
    options: &IngestionOptions,
) -> Result<Vec<Chunk>, IngestError> {
    let config = ChunkingConfig::from(options);
    config.validate()?;

    let normalized = normalize_whitespace(&page.raw_text);
    if normalized.is_empty() {
        return Ok(Vec::new());
    }

    Ok(split_into_windows(&normalized, config)
        .into_iter()
        .map(|text| Chunk {
            chunk_id: make_chunk_id(source_file, page.page_number, &text, config.dedup),
            source_file: source_file.to_string(),
            page_number: page.page_number,
            text,
        })
        .collect())
}

pub fn make_chunk_id(source_file: &str, page_number: u32, text: &str, mode: DedupMode) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_file.as_bytes());
    hasher.update([0u8]);
    hasher.update(page_number.to_le_bytes());
    match mode {
        DedupMode::Exact => hasher.update(text.as_bytes()),
        DedupMode::Normalized => hasher.update(dedup_key(text).as_bytes()),
    }
    format!("{:x}", hasher.finalize())
}

fn dedup_key(text: &str) -> String {
    text.to_lowercase()
        .split(|character: char| !character.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
