//! Prompt assembly and citation linking. Citation fields always come from
//! retrieved chunks; model text only selects which ones.

use crate::models::{Citation, ScoredChunk};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[\s*(\d+(?:\s*,\s*\d+)*)\s*\]").unwrap_or_else(|error| {
            unreachable!("citation marker pattern is valid: {error}")
        })
    })
}

fn page_ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\[Ref:\s*Page\s*(\d+)\]").unwrap_or_else(|error| {
            unreachable!("page reference pattern is valid: {error}")
        })
    })
}

/// Context block; chunk `n` in retrieval order is labelled `[n]`.
pub fn build_context(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(index, hit)| {
            format!(
                "[{}] (Source: {}, Page: {})\n{}",
                index + 1,
                hit.chunk.source_file,
                hit.chunk.page_number,
                hit.chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "You are a precision-focused technical auditor. Answer the question using ONLY the \
numbered context passages below.\n\n\
RULES:\n\
1. Do not use outside knowledge. If the passages do not contain the answer, reply \
\"I cannot find this information in the provided documents.\"\n\
2. Follow every claim immediately with the number of the passage that supports it, \
in square brackets, for example [2] or [1, 3].\n\
3. If several passages support the answer, combine them and cite each one.\n\
4. Be professional, objective and concise.\n\n\
QUESTION: {question}\n\n\
CONTEXT:\n{context}\n"
    )
}

/// Citation ids referenced by `answer`, restricted to `1..=retrieved`.
/// Also honours `[Ref: Page X]`, resolved to the first retrieved chunk on
/// that page.
pub fn referenced_ids(answer: &str, chunks: &[ScoredChunk]) -> BTreeSet<usize> {
    let mut ids = BTreeSet::new();

    for capture in marker_pattern().captures_iter(answer) {
        let Some(list) = capture.get(1) else {
            continue;
        };
        for raw in list.as_str().split(',') {
            if let Ok(id) = raw.trim().parse::<usize>() {
                if (1..=chunks.len()).contains(&id) {
                    ids.insert(id);
                }
            }
        }
    }

    for capture in page_ref_pattern().captures_iter(answer) {
        let page = capture
            .get(1)
            .and_then(|value| value.as_str().parse::<u32>().ok());
        if let Some(page) = page {
            if let Some(position) = chunks
                .iter()
                .position(|hit| hit.chunk.page_number == page)
            {
                ids.insert(position + 1);
            }
        }
    }

    ids
}

/// Citations for the referenced chunks, or for every retrieved chunk when the
/// answer carries no usable marker.
pub fn build_citations(
    answer: &str,
    chunks: &[ScoredChunk],
    snippet_chars: usize,
) -> Vec<Citation> {
    let referenced = referenced_ids(answer, chunks);

    chunks
        .iter()
        .enumerate()
        .map(|(index, hit)| (index + 1, hit))
        .filter(|(id, _)| referenced.is_empty() || referenced.contains(id))
        .map(|(id, hit)| Citation {
            id,
            source_file: hit.chunk.source_file.clone(),
            page_number: hit.chunk.page_number,
            snippet: snippet(&hit.chunk.text, snippet_chars).to_string(),
        })
        .collect()
}

/// Leading `max_chars` characters of `text`, cut on a char boundary.
pub fn snippet(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scored;

    fn retrieved() -> Vec<ScoredChunk> {
        vec![
            scored("Spec.pdf", 5, "Use M35 concrete for foundations.", 0.9),
            scored("Spec.pdf", 7, "Cover to reinforcement shall be 50 mm.", 0.8),
            scored("Other.pdf", 2, "Curing period is 14 days.", 0.7),
        ]
    }

    #[test]
    fn context_labels_chunks_in_retrieval_order() {
        let context = build_context(&retrieved());
        assert!(context.starts_with("[1] (Source: Spec.pdf, Page: 5)\nUse M35"));
        assert!(context.contains("[3] (Source: Other.pdf, Page: 2)"));
    }

    #[test]
    fn prompt_carries_question_and_context() {
        let prompt = build_prompt("What is the concrete grade?", "[1] ...");
        assert!(prompt.contains("QUESTION: What is the concrete grade?"));
        assert!(prompt.contains("CONTEXT:\n[1] ..."));
    }

    #[test]
    fn markers_select_a_subset_in_id_order() {
        let citations =
            build_citations("Curing is 14 days [3]. Use M35 [1, 3].", &retrieved(), 250);
        let ids: Vec<_> = citations.iter().map(|citation| citation.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(citations[1].source_file, "Other.pdf");
        assert_eq!(citations[1].page_number, 2);
    }

    #[test]
    fn out_of_range_markers_are_ignored() {
        let citations = build_citations("Invented fact [9].", &retrieved(), 250);
        // no valid marker left: every retrieved chunk is cited.
        assert_eq!(citations.len(), 3);
    }

    #[test]
    fn legacy_page_references_resolve_to_chunks() {
        let citations = build_citations("Use M35 concrete [Ref: Page 5]", &retrieved(), 250);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].id, 1);
        assert_eq!(citations[0].page_number, 5);
    }

    #[test]
    fn snippet_is_a_prefix_on_char_boundaries() {
        assert_eq!(snippet("Grade M35", 5), "Grade");
        assert_eq!(snippet("short", 50), "short");
        assert_eq!(snippet("Ø 12 mm bars", 3), "Ø 1");
    }

    #[test]
    fn citation_snippets_come_from_chunk_text() {
        let chunks = retrieved();
        let citations = build_citations("Cover is 75 mm [2]", &chunks, 10);
        assert_eq!(citations[0].snippet, "Cover to r");
        assert!(chunks[1].chunk.text.contains(&citations[0].snippet));
    }
}
