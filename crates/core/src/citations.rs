use crate::{Chunk, SourceCitation};
use std::collections::HashSet;

pub const EXCERPT_MAX_CHARS: usize = 200;
const ELLIPSIS: &str = "...";

/// Cuts `text` to at most [`EXCERPT_MAX_CHARS`] characters, marking the cut with `...`.
pub fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(EXCERPT_MAX_CHARS) {
        Some((byte_index, _)) => format!("{}{ELLIPSIS}", &trimmed[..byte_index]),
        None => trimmed.to_string(),
    }
}

impl SourceCitation {
    pub fn from_chunk(chunk: &Chunk, include_document: bool) -> Self {
        Self {
            page_number: chunk.page_number,
            text: excerpt(&chunk.content),
            chunk_id: chunk.chunk_id.clone(),
            similarity_score: Some(chunk.similarity).filter(|score| !score.is_nan()),
            bounding_box: chunk.bounding_box,
            document_id: include_document.then(|| chunk.document_id.clone()),
            document_name: include_document.then(|| chunk.display_name().to_string()),
        }
    }
}

/// Number of distinct documents among `chunks`.
pub fn document_count(chunks: &[Chunk]) -> usize {
    chunks
        .iter()
        .map(|chunk| chunk.document_id.as_str())
        .collect::<HashSet<_>>()
        .len()
}

/// Citations in ranking order. Document fields are filled only when more than one document is in scope.
pub fn build_citations(chunks: &[Chunk], documents_in_scope: usize) -> Vec<SourceCitation> {
    let include_document = documents_in_scope > 1;
    chunks
        .iter()
        .map(|chunk| SourceCitation::from_chunk(chunk, include_document))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(document_id: &str, content: &str) -> Chunk {
        Chunk {
            chunk_id: format!("{document_id}-1"),
            document_id: document_id.to_string(),
            document_name: Some(format!("{document_id}.pdf")),
            page_number: 3,
            content: content.to_string(),
            bounding_box: None,
            similarity: 0.8,
            fts_rank: None,
            score: 0.56,
            rerank_score: None,
        }
    }

    #[test]
    fn short_text_is_kept_whole() {
        assert_eq!(excerpt("  Coverage A: Dwelling  "), "Coverage A: Dwelling");
    }

    #[test]
    fn long_text_is_cut_at_two_hundred_chars() {
        let text = "a".repeat(250);
        let cut = excerpt(&text);
        assert_eq!(cut.len(), EXCERPT_MAX_CHARS + ELLIPSIS.len());
        assert!(cut.ends_with("..."));

        let exact = "b".repeat(EXCERPT_MAX_CHARS);
        assert_eq!(excerpt(&exact), exact);
    }

    #[test]
    fn multibyte_text_is_cut_on_char_boundary() {
        let text = "é".repeat(300);
        let cut = excerpt(&text);
        assert_eq!(cut.chars().count(), EXCERPT_MAX_CHARS + 3);
    }

    #[test]
    fn document_fields_only_for_multi_document_scope() {
        let chunks = vec![chunk("dec", "Deductible $1,000")];
        let single = build_citations(&chunks, 1);
        assert_eq!(single[0].document_id, None);
        assert_eq!(single[0].page_number, 3);

        let multi = build_citations(&chunks, 2);
        assert_eq!(multi[0].document_id.as_deref(), Some("dec"));
        assert_eq!(multi[0].document_name.as_deref(), Some("dec.pdf"));
    }

    #[test]
    fn counts_distinct_documents() {
        let chunks = vec![chunk("a", "x"), chunk("b", "y"), chunk("a", "z")];
        assert_eq!(document_count(&chunks), 2);
        assert_eq!(document_count(&[]), 0);
    }
}
