//! Marker-based sentence chunker.
//!
//! Technical documents carry `__section__` and `__paragraph__` markers.
//! The chunker keeps only paragraph text, joins it into one blob, splits the
//! blob into sentences on the literal `". "` and regroups them into passages
//! of [`SENTENCES_PER_PASSAGE`] sentences. Sentence detection is
//! deliberately naive: abbreviations like `"e.g. "` split a sentence.

use anyhow::Result;

use crate::models::PassageRecord;

pub const SECTION_MARKER: &str = "__section__";
pub const PARAGRAPH_MARKER: &str = "__paragraph__";
pub const SENTENCE_SEPARATOR: &str = ". ";
pub const SENTENCES_PER_PASSAGE: usize = 5;

/// Extract paragraph fragments in document order.
///
/// Text in a section before its first paragraph marker (headings, titles)
/// is dropped.
pub fn extract_paragraphs(text: &str) -> Vec<&str> {
    text.split(SECTION_MARKER)
        .map(str::trim)
        .filter(|section| !section.is_empty())
        .flat_map(|section| section.split(PARAGRAPH_MARKER).skip(1))
        .map(str::trim)
        .filter(|para| !para.is_empty())
        .collect()
}

/// Split text into sentences on `". "`.
///
/// The final sentence loses its terminating period so every sentence is
/// period-free and [`chunk_text`] can re-add one uniformly. Empty fragments
/// between separators (`"A. . B."`) count as sentences; text with no
/// sentence content at all yields none.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences: Vec<&str> = text.split(SENTENCE_SEPARATOR).collect();
    if let Some(last) = sentences.pop() {
        sentences.push(last.strip_suffix('.').unwrap_or(last));
    }
    if sentences == [""] {
        sentences.clear();
    }
    sentences
}

/// Chunk marked-up document text into passages of up to five sentences.
pub fn chunk_text(text: &str) -> Vec<String> {
    let combined = extract_paragraphs(text).join(" ");
    split_sentences(&combined)
        .chunks(SENTENCES_PER_PASSAGE)
        .map(|group| format!("{}.", group.join(SENTENCE_SEPARATOR)))
        .collect()
}

/// Chunk a document and tag every passage with its metadata.
pub fn chunk_document(text: &str, metadata: &serde_json::Value) -> Result<Vec<PassageRecord>> {
    let metadata = serde_json::to_string(metadata)?;
    Ok(chunk_text(text)
        .into_iter()
        .map(|passage| PassageRecord {
            passage,
            metadata: metadata.clone(),
        })
        .collect())
}
