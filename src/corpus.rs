//! Corpus directory scanning.
//!
//! A corpus is a flat directory of document pairs:
//!
//! ```text
//! docs/corpus/
//!   offer_acceptance_Technical.txt
//!   offer_acceptance_Metadata.json
//!   consideration_Technical.txt
//!   consideration_Metadata.json
//! ```
//!
//! Every `<base>_Technical.txt` must have a `<base>_Metadata.json` sidecar.
//! Other files are ignored.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::chunk::chunk_document;
use crate::models::PassageRecord;

pub const TEXT_SUFFIX: &str = "_Technical.txt";
pub const METADATA_SUFFIX: &str = "_Metadata.json";

/// A text file and its metadata sidecar.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub base_name: String,
    pub text_path: PathBuf,
    pub metadata_path: PathBuf,
}

/// List document pairs in `dir`, sorted by base name.
pub fn scan_corpus(dir: &Path) -> Result<Vec<SourceDocument>> {
    if !dir.is_dir() {
        bail!("Corpus directory does not exist: {}", dir.display());
    }

    let mut docs = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        let Some(base) = file_name.strip_suffix(TEXT_SUFFIX) else {
            continue;
        };
        docs.push(SourceDocument {
            base_name: base.to_string(),
            text_path: entry.path().to_path_buf(),
            metadata_path: dir.join(format!("{}{}", base, METADATA_SUFFIX)),
        });
    }

    docs.sort_by(|a, b| a.base_name.cmp(&b.base_name));
    Ok(docs)
}

/// Read a document's text and parsed metadata.
pub fn load_document(doc: &SourceDocument) -> Result<(String, serde_json::Value)> {
    let text = std::fs::read_to_string(&doc.text_path)
        .with_context(|| format!("Failed to read {}", doc.text_path.display()))?;
    if !doc.metadata_path.exists() {
        bail!(
            "Missing metadata sidecar for {}: expected {}",
            doc.text_path.display(),
            doc.metadata_path.display()
        );
    }
    let raw = std::fs::read_to_string(&doc.metadata_path)
        .with_context(|| format!("Failed to read {}", doc.metadata_path.display()))?;
    let metadata = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid JSON in {}", doc.metadata_path.display()))?;
    Ok((text, metadata))
}

/// Chunk every document in the corpus, in base-name order.
pub fn chunk_corpus(dir: &Path) -> Result<Vec<PassageRecord>> {
    let mut records = Vec::new();
    for doc in scan_corpus(dir)? {
        let (text, metadata) = load_document(&doc)?;
        let passages = chunk_document(&text, &metadata)?;
        tracing::debug!(document = %doc.base_name, passages = passages.len(), "chunked document");
        records.extend(passages);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_pair(dir: &Path, base: &str, text: &str, meta: &str) {
        fs::write(dir.join(format!("{}{}", base, TEXT_SUFFIX)), text).unwrap();
        fs::write(dir.join(format!("{}{}", base, METADATA_SUFFIX)), meta).unwrap();
    }

    #[test]
    fn test_scan_sorted_and_filtered() {
        let tmp = TempDir::new().unwrap();
        write_pair(tmp.path(), "zeta", "", "{}");
        write_pair(tmp.path(), "alpha", "", "{}");
        fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();
        fs::create_dir(tmp.path().join("nested")).unwrap();
        write_pair(&tmp.path().join("nested"), "deep", "", "{}");

        let docs = scan_corpus(tmp.path()).unwrap();
        let names: Vec<&str> = docs.iter().map(|d| d.base_name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert!(docs[0].metadata_path.ends_with("alpha_Metadata.json"));
    }

    #[test]
    fn test_chunk_corpus_tags_each_document() {
        let tmp = TempDir::new().unwrap();
        write_pair(
            tmp.path(),
            "a",
            "__section__ __paragraph__ One. Two. Three. Four. Five. Six.",
            r#"{"doc":"a"}"#,
        );
        write_pair(
            tmp.path(),
            "b",
            "__section__ __paragraph__ Seven.",
            r#"{"doc":"b"}"#,
        );

        let records = chunk_corpus(tmp.path()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].passage, "One. Two. Three. Four. Five.");
        assert_eq!(records[0].metadata, r#"{"doc":"a"}"#);
        assert_eq!(records[1].passage, "Six.");
        assert_eq!(records[1].metadata, r#"{"doc":"a"}"#);
        assert_eq!(records[2].passage, "Seven.");
        assert_eq!(records[2].metadata, r#"{"doc":"b"}"#);
    }

    #[test]
    fn test_missing_sidecar_is_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("lonely_Technical.txt"), "text").unwrap();
        let err = chunk_corpus(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("Missing metadata sidecar"));
    }

    #[test]
    fn test_invalid_metadata_is_error() {
        let tmp = TempDir::new().unwrap();
        write_pair(tmp.path(), "bad", "__section__ __paragraph__ A.", "{not json");
        let err = chunk_corpus(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("bad_Metadata.json"));
    }

    #[test]
    fn test_missing_dir_is_error() {
        let tmp = TempDir::new().unwrap();
        assert!(scan_corpus(&tmp.path().join("nope")).is_err());
    }
}
