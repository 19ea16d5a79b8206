//! CSV passage tables.
//!
//! Two flat formats sit between pipeline stages:
//!
//! | File | Header |
//! |------|--------|
//! | passage table | `Passage,Metadata` |
//! | embedded table | `Passage,Metadata,Embedding` |
//!
//! The embedding column holds the textual list form produced by
//! [`format_embedding`](crate::embedding::format_embedding).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::embedding::{format_embedding, parse_embedding};
use crate::models::{IndexedRecord, PassageRecord};

#[derive(Serialize, Deserialize)]
struct EmbeddedRow {
    #[serde(rename = "Passage")]
    passage: String,
    #[serde(rename = "Metadata")]
    metadata: String,
    #[serde(rename = "Embedding")]
    embedding: String,
}

/// Create `path`'s parent directory if it is missing.
pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }
    Ok(())
}

pub fn write_passage_table(path: &Path, records: &[PassageRecord]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    if records.is_empty() {
        writer.write_record(["Passage", "Metadata"])?;
    }
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_passage_table(path: &Path) -> Result<Vec<PassageRecord>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut records = Vec::new();
    for (i, row) in reader.deserialize().enumerate() {
        let record: PassageRecord =
            row.with_context(|| format!("{}: malformed row {}", path.display(), i + 1))?;
        records.push(record);
    }
    Ok(records)
}

pub fn write_embedded_table(path: &Path, records: &[IndexedRecord]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    if records.is_empty() {
        writer.write_record(["Passage", "Metadata", "Embedding"])?;
    }
    for record in records {
        writer.serialize(EmbeddedRow {
            passage: record.passage.clone(),
            metadata: record.metadata.clone(),
            embedding: format_embedding(&record.embedding),
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Read an embedded table, parsing every embedding column.
///
/// Fails on the first malformed row; nothing is returned partially.
pub fn read_embedded_table(path: &Path) -> Result<Vec<IndexedRecord>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut records = Vec::new();
    for (i, row) in reader.deserialize().enumerate() {
        let row: EmbeddedRow =
            row.with_context(|| format!("{}: malformed row {}", path.display(), i + 1))?;
        let embedding = parse_embedding(&row.embedding).with_context(|| {
            format!("{}: bad Embedding in row {}", path.display(), i + 1)
        })?;
        records.push(IndexedRecord {
            passage: row.passage,
            metadata: row.metadata,
            embedding,
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_passage_table_survives_quoting() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out").join("passage_metadata.csv");
        let records = vec![
            PassageRecord {
                passage: "Offers, once made, may be \"revoked\".".to_string(),
                metadata: r#"{"doc":"x","tags":["a","b"]}"#.to_string(),
            },
            PassageRecord {
                passage: "Line one.\nLine two.".to_string(),
                metadata: "{}".to_string(),
            },
        ];
        write_passage_table(&path, &records).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("Passage,Metadata\n"));
        assert_eq!(read_passage_table(&path).unwrap(), records);
    }

    #[test]
    fn test_empty_table_keeps_header() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.csv");
        write_passage_table(&path, &[]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Passage,Metadata\n");
        assert!(read_passage_table(&path).unwrap().is_empty());
    }

    #[test]
    fn test_embedded_table_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("emb.csv");
        let records = vec![IndexedRecord {
            passage: "A. B.".to_string(),
            metadata: r#"{"doc":"x"}"#.to_string(),
            embedding: vec![0.125, -0.33333334, 1e-7],
        }];
        write_embedded_table(&path, &records).unwrap();
        assert_eq!(read_embedded_table(&path).unwrap(), records);
    }

    #[test]
    fn test_bad_embedding_names_row() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("emb.csv");
        std::fs::write(
            &path,
            "Passage,Metadata,Embedding\nA.,{},\"[0.1, 0.2]\"\nB.,{},\"[0.1, oops]\"\n",
        )
        .unwrap();
        let err = read_embedded_table(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("row 2"), "{:#}", err);
    }
}
