//! Core data models used throughout Query Quill.
//!
//! These types represent the passages, indexed records, and answers that flow
//! through the chunk → embed → index → ask pipeline. Field names on the wire
//! (CSV headers and index documents) are `Passage`, `Metadata`, `Embedding`.

use serde::{Deserialize, Serialize};

/// A passage paired with its source document's metadata (JSON string).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageRecord {
    #[serde(rename = "Passage")]
    pub passage: String,
    #[serde(rename = "Metadata")]
    pub metadata: String,
}

/// A passage with its embedding, as stored in the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedRecord {
    #[serde(rename = "Passage")]
    pub passage: String,
    #[serde(rename = "Metadata")]
    pub metadata: String,
    #[serde(rename = "Embedding")]
    pub embedding: Vec<f32>,
}

impl IndexedRecord {
    pub fn new(record: PassageRecord, embedding: Vec<f32>) -> Self {
        Self {
            passage: record.passage,
            metadata: record.metadata,
            embedding,
        }
    }
}

/// A ranked passage returned by a similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub passage: String,
    pub metadata: String,
    /// Cosine similarity + 1.0, so always in `[0.0, 2.0]`.
    pub score: f64,
}

/// Response body for `/ask` and `/upload`.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    /// Retrieved passages, best first.
    pub answer: Vec<String>,
    /// Metadata of each passage, parsed back into JSON where possible.
    pub metadata: Vec<serde_json::Value>,
    pub relevance_scores: Vec<f64>,
    pub gen_ai_output: String,
}

impl Answer {
    pub fn from_hits(hits: &[SearchHit], gen_ai_output: String) -> Self {
        Self {
            answer: hits.iter().map(|h| h.passage.clone()).collect(),
            metadata: hits
                .iter()
                .map(|h| {
                    serde_json::from_str(&h.metadata)
                        .unwrap_or_else(|_| serde_json::Value::String(h.metadata.clone()))
                })
                .collect(),
            relevance_scores: hits.iter().map(|h| h.score).collect(),
            gen_ai_output,
        }
    }
}
