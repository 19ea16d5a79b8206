//! Search index abstraction.
//!
//! The [`SearchIndex`] trait covers the index lifecycle, bulk ingest and
//! similarity search. Ranking is always cosine similarity between the query
//! vector and each record's `Embedding`, offset by `+1.0` so scores are
//! non-negative. Two backends implement it:
//!
//! | Backend | Type | Notes |
//! |---------|------|-------|
//! | `elasticsearch` | [`ElasticIndex`] | `script_score` query over a `dense_vector` field |
//! | `memory` | [`InMemoryIndex`] | brute force, process-local |
//!
//! Neither backend serializes a reset against concurrent queries; a query
//! that lands mid-reset may see an empty index.

pub mod elastic;
pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::Config;
use crate::models::{IndexedRecord, SearchHit};

pub use elastic::ElasticIndex;
pub use memory::InMemoryIndex;

/// Painless script used to score every document against the query vector.
pub const SIMILARITY_SCRIPT: &str = "cosineSimilarity(params.query_vector, 'Embedding') + 1.0";

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Backend name as used in config.
    fn backend(&self) -> &str;

    /// Delete the index if present, then recreate it empty with the
    /// passage schema. Idempotent.
    async fn reset(&self, index: &str) -> Result<()>;

    /// Write all records in one bulk request. Any failure fails the batch.
    async fn bulk_index(&self, index: &str, records: &[IndexedRecord]) -> Result<usize>;

    /// Return at most `top_n` records, highest score first.
    async fn search(&self, index: &str, query_vector: &[f32], top_n: usize)
        -> Result<Vec<SearchHit>>;

    /// Number of records currently in the index.
    async fn count(&self, index: &str) -> Result<u64>;
}

/// Index schema: two text fields and a `dims`-wide dense vector.
pub fn index_mapping(dims: usize) -> Value {
    json!({
        "mappings": {
            "properties": {
                "Passage": {"type": "text"},
                "Metadata": {"type": "text"},
                "Embedding": {"type": "dense_vector", "dims": dims}
            }
        }
    })
}

/// Build the `script_score` query ranking all documents by similarity.
pub fn similarity_query(query_vector: &[f32], top_n: usize) -> Value {
    json!({
        "size": top_n,
        "query": {
            "script_score": {
                "query": {"match_all": {}},
                "script": {
                    "source": SIMILARITY_SCRIPT,
                    "params": {"query_vector": query_vector}
                }
            }
        }
    })
}

/// Create the backend named by `config.index.backend`.
pub fn create_index(config: &Config) -> Result<Arc<dyn SearchIndex>> {
    match config.index.backend.as_str() {
        "elasticsearch" => Ok(Arc::new(ElasticIndex::new(
            &config.index,
            config.embedding.dims,
        )?)),
        "memory" => Ok(Arc::new(InMemoryIndex::new(config.embedding.dims))),
        other => bail!("Unknown index backend: {}", other),
    }
}
