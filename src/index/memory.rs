//! In-memory [`SearchIndex`] for tests and offline demos.
//!
//! Records live in a `HashMap` of index name → records behind a tokio
//! `RwLock`. Search is brute-force cosine similarity over every record,
//! scored exactly like the Elasticsearch script (`cosine + 1.0`).

use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::embedding::cosine_similarity;
use crate::models::{IndexedRecord, SearchHit};

use super::SearchIndex;

pub struct InMemoryIndex {
    dims: usize,
    indices: RwLock<HashMap<String, Vec<IndexedRecord>>>,
}

impl InMemoryIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            indices: RwLock::new(HashMap::new()),
        }
    }

    fn check_dims(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dims {
            bail!(
                "vector has {} dims, index expects {}",
                vector.len(),
                self.dims
            );
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn reset(&self, index: &str) -> Result<()> {
        let mut indices = self.indices.write().await;
        indices.insert(index.to_string(), Vec::new());
        Ok(())
    }

    async fn bulk_index(&self, index: &str, records: &[IndexedRecord]) -> Result<usize> {
        // Validate the whole batch before touching the index.
        for record in records {
            self.check_dims(&record.embedding)?;
        }
        let mut indices = self.indices.write().await;
        indices
            .entry(index.to_string())
            .or_default()
            .extend(records.iter().cloned());
        Ok(records.len())
    }

    async fn search(
        &self,
        index: &str,
        query_vector: &[f32],
        top_n: usize,
    ) -> Result<Vec<SearchHit>> {
        self.check_dims(query_vector)?;
        let indices = self.indices.read().await;
        let Some(records) = indices.get(index) else {
            bail!("no such index [{}]", index);
        };

        let mut hits: Vec<SearchHit> = records
            .iter()
            .map(|r| SearchHit {
                passage: r.passage.clone(),
                metadata: r.metadata.clone(),
                score: f64::from(cosine_similarity(query_vector, &r.embedding)) + 1.0,
            })
            .collect();

        // Stable sort keeps insertion order among equal scores.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_n);
        Ok(hits)
    }

    async fn count(&self, index: &str) -> Result<u64> {
        let indices = self.indices.read().await;
        match indices.get(index) {
            Some(records) => Ok(records.len() as u64),
            None => bail!("no such index [{}]", index),
        }
    }
}
