//! Elasticsearch REST client.
//!
//! Talks to the cluster over plain HTTP(S) with optional basic auth:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | exists | `HEAD /{index}` |
//! | delete | `DELETE /{index}` |
//! | create | `PUT /{index}` with [`index_mapping`] |
//! | bulk | `POST /_bulk?refresh=true` (NDJSON) |
//! | search | `POST /{index}/_search` with [`similarity_query`] |
//! | count | `GET /{index}/_count` |

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::IndexConfig;
use crate::models::{IndexedRecord, SearchHit};
use crate::retry::{ensure_success, send_with_retry, RetryPolicy};

use super::{index_mapping, similarity_query, SearchIndex};

const SERVICE: &str = "Elasticsearch";

pub struct ElasticIndex {
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    dims: usize,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl ElasticIndex {
    pub fn new(config: &IndexConfig, dims: usize) -> Result<Self> {
        Self::with_policy(config, dims, config.retry_policy())
    }

    /// Like [`ElasticIndex::new`] with an explicit retry policy.
    pub fn with_policy(config: &IndexConfig, dims: usize, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            base_url: config.base_url(),
            username: config.username.clone(),
            password: config.password.clone(),
            dims,
            client: retry.client()?,
            retry,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}/{}", self.base_url, path));
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_ref()),
            None => builder,
        }
    }

    pub async fn exists(&self, index: &str) -> Result<bool> {
        let response =
            send_with_retry(&self.retry, SERVICE, || self.request(Method::HEAD, index)).await?;
        match response.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            other => bail!("{} error {} checking index [{}]", SERVICE, other, index),
        }
    }

    pub async fn delete(&self, index: &str) -> Result<()> {
        let response =
            send_with_retry(&self.retry, SERVICE, || self.request(Method::DELETE, index)).await?;
        ensure_success(response, SERVICE).await?;
        Ok(())
    }

    pub async fn create(&self, index: &str) -> Result<()> {
        let mapping = index_mapping(self.dims);
        let response = send_with_retry(&self.retry, SERVICE, || {
            self.request(Method::PUT, index).json(&mapping)
        })
        .await?;
        ensure_success(response, SERVICE).await?;
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for ElasticIndex {
    fn backend(&self) -> &str {
        "elasticsearch"
    }

    async fn reset(&self, index: &str) -> Result<()> {
        if self.exists(index).await? {
            self.delete(index).await?;
            tracing::info!(index, "deleted index");
        }
        self.create(index).await?;
        tracing::info!(index, dims = self.dims, "created index");
        Ok(())
    }

    async fn bulk_index(&self, index: &str, records: &[IndexedRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        // Built once so a retried request carries the same document ids and
        // overwrites whatever a failed attempt already stored.
        let body = bulk_body(index, &uuid::Uuid::new_v4().to_string(), records)?;
        let response = send_with_retry(&self.retry, SERVICE, || {
            self.request(Method::POST, "_bulk?refresh=true")
                .header("Content-Type", "application/x-ndjson")
                .body(body.clone())
        })
        .await?;
        let response = ensure_success(response, SERVICE).await?;
        let json: Value = response.json().await?;
        check_bulk_response(&json)?;
        Ok(records.len())
    }

    async fn search(
        &self,
        index: &str,
        query_vector: &[f32],
        top_n: usize,
    ) -> Result<Vec<SearchHit>> {
        let query = similarity_query(query_vector, top_n);
        let path = format!("{}/_search", index);
        let response = send_with_retry(&self.retry, SERVICE, || {
            self.request(Method::POST, &path).json(&query)
        })
        .await?;
        let response = ensure_success(response, SERVICE)
            .await
            .with_context(|| format!("search on index [{}] failed", index))?;
        let json: Value = response.json().await?;
        parse_search_response(&json)
    }

    async fn count(&self, index: &str) -> Result<u64> {
        let path = format!("{}/_count", index);
        let response =
            send_with_retry(&self.retry, SERVICE, || self.request(Method::GET, &path)).await?;
        let response = ensure_success(response, SERVICE).await?;
        let json: Value = response.json().await?;
        json.get("count")
            .and_then(|c| c.as_u64())
            .ok_or_else(|| anyhow::anyhow!("Invalid count response: {}", json))
    }
}

/// Render records as a `_bulk` NDJSON body (action line + source line each).
///
/// Document ids are `{batch}-{row}`, unique per call and stable across
/// retries of that call.
pub fn bulk_body(index: &str, batch: &str, records: &[IndexedRecord]) -> Result<String> {
    let mut body = String::new();
    for (row, record) in records.iter().enumerate() {
        let id = format!("{}-{}", batch, row);
        body.push_str(&serde_json::to_string(
            &json!({"index": {"_index": index, "_id": id}}),
        )?);
        body.push('\n');
        body.push_str(&serde_json::to_string(record)?);
        body.push('\n');
    }
    Ok(body)
}

/// Fail if any bulk item reported an error.
pub fn check_bulk_response(json: &Value) -> Result<()> {
    if !json.get("errors").and_then(|e| e.as_bool()).unwrap_or(false) {
        return Ok(());
    }
    let items = json.get("items").and_then(|i| i.as_array());
    let failed: Vec<&Value> = items
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("index"))
                .filter(|op| op.get("error").is_some())
                .collect()
        })
        .unwrap_or_default();
    let first_reason = failed
        .first()
        .and_then(|op| op["error"].get("reason"))
        .and_then(|r| r.as_str())
        .unwrap_or("unknown error");
    bail!(
        "bulk indexing failed for {} item(s): {}",
        failed.len(),
        first_reason
    );
}

#[derive(Deserialize)]
struct StoredFields {
    #[serde(rename = "Passage")]
    passage: String,
    #[serde(rename = "Metadata")]
    metadata: String,
}

/// Extract `hits.hits[]` into [`SearchHit`]s, keeping response order.
pub fn parse_search_response(json: &Value) -> Result<Vec<SearchHit>> {
    let hits = json
        .get("hits")
        .and_then(|h| h.get("hits"))
        .and_then(|h| h.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid search response: missing hits.hits"))?;

    hits.iter()
        .map(|hit| {
            let source: StoredFields = serde_json::from_value(
                hit.get("_source").cloned().unwrap_or(Value::Null),
            )
            .context("Invalid search hit: missing Passage/Metadata")?;
            let score = hit
                .get("_score")
                .and_then(|s| s.as_f64())
                .ok_or_else(|| anyhow::anyhow!("Invalid search hit: missing _score"))?;
            Ok(SearchHit {
                passage: source.passage,
                metadata: source.metadata,
                score,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_body_format() {
        let records = vec![
            IndexedRecord {
                passage: "A. B.".to_string(),
                metadata: r#"{"doc":"x"}"#.to_string(),
                embedding: vec![0.5, 1.0],
            },
            IndexedRecord {
                passage: "C.".to_string(),
                metadata: "{}".to_string(),
                embedding: vec![-0.5, 0.0],
            },
        ];
        let body = bulk_body("temp", "b1", &records).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(body.ends_with('\n'));
        assert_eq!(lines[0], r#"{"index":{"_index":"temp","_id":"b1-0"}}"#);
        assert_eq!(lines[2], r#"{"index":{"_index":"temp","_id":"b1-1"}}"#);
        let source: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(source["Passage"], "A. B.");
        assert_eq!(source["Metadata"], r#"{"doc":"x"}"#);
        assert_eq!(source["Embedding"], json!([0.5, 1.0]));
    }

    #[test]
    fn test_bulk_errors_detected() {
        let ok = json!({"errors": false, "items": []});
        check_bulk_response(&ok).unwrap();

        let failed = json!({
            "errors": true,
            "items": [
                {"index": {"status": 201}},
                {"index": {"status": 400, "error": {"type": "mapper_parsing_exception",
                    "reason": "different number of dimensions [3] than mapped [768]"}}}
            ]
        });
        let err = check_bulk_response(&failed).unwrap_err();
        assert!(err.to_string().contains("1 item(s)"));
        assert!(err.to_string().contains("number of dimensions"));
    }

    #[test]
    fn test_parse_search_response() {
        let json = json!({
            "hits": {
                "total": {"value": 2},
                "hits": [
                    {"_index": "temp", "_score": 1.93,
                     "_source": {"Passage": "Best.", "Metadata": "{\"doc\":\"a\"}", "Embedding": [1.0]}},
                    {"_index": "temp", "_score": 1.41,
                     "_source": {"Passage": "Next.", "Metadata": "{}"}}
                ]
            }
        });
        let hits = parse_search_response(&json).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].passage, "Best.");
        assert_eq!(hits[0].metadata, r#"{"doc":"a"}"#);
        assert!((hits[0].score - 1.93).abs() < 1e-9);
        assert_eq!(hits[1].passage, "Next.");
    }

    #[test]
    fn test_parse_search_response_rejects_garbage() {
        assert!(parse_search_response(&json!({"error": "boom"})).is_err());
        let missing_source = json!({"hits": {"hits": [{"_score": 1.0}]}});
        assert!(parse_search_response(&missing_source).is_err());
    }
}
