//! Answer synthesis.
//!
//! Builds a grounded prompt from retrieved passages and sends it to a
//! text-generation backend. Sampling is pinned (low temperature, fixed seed)
//! so repeated questions over the same passages give stable answers.
//!
//! | Provider | Endpoint | Output |
//! |----------|----------|--------|
//! | `replicate` | `POST /v1/predictions` (+ polling) | array of text fragments |
//! | `ollama` | `POST /api/generate` | NDJSON stream of fragments |

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::GenerationConfig;
use crate::models::SearchHit;
use crate::retry::{ensure_success, send_create_with_retry, send_with_retry, RetryPolicy};

const REPLICATE_URL: &str = "https://api.replicate.com";
const OLLAMA_URL: &str = "http://localhost:11434";

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;
    /// Run one completion and return the full generated text.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Prompt instructing the model to answer only from `passages`.
pub fn build_prompt(passages: &[String], question: &str) -> String {
    format!(
        "Use the following pieces of passages to answer the question at the end.\n\
         If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\
         Use three sentences maximum and keep the answer as concise as possible.\n\
         Only answer from the passages.\n\
         Passages: {}\n\
         Question: {}\n",
        passages.join(" "),
        question
    )
}

/// Generate an answer to `question` grounded in `hits`.
pub async fn synthesize_answer(
    generator: &dyn Generator,
    hits: &[SearchHit],
    question: &str,
) -> Result<String> {
    let passages: Vec<String> = hits.iter().map(|h| h.passage.clone()).collect();
    let prompt = build_prompt(&passages, question);
    let started = Instant::now();
    let output = generator.generate(&prompt).await?;
    tracing::info!(
        model = generator.model_name(),
        passages = passages.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "generated answer"
    );
    Ok(output)
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "replicate" => Ok(Arc::new(ReplicateGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

// ============ Replicate ============

/// Hosted generation via the Replicate predictions API.
///
/// Creates a prediction with `Prefer: wait`, then polls its `urls.get`
/// until it reaches a terminal status or the configured timeout elapses.
pub struct ReplicateGenerator {
    model: String,
    version: Option<String>,
    api_token: Option<String>,
    base_url: String,
    temperature: f64,
    seed: u64,
    poll_interval: Duration,
    deadline: Duration,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl ReplicateGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let retry = config.retry_policy();
        Ok(Self {
            model: config.model.clone(),
            version: config.version.clone().filter(|v| !v.is_empty()),
            api_token: config.api_token.clone(),
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| REPLICATE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            temperature: config.temperature,
            seed: config.seed,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            deadline: Duration::from_secs(config.timeout_secs),
            client: retry.client()?,
            retry,
        })
    }

    fn token(&self) -> Result<&str> {
        self.api_token
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("REPLICATE_API_TOKEN not set"))
    }

    fn create_request(&self, prompt: &str) -> (String, Value) {
        let input = json!({
            "prompt": prompt,
            "temperature": self.temperature,
            "seed": self.seed,
        });
        match &self.version {
            Some(version) => (
                format!("{}/v1/predictions", self.base_url),
                json!({"version": version, "input": input}),
            ),
            None => (
                format!("{}/v1/models/{}/predictions", self.base_url, self.model),
                json!({"input": input}),
            ),
        }
    }
}

#[async_trait]
impl Generator for ReplicateGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let token = self.token()?;
        let (url, body) = self.create_request(prompt);

        // A replayed create would start (and bill) a second prediction.
        let response = send_create_with_retry(&self.retry, "Replicate API", || {
            self.client
                .post(&url)
                .bearer_auth(token)
                .header("Prefer", "wait")
                .json(&body)
        })
        .await?;
        let mut prediction: Value = ensure_success(response, "Replicate API")
            .await?
            .json()
            .await?;

        let started = Instant::now();
        loop {
            match prediction_status(&prediction)? {
                PredictionStatus::Succeeded => return Ok(collect_output(&prediction["output"])),
                PredictionStatus::Failed(reason) => bail!("Replicate prediction failed: {}", reason),
                PredictionStatus::Pending => {}
            }
            if started.elapsed() >= self.deadline {
                bail!(
                    "Replicate prediction timed out after {}s",
                    self.deadline.as_secs()
                );
            }

            let poll_url = prediction
                .get("urls")
                .and_then(|u| u.get("get"))
                .and_then(|u| u.as_str())
                .ok_or_else(|| anyhow::anyhow!("Replicate response missing urls.get"))?
                .to_string();
            tokio::time::sleep(self.poll_interval).await;
            let response = send_with_retry(&self.retry, "Replicate API", || {
                self.client.get(&poll_url).bearer_auth(token)
            })
            .await?;
            prediction = ensure_success(response, "Replicate API")
                .await?
                .json()
                .await?;
        }
    }
}

enum PredictionStatus {
    Pending,
    Succeeded,
    Failed(String),
}

fn prediction_status(prediction: &Value) -> Result<PredictionStatus> {
    let status = prediction
        .get("status")
        .and_then(|s| s.as_str())
        .ok_or_else(|| anyhow::anyhow!("Replicate response missing status"))?;
    Ok(match status {
        "succeeded" => PredictionStatus::Succeeded,
        "failed" | "canceled" => PredictionStatus::Failed(
            prediction
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or(status)
                .to_string(),
        ),
        _ => PredictionStatus::Pending,
    })
}

/// Concatenate a prediction's output fragments.
fn collect_output(output: &Value) -> String {
    match output {
        Value::Array(items) => items.iter().filter_map(|i| i.as_str()).collect(),
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

// ============ Ollama ============

/// Local generation via Ollama's streaming `/api/generate`.
pub struct OllamaGenerator {
    model: String,
    url: String,
    temperature: f64,
    seed: u64,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let retry = config.retry_policy();
        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            temperature: config.temperature,
            seed: config.seed,
            client: retry.client()?,
            retry,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let endpoint = format!("{}/api/generate", self.url);
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": true,
            "options": {"temperature": self.temperature, "seed": self.seed},
        });

        let response = send_with_retry(&self.retry, "Ollama API", || {
            self.client.post(&endpoint).json(&body)
        })
        .await
        .with_context(|| format!("Ollama connection error (is Ollama running at {}?)", self.url))?;
        let response = ensure_success(response, "Ollama API").await?;

        let mut stream = response.bytes_stream();
        let mut output = FragmentCollector::default();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Ollama stream interrupted")?;
            output.push(&chunk)?;
            if output.is_done() {
                break;
            }
        }
        output.finish()
    }
}

/// Accumulates `response` fragments from an NDJSON byte stream.
///
/// Byte chunks may split lines (and UTF-8 sequences) anywhere, so input is
/// buffered until a newline arrives.
#[derive(Default)]
pub struct FragmentCollector {
    pending: Vec<u8>,
    text: String,
    done: bool,
}

impl FragmentCollector {
    pub fn push(&mut self, bytes: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.consume_line(&line)?;
        }
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn finish(mut self) -> Result<String> {
        let rest = std::mem::take(&mut self.pending);
        self.consume_line(&rest)?;
        Ok(self.text)
    }

    fn consume_line(&mut self, line: &[u8]) -> Result<()> {
        let line = std::str::from_utf8(line).context("Ollama stream is not UTF-8")?;
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        let event: Value = serde_json::from_str(line)
            .with_context(|| format!("Invalid Ollama stream line: {}", line))?;
        if let Some(err) = event.get("error").and_then(|e| e.as_str()) {
            bail!("Ollama generation failed: {}", err);
        }
        if let Some(fragment) = event.get("response").and_then(|r| r.as_str()) {
            self.text.push_str(fragment);
        }
        if event.get("done").and_then(|d| d.as_bool()).unwrap_or(false) {
            self.done = true;
        }
        Ok(())
    }
}
