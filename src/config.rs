//! TOML configuration with environment overrides.
//!
//! Every section has serde defaults, so a missing or partial file still
//! yields a usable [`Config`]. Connection secrets are usually supplied via
//! environment variables instead of the file:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `ES_HOST` | `index.host` |
//! | `ES_PORT` | `index.port` |
//! | `ES_USERNAME` | `index.username` |
//! | `ES_PASSWORD` | `index.password` |
//! | `REPLICATE_API_TOKEN` | `generation.api_token` |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Search index connection and naming.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `elasticsearch` or `memory`.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Index holding the prebuilt document corpus, queried by `/ask`.
    #[serde(default = "default_corpus_index")]
    pub corpus_index: String,
    /// Scratch index rebuilt by `/upload` and cleared by `/reset_index`.
    #[serde(default = "default_upload_index")]
    pub upload_index: String,
    #[serde(default = "default_index_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_index_max_retries")]
    pub max_retries: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            scheme: default_scheme(),
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            corpus_index: default_corpus_index(),
            upload_index: default_upload_index(),
            timeout_secs: default_index_timeout_secs(),
            max_retries: default_index_max_retries(),
        }
    }
}

impl IndexConfig {
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.timeout_secs))
    }
}

fn default_backend() -> String {
    "elasticsearch".to_string()
}
fn default_scheme() -> String {
    "https".to_string()
}
fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    9200
}
fn default_corpus_index() -> String {
    "passage_metadata_emb".to_string()
}
fn default_upload_index() -> String {
    "temp".to_string()
}
fn default_index_timeout_secs() -> u64 {
    120
}
fn default_index_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Vector width. Also used as the `dense_vector` dimension of the index.
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.timeout_secs))
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_dims() -> usize {
    768
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Answer generation settings.
#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `replicate` or `ollama`.
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    /// Pinned model version hash (Replicate only).
    #[serde(default = "default_generation_version")]
    pub version: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    /// Overrides the provider's default base URL.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            version: default_generation_version(),
            api_token: None,
            url: None,
            temperature: default_temperature(),
            seed: 0,
            timeout_secs: default_generation_timeout_secs(),
            max_retries: default_generation_max_retries(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl GenerationConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_secs(self.timeout_secs))
    }
}

fn default_generation_provider() -> String {
    "replicate".to_string()
}
fn default_generation_model() -> String {
    "meta/llama-2-70b-chat".to_string()
}
fn default_generation_version() -> Option<String> {
    Some("2c1608e18606fad2812020dc541930f2d0495ce32eee50074220b87300bc16e1".to_string())
}
fn default_temperature() -> f64 {
    0.1
}
fn default_generation_timeout_secs() -> u64 {
    120
}
fn default_generation_max_retries() -> u32 {
    3
}
fn default_poll_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of passages returned per query and fed to the prompt.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
        }
    }
}

fn default_top_n() -> usize {
    3
}

/// On-disk locations for source documents and intermediate tables.
#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_corpus_dir")]
    pub dir: PathBuf,
    /// Where `passage_metadata.csv` and `passage_metadata_emb.csv` live.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            dir: default_corpus_dir(),
            work_dir: default_work_dir(),
            upload_dir: default_upload_dir(),
        }
    }
}

impl CorpusConfig {
    pub fn passage_table(&self) -> PathBuf {
        self.work_dir.join("passage_metadata.csv")
    }

    pub fn embedded_table(&self) -> PathBuf {
        self.work_dir.join("passage_metadata_emb.csv")
    }
}

fn default_corpus_dir() -> PathBuf {
    PathBuf::from("./docs/corpus")
}
fn default_work_dir() -> PathBuf {
    PathBuf::from("./docs")
}
fn default_upload_dir() -> PathBuf {
    PathBuf::from("./docs/uploads")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}
fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

/// Load the config file (if present), apply environment overrides, validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Apply environment overrides using `lookup` as the variable source.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("ES_HOST") {
        config.index.host = host;
    }
    if let Some(port) = lookup("ES_PORT") {
        config.index.port = port
            .trim()
            .parse()
            .with_context(|| format!("ES_PORT is not a valid port: '{}'", port))?;
    }
    if let Some(username) = lookup("ES_USERNAME") {
        config.index.username = Some(username);
    }
    if let Some(password) = lookup("ES_PASSWORD") {
        config.index.password = Some(password);
    }
    if let Some(token) = lookup("REPLICATE_API_TOKEN") {
        config.generation.api_token = Some(token);
    }
    Ok(())
}

pub fn validate(config: &Config) -> Result<()> {
    if config.retrieval.top_n == 0 {
        bail!("retrieval.top_n must be >= 1");
    }

    if config.embedding.dims == 0 {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "local" | "ollama" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, local, ollama, or openai.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "ollama" | "openai")
        && config.embedding.model.is_none()
    {
        bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }

    match config.index.backend.as_str() {
        "elasticsearch" | "memory" => {}
        other => bail!(
            "Unknown index backend: '{}'. Must be elasticsearch or memory.",
            other
        ),
    }
    if config.index.corpus_index.is_empty() || config.index.upload_index.is_empty() {
        bail!("index.corpus_index and index.upload_index must not be empty");
    }

    match config.generation.provider.as_str() {
        "replicate" | "ollama" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be replicate or ollama.",
            other
        ),
    }

    Ok(())
}
