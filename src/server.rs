//! HTTP question-answering server.
//!
//! Every handler runs its pipeline to completion before responding. The
//! embedder, index client and generator are built once at startup and
//! shared through [`AppState`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ask` | Answer `{question}` from the corpus index |
//! | `POST` | `/upload` | Index an uploaded text/metadata pair, then answer `question` from it |
//! | `POST` | `/reset_index` | Empty the upload index |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! `/ask` and `/upload` both respond with:
//!
//! ```json
//! {
//!   "answer": ["passage 1", "passage 2", "passage 3"],
//!   "metadata": [{"doc": "a"}, {"doc": "a"}, {"doc": "b"}],
//!   "relevance_scores": [1.92, 1.87, 1.80],
//!   "gen_ai_output": "..."
//! }
//! ```
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `upstream_error` (500).

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::corpus::{load_document, SourceDocument};
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::generate::{create_generator, Generator};
use crate::index::{create_index, SearchIndex};
use crate::models::Answer;
use crate::pipeline::{answer_question, rebuild_index};

const MISSING_PARTS: &str = "Both .txt and .json files along with a query are required";
const WRONG_TYPES: &str = "Invalid file types. Please provide a .txt and a .json file";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub index: Arc<dyn SearchIndex>,
    pub generator: Arc<dyn Generator>,
}

impl AppState {
    /// Build every client named by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            config: Arc::new(config.clone()),
            embedder: create_provider(&config.embedding)?,
            index: create_index(config)?,
            generator: create_generator(&config.generation)?,
        })
    }
}

/// Assemble the router with CORS, tracing and the upload size limit.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ask", post(handle_ask))
        .route("/upload", post(handle_upload))
        .route("/reset_index", post(handle_reset_index))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(state.config.server.max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `[server].bind` and serve until the process is terminated.
pub async fn run_server(config: &Config) -> Result<()> {
    let state = AppState::from_config(config)?;
    tracing::info!(
        backend = state.index.backend(),
        embedder = state.embedder.model_name(),
        generator = state.generator.model_name(),
        "clients ready"
    );

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    println!("quill server listening on http://{}", bind_addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

/// 500 for failures of the embedder, index or generation API.
fn upstream(err: anyhow::Error) -> AppError {
    tracing::error!(error = %format!("{:#}", err), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "upstream_error".to_string(),
        message: format!("{:#}", err),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    #[serde(default)]
    question: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<Answer>, AppError> {
    let Json(request) = payload.map_err(|e| bad_request(e.body_text()))?;
    let question = request.question.trim();
    if question.is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    let answer = answer_question(
        state.embedder.as_ref(),
        state.index.as_ref(),
        state.generator.as_ref(),
        &state.config.index.corpus_index,
        question,
        state.config.retrieval.top_n,
    )
    .await
    .map_err(upstream)?;

    Ok(Json(answer))
}

// ============ POST /upload ============

struct UploadedFile {
    file_name: String,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct UploadForm {
    txt_file: Option<UploadedFile>,
    json_file: Option<UploadedFile>,
    question: Option<String>,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().unwrap_or_default().to_string();
        match name.as_str() {
            "txt_file" | "json_file" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(e.body_text()))?
                    .to_vec();
                let file = UploadedFile { file_name, bytes };
                if name == "txt_file" {
                    form.txt_file = Some(file);
                } else {
                    form.json_file = Some(file);
                }
            }
            "question" => {
                let text = field.text().await.map_err(|e| bad_request(e.body_text()))?;
                form.question = Some(text);
            }
            other => tracing::debug!(field = other, "ignoring unknown upload field"),
        }
    }
    Ok(form)
}

/// Check presence and extensions of the upload parts.
fn validate_upload(form: UploadForm) -> Result<(UploadedFile, UploadedFile, String), AppError> {
    let question = form
        .question
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty());
    let (Some(txt), Some(json), Some(question)) = (form.txt_file, form.json_file, question) else {
        return Err(bad_request(MISSING_PARTS));
    };
    if txt.file_name.is_empty() || json.file_name.is_empty() {
        return Err(bad_request(MISSING_PARTS));
    }
    if !has_extension(&txt.file_name, "txt") || !has_extension(&json.file_name, "json") {
        return Err(bad_request(WRONG_TYPES));
    }
    Ok((txt, json, question))
}

fn has_extension(file_name: &str, ext: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// Reduce a client-supplied file name to a safe single path component.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Persist an upload pair under a fresh per-request directory.
async fn save_upload(
    upload_dir: &Path,
    txt: &UploadedFile,
    json: &UploadedFile,
) -> Result<(PathBuf, SourceDocument)> {
    let dir = upload_dir.join(uuid::Uuid::new_v4().to_string());
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("Failed to create upload directory {}", dir.display()))?;
    let text_path = dir.join(sanitize_filename(&txt.file_name));
    let metadata_path = dir.join(sanitize_filename(&json.file_name));
    for (path, file) in [(&text_path, txt), (&metadata_path, json)] {
        tokio::fs::write(path, &file.bytes)
            .await
            .with_context(|| format!("Failed to save {}", path.display()))?;
    }
    let document = SourceDocument {
        base_name: txt.file_name.clone(),
        text_path,
        metadata_path,
    };
    Ok((dir, document))
}

async fn handle_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Answer>, AppError> {
    let form = read_upload_form(multipart).await?;
    let (txt, json, question) = validate_upload(form)?;

    if std::str::from_utf8(&txt.bytes).is_err() {
        return Err(bad_request(format!("{} is not valid UTF-8 text", txt.file_name)));
    }
    if let Err(e) = serde_json::from_slice::<serde::de::IgnoredAny>(&json.bytes) {
        return Err(bad_request(format!("{} is not valid JSON: {}", json.file_name, e)));
    }

    let (dir, document) = save_upload(&state.config.corpus.upload_dir, &txt, &json)
        .await
        .map_err(upstream)?;
    tracing::info!(dir = %dir.display(), "saved upload");

    let indexed = index_upload(&state, &document).await;
    // The upload index now holds everything the saved pair was needed for.
    if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
        tracing::warn!(dir = %dir.display(), error = %e, "failed to remove upload directory");
    }
    indexed.map_err(upstream)?;

    let answer = answer_question(
        state.embedder.as_ref(),
        state.index.as_ref(),
        state.generator.as_ref(),
        &state.config.index.upload_index,
        &question,
        state.config.retrieval.top_n,
    )
    .await
    .map_err(upstream)?;

    Ok(Json(answer))
}

/// Chunk a saved upload pair and rebuild the upload index from it.
async fn index_upload(state: &AppState, document: &SourceDocument) -> Result<usize> {
    let (text, metadata) = load_document(document)?;
    let records = chunk_document(&text, &metadata)?;
    rebuild_index(
        state.embedder.as_ref(),
        state.index.as_ref(),
        &state.config.index.upload_index,
        records,
        state.config.embedding.batch_size,
    )
    .await
}

// ============ POST /reset_index ============

#[derive(Serialize)]
struct ResetResponse {
    success: String,
}

async fn handle_reset_index(
    State(state): State<AppState>,
) -> Result<Json<ResetResponse>, AppError> {
    let upload_index = &state.config.index.upload_index;
    state.index.reset(upload_index).await.map_err(|e| {
        let mut err = upstream(e);
        err.message = format!("Failed to reset index. Error: {}", err.message);
        err
    })?;
    Ok(Json(ResetResponse {
        success: "Index reset successfully".to_string(),
    }))
}
