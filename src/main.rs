//! # Query Quill CLI (`quill`)
//!
//! Offline commands for each pipeline stage plus the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! quill --config ./config/quill.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `quill chunk` | Split the corpus into five-sentence passages (`passage_metadata.csv`) |
//! | `quill embed` | Embed every passage (`passage_metadata_emb.csv`) |
//! | `quill index` | Bulk-load the embedded table into the search index |
//! | `quill reset` | Delete and recreate an index |
//! | `quill build` | `chunk` + `embed` + `reset` + `index` in one go |
//! | `quill search "<question>"` | Show the most similar passages |
//! | `quill ask "<question>"` | Retrieve passages and generate an answer |
//! | `quill serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Build the corpus index from ./docs/corpus
//! quill build --config ./config/quill.toml
//!
//! # Ask a question and keep a CSV record of the answer
//! quill ask "What makes an offer binding?" --save ./docs/questions_answers.csv
//!
//! # Serve /ask, /upload and /reset_index
//! quill serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use query_quill::{commands, config, logging, server};

/// Query Quill: retrieval-augmented answers over technical documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/quill.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "quill",
    about = "Query Quill: retrieval-augmented answers over technical documents",
    version,
    long_about = "Query Quill chunks paired text/metadata documents into passages, embeds them, \
    loads them into a vector-capable search index, and answers questions by feeding the \
    most similar passages to a text-generation model."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/quill.toml`. A missing file means all defaults.
    #[arg(long, global = true, default_value = "./config/quill.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk `<base>_Technical.txt` / `<base>_Metadata.json` pairs into a passage table.
    Chunk {
        /// Corpus directory (defaults to `[corpus].dir`).
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Output CSV (defaults to `<work_dir>/passage_metadata.csv`).
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Embed every passage of a passage table.
    Embed {
        /// Input passage table (defaults to `<work_dir>/passage_metadata.csv`).
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output CSV (defaults to `<work_dir>/passage_metadata_emb.csv`).
        #[arg(long)]
        output: Option<PathBuf>,

        /// Override the batch size from config (texts per embedding call).
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Bulk-load an embedded table into an index.
    ///
    /// Records are appended; run `quill reset` first for a clean index.
    Index {
        /// Input embedded table (defaults to `<work_dir>/passage_metadata_emb.csv`).
        #[arg(long)]
        input: Option<PathBuf>,

        /// Target index (defaults to `[index].corpus_index`).
        #[arg(long)]
        index: Option<String>,
    },

    /// Delete and recreate an index with the passage schema.
    Reset {
        /// Index to reset (defaults to `[index].upload_index`).
        #[arg(long)]
        index: Option<String>,
    },

    /// Chunk, embed, reset and index the corpus.
    Build {
        /// Corpus directory (defaults to `[corpus].dir`).
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// Override the batch size from config.
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Show the passages most similar to a question.
    Search {
        question: String,

        /// Index to query (defaults to `[index].corpus_index`).
        #[arg(long)]
        index: Option<String>,

        /// Maximum number of passages (defaults to `[retrieval].top_n`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Answer a question from the indexed passages.
    Ask {
        question: String,

        /// Index to query (defaults to `[index].corpus_index`).
        #[arg(long)]
        index: Option<String>,

        /// Write the question, passages, scores and answer to this CSV.
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Chunk { corpus, output } => {
            commands::run_chunk(&cfg, corpus, output)?;
        }
        Commands::Embed {
            input,
            output,
            batch_size,
        } => {
            commands::run_embed(&cfg, input, output, batch_size).await?;
        }
        Commands::Index { input, index } => {
            commands::run_index(&cfg, input, index).await?;
        }
        Commands::Reset { index } => {
            commands::run_reset(&cfg, index).await?;
        }
        Commands::Build { corpus, batch_size } => {
            commands::run_build(&cfg, corpus, batch_size).await?;
        }
        Commands::Search {
            question,
            index,
            limit,
        } => {
            commands::run_search(&cfg, &question, index, limit).await?;
        }
        Commands::Ask {
            question,
            index,
            save,
        } => {
            commands::run_ask(&cfg, &question, index, save).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
