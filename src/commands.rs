//! CLI command implementations.
//!
//! Each `run_*` function builds the clients it needs from [`Config`], runs
//! one pipeline stage, and prints a short report to stdout.

use anyhow::Result;
use std::path::PathBuf;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::generate::create_generator;
use crate::index::create_index;
use crate::models::SearchHit;
use crate::pipeline::{self, TablePaths};

/// `quill chunk`: corpus directory → passage table.
pub fn run_chunk(
    config: &Config,
    corpus_dir: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let corpus_dir = corpus_dir.unwrap_or_else(|| config.corpus.dir.clone());
    let output = output.unwrap_or_else(|| config.corpus.passage_table());

    let passages = pipeline::build_passage_table(&corpus_dir, &output)?;

    println!("chunk {}", corpus_dir.display());
    println!("  passages: {}", passages);
    println!("  written: {}", output.display());
    Ok(())
}

/// `quill embed`: passage table → embedded table.
pub async fn run_embed(
    config: &Config,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    batch_size: Option<usize>,
) -> Result<()> {
    let input = input.unwrap_or_else(|| config.corpus.passage_table());
    let output = output.unwrap_or_else(|| config.corpus.embedded_table());
    let batch_size = batch_size.unwrap_or(config.embedding.batch_size);

    let embedder = create_provider(&config.embedding)?;
    let embedded =
        pipeline::embed_passage_table(embedder.as_ref(), &input, &output, batch_size).await?;

    println!("embed {}", input.display());
    println!("  model: {} ({} dims)", embedder.model_name(), embedder.dims());
    println!("  embedded: {}", embedded);
    println!("  written: {}", output.display());
    Ok(())
}

/// `quill index`: embedded table → search index (appends).
pub async fn run_index(
    config: &Config,
    input: Option<PathBuf>,
    index_name: Option<String>,
) -> Result<()> {
    let input = input.unwrap_or_else(|| config.corpus.embedded_table());
    let index_name = index_name.unwrap_or_else(|| config.index.corpus_index.clone());

    let index = create_index(config)?;
    let written = pipeline::index_passage_table(index.as_ref(), &input, &index_name).await?;

    println!("index {}", index_name);
    println!("  records written: {}", written);
    Ok(())
}

/// `quill reset`: delete and recreate an index.
pub async fn run_reset(config: &Config, index_name: Option<String>) -> Result<()> {
    let index_name = index_name.unwrap_or_else(|| config.index.upload_index.clone());
    let index = create_index(config)?;
    index.reset(&index_name).await?;

    println!("reset {}", index_name);
    println!("ok");
    Ok(())
}

/// `quill build`: chunk, embed, reset and index the corpus, keeping both tables.
pub async fn run_build(
    config: &Config,
    corpus_dir: Option<PathBuf>,
    batch_size: Option<usize>,
) -> Result<()> {
    let corpus_dir = corpus_dir.unwrap_or_else(|| config.corpus.dir.clone());
    let passage_table = config.corpus.passage_table();
    let embedded_table = config.corpus.embedded_table();
    let batch_size = batch_size.unwrap_or(config.embedding.batch_size);
    let index_name = &config.index.corpus_index;

    let embedder = create_provider(&config.embedding)?;
    let index = create_index(config)?;

    let report = pipeline::rebuild_from_corpus(
        embedder.as_ref(),
        index.as_ref(),
        index_name,
        &corpus_dir,
        batch_size,
        Some(TablePaths {
            passages: &passage_table,
            embedded: &embedded_table,
        }),
    )
    .await?;

    println!("build {}", corpus_dir.display());
    println!("  passages: {}", report.passages);
    println!("  indexed into {}: {}", index_name, report.indexed);
    println!("  written: {}", passage_table.display());
    println!("  written: {}", embedded_table.display());
    println!("ok");
    Ok(())
}

/// `quill search`: ranked passages without generation.
pub async fn run_search(
    config: &Config,
    question: &str,
    index_name: Option<String>,
    limit: Option<usize>,
) -> Result<()> {
    let index_name = index_name.unwrap_or_else(|| config.index.corpus_index.clone());
    let top_n = limit.unwrap_or(config.retrieval.top_n);

    let embedder = create_provider(&config.embedding)?;
    let index = create_index(config)?;
    let hits =
        pipeline::retrieve(embedder.as_ref(), index.as_ref(), &index_name, question, top_n)
            .await?;

    print_hits(&hits);
    Ok(())
}

/// `quill ask`: retrieve, generate, print; optionally save a CSV report.
pub async fn run_ask(
    config: &Config,
    question: &str,
    index_name: Option<String>,
    save: Option<PathBuf>,
) -> Result<()> {
    let index_name = index_name.unwrap_or_else(|| config.index.corpus_index.clone());

    let embedder = create_provider(&config.embedding)?;
    let index = create_index(config)?;
    let generator = create_generator(&config.generation)?;
    let answer = pipeline::answer_question(
        embedder.as_ref(),
        index.as_ref(),
        generator.as_ref(),
        &index_name,
        question,
        config.retrieval.top_n,
    )
    .await?;

    println!("{}", answer.gen_ai_output.trim());
    println!();
    for (i, passage) in answer.answer.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, answer.relevance_scores[i], excerpt(passage));
        println!("    metadata: {}", answer.metadata[i]);
    }

    if let Some(path) = save {
        pipeline::save_answer_csv(&path, question, &answer)?;
        println!();
        println!("saved {}", path.display());
    }
    Ok(())
}

fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No results.");
        return;
    }
    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, hit.score, excerpt(&hit.passage));
        println!("    metadata: {}", hit.metadata);
        println!();
    }
}

fn excerpt(passage: &str) -> String {
    const MAX_CHARS: usize = 160;
    let flat = passage.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= MAX_CHARS {
        return flat.to_string();
    }
    let cut: String = flat.chars().take(MAX_CHARS).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        assert_eq!(excerpt("short\npassage"), "short passage");
        let long = "é".repeat(200);
        let cut = excerpt(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), 163);
    }

    #[test]
    fn test_run_chunk_writes_table() {
        let tmp = tempfile::TempDir::new().unwrap();
        let corpus = tmp.path().join("corpus");
        std::fs::create_dir(&corpus).unwrap();
        std::fs::write(
            corpus.join("memo_Technical.txt"),
            "__section__ Memo __paragraph__ One. Two. Three.",
        )
        .unwrap();
        std::fs::write(corpus.join("memo_Metadata.json"), r#"{"doc":"memo"}"#).unwrap();

        let output = tmp.path().join("out").join("passages.csv");
        run_chunk(&Config::default(), Some(corpus), Some(output.clone())).unwrap();
        let rows = crate::table::read_passage_table(&output).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].passage, "One. Two. Three.");
    }
}
