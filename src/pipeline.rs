//! Pipeline orchestration.
//!
//! Sequences the stages that the CLI and HTTP server share:
//!
//! ```text
//! corpus dir ──chunk──▶ passage table ──embed──▶ embedded table ──index──▶ search index
//!                                                                          │
//!                              question ──embed──▶ similarity query ◀──────┘
//!                                                        │
//!                                                  top-N passages ──▶ generator ──▶ answer
//! ```
//!
//! Every stage is synchronous from the caller's point of view and any
//! failure aborts the whole operation.

use anyhow::{Context, Result};
use std::path::Path;

use crate::corpus::chunk_corpus;
use crate::embedding::{check_dims, embed_query, EmbeddingProvider};
use crate::generate::{synthesize_answer, Generator};
use crate::index::SearchIndex;
use crate::models::{Answer, IndexedRecord, PassageRecord, SearchHit};
use crate::table;

/// Chunk a corpus directory and write the passage table. Returns the row count.
pub fn build_passage_table(corpus_dir: &Path, output: &Path) -> Result<usize> {
    let records = chunk_corpus(corpus_dir)?;
    table::write_passage_table(output, &records)?;
    tracing::info!(
        corpus = %corpus_dir.display(),
        output = %output.display(),
        passages = records.len(),
        "wrote passage table"
    );
    Ok(records.len())
}

/// Embed passages in batches, pairing each with its vector.
pub async fn embed_passages(
    embedder: &dyn EmbeddingProvider,
    records: Vec<PassageRecord>,
    batch_size: usize,
) -> Result<Vec<IndexedRecord>> {
    let mut embedded = Vec::with_capacity(records.len());
    for batch in records.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|r| r.passage.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        if vectors.len() != batch.len() {
            anyhow::bail!(
                "Embedding model '{}' returned {} vectors for {} passages",
                embedder.model_name(),
                vectors.len(),
                batch.len()
            );
        }
        for (record, vector) in batch.iter().zip(vectors) {
            check_dims(embedder, &vector)?;
            embedded.push(IndexedRecord::new(record.clone(), vector));
        }
        tracing::debug!(done = embedded.len(), total = records.len(), "embedded batch");
    }

    Ok(embedded)
}

/// Read a passage table, embed every passage, write the embedded table.
pub async fn embed_passage_table(
    embedder: &dyn EmbeddingProvider,
    input: &Path,
    output: &Path,
    batch_size: usize,
) -> Result<usize> {
    let records = table::read_passage_table(input)?;
    let embedded = embed_passages(embedder, records, batch_size).await?;
    table::write_embedded_table(output, &embedded)?;
    tracing::info!(
        model = embedder.model_name(),
        output = %output.display(),
        passages = embedded.len(),
        "wrote embedded table"
    );
    Ok(embedded.len())
}

/// Bulk-load an embedded table into `index_name`.
pub async fn index_passage_table(
    index: &dyn SearchIndex,
    input: &Path,
    index_name: &str,
) -> Result<usize> {
    let records = table::read_embedded_table(input)?;
    let written = index
        .bulk_index(index_name, &records)
        .await
        .with_context(|| format!("Failed to index {} into [{}]", input.display(), index_name))?;
    tracing::info!(index = index_name, records = written, "indexed embedded table");
    Ok(written)
}

/// Reset `index_name`, then embed and index `records` into it.
pub async fn rebuild_index(
    embedder: &dyn EmbeddingProvider,
    index: &dyn SearchIndex,
    index_name: &str,
    records: Vec<PassageRecord>,
    batch_size: usize,
) -> Result<usize> {
    let embedded = embed_passages(embedder, records, batch_size).await?;
    replace_contents(index, index_name, &embedded).await
}

/// Where [`rebuild_from_corpus`] keeps its intermediate tables.
#[derive(Debug, Clone, Copy)]
pub struct TablePaths<'a> {
    pub passages: &'a Path,
    pub embedded: &'a Path,
}

/// Row counts from [`rebuild_from_corpus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildReport {
    pub passages: usize,
    pub indexed: usize,
}

/// Chunk, embed, reset and index a corpus directory in one go.
///
/// With `tables`, the passage and embedded tables are written on the way
/// so later `embed`/`index` runs can start from them.
pub async fn rebuild_from_corpus(
    embedder: &dyn EmbeddingProvider,
    index: &dyn SearchIndex,
    index_name: &str,
    corpus_dir: &Path,
    batch_size: usize,
    tables: Option<TablePaths<'_>>,
) -> Result<RebuildReport> {
    let records = chunk_corpus(corpus_dir)?;
    let passages = records.len();
    if let Some(tables) = tables {
        table::write_passage_table(tables.passages, &records)?;
    }

    let embedded = embed_passages(embedder, records, batch_size).await?;
    if let Some(tables) = tables {
        table::write_embedded_table(tables.embedded, &embedded)?;
    }

    let indexed = replace_contents(index, index_name, &embedded).await?;
    Ok(RebuildReport { passages, indexed })
}

async fn replace_contents(
    index: &dyn SearchIndex,
    index_name: &str,
    records: &[IndexedRecord],
) -> Result<usize> {
    index.reset(index_name).await?;
    let written = index.bulk_index(index_name, records).await?;
    tracing::info!(index = index_name, records = written, "rebuilt index");
    Ok(written)
}

/// Embed `question` and return the `top_n` most similar passages.
pub async fn retrieve(
    embedder: &dyn EmbeddingProvider,
    index: &dyn SearchIndex,
    index_name: &str,
    question: &str,
    top_n: usize,
) -> Result<Vec<SearchHit>> {
    let query_vector = embed_query(embedder, question).await?;
    let hits = index.search(index_name, &query_vector, top_n).await?;
    tracing::info!(index = index_name, hits = hits.len(), "retrieved passages");
    Ok(hits)
}

/// Retrieve passages for `question` and generate an answer from them.
pub async fn answer_question(
    embedder: &dyn EmbeddingProvider,
    index: &dyn SearchIndex,
    generator: &dyn Generator,
    index_name: &str,
    question: &str,
    top_n: usize,
) -> Result<Answer> {
    let hits = retrieve(embedder, index, index_name, question, top_n).await?;
    let output = synthesize_answer(generator, &hits, question).await?;
    Ok(Answer::from_hits(&hits, output))
}

/// Write a one-row question/answer report.
///
/// Columns: `Question`, then `Passage i`, `Relevance Score i`,
/// `Passage i Metadata` for each passage, then `Generative AI Answer`.
pub fn save_answer_csv(path: &Path, question: &str, answer: &Answer) -> Result<()> {
    let mut header = vec!["Question".to_string()];
    let mut row = vec![question.to_string()];
    for (i, passage) in answer.answer.iter().enumerate() {
        let n = i + 1;
        header.push(format!("Passage {}", n));
        header.push(format!("Relevance Score {}", n));
        header.push(format!("Passage {} Metadata", n));
        row.push(passage.clone());
        row.push(answer.relevance_scores[i].to_string());
        row.push(match &answer.metadata[i] {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        });
    }
    header.push("Generative AI Answer".to_string());
    row.push(answer.gen_ai_output.clone());

    table::ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(&header)?;
    writer.write_record(&row)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::InMemoryIndex;
    use anyhow::bail;
    use async_trait::async_trait;

    /// Maps each text onto a direction picked by its first letter.
    struct LetterEmbedder;

    #[async_trait]
    impl EmbeddingProvider for LetterEmbedder {
        fn model_name(&self) -> &str {
            "letters"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| match t.chars().next() {
                    Some('A') => vec![1.0, 0.0, 0.0],
                    Some('B') => vec![0.0, 1.0, 0.0],
                    _ => vec![0.0, 0.0, 1.0],
                })
                .collect())
        }
    }

    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn generate(&self, prompt: &str) -> Result<String> {
            Ok(format!("{} chars", prompt.len()))
        }
    }

    struct BrokenGenerator;

    #[async_trait]
    impl Generator for BrokenGenerator {
        fn model_name(&self) -> &str {
            "broken"
        }
        async fn generate(&self, _prompt: &str) -> Result<String> {
            bail!("generation API unreachable")
        }
    }

    fn passages(texts: &[&str]) -> Vec<PassageRecord> {
        texts
            .iter()
            .map(|t| PassageRecord {
                passage: t.to_string(),
                metadata: format!(r#"{{"first":"{}"}}"#, &t[..1]),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_embed_passages_batches_preserve_order() {
        let records = passages(&["Apple.", "Banana.", "Cherry.", "Avocado.", "Blueberry."]);
        let embedded = embed_passages(&LetterEmbedder, records.clone(), 2).await.unwrap();
        assert_eq!(embedded.len(), 5);
        for (r, e) in records.iter().zip(embedded.iter()) {
            assert_eq!(r.passage, e.passage);
            assert_eq!(r.metadata, e.metadata);
        }
        assert_eq!(embedded[3].embedding, vec![1.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_answer_question_end_to_end() {
        let index = InMemoryIndex::new(3);
        rebuild_index(
            &LetterEmbedder,
            &index,
            "temp",
            passages(&["Apple.", "Banana.", "Cherry.", "Avocado."]),
            8,
        )
        .await
        .unwrap();

        let answer = answer_question(
            &LetterEmbedder,
            &index,
            &EchoGenerator,
            "temp",
            "A question about apples",
            3,
        )
        .await
        .unwrap();

        assert_eq!(answer.answer.len(), 3);
        assert_eq!(answer.answer[0], "Apple.");
        assert_eq!(answer.answer[1], "Avocado.");
        assert_eq!(answer.metadata[0], serde_json::json!({"first": "A"}));
        assert!((answer.relevance_scores[0] - 2.0).abs() < 1e-6);
        assert!(answer.gen_ai_output.ends_with("chars"));
    }

    #[tokio::test]
    async fn test_rebuild_replaces_previous_contents() {
        let index = InMemoryIndex::new(3);
        rebuild_index(&LetterEmbedder, &index, "temp", passages(&["Apple.", "Banana."]), 8)
            .await
            .unwrap();
        rebuild_index(&LetterEmbedder, &index, "temp", passages(&["Cherry."]), 8)
            .await
            .unwrap();
        assert_eq!(index.count("temp").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_generation_failure_is_terminal() {
        let index = InMemoryIndex::new(3);
        rebuild_index(&LetterEmbedder, &index, "temp", passages(&["Apple."]), 8)
            .await
            .unwrap();
        let err = answer_question(&LetterEmbedder, &index, &BrokenGenerator, "temp", "A?", 3)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unreachable"));
    }

    #[tokio::test]
    async fn test_table_stages_chain() {
        let tmp = tempfile::TempDir::new().unwrap();
        let corpus = tmp.path().join("corpus");
        std::fs::create_dir(&corpus).unwrap();
        std::fs::write(
            corpus.join("fruit_Technical.txt"),
            "__section__ Fruit __paragraph__ Apples are red. Bananas are yellow. \
             Cherries are small. Apricots are orange. Blackberries are dark. Avocados are green.",
        )
        .unwrap();
        std::fs::write(corpus.join("fruit_Metadata.json"), r#"{"doc":"fruit"}"#).unwrap();

        let passages_csv = tmp.path().join("passage_metadata.csv");
        let embedded_csv = tmp.path().join("passage_metadata_emb.csv");
        assert_eq!(build_passage_table(&corpus, &passages_csv).unwrap(), 2);
        assert_eq!(
            embed_passage_table(&LetterEmbedder, &passages_csv, &embedded_csv, 4)
                .await
                .unwrap(),
            2
        );

        let index = InMemoryIndex::new(3);
        index.reset("passage_metadata_emb").await.unwrap();
        assert_eq!(
            index_passage_table(&index, &embedded_csv, "passage_metadata_emb")
                .await
                .unwrap(),
            2
        );
        assert_eq!(index.count("passage_metadata_emb").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rebuild_from_corpus_replaces_index_and_writes_tables() {
        let tmp = tempfile::TempDir::new().unwrap();
        let corpus = tmp.path().join("corpus");
        std::fs::create_dir(&corpus).unwrap();
        std::fs::write(
            corpus.join("fruit_Technical.txt"),
            "__section__ Fruit __paragraph__ Apples are red. Bananas are yellow. \
             Cherries are small. Apricots are orange. Blackberries are dark. Avocados are green.",
        )
        .unwrap();
        std::fs::write(corpus.join("fruit_Metadata.json"), r#"{"doc":"fruit"}"#).unwrap();

        let index = InMemoryIndex::new(3);
        rebuild_index(&LetterEmbedder, &index, "corpus", passages(&["Stale."]), 8)
            .await
            .unwrap();

        let passages_csv = tmp.path().join("work").join("passage_metadata.csv");
        let embedded_csv = tmp.path().join("work").join("passage_metadata_emb.csv");
        let report = rebuild_from_corpus(
            &LetterEmbedder,
            &index,
            "corpus",
            &corpus,
            4,
            Some(TablePaths {
                passages: &passages_csv,
                embedded: &embedded_csv,
            }),
        )
        .await
        .unwrap();

        assert_eq!(report, RebuildReport { passages: 2, indexed: 2 });
        assert_eq!(index.count("corpus").await.unwrap(), 2);
        assert_eq!(table::read_passage_table(&passages_csv).unwrap().len(), 2);
        let embedded = table::read_embedded_table(&embedded_csv).unwrap();
        assert_eq!(embedded[0].embedding, vec![1.0, 0.0, 0.0]);

        let hits = index.search("corpus", &[1.0, 0.0, 0.0], 1).await.unwrap();
        assert!(hits[0].passage.starts_with("Apples are red."));
    }

    #[tokio::test]
    async fn test_rebuild_from_corpus_without_tables() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("memo_Technical.txt"),
            "__section__ Memo __paragraph__ Bids close Friday.",
        )
        .unwrap();
        std::fs::write(tmp.path().join("memo_Metadata.json"), "{}").unwrap();

        let index = InMemoryIndex::new(3);
        let report = rebuild_from_corpus(&LetterEmbedder, &index, "corpus", tmp.path(), 8, None)
            .await
            .unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_save_answer_csv_layout() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("reports").join("questions_answers.csv");
        let answer = Answer::from_hits(
            &[SearchHit {
                passage: "Offers, once accepted, bind.".to_string(),
                metadata: r#"{"doc":"x"}"#.to_string(),
                score: 1.5,
            }],
            "They bind.".to_string(),
        );
        save_answer_csv(&path, "What binds?", &answer).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(
            headers,
            vec![
                "Question",
                "Passage 1",
                "Relevance Score 1",
                "Passage 1 Metadata",
                "Generative AI Answer"
            ]
        );
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[1], "Offers, once accepted, bind.");
        assert_eq!(&row[2], "1.5");
        assert_eq!(&row[3], r#"{"doc":"x"}"#);
        assert_eq!(&row[4], "They bind.");
    }
}
