//! Semantic passage retrieval.
//!
//! Retrieval is a linear scan: the question is embedded, every stored chunk
//! vector is scored with cosine similarity in-process, scores below the
//! configured threshold are dropped, and the surviving chunks are grouped to
//! their parent paragraphs (max aggregation — a paragraph is as relevant as
//! its best chunk). KorQuAD fits comfortably in a scan; there is no ANN
//! index here.
//!
//! Ordering is deterministic: score desc, then `korquad_id` asc.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::models::RetrievedPassage;

/// Snippet length in characters for result previews.
const SNIPPET_CHARS: usize = 200;

/// A chunk scored against the question, before document grouping.
#[derive(Debug, Clone)]
struct ChunkHit {
    document_id: String,
    chunk_index: i64,
    text: String,
    score: f64,
}

/// Retrieve the `top_k` most similar passages for a question.
///
/// An empty question yields an empty result set. Errors if embeddings are
/// disabled, since there is nothing to score against.
pub async fn search(
    pool: &SqlitePool,
    config: &Config,
    question: &str,
    top_k: usize,
    threshold_override: Option<f64>,
) -> Result<Vec<RetrievedPassage>> {
    if question.trim().is_empty() {
        return Ok(Vec::new());
    }

    if !config.embedding.is_enabled() {
        bail!("Semantic search requires embeddings. Set [embedding] provider in config.");
    }

    let threshold = threshold_override.unwrap_or(config.retrieval.score_threshold);
    let query_vec = embedding::embed_query(&config.embedding, question).await?;

    let rows = sqlx::query(
        r#"
        SELECT cv.document_id, cv.embedding, c.chunk_index, c.text
        FROM chunk_vectors cv
        JOIN chunks c ON c.id = cv.chunk_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let hits: Vec<ChunkHit> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vec = embedding::blob_to_vec(&blob);
            ChunkHit {
                document_id: row.get("document_id"),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
                score: embedding::cosine_similarity(&query_vec, &vec) as f64,
            }
        })
        .collect();

    let candidates = select_candidates(hits, threshold, config.retrieval.candidate_k);
    let best_per_doc = best_chunk_per_document(candidates);

    let mut results = Vec::with_capacity(best_per_doc.len());
    for (document_id, hit) in best_per_doc {
        let doc_row = sqlx::query("SELECT korquad_id, title, body FROM documents WHERE id = ?")
            .bind(&document_id)
            .fetch_optional(pool)
            .await?;

        if let Some(row) = doc_row {
            results.push(RetrievedPassage {
                korquad_id: row.get("korquad_id"),
                title: row.get("title"),
                content: row.get("body"),
                score: round_score(hit.score),
                snippet: make_snippet(&hit.text),
                chunk_index: hit.chunk_index,
                relevance_score: None,
                keyword_overlap: None,
            });
        }
    }

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.korquad_id.cmp(&b.korquad_id))
    });
    results.truncate(top_k);

    Ok(results)
}

/// Threshold, rank, and cap the scored chunks.
fn select_candidates(mut hits: Vec<ChunkHit>, threshold: f64, candidate_k: usize) -> Vec<ChunkHit> {
    hits.retain(|h| h.score >= threshold);
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(candidate_k);
    hits
}

/// Keep each document's best-scoring chunk.
fn best_chunk_per_document(candidates: Vec<ChunkHit>) -> HashMap<String, ChunkHit> {
    let mut best: HashMap<String, ChunkHit> = HashMap::new();
    for hit in candidates {
        match best.get(&hit.document_id) {
            Some(existing) if existing.score >= hit.score => {}
            _ => {
                best.insert(hit.document_id.clone(), hit);
            }
        }
    }
    best
}

fn round_score(score: f64) -> f64 {
    (score * 10000.0).round() / 10000.0
}

fn make_snippet(text: &str) -> String {
    let count = text.chars().count();
    if count <= SNIPPET_CHARS {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(SNIPPET_CHARS).collect();
        format!("{}...", truncated)
    }
}

// ============ Collection info ============

/// What's in the store, for `krag stats`, system info, and loading status.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub documents: i64,
    pub chunks: i64,
    pub embedded_chunks: i64,
    pub index_meta: HashMap<String, String>,
}

pub async fn collection_info(pool: &SqlitePool) -> Result<CollectionInfo> {
    let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await?;
    let embedded_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(pool)
        .await?;

    let meta_rows = sqlx::query("SELECT key, value FROM index_meta")
        .fetch_all(pool)
        .await?;
    let index_meta: HashMap<String, String> = meta_rows
        .iter()
        .map(|row| (row.get("key"), row.get("value")))
        .collect();

    Ok(CollectionInfo {
        documents,
        chunks,
        embedded_chunks,
        index_meta,
    })
}

// ============ CLI entry point ============

pub async fn run_search(
    config: &Config,
    question: &str,
    top_k: Option<usize>,
    threshold: Option<f64>,
) -> Result<()> {
    if question.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let top_k = top_k.unwrap_or(config.retrieval.top_k);
    let results = search(&pool, config, question, top_k, threshold).await?;

    if results.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, result.score, result.title);
        println!("    id: {}", result.korquad_id);
        println!("    chunk: {}", result.chunk_index);
        println!(
            "    excerpt: \"{}\"",
            result.snippet.replace('\n', " ").trim()
        );
        println!();
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(doc: &str, index: i64, score: f64) -> ChunkHit {
        ChunkHit {
            document_id: doc.to_string(),
            chunk_index: index,
            text: format!("chunk {} of {}", index, doc),
            score,
        }
    }

    #[test]
    fn test_select_candidates_applies_threshold() {
        let hits = vec![hit("d1", 0, 0.9), hit("d1", 1, 0.5), hit("d2", 0, 0.61)];
        let selected = select_candidates(hits, 0.6, 10);
        assert_eq!(selected.len(), 2);
        assert!(selected.iter().all(|h| h.score >= 0.6));
    }

    #[test]
    fn test_select_candidates_sorted_and_capped() {
        let hits = vec![
            hit("d1", 0, 0.7),
            hit("d2", 0, 0.95),
            hit("d3", 0, 0.8),
            hit("d4", 0, 0.9),
        ];
        let selected = select_candidates(hits, 0.0, 3);
        assert_eq!(selected.len(), 3);
        assert!((selected[0].score - 0.95).abs() < 1e-9);
        assert!(selected[0].score >= selected[1].score);
        assert!(selected[1].score >= selected[2].score);
    }

    #[test]
    fn test_best_chunk_per_document_keeps_max() {
        let candidates = vec![hit("d1", 0, 0.7), hit("d1", 3, 0.92), hit("d2", 1, 0.8)];
        let best = best_chunk_per_document(candidates);
        assert_eq!(best.len(), 2);
        assert_eq!(best["d1"].chunk_index, 3);
        assert!((best["d1"].score - 0.92).abs() < 1e-9);
    }

    #[test]
    fn test_round_score() {
        assert!((round_score(0.123456) - 0.1235).abs() < 1e-9);
        assert!((round_score(0.9) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_make_snippet_short_text_unchanged() {
        assert_eq!(make_snippet("짧은 본문"), "짧은 본문");
    }

    #[test]
    fn test_make_snippet_truncates_on_char_boundary() {
        let text = "가".repeat(300);
        let snippet = make_snippet(&text);
        assert!(snippet.ends_with("..."));
        assert_eq!(snippet.chars().count(), SNIPPET_CHARS + 3);
    }
}
