//! Dataset ingestion pipeline.
//!
//! Orchestrates the offline build: parse the KorQuAD dump → upsert paragraph
//! documents → chunk → embed inline (non-fatal) → record index metadata.
//! Re-ingesting is cheap: a paragraph whose content hash is unchanged keeps
//! its chunks and vectors untouched.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::chunk::{chunk_text, validate_chunk_quality};
use crate::config::Config;
use crate::dataset;
use crate::db;
use crate::embed_cmd;
use crate::models::{Chunk, Passage};

/// Result of storing one passage.
pub struct StoredPassage {
    pub chunks: Vec<Chunk>,
    /// True when the stored content hash matched and nothing was rewritten.
    pub unchanged: bool,
}

pub async fn run_ingest(
    config: &Config,
    path_override: Option<PathBuf>,
    dry_run: bool,
    limit: Option<usize>,
) -> Result<()> {
    let dataset_path = resolve_dataset_path(config, path_override)?;

    let file = dataset::load_file(&dataset_path)?;
    let stats = dataset::stats(&file);
    let mut passages = dataset::passages(&file);

    if let Some(lim) = limit {
        passages.truncate(lim);
    }

    if dry_run {
        let total_chunks: usize = passages
            .iter()
            .map(|p| {
                chunk_text(
                    "tmp",
                    &p.context,
                    config.chunking.max_chars,
                    config.chunking.overlap_chars,
                )
                .len()
            })
            .sum();
        println!("ingest {} (dry-run)", dataset_path.display());
        println!(
            "  articles: {} / paragraphs: {} / qa pairs: {}",
            stats.articles, stats.paragraphs, stats.qa_pairs
        );
        println!("  unique passages: {}", passages.len());
        println!("  estimated chunks: {}", total_chunks);
        return Ok(());
    }

    let pool = db::connect(config).await?;
    crate::migrate::apply_schema(&pool).await?;

    let mut docs_written = 0u64;
    let mut docs_unchanged = 0u64;
    let mut chunks_written = 0u64;
    let mut embeddings_written = 0u64;
    let mut embeddings_pending = 0u64;
    let mut quality_total = 0usize;
    let mut quality_short = 0usize;

    for passage in &passages {
        let stored = store_passage(config, &pool, passage).await?;

        if stored.unchanged {
            docs_unchanged += 1;
            continue;
        }

        let report = validate_chunk_quality(&stored.chunks);
        quality_total += report.total;
        quality_short += report.too_short;

        let (emb_ok, emb_pending) =
            embed_cmd::embed_chunks_inline(config, &pool, &stored.chunks).await;
        embeddings_written += emb_ok;
        embeddings_pending += emb_pending;

        docs_written += 1;
        chunks_written += stored.chunks.len() as u64;
    }

    write_index_meta(&pool, config, &dataset_path, passages.len()).await?;

    println!("ingest {}", dataset_path.display());
    println!(
        "  articles: {} / paragraphs: {} / qa pairs: {}",
        stats.articles, stats.paragraphs, stats.qa_pairs
    );
    println!("  unique passages: {}", passages.len());
    println!(
        "  documents written: {} (unchanged: {})",
        docs_written, docs_unchanged
    );
    println!("  chunks written: {}", chunks_written);
    if quality_total > 0 {
        let score = (quality_total - quality_short) as f64 / quality_total as f64 * 100.0;
        println!(
            "  chunk quality: {:.1}% (too short: {})",
            score, quality_short
        );
    }
    if config.embedding.is_enabled() {
        println!("  embeddings written: {}", embeddings_written);
        println!("  embeddings pending: {}", embeddings_pending);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

pub fn resolve_dataset_path(config: &Config, path_override: Option<PathBuf>) -> Result<PathBuf> {
    let path = match path_override {
        Some(p) => p,
        None => match &config.dataset.path {
            Some(p) => p.clone(),
            None => bail!("No dataset path. Pass --path or set [dataset] path in config."),
        },
    };

    if !path.exists() {
        bail!("Dataset file does not exist: {}", path.display());
    }

    Ok(path)
}

/// Upsert one passage and swap in its chunks. Unchanged content (same hash)
/// is left alone so existing vectors stay valid.
pub async fn store_passage(
    config: &Config,
    pool: &SqlitePool,
    passage: &Passage,
) -> Result<StoredPassage> {
    let dedup_hash = dataset::hash_context(&passage.context);

    let existing: Option<(String, String)> = sqlx::query_as(
        "SELECT id, dedup_hash FROM documents WHERE korquad_id = ?",
    )
    .bind(&passage.korquad_id)
    .fetch_optional(pool)
    .await?;

    if let Some((_, ref stored_hash)) = existing {
        if stored_hash == &dedup_hash {
            return Ok(StoredPassage {
                chunks: Vec::new(),
                unchanged: true,
            });
        }
    }

    let doc_id = existing
        .map(|(id, _)| id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO documents (id, korquad_id, title, body, char_count, qa_count, dedup_hash, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(korquad_id) DO UPDATE SET
            title = excluded.title,
            body = excluded.body,
            char_count = excluded.char_count,
            qa_count = excluded.qa_count,
            dedup_hash = excluded.dedup_hash
        "#,
    )
    .bind(&doc_id)
    .bind(&passage.korquad_id)
    .bind(&passage.title)
    .bind(&passage.context)
    .bind(passage.context.chars().count() as i64)
    .bind(passage.qa_count as i64)
    .bind(&dedup_hash)
    .bind(now)
    .execute(pool)
    .await?;

    let chunks = chunk_text(
        &doc_id,
        &passage.context,
        config.chunking.max_chars,
        config.chunking.overlap_chars,
    );
    replace_chunks(pool, &doc_id, &chunks).await?;

    Ok(StoredPassage {
        chunks,
        unchanged: false,
    })
}

/// Swap a document's chunks (and their vectors) in one transaction.
async fn replace_chunks(pool: &SqlitePool, document_id: &str, chunks: &[Chunk]) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
    )
    .bind(document_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    for chunk in chunks {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, chunk_index, text, char_start, char_end, hash)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(chunk.char_start as i64)
        .bind(chunk.char_end as i64)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Record how the index was built, for system info and staleness checks.
pub async fn write_index_meta(
    pool: &SqlitePool,
    config: &Config,
    dataset_path: &Path,
    documents: usize,
) -> Result<()> {
    let entries = [
        ("embedding_provider", config.embedding.provider.clone()),
        (
            "embedding_model",
            config.embedding.model.clone().unwrap_or_default(),
        ),
        ("chunk_max_chars", config.chunking.max_chars.to_string()),
        (
            "chunk_overlap_chars",
            config.chunking.overlap_chars.to_string(),
        ),
        (
            "score_threshold",
            config.retrieval.score_threshold.to_string(),
        ),
        ("dataset_path", dataset_path.display().to_string()),
        ("documents", documents.to_string()),
        ("built_at", chrono::Utc::now().timestamp().to_string()),
    ];

    for (key, value) in entries {
        sqlx::query(
            r#"
            INSERT INTO index_meta (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
    }

    Ok(())
}
