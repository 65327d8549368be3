//! Embedding backfill and rebuild.
//!
//! Chunks are embedded in batches; each chunk's stored text hash marks its
//! vector fresh or stale, so re-running `embed pending` after a re-ingest
//! only touches what changed. Batch failures are non-fatal: the batch stays
//! pending and the run continues.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::models::Chunk;

/// Counters from an embedding run.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbedOutcome {
    pub total: usize,
    pub embedded: u64,
    pub failed: u64,
}

struct PendingChunk {
    chunk_id: String,
    document_id: String,
    text: String,
    hash: String,
}

/// CLI: embed chunks that are missing or have stale embeddings.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    if dry_run {
        let model = embedding::create_provider(&config.embedding)?
            .model_name()
            .to_string();
        let pending = find_pending_chunks(&pool, &model, limit).await?;
        println!("embed pending (dry-run)");
        println!("  chunks needing embeddings: {}", pending.len());
        pool.close().await;
        return Ok(());
    }

    let outcome = embed_pending(config, &pool, batch_size, limit, |_, _| {}).await?;

    println!("embed pending");
    if outcome.total == 0 {
        println!("  all chunks up to date");
    } else {
        println!("  total pending: {}", outcome.total);
        println!("  embedded: {}", outcome.embedded);
        println!("  failed: {}", outcome.failed);
    }

    pool.close().await;
    Ok(())
}

/// CLI: delete all vectors and regenerate from scratch. Used when switching
/// embedding models or dimensions.
pub async fn run_embed_rebuild(config: &Config, batch_size_override: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    sqlx::query("DELETE FROM chunk_vectors")
        .execute(&pool)
        .await?;
    sqlx::query("DELETE FROM embeddings").execute(&pool).await?;

    println!("embed rebuild — cleared existing embeddings");

    let outcome = embed_pending(config, &pool, batch_size, None, |_, _| {}).await?;

    println!("embed rebuild");
    println!("  total chunks: {}", outcome.total);
    println!("  embedded: {}", outcome.embedded);
    println!("  failed: {}", outcome.failed);

    pool.close().await;
    Ok(())
}

/// Embed all pending chunks in batches. `on_progress` is called after each
/// batch with (chunks processed, total pending); the startup loader uses it
/// to publish progress.
pub async fn embed_pending(
    config: &Config,
    pool: &SqlitePool,
    batch_size: usize,
    limit: Option<usize>,
    mut on_progress: impl FnMut(usize, usize),
) -> Result<EmbedOutcome> {
    let provider = embedding::create_provider(&config.embedding)?;
    let model_name = provider.model_name().to_string();
    let dims = provider.dims();

    let pending = find_pending_chunks(pool, &model_name, limit).await?;
    let total = pending.len();
    let mut outcome = EmbedOutcome {
        total,
        ..Default::default()
    };

    let mut processed = 0usize;
    for batch in pending.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();

        match embedding::embed_texts(&config.embedding, &texts).await {
            Ok(vectors) => {
                for (item, vec) in batch.iter().zip(vectors.iter()) {
                    let blob = embedding::vec_to_blob(vec);
                    upsert_embedding(
                        pool,
                        &item.chunk_id,
                        &item.document_id,
                        &model_name,
                        dims,
                        &item.hash,
                        &blob,
                    )
                    .await?;
                    outcome.embedded += 1;
                }
            }
            Err(e) => {
                tracing::warn!("embedding batch failed: {}", e);
                outcome.failed += batch.len() as u64;
            }
        }

        processed += batch.len();
        on_progress(processed, total);
    }

    Ok(outcome)
}

/// Embed freshly written chunks during ingest. Non-fatal: on failure the
/// chunks stay pending for a later `embed pending` run. Returns
/// (embedded, pending).
pub async fn embed_chunks_inline(
    config: &Config,
    pool: &SqlitePool,
    chunks: &[Chunk],
) -> (u64, u64) {
    if !config.embedding.is_enabled() {
        return (0, 0);
    }

    let provider = match embedding::create_provider(&config.embedding) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("could not create embedding provider: {}", e);
            return (0, chunks.len() as u64);
        }
    };

    let model_name = provider.model_name().to_string();
    let dims = provider.dims();
    let mut embedded = 0u64;
    let mut pending = 0u64;

    for batch in chunks.chunks(config.embedding.batch_size.max(1)) {
        // Skip chunks whose stored vector already matches the text hash.
        let mut need_embedding = Vec::new();
        for chunk in batch {
            let existing: Option<String> =
                sqlx::query_scalar("SELECT hash FROM embeddings WHERE chunk_id = ? AND model = ?")
                    .bind(&chunk.id)
                    .bind(&model_name)
                    .fetch_optional(pool)
                    .await
                    .unwrap_or(None);

            if existing.as_deref() == Some(chunk.hash.as_str()) {
                embedded += 1;
                continue;
            }
            need_embedding.push(chunk);
        }

        if need_embedding.is_empty() {
            continue;
        }

        let texts: Vec<String> = need_embedding.iter().map(|c| c.text.clone()).collect();

        match embedding::embed_texts(&config.embedding, &texts).await {
            Ok(vectors) => {
                for (chunk, vec) in need_embedding.iter().zip(vectors.iter()) {
                    let blob = embedding::vec_to_blob(vec);
                    if let Err(e) = upsert_embedding(
                        pool,
                        &chunk.id,
                        &chunk.document_id,
                        &model_name,
                        dims,
                        &chunk.hash,
                        &blob,
                    )
                    .await
                    {
                        tracing::warn!("failed to store embedding for {}: {}", chunk.id, e);
                        pending += 1;
                    } else {
                        embedded += 1;
                    }
                }
            }
            Err(e) => {
                tracing::warn!("embedding batch failed: {}", e);
                pending += need_embedding.len() as u64;
            }
        }
    }

    (embedded, pending)
}

async fn find_pending_chunks(
    pool: &SqlitePool,
    model: &str,
    limit: Option<usize>,
) -> Result<Vec<PendingChunk>> {
    let limit_val = limit.map(|l| l as i64).unwrap_or(i64::MAX);

    let rows = sqlx::query(
        r#"
        SELECT c.id AS chunk_id, c.document_id, c.text, c.hash
        FROM chunks c
        LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.model = ?
        WHERE e.chunk_id IS NULL OR e.hash != c.hash
        ORDER BY c.document_id, c.chunk_index
        LIMIT ?
        "#,
    )
    .bind(model)
    .bind(limit_val)
    .fetch_all(pool)
    .await?;

    let results = rows
        .iter()
        .map(|row| PendingChunk {
            chunk_id: row.get("chunk_id"),
            document_id: row.get("document_id"),
            text: row.get("text"),
            hash: row.get("hash"),
        })
        .collect();

    Ok(results)
}

async fn upsert_embedding(
    pool: &SqlitePool,
    chunk_id: &str,
    document_id: &str,
    model: &str,
    dims: usize,
    hash: &str,
    blob: &[u8],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO embeddings (chunk_id, model, dims, hash, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            model = excluded.model,
            dims = excluded.dims,
            hash = excluded.hash,
            created_at = excluded.created_at
        "#,
    )
    .bind(chunk_id)
    .bind(model)
    .bind(dims as i64)
    .bind(hash)
    .bind(now)
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO chunk_vectors (chunk_id, document_id, embedding)
        VALUES (?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            document_id = excluded.document_id,
            embedding = excluded.embedding
        "#,
    )
    .bind(chunk_id)
    .bind(document_id)
    .bind(blob)
    .execute(pool)
    .await?;

    Ok(())
}
