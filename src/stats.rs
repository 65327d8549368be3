//! Index statistics overview.
//!
//! Quick summary of what's indexed: document and chunk counts, embedding
//! coverage, and the recorded build metadata. Used by `krag stats` to
//! confirm that ingest and embedding runs did what they claimed.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::retriever;

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let info = retriever::collection_info(&pool).await?;

    let db_size = std::fs::metadata(config.store.db_path())
        .map(|m| m.len())
        .unwrap_or(0);

    println!("korquad-rag — Index Stats");
    println!("=========================");
    println!();
    println!("  Store:       {}", config.store.db_path().display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", info.documents);
    println!("  Chunks:      {}", info.chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        info.embedded_chunks,
        info.chunks,
        if info.chunks > 0 {
            (info.embedded_chunks * 100) / info.chunks
        } else {
            0
        }
    );

    if !info.index_meta.is_empty() {
        println!();
        println!("  Build metadata:");
        let mut keys: Vec<&String> = info.index_meta.keys().collect();
        keys.sort();
        for key in keys {
            let value = &info.index_meta[key];
            if key == "built_at" {
                println!("    {:<22} {}", key, format_ts_iso(value));
            } else {
                println!("    {:<22} {}", key, value);
            }
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ts_iso(value: &str) -> String {
    value
        .parse::<i64>()
        .ok()
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| value.to_string())
}
