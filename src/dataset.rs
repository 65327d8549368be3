//! KorQuAD v1.0 dataset parsing.
//!
//! The dump is a single JSON file in SQuAD layout: articles, each with
//! paragraphs, each paragraph carrying a `context` string and its QA pairs.
//! Retrieval operates on paragraphs, so parsing flattens the tree into one
//! [`Passage`] per unique context. Duplicate contexts (the dump repeats a
//! paragraph for every annotation batch) are collapsed by content hash.

use anyhow::{Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;

use crate::models::Passage;

#[derive(Debug, Deserialize)]
pub struct KorquadFile {
    #[serde(default)]
    pub version: Option<String>,
    pub data: Vec<KorquadArticle>,
}

#[derive(Debug, Deserialize)]
pub struct KorquadArticle {
    pub title: String,
    pub paragraphs: Vec<KorquadParagraph>,
}

#[derive(Debug, Deserialize)]
pub struct KorquadParagraph {
    pub context: String,
    #[serde(default)]
    pub qas: Vec<KorquadQa>,
}

#[derive(Debug, Deserialize)]
pub struct KorquadQa {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub answers: Vec<KorquadAnswer>,
}

#[derive(Debug, Deserialize)]
pub struct KorquadAnswer {
    pub text: String,
    #[serde(default)]
    pub answer_start: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct DatasetStats {
    pub articles: usize,
    pub paragraphs: usize,
    pub qa_pairs: usize,
    pub unique_contexts: usize,
}

pub fn load_file(path: &Path) -> Result<KorquadFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dataset file: {}", path.display()))?;
    let file: KorquadFile =
        serde_json::from_str(&content).with_context(|| "Failed to parse KorQuAD JSON")?;
    Ok(file)
}

/// Flatten the article tree into unique passages.
///
/// The first QA id of a paragraph becomes its public `korquad_id`; paragraphs
/// without QA pairs fall back to a hash-derived id. Empty contexts are
/// skipped.
pub fn passages(file: &KorquadFile) -> Vec<Passage> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut result = Vec::new();

    for article in &file.data {
        for paragraph in &article.paragraphs {
            let context = paragraph.context.trim();
            if context.is_empty() {
                continue;
            }

            let hash = hash_context(context);
            if !seen.insert(hash.clone()) {
                continue;
            }

            let korquad_id = paragraph
                .qas
                .first()
                .map(|qa| qa.id.clone())
                .unwrap_or_else(|| format!("ctx-{}", &hash[..16]));

            result.push(Passage {
                korquad_id,
                title: article.title.clone(),
                context: context.to_string(),
                qa_count: paragraph.qas.len(),
            });
        }
    }

    result
}

pub fn stats(file: &KorquadFile) -> DatasetStats {
    let mut stats = DatasetStats {
        articles: file.data.len(),
        ..Default::default()
    };

    let mut seen: HashSet<String> = HashSet::new();
    for article in &file.data {
        stats.paragraphs += article.paragraphs.len();
        for paragraph in &article.paragraphs {
            stats.qa_pairs += paragraph.qas.len();
            let context = paragraph.context.trim();
            if !context.is_empty() {
                seen.insert(hash_context(context));
            }
        }
    }
    stats.unique_contexts = seen.len();

    stats
}

pub fn hash_context(context: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(context.as_bytes());
    format!("{:x}", hasher.finalize())
}
