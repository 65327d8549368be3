//! Embedding provider abstraction and implementations.
//!
//! Question and passage texts are turned into vectors by one of:
//! - **[`DisabledProvider`]** — always errors; the default when no provider
//!   is configured.
//! - **[`OpenAiProvider`]** — any OpenAI-compatible `POST /v1/embeddings`
//!   endpoint. Reads `OPENAI_API_KEY`.
//! - **[`OllamaProvider`]** — a local Ollama instance's `POST /api/embed`.
//! - **`LocalProvider`** — in-process fastembed inference (feature
//!   `local-embeddings`); covers the multilingual-e5 family the service
//!   defaults to. Models download on first use, then run offline.
//!
//! Remote calls share one retry contract: HTTP 429 and 5xx retry with
//! exponential backoff (1s, 2s, 4s, ... capped at 32s), other 4xx fail
//! immediately, network errors retry.
//!
//! Vector utilities for the SQLite store live here too:
//! [`vec_to_blob`] / [`blob_to_vec`] (little-endian f32) and
//! [`cosine_similarity`].

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Metadata interface for embedding backends. The embedding computation
/// itself is a free async function ([`embed_texts`]) dispatched on config.
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"multilingual-e5-small"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;
}

/// Embed a batch of texts with the configured provider, in input order.
pub async fn embed_texts(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    match config.provider.as_str() {
        "openai" => embed_openai(config, texts).await,
        "ollama" => embed_ollama(config, texts).await,
        #[cfg(feature = "local-embeddings")]
        "local" => embed_local(config, texts).await,
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        "disabled" => bail!("Embedding provider is disabled"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Embed a single question for retrieval.
pub async fn embed_query(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>> {
    let results = embed_texts(config, &[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

// ============ Disabled Provider ============

/// Placeholder provider used when `embedding.provider = "disabled"`.
pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

// ============ OpenAI-compatible Provider ============

/// Embeddings via an OpenAI-compatible API.
///
/// `embedding.url` may point at any compatible server; the default is the
/// OpenAI endpoint. Requires `OPENAI_API_KEY`.
pub struct OpenAiProvider {
    model: String,
    dims: usize,
}

impl OpenAiProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for openai provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for openai provider"))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

async fn embed_openai(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;
    let base = config
        .url
        .as_deref()
        .unwrap_or("https://api.openai.com")
        .trim_end_matches('/');

    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let json = post_json_with_retry(
        &format!("{}/v1/embeddings", base),
        Some(&api_key),
        &body,
        config.timeout_secs,
        config.max_retries,
        "embeddings API",
    )
    .await?;

    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let values = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing embedding"))?;
        embeddings.push(json_floats(values));
    }

    Ok(embeddings)
}

// ============ Ollama Provider ============

/// Embeddings via a local Ollama instance (`ollama pull <model>` first).
pub struct OllamaProvider {
    model: String,
    dims: usize,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for ollama provider"))?;

        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

async fn embed_ollama(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;
    let base = config
        .url
        .as_deref()
        .unwrap_or("http://localhost:11434")
        .trim_end_matches('/');

    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let json = post_json_with_retry(
        &format!("{}/api/embed", base),
        None,
        &body,
        config.timeout_secs,
        config.max_retries,
        "Ollama embed API",
    )
    .await?;

    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let values = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?;
        result.push(json_floats(values));
    }

    Ok(result)
}

// ============ Local Provider (fastembed) ============

/// In-process embedding inference.
#[cfg(feature = "local-embeddings")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
}

#[cfg(feature = "local-embeddings")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for local provider"))?;
        let dims = match config.dims {
            Some(d) if d > 0 => d,
            _ => local_model_dims(&model_name)?,
        };
        Ok(Self { model_name, dims })
    }
}

#[cfg(feature = "local-embeddings")]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

#[cfg(feature = "local-embeddings")]
fn local_model_dims(name: &str) -> Result<usize> {
    Ok(match name {
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        "multilingual-e5-large" => 1024,
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        other => bail!(
            "Unknown local embedding model: '{}'. Supported: \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large, \
             all-minilm-l6-v2, bge-small-en-v1.5",
            other
        ),
    })
}

#[cfg(feature = "local-embeddings")]
fn local_model_id(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        other => bail!("Unknown local embedding model: '{}'", other),
    }
}

#[cfg(feature = "local-embeddings")]
async fn embed_local(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let model_name = config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;
    let model_id = local_model_id(&model_name)?;
    let batch_size = config.batch_size;
    let texts = texts.to_vec();

    // ORT inference is blocking; keep it off the async runtime.
    tokio::task::spawn_blocking(move || {
        let mut model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(model_id).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;

        model
            .embed(texts, Some(batch_size))
            .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
    })
    .await?
}

// ============ Provider factory ============

/// Create the [`EmbeddingProvider`] named by the configuration.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAiProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Box::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Shared HTTP plumbing ============

/// POST a JSON body, retrying 429/5xx/network errors with exponential
/// backoff. Non-429 client errors fail immediately.
pub(crate) async fn post_json_with_retry(
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    timeout_secs: u64,
    max_retries: u32,
    api_label: &str,
) -> Result<serde_json::Value> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?;

    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::warn!(
                "{} attempt {}/{} failed, retrying in {:?}",
                api_label,
                attempt,
                max_retries,
                delay
            );
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "{} error {}: {}",
                        api_label,
                        status,
                        body_text
                    ));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("{} error {}: {}", api_label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("{} request failed: {}", api_label, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} failed after retries", api_label)))
}

fn json_floats(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB of little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`] back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`. Empty or length-mismatched vectors
/// score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
