use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Directory holding the SQLite index. Created on demand.
    pub dir: PathBuf,
}

impl StoreConfig {
    pub fn db_path(&self) -> PathBuf {
        self.dir.join("korquad.sqlite")
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DatasetConfig {
    /// Path to the KorQuAD v1.0 JSON dump (e.g. `korquad_v1.0_train.json`).
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    500
}
fn default_overlap_chars() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Passages returned to the caller (and fed to the language model).
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Chunk candidates kept after similarity scoring, before document grouping.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    /// Cosine similarity floor; chunks scoring below it are discarded.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            candidate_k: default_candidate_k(),
            score_threshold: default_score_threshold(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_candidate_k() -> usize {
    40
}
fn default_score_threshold() -> f64 {
    0.6
}

#[derive(Debug, Deserialize, Clone)]
pub struct QualityConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f64,
    #[serde(default = "default_min_keyword_overlap")]
    pub min_keyword_overlap: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            relevance_threshold: default_relevance_threshold(),
            min_keyword_overlap: default_min_keyword_overlap(),
        }
    }
}

fn default_similarity_threshold() -> f64 {
    0.6
}
fn default_relevance_threshold() -> f64 {
    0.3
}
fn default_min_keyword_overlap() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override for the openai/ollama providers.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 32,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL override for the openai/ollama providers.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f64,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            url: None,
            max_tokens: default_llm_max_tokens(),
            temperature: default_llm_temperature(),
            max_retries: default_llm_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_max_tokens() -> u32 {
    256
}
fn default_llm_temperature() -> f64 {
    0.2
}
fn default_llm_max_retries() -> u32 {
    3
}
fn default_llm_timeout_secs() -> u64 {
    60
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

impl Config {
    /// Minimal in-memory configuration for paths that must run without a
    /// config file (ad-hoc tooling, tests).
    pub fn minimal() -> Self {
        let mut config = Self {
            store: StoreConfig {
                dir: PathBuf::from("./korquad_index"),
            },
            dataset: DatasetConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            quality: QualityConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            server: ServerConfig::default(),
        };
        apply_env_overrides(&mut config);
        config
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config);
    validate(&config)?;

    Ok(config)
}

/// Environment variables win over the config file. These are the knobs the
/// deployment scripts set: store directory, model identifiers, server port.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(dir) = std::env::var("KRAG_STORE_DIR") {
        if !dir.is_empty() {
            config.store.dir = PathBuf::from(dir);
        }
    }
    if let Ok(model) = std::env::var("KRAG_EMBEDDING_MODEL") {
        if !model.is_empty() {
            config.embedding.model = Some(model);
        }
    }
    if let Ok(model) = std::env::var("KRAG_LLM_MODEL") {
        if !model.is_empty() {
            config.llm.model = Some(model);
        }
    }
    if let Ok(port) = std::env::var("KRAG_PORT") {
        if let Ok(port) = port.parse::<u16>() {
            let host = config
                .server
                .bind
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            config.server.bind = format!("{}:{}", host, port);
        }
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!("chunking.overlap_chars must be < chunking.max_chars");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.candidate_k < config.retrieval.top_k {
        anyhow::bail!("retrieval.candidate_k must be >= retrieval.top_k");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.score_threshold) {
        anyhow::bail!("retrieval.score_threshold must be in [-1.0, 1.0]");
    }

    if !(0.0..=1.0).contains(&config.quality.similarity_threshold) {
        anyhow::bail!("quality.similarity_threshold must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.quality.relevance_threshold) {
        anyhow::bail!("quality.relevance_threshold must be in [0.0, 1.0]");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }
    // Remote providers cannot infer dimensionality; local models resolve it
    // from a known-model table.
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama")
        && config.embedding.dims.map(|d| d == 0).unwrap_or(true)
    {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.llm.is_enabled() && config.llm.model.is_none() {
        anyhow::bail!(
            "llm.model must be specified when provider is '{}'",
            config.llm.provider
        );
    }

    Ok(())
}
