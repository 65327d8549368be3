//! Answer generation behind a provider abstraction.
//!
//! The language model receives the retrieved passages as a context block and
//! is instructed (in Korean) to answer only from them. Backends:
//! - **`disabled`** — always errors; the answering chain degrades to its
//!   fallback string instead of failing the request.
//! - **`openai`** — any OpenAI-compatible `POST /v1/chat/completions`
//!   endpoint. Reads `OPENAI_API_KEY`.
//! - **`ollama`** — a local Ollama instance's `POST /api/chat`
//!   (non-streaming), the usual way to serve small instruction-tuned
//!   Korean-capable models on-box.
//!
//! Remote calls share the embedding module's retry contract (backoff on
//! 429/5xx/network, fail-fast otherwise).

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::LlmConfig;
use crate::embedding::post_json_with_retry;

/// Standing instruction for the QA model. Answers must come from the
/// supplied passages; the refusal sentence doubles as the service's
/// "not in the documents" fallback so downstream validation treats both
/// paths identically.
pub const SYSTEM_PROMPT: &str = "당신은 한국어 위키피디아 문서를 근거로 질문에 답하는 \
    도우미입니다. 제공된 문서에서 확인되는 내용만 사용해 한두 문장으로 정확하게 답하세요. \
    문서에 답이 없으면 '제공된 문서에서 해당 정보를 찾을 수 없습니다.'라고 답하세요.";

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Format the user turn: numbered context block, then the question.
pub fn build_user_prompt(question: &str, context: &str) -> String {
    format!("{}\n\n질문: {}\n답변:", context, question)
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl AnswerGenerator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        bail!("LLM provider is disabled")
    }
}

// ============ OpenAI-compatible chat ============

pub struct OpenAiChat {
    model: String,
    base_url: String,
    api_key: String,
    max_tokens: u32,
    temperature: f64,
    timeout_secs: u64,
    max_retries: u32,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for openai provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base_url = config
            .url
            .as_deref()
            .unwrap_or("https://api.openai.com")
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            model,
            base_url,
            api_key,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let json = post_json_with_retry(
            &format!("{}/v1/chat/completions", self.base_url),
            Some(&self.api_key),
            &body,
            self.timeout_secs,
            self.max_retries,
            "chat completions API",
        )
        .await?;

        parse_openai_chat(&json)
    }
}

fn parse_openai_chat(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message.content"))
}

// ============ Ollama chat ============

pub struct OllamaChat {
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f64,
    timeout_secs: u64,
    max_retries: u32,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for ollama provider"))?;
        let base_url = config
            .url
            .as_deref()
            .unwrap_or("http://localhost:11434")
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            model,
            base_url,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "stream": false,
            "options": {
                "num_predict": self.max_tokens,
                "temperature": self.temperature,
            },
        });

        let json = post_json_with_retry(
            &format!("{}/api/chat", self.base_url),
            None,
            &body,
            self.timeout_secs,
            self.max_retries,
            "Ollama chat API",
        )
        .await?;

        parse_ollama_chat(&json)
    }
}

fn parse_ollama_chat(json: &serde_json::Value) -> Result<String> {
    json.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message.content"))
}

// ============ Factory ============

/// Create the [`AnswerGenerator`] named by the configuration.
pub fn create_generator(config: &LlmConfig) -> Result<Box<dyn AnswerGenerator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerator)),
        "openai" => Ok(Box::new(OpenAiChat::new(config)?)),
        "ollama" => Ok(Box::new(OllamaChat::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

/// Generate an answer for a question given a prepared context block.
pub async fn generate_answer(config: &LlmConfig, question: &str, context: &str) -> Result<String> {
    let generator = create_generator(config)?;
    let user = build_user_prompt(question, context);
    generator.complete(SYSTEM_PROMPT, &user).await
}
