//! The retrieval-augmented answering chain.
//!
//! Ties the pipeline together for one question: over-fetch passages,
//! quality-filter, build the context block, generate, validate, and shape
//! the response the way KorQuAD shapes its records
//! (`retrieved_document_id` / `retrieved_document` / `question` / `answers`).
//!
//! Retrieval misses and language-model failures degrade to the documented
//! fallback answers; only infrastructure errors (store unreachable,
//! embeddings disabled) surface as errors to the caller.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::llm;
use crate::models::RetrievedPassage;
use crate::quality::{SearchMetrics, SearchQuality};
use crate::retriever;

pub const FALLBACK_NO_DOCUMENTS: &str = "관련 문서를 찾을 수 없습니다.";
pub const FALLBACK_NO_RELEVANT: &str = "관련성이 높은 문서를 찾을 수 없습니다.";
pub const FALLBACK_EMPTY_ANSWER: &str = "답변을 생성할 수 없습니다.";
pub const FALLBACK_NOT_IN_CONTEXT: &str = "제공된 문서에서 해당 정보를 찾을 수 없습니다.";

/// Generated answers longer than this are cut back to their first sentence.
const MAX_ANSWER_CHARS: usize = 200;

/// KorQuAD-shaped answer plus cited sources and quality metrics.
#[derive(Debug, Clone, Serialize)]
pub struct QaOutcome {
    pub retrieved_document_id: String,
    pub retrieved_document: String,
    pub question: String,
    pub answers: String,
    pub sources: Vec<SourceRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_metrics: Option<QualityMetrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub id: String,
    pub title: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityMetrics {
    pub confidence: f64,
    pub is_valid: bool,
    pub search_quality: SearchMetrics,
}

/// Answer a question against the indexed passages.
pub async fn answer_question(
    config: &Config,
    pool: &SqlitePool,
    question: &str,
    top_k: usize,
) -> Result<QaOutcome> {
    let quality = SearchQuality::new(&config.quality);

    // Over-fetch so the quality filter has candidates to discard.
    let raw = retriever::search(pool, config, question, top_k * 2, None).await?;
    if raw.is_empty() {
        return Ok(fallback_outcome(question, FALLBACK_NO_DOCUMENTS));
    }

    let mut filtered = quality.filter_results(raw, question);
    if filtered.is_empty() {
        return Ok(fallback_outcome(question, FALLBACK_NO_RELEVANT));
    }
    filtered.truncate(top_k);

    let context = build_context(&filtered);

    let generated = match llm::generate_answer(&config.llm, question, &context).await {
        Ok(answer) => answer,
        Err(e) => {
            tracing::warn!("answer generation failed: {}", e);
            FALLBACK_EMPTY_ANSWER.to_string()
        }
    };

    let best = &filtered[0];
    let answer = refine_answer(&quality, &generated, question, &best.content);
    let check = quality.validate_answer(question, &answer, &context);

    Ok(QaOutcome {
        retrieved_document_id: best.korquad_id.clone(),
        retrieved_document: best.content.clone(),
        question: question.to_string(),
        answers: answer,
        sources: filtered
            .iter()
            .map(|p| SourceRef {
                id: p.korquad_id.clone(),
                title: p.title.clone(),
                score: p.score,
            })
            .collect(),
        quality_metrics: Some(QualityMetrics {
            confidence: check.confidence,
            is_valid: check.is_valid,
            search_quality: quality.search_metrics(&filtered),
        }),
    })
}

fn fallback_outcome(question: &str, answer: &str) -> QaOutcome {
    QaOutcome {
        retrieved_document_id: "0".to_string(),
        retrieved_document: String::new(),
        question: question.to_string(),
        answers: answer.to_string(),
        sources: Vec::new(),
        quality_metrics: None,
    }
}

/// Assemble the numbered context block fed to the language model.
fn build_context(results: &[RetrievedPassage]) -> String {
    let mut parts = Vec::with_capacity(results.len());
    for (i, result) in results.iter().enumerate() {
        parts.push(format!(
            "[위키피디아 문서 {}] 제목: {} | 유사도: {:.3}\n{}\n",
            i + 1,
            result.title,
            result.score,
            result.content
        ));
    }
    parts.join("\n")
}

/// Clean up a generated answer: trim, cut run-on answers back to the first
/// sentence, and replace answers the validator cannot ground in the best
/// passage with the refusal fallback.
fn refine_answer(
    quality: &SearchQuality,
    generated: &str,
    question: &str,
    context: &str,
) -> String {
    let mut answer = generated.trim().to_string();
    if answer.is_empty() {
        return FALLBACK_EMPTY_ANSWER.to_string();
    }

    if answer.chars().count() > MAX_ANSWER_CHARS {
        if let Some(first) = answer.split('.').next() {
            let first = first.trim();
            if !first.is_empty() {
                answer = format!("{}.", first);
            }
        }
    }

    // The model's own refusal passes through untouched.
    if answer == FALLBACK_NOT_IN_CONTEXT {
        return answer;
    }

    if !quality.validate_answer(question, &answer, context).is_valid {
        return FALLBACK_NOT_IN_CONTEXT.to_string();
    }

    answer
}

/// System overview for the `/api/v1/system/info` endpoint and `krag stats`.
pub async fn system_info(config: &Config, pool: &SqlitePool) -> Result<serde_json::Value> {
    let info = retriever::collection_info(pool).await?;

    Ok(serde_json::json!({
        "retriever": info,
        "embedding": {
            "provider": config.embedding.provider,
            "model": config.embedding.model,
            "dims": config.embedding.dims,
        },
        "llm": {
            "provider": config.llm.provider,
            "model": config.llm.model,
        },
        "store_dir": config.store.dir.display().to_string(),
    }))
}

// ============ CLI entry point ============

pub async fn run_ask(config: &Config, question: &str, top_k: Option<usize>) -> Result<()> {
    let pool = db::connect(config).await?;
    let top_k = top_k.unwrap_or(config.retrieval.top_k);

    let outcome = answer_question(config, &pool, question, top_k).await?;

    println!("{}", outcome.answers);
    println!();
    if !outcome.sources.is_empty() {
        println!("--- Sources ---");
        for source in &outcome.sources {
            println!("[{:.4}] {} ({})", source.score, source.title, source.id);
        }
    }
    if let Some(ref metrics) = outcome.quality_metrics {
        println!();
        println!(
            "confidence: {:.3} (valid: {})",
            metrics.confidence, metrics.is_valid
        );
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityConfig;

    fn passage(korquad_id: &str, title: &str, content: &str, score: f64) -> RetrievedPassage {
        RetrievedPassage {
            korquad_id: korquad_id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            score,
            snippet: content.to_string(),
            chunk_index: 0,
            relevance_score: None,
            keyword_overlap: None,
        }
    }

    fn quality() -> SearchQuality {
        SearchQuality::new(&QualityConfig::default())
    }

    #[test]
    fn test_build_context_numbers_passages() {
        let results = vec![
            passage("a", "대한민국", "수도는 서울특별시이다.", 0.91),
            passage("b", "세종대왕", "훈민정음을 창제하였다.", 0.84),
        ];
        let context = build_context(&results);
        assert!(context.contains("[위키피디아 문서 1] 제목: 대한민국 | 유사도: 0.910"));
        assert!(context.contains("[위키피디아 문서 2] 제목: 세종대왕"));
        assert!(context.contains("수도는 서울특별시이다."));
    }

    #[test]
    fn test_refine_answer_empty_becomes_fallback() {
        let refined = refine_answer(&quality(), "   ", "질문", "문맥");
        assert_eq!(refined, FALLBACK_EMPTY_ANSWER);
    }

    #[test]
    fn test_refine_answer_grounded_passes_through() {
        let question = "대한민국의 수도는 어디인가? 수도는 어느 도시인가?";
        let context = "대한민국의 수도는 서울특별시이다. 수도는 한강을 끼고 있는 도시이다.";
        let answer = "대한민국의 수도는 서울특별시이다.";
        assert_eq!(refine_answer(&quality(), answer, question, context), answer);
    }

    #[test]
    fn test_refine_answer_ungrounded_becomes_refusal() {
        let question = "대한민국의 수도는 어디인가?";
        let context = "대한민국의 수도는 서울특별시이다.";
        let answer = "the capital city is definitely paris france europe";
        assert_eq!(
            refine_answer(&quality(), answer, question, context),
            FALLBACK_NOT_IN_CONTEXT
        );
    }

    #[test]
    fn test_refine_answer_truncates_long_answers() {
        let question = "대한민국의 수도는 어디인가? 수도는 어느 도시인가?";
        let context = "대한민국의 수도는 서울특별시이다. 수도는 한강을 끼고 있는 도시이다.";
        let long = format!("대한민국의 수도는 서울특별시이다. {}", "부연 설명. ".repeat(40));
        let refined = refine_answer(&quality(), &long, question, context);
        assert_eq!(refined, "대한민국의 수도는 서울특별시이다.");
    }

    #[test]
    fn test_model_refusal_passes_through() {
        let refined = refine_answer(&quality(), FALLBACK_NOT_IN_CONTEXT, "질문", "문맥 없음");
        assert_eq!(refined, FALLBACK_NOT_IN_CONTEXT);
    }

    #[test]
    fn test_fallback_outcome_shape() {
        let outcome = fallback_outcome("질문", FALLBACK_NO_DOCUMENTS);
        assert_eq!(outcome.retrieved_document_id, "0");
        assert_eq!(outcome.retrieved_document, "");
        assert_eq!(outcome.answers, FALLBACK_NO_DOCUMENTS);
        assert!(outcome.sources.is_empty());
        assert!(outcome.quality_metrics.is_none());
    }
}
