//! Search-result quality filtering and answer validation.
//!
//! Vector similarity alone ranks Korean passages poorly when a question
//! shares surface vocabulary with an unrelated paragraph. This module layers
//! lexical checks on top of the cosine scores: keyword overlap after
//! josa/stopword removal, a weighted relevance score, and post-generation
//! answer validation. Thresholds come from `[quality]` in the config.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::config::QualityConfig;
use crate::models::RetrievedPassage;

/// Korean particles, demonstratives, and light verbs that carry no retrieval
/// signal. Standalone tokens only; suffixed forms are left to the length
/// filter.
const STOPWORDS: &[&str] = &[
    "이", "가", "을", "를", "에", "의", "와", "과", "은", "는", "도", "로", "으로", "에서",
    "에게", "한테", "부터", "까지", "처럼", "같이", "만", "조차", "마저", "그", "저", "그것",
    "이것", "저것", "그런", "이런", "저런", "하다", "되다", "있다", "없다", "같다", "이다",
    "아니다",
];

/// Aggregate quality metrics over a filtered result set. Serialized into the
/// `quality_metrics.search_quality` field of QA responses.
#[derive(Debug, Clone, Serialize)]
pub struct SearchMetrics {
    pub total_results: usize,
    pub avg_similarity_score: f64,
    pub avg_relevance_score: f64,
    pub min_similarity_score: f64,
    pub max_similarity_score: f64,
    pub high_quality_results: usize,
    pub quality_ratio: f64,
}

/// Outcome of validating a generated answer against its context.
#[derive(Debug, Clone)]
pub struct AnswerCheck {
    pub is_valid: bool,
    pub confidence: f64,
    pub context_relevance: f64,
    pub answer_context_match: f64,
    pub qa_relevance: f64,
}

#[derive(Debug, Clone)]
pub struct SearchQuality {
    similarity_threshold: f64,
    relevance_threshold: f64,
    min_keyword_overlap: usize,
}

impl SearchQuality {
    pub fn new(config: &QualityConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            relevance_threshold: config.relevance_threshold,
            min_keyword_overlap: config.min_keyword_overlap,
        }
    }

    /// Drop passages that fail the similarity, keyword-overlap, or relevance
    /// gates, annotate survivors with their scores, and re-rank by
    /// `0.7·similarity + 0.3·relevance`.
    pub fn filter_results(
        &self,
        results: Vec<RetrievedPassage>,
        question: &str,
    ) -> Vec<RetrievedPassage> {
        let question_keywords = extract_keywords(question);
        let mut filtered = Vec::new();

        for mut result in results {
            if result.score < self.similarity_threshold {
                continue;
            }

            let doc_keywords = extract_keywords(&result.content);
            let overlap = question_keywords.intersection(&doc_keywords).count();
            if overlap < self.min_keyword_overlap {
                continue;
            }

            let relevance = self.relevance_score(question, &result.content, &result.title);
            if relevance < self.relevance_threshold {
                continue;
            }

            result.relevance_score = Some(relevance);
            result.keyword_overlap = Some(overlap);
            filtered.push(result);
        }

        filtered.sort_by(|a, b| {
            let score_a = a.score * 0.7 + a.relevance_score.unwrap_or(0.0) * 0.3;
            let score_b = b.score * 0.7 + b.relevance_score.unwrap_or(0.0) * 0.3;
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        filtered
    }

    /// Weighted relevance of a passage to the question:
    /// keyword-overlap ratio (0.4), frequency-weighted context similarity
    /// (0.4), and title overlap (0.2). Result clamped to [0, 1].
    pub fn relevance_score(&self, question: &str, content: &str, title: &str) -> f64 {
        let question_keywords = extract_keywords(question);
        if question_keywords.is_empty() || content.is_empty() {
            return 0.0;
        }

        let doc_keywords = extract_keywords(content);
        let overlap_ratio = question_keywords.intersection(&doc_keywords).count() as f64
            / question_keywords.len() as f64;

        let context_similarity = context_similarity(question, content);
        let title_relevance = keyword_overlap_ratio(&question_keywords, &extract_keywords(title));

        (overlap_ratio * 0.4 + context_similarity * 0.4 + title_relevance * 0.2).min(1.0)
    }

    /// Validate a generated answer: long enough, grounded in the context,
    /// and related to the question. Confidence is the weighted sum of the
    /// three component scores; the answer is valid when it clears the
    /// relevance threshold.
    pub fn validate_answer(&self, question: &str, answer: &str, context: &str) -> AnswerCheck {
        let rejected = AnswerCheck {
            is_valid: false,
            confidence: 0.0,
            context_relevance: 0.0,
            answer_context_match: 0.0,
            qa_relevance: 0.0,
        };

        if answer.trim().is_empty() || context.is_empty() {
            return rejected;
        }
        if answer.trim().chars().count() < 3 {
            return rejected;
        }

        let context_relevance = self.relevance_score(question, context, "");
        let answer_context_match =
            keyword_overlap_ratio(&extract_keywords(answer), &extract_keywords(context));
        let qa_relevance =
            keyword_overlap_ratio(&extract_keywords(question), &extract_keywords(answer));

        let confidence =
            context_relevance * 0.4 + answer_context_match * 0.3 + qa_relevance * 0.3;

        AnswerCheck {
            is_valid: confidence >= self.relevance_threshold,
            confidence,
            context_relevance,
            answer_context_match,
            qa_relevance,
        }
    }

    /// Aggregate metrics over a (filtered) result set.
    pub fn search_metrics(&self, results: &[RetrievedPassage]) -> SearchMetrics {
        if results.is_empty() {
            return SearchMetrics {
                total_results: 0,
                avg_similarity_score: 0.0,
                avg_relevance_score: 0.0,
                min_similarity_score: 0.0,
                max_similarity_score: 0.0,
                high_quality_results: 0,
                quality_ratio: 0.0,
            };
        }

        let scores: Vec<f64> = results.iter().map(|r| r.score).collect();
        let relevance: Vec<f64> = results
            .iter()
            .map(|r| r.relevance_score.unwrap_or(0.0))
            .collect();
        let high_quality = scores
            .iter()
            .filter(|&&s| s >= self.similarity_threshold)
            .count();

        SearchMetrics {
            total_results: results.len(),
            avg_similarity_score: scores.iter().sum::<f64>() / scores.len() as f64,
            avg_relevance_score: relevance.iter().sum::<f64>() / relevance.len() as f64,
            min_similarity_score: scores.iter().cloned().fold(f64::INFINITY, f64::min),
            max_similarity_score: scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            high_quality_results: high_quality,
            quality_ratio: high_quality as f64 / results.len() as f64,
        }
    }
}

/// Tokenize into lowercase keywords: punctuation stripped, tokens of one
/// character dropped, stopwords removed.
pub fn extract_keywords(text: &str) -> HashSet<String> {
    tokenize(text)
        .into_iter()
        .collect::<HashSet<String>>()
}

fn tokenize(text: &str) -> Vec<String> {
    let cleaned: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    cleaned
        .to_lowercase()
        .split_whitespace()
        .filter(|word| word.chars().count() > 1 && !STOPWORDS.contains(word))
        .map(|word| word.to_string())
        .collect()
}

/// Share of `a`'s keywords present in `b`, capped at 1.0.
fn keyword_overlap_ratio(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    (a.intersection(b).count() as f64 / a.len() as f64).min(1.0)
}

/// Frequency-weighted similarity over the keywords shared by the question
/// and the passage: each common term contributes `min(freq)/max(freq)`,
/// averaged over the common terms.
fn context_similarity(question: &str, content: &str) -> f64 {
    let question_counts = term_counts(&tokenize(question));
    let doc_counts = term_counts(&tokenize(content));

    if question_counts.is_empty() || doc_counts.is_empty() {
        return 0.0;
    }

    let mut score = 0.0;
    let mut common = 0usize;
    for (term, &qf) in &question_counts {
        if let Some(&df) = doc_counts.get(term) {
            let (lo, hi) = if qf < df { (qf, df) } else { (df, qf) };
            score += lo as f64 / hi as f64;
            common += 1;
        }
    }

    if common == 0 {
        return 0.0;
    }
    score / common as f64
}

fn term_counts(tokens: &[String]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for token in tokens {
        *counts.entry(token.clone()).or_insert(0) += 1;
    }
    counts
}
