//! Core data types shared across the ingestion and answering pipeline.

use serde::Serialize;

/// One Wikipedia paragraph pulled out of the KorQuAD dump, before storage.
///
/// KorQuAD groups paragraphs under articles; each paragraph carries its own
/// QA pairs. The first QA id of the paragraph doubles as the stable public
/// identifier exposed to API clients as `retrieved_document_id`.
#[derive(Debug, Clone)]
pub struct Passage {
    pub korquad_id: String,
    pub title: String,
    pub context: String,
    pub qa_count: usize,
}

/// A slice of a stored paragraph, sized for embedding.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    /// Character offsets into the source paragraph (pre-trim).
    pub char_start: usize,
    pub char_end: usize,
    pub hash: String,
}

/// A passage returned by the retriever, scored against a question.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedPassage {
    pub korquad_id: String,
    pub title: String,
    /// Full paragraph text (what the original dataset calls the context).
    pub content: String,
    /// Cosine similarity of the best-matching chunk, rounded to 4 places.
    pub score: f64,
    pub snippet: String,
    pub chunk_index: i64,
    /// Set by the quality filter; absent on raw retrieval output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_overlap: Option<usize>,
}
