//! Character-window text chunker with overlap.
//!
//! Splits a paragraph into windows of at most `max_chars` characters,
//! preferring to break after a sentence terminator and carrying
//! `overlap_chars` of trailing context into the next window so answers
//! spanning a boundary stay retrievable. Offsets are character positions
//! into the source paragraph; slicing is always on char boundaries, which
//! matters for Hangul.
//!
//! Each chunk receives a UUID plus a SHA-256 hash of its text for
//! staleness detection by the embedding backfill.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Chunks shorter than this count against the quality score.
const MIN_QUALITY_CHARS: usize = 20;

/// Characters treated as sentence terminators when picking a break point.
const SENTENCE_BREAKS: [char; 4] = ['.', '!', '?', '\n'];

pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_chars: usize,
    overlap_chars: usize,
) -> Vec<Chunk> {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();

    if n == 0 {
        return vec![make_chunk(document_id, 0, "", 0, 0)];
    }

    // Byte offset of each char, plus the end sentinel, so windows can be
    // sliced out of the original &str.
    let byte_of: Vec<usize> = text
        .char_indices()
        .map(|(b, _)| b)
        .chain(std::iter::once(text.len()))
        .collect();

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index: i64 = 0;

    loop {
        let hard_end = (start + max_chars).min(n);
        let end = if hard_end < n {
            find_break(&chars, start, hard_end, max_chars)
        } else {
            hard_end
        };

        let piece = text[byte_of[start]..byte_of[end]].trim();
        if !piece.is_empty() {
            chunks.push(make_chunk(document_id, index, piece, start, end));
            index += 1;
        }

        if end >= n {
            break;
        }
        // Back up for overlap, but always make progress.
        start = end.saturating_sub(overlap_chars).max(start + 1);
    }

    if chunks.is_empty() {
        chunks.push(make_chunk(document_id, 0, text.trim(), 0, n));
    }

    chunks
}

/// Pick the break position in `(start, hard_end]`: the latest position whose
/// preceding char ends a sentence, falling back to the latest whitespace,
/// falling back to a hard cut. Never backs up past half a window, so a
/// terminator-free run cannot degenerate into tiny chunks.
fn find_break(chars: &[char], start: usize, hard_end: usize, max_chars: usize) -> usize {
    let min_end = start + (max_chars / 2).max(1);

    for end in (min_end..=hard_end).rev() {
        if SENTENCE_BREAKS.contains(&chars[end - 1]) {
            return end;
        }
    }
    for end in (min_end..=hard_end).rev() {
        if chars[end - 1].is_whitespace() {
            return end;
        }
    }
    hard_end
}

fn make_chunk(
    document_id: &str,
    index: i64,
    text: &str,
    char_start: usize,
    char_end: usize,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        char_start,
        char_end,
        hash,
    }
}

/// Preprocessing sanity report over a chunk batch.
#[derive(Debug, Clone)]
pub struct ChunkQualityReport {
    pub total: usize,
    pub too_short: usize,
    pub avg_chars: f64,
    /// Percentage of chunks at or above the minimum useful length.
    pub quality_score: f64,
}

pub fn validate_chunk_quality(chunks: &[Chunk]) -> ChunkQualityReport {
    if chunks.is_empty() {
        return ChunkQualityReport {
            total: 0,
            too_short: 0,
            avg_chars: 0.0,
            quality_score: 0.0,
        };
    }

    let lengths: Vec<usize> = chunks.iter().map(|c| c.text.chars().count()).collect();
    let too_short = lengths.iter().filter(|&&l| l < MIN_QUALITY_CHARS).count();
    let avg_chars = lengths.iter().sum::<usize>() as f64 / lengths.len() as f64;
    let quality_score = (chunks.len() - too_short) as f64 / chunks.len() as f64 * 100.0;

    ChunkQualityReport {
        total: chunks.len(),
        too_short,
        avg_chars,
        quality_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc1", "수도는 서울특별시이다.", 500, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "수도는 서울특별시이다.");
        assert_eq!(chunks[0].char_start, 0);
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_text("doc1", "", 500, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "");
    }

    #[test]
    fn test_long_text_splits_with_contiguous_indices() {
        let text = "대한민국의 역사는 길다. ".repeat(100);
        let chunks = chunk_text("doc1", &text, 100, 20);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
            assert!(c.text.chars().count() <= 100);
        }
    }

    #[test]
    fn test_windows_overlap() {
        let text = "가나다라마바사. ".repeat(50);
        let chunks = chunk_text("doc1", &text, 80, 20);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(
                pair[1].char_start < pair[0].char_end,
                "chunk {} does not overlap its predecessor",
                pair[1].chunk_index
            );
        }
    }

    #[test]
    fn test_prefers_sentence_boundary() {
        let text = format!("{}다. {}", "가".repeat(60), "나".repeat(60));
        let chunks = chunk_text("doc1", &text, 100, 0);
        assert!(chunks[0].text.ends_with("다."));
    }

    #[test]
    fn test_hard_cut_without_any_boundary() {
        // No terminators, no whitespace: must still terminate and respect max.
        let text = "가".repeat(1000);
        let chunks = chunk_text("doc1", &text, 100, 10);
        assert!(chunks.len() >= 10);
        for c in &chunks {
            assert!(c.text.chars().count() <= 100);
        }
    }

    #[test]
    fn test_multibyte_boundary_safety() {
        // Mixed-width text must never panic on a byte-boundary slice.
        let text = "한글과 English가 섞인 문장이다. ".repeat(40);
        let chunks = chunk_text("doc1", &text, 73, 11);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn test_deterministic_text_and_offsets() {
        let text = "세종대왕은 조선의 제4대 왕이다. 훈민정음을 창제하였다. ".repeat(20);
        let a = chunk_text("doc1", &text, 120, 30);
        let b = chunk_text("doc1", &text, 120, 30);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.text, y.text);
            assert_eq!(x.hash, y.hash);
            assert_eq!((x.char_start, x.char_end), (y.char_start, y.char_end));
        }
    }

    #[test]
    fn test_quality_report() {
        let text = "대한민국은 동아시아의 한반도 남부에 위치한 나라이다. ".repeat(30);
        let chunks = chunk_text("doc1", &text, 200, 40);
        let report = validate_chunk_quality(&chunks);
        assert_eq!(report.total, chunks.len());
        assert!(report.quality_score > 50.0);
        assert!(report.avg_chars > 0.0);
    }

    #[test]
    fn test_quality_report_empty() {
        let report = validate_chunk_quality(&[]);
        assert_eq!(report.total, 0);
        assert_eq!(report.quality_score, 0.0);
    }
}
