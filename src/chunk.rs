//! Paragraph-boundary text chunker.
//!
//! Splits document body text into [`Chunk`]s that respect a `max_tokens`
//! budget. Splitting occurs on paragraph boundaries (`\n\n`); paragraphs
//! larger than the budget are hard-split at the last newline or space that
//! fits. With `overlap_tokens > 0`, each chunk after the first is prefixed
//! with the tail of its predecessor so that context straddling a boundary
//! stays retrievable.
//!
//! Each chunk carries a SHA-256 hash of its final text for staleness
//! detection in the embedding tables.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks on paragraph boundaries, respecting `max_tokens`.
/// Returns chunks with contiguous indices starting at 0.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let pieces = split_pieces(text, max_tokens * CHARS_PER_TOKEN);
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;

    let mut chunks = Vec::with_capacity(pieces.len());
    let mut prev: Option<&str> = None;
    for (i, piece) in pieces.iter().enumerate() {
        let text = match prev {
            Some(p) if overlap_chars > 0 => {
                let tail = overlap_tail(p, overlap_chars);
                if tail.is_empty() {
                    piece.clone()
                } else {
                    format!("{}\n\n{}", tail, piece)
                }
            }
            _ => piece.clone(),
        };
        chunks.push(make_chunk(document_id, i as i64, &text));
        prev = Some(piece.as_str());
    }

    chunks
}

/// Split into un-overlapped pieces, each at most `max_chars` bytes.
fn split_pieces(text: &str, max_chars: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return vec![text.trim().to_string()];
    }

    let mut pieces = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = if remaining.len() > max_chars {
                    let limit = floor_char_boundary(remaining, max_chars);
                    remaining[..limit]
                        .rfind('\n')
                        .or_else(|| remaining[..limit].rfind(' '))
                        .map(|pos| pos + 1)
                        .unwrap_or(limit.max(next_char_len(remaining)))
                } else {
                    remaining.len()
                };
                let piece = remaining[..split_at].trim();
                if !piece.is_empty() {
                    pieces.push(piece.to_string());
                }
                remaining = &remaining[split_at..];
            }
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }
    if pieces.is_empty() {
        pieces.push(text.trim().to_string());
    }

    pieces
}

/// Last `max_chars` bytes of `text`, snapped forward to a word start when one
/// exists inside the window.
fn overlap_tail(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text;
    }
    let mut start = text.len() - max_chars;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    let window = &text[start..];
    match window.find(char::is_whitespace) {
        Some(pos) => window[pos..].trim_start(),
        None => window,
    }
}

/// Largest index `<= max` that lies on a char boundary of `s`.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    let mut idx = max.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn next_char_len(s: &str) -> usize {
    s.chars().next().map(char::len_utf8).unwrap_or(0)
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash: hash_text(text),
    }
}

/// Hex-encoded SHA-256 of `text`.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", 700, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_text("doc1", "", 700, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_multiple_paragraphs_under_limit() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text("doc1", text, 700, 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("First paragraph."));
        assert!(chunks[0].text.contains("Third paragraph."));
    }

    #[test]
    fn test_multiple_paragraphs_exceed_limit() {
        // max_tokens=5 => max_chars=20
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let chunks = chunk_text("doc1", text, 5, 0);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text("doc1", &text, 10, 2);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = chunk_text("doc1", text, 5, 1);
        let c2 = chunk_text("doc1", text, 5, 1);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.hash, b.hash);
        }
    }

    #[test]
    fn test_overlap_carries_previous_tail() {
        // max 20 chars per piece, 8 chars overlap
        let text = "alpha beta gamma\n\ndelta epsilon zeta\n\neta theta iota";
        let chunks = chunk_text("doc1", text, 5, 2);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].text.starts_with("alpha"));
        assert!(chunks[1].text.starts_with("gamma"));
        assert!(chunks[1].text.ends_with("delta epsilon zeta"));
        assert!(chunks[2].text.starts_with("zeta"));
    }

    #[test]
    fn test_no_overlap_on_first_chunk() {
        let text = "one two three four five six seven eight nine ten eleven twelve";
        let chunks = chunk_text("doc1", text, 5, 2);
        assert!(chunks.len() > 1);
        assert!(chunks[0].text.starts_with("one"));
    }

    #[test]
    fn test_multibyte_hard_split_does_not_panic() {
        let text = "é".repeat(100);
        let chunks = chunk_text("doc1", &text, 3, 1);
        assert!(chunks.len() > 1);
        let joined: usize = chunks
            .iter()
            .map(|c| c.text.chars().filter(|&ch| ch == 'é').count())
            .sum();
        assert!(joined >= 100);
    }

    #[test]
    fn test_hash_text_is_sha256_hex() {
        let h = hash_text("abc");
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
