//! Overlapping text chunker.
//!
//! Splits document text into [`TextChunk`]s of at most `chunk_size` bytes,
//! where each chunk after the first begins with up to `chunk_overlap` bytes
//! carried over from the end of its predecessor. Overlap keeps sentences
//! that straddle a boundary retrievable from either side.
//!
//! # Algorithm
//!
//! 1. Split text on `\n\n` paragraph boundaries, dropping blank paragraphs.
//! 2. Hard-split any paragraph longer than `chunk_size` into windows that
//!    end on a newline or space where possible, stepping back by
//!    `chunk_overlap` between windows.
//! 3. Accumulate pieces into a buffer until the next piece would exceed
//!    `chunk_size`, then flush the buffer.
//! 4. Seed the next buffer with the word-aligned tail of the flushed one
//!    when tail and next piece fit together.
//!
//! Each chunk carries a SHA-256 hash of its text, stored alongside the
//! chunk so that re-ingestion can be audited.
//!
//! # Example
//!
//! ```rust
//! use tabula_core::chunk::{chunk_text, ChunkParams};
//!
//! let params = ChunkParams { chunk_size: 1200, chunk_overlap: 300 };
//! let chunks = chunk_text("Hello world.\n\nSecond paragraph.", &params);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].index, 0);
//! ```

use sha2::{Digest, Sha256};

/// Chunk size and overlap, both in bytes of UTF-8 text.
#[derive(Debug, Clone, Copy)]
pub struct ChunkParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: 1200,
            chunk_overlap: 300,
        }
    }
}

/// One passage of a split document.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub index: i64,
    pub text: String,
    pub hash: String,
}

/// Split text into overlapping chunks.
///
/// Returns no chunks for blank input. Indices are contiguous from 0 and
/// no chunk is longer than `chunk_size` bytes.
pub fn chunk_text(text: &str, params: &ChunkParams) -> Vec<TextChunk> {
    let size = params.chunk_size.max(1);
    let overlap = params.chunk_overlap.min(size.saturating_sub(1));

    let mut pieces: Vec<&str> = Vec::new();
    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.len() > size {
            pieces.extend(split_long(trimmed, size, overlap));
        } else {
            pieces.push(trimmed);
        }
    }

    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();

    for piece in pieces {
        if buf.is_empty() {
            buf.push_str(piece);
            continue;
        }
        if buf.len() + 2 + piece.len() <= size {
            buf.push_str("\n\n");
            buf.push_str(piece);
            continue;
        }

        let tail = overlap_tail(&buf, overlap).to_string();
        out.push(std::mem::take(&mut buf));
        if !tail.is_empty() && tail.len() + 2 + piece.len() <= size {
            buf.push_str(&tail);
            buf.push_str("\n\n");
        }
        buf.push_str(piece);
    }

    if !buf.is_empty() {
        out.push(buf);
    }

    out.into_iter()
        .enumerate()
        .map(|(i, text)| make_chunk(i as i64, text))
        .collect()
}

/// Hard-split an oversized paragraph into overlapping windows.
fn split_long(s: &str, size: usize, overlap: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0usize;

    while start < s.len() {
        let mut end = snap_down(s, (start + size).min(s.len()));
        if end <= start {
            end = next_boundary(s, start);
        }
        if end < s.len() {
            let window = &s[start..end];
            let floor = size / 2;
            if let Some(pos) = window.rfind(['\n', ' ']) {
                if pos >= floor {
                    end = start + pos + 1;
                }
            }
        }

        let piece = s[start..end].trim();
        if !piece.is_empty() {
            pieces.push(piece);
        }
        if end >= s.len() {
            break;
        }

        let next = snap_down(s, end.saturating_sub(overlap));
        start = if next <= start { end } else { next };
    }

    pieces
}

/// The last `overlap` bytes of `buf`, advanced to the start of a word.
fn overlap_tail(buf: &str, overlap: usize) -> &str {
    if overlap == 0 || buf.is_empty() {
        return "";
    }
    if buf.len() <= overlap {
        return buf.trim();
    }
    let mut start = buf.len() - overlap;
    while !buf.is_char_boundary(start) {
        start += 1;
    }
    let tail = &buf[start..];
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim(),
        None => tail.trim(),
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_down(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Byte index just past the char starting at `index`.
fn next_boundary(s: &str, index: usize) -> usize {
    s[index..]
        .char_indices()
        .nth(1)
        .map(|(i, _)| index + i)
        .unwrap_or(s.len())
}

fn make_chunk(index: i64, text: String) -> TextChunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    TextChunk { index, text, hash }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(size: usize, overlap: usize) -> ChunkParams {
        ChunkParams {
            chunk_size: size,
            chunk_overlap: overlap,
        }
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", &ChunkParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_blank_text_has_no_chunks() {
        assert!(chunk_text("", &ChunkParams::default()).is_empty());
        assert!(chunk_text("  \n\n  ", &ChunkParams::default()).is_empty());
    }

    #[test]
    fn test_chunks_respect_size() {
        let text = (0..80)
            .map(|i| format!("Sentence number {} talks about tables.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text(&text, &params(120, 40));
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.len() <= 120, "chunk too long: {}", c.text.len());
        }
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let text = (0..20)
            .map(|i| format!("para{} alpha beta end{}", i, i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text(&text, &params(80, 30));
        assert!(chunks.len() > 2);
        for pair in chunks.windows(2) {
            let last_word = pair[0].text.split_whitespace().last().unwrap();
            assert!(
                pair[1].text.contains(last_word),
                "expected {:?} to carry over into {:?}",
                last_word,
                pair[1].text
            );
        }
    }

    #[test]
    fn test_zero_overlap_does_not_repeat() {
        let text = "aaa bbb\n\nccc ddd\n\neee fff";
        let chunks = chunk_text(text, &params(8, 0));
        let joined: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, vec!["aaa bbb", "ccc ddd", "eee fff"]);
    }

    #[test]
    fn test_long_paragraph_hard_split_overlaps() {
        let text = (0..200).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let chunks = chunk_text(&text, &params(100, 20));
        assert!(chunks.len() > 3);
        for c in &chunks {
            assert!(c.text.len() <= 100);
        }
        assert!(chunks.last().unwrap().text.ends_with("w199"));
    }

    #[test]
    fn test_indices_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text(&text, &params(60, 10));
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i as i64, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let chunks = chunk_text(text, &params(12, 5));
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(!c.text.is_empty());
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = chunk_text(text, &params(12, 4));
        let c2 = chunk_text(text, &params(12, 4));
        assert_eq!(c1, c2);
    }
}
