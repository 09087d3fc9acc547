//! Overlapping character-window chunker.
//!
//! Splits document text into fixed-budget chunks where consecutive chunks
//! share a configurable overlap, so context that straddles a boundary is
//! embedded on both sides of it. The split is a plain character count —
//! offsets are measured in characters, never bytes, so multi-byte text is
//! safe.
//!
//! Round-trip invariant: stripping each chunk's leading
//! `overlap_with_previous` characters (except the first chunk) and
//! concatenating reconstructs the original text exactly.

use crate::error::{CoragError, Result};

/// One bounded, overlapping segment of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Verbatim text of the segment.
    pub content: String,
    /// Position of this chunk in the document, starting at 0.
    pub sequence_index: usize,
    /// Character offset of `content` in the original text.
    pub source_offset: usize,
    /// Characters at the start of `content` shared with the previous chunk.
    pub overlap_with_previous: usize,
}

/// Split `text` into overlapping chunks of at most `chunk_size` characters.
///
/// Empty text returns an empty vec. `overlap` must be strictly smaller than
/// `chunk_size`, and `chunk_size` must be positive; anything else is a
/// configuration error.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    if chunk_size == 0 {
        return Err(CoragError::Config("chunk_size must be > 0".to_string()));
    }
    if overlap >= chunk_size {
        return Err(CoragError::Config(format!(
            "overlap ({}) must be smaller than chunk_size ({})",
            overlap, chunk_size
        )));
    }

    if text.is_empty() {
        return Ok(Vec::new());
    }

    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut seq = 0usize;

    loop {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(Chunk {
            content: chars[start..end].iter().collect(),
            sequence_index: seq,
            source_offset: start,
            overlap_with_previous: if seq == 0 { 0 } else { overlap },
        });

        if end == chars.len() {
            break;
        }
        seq += 1;
        start = end - overlap;
    }

    Ok(chunks)
}

/// Reassemble the original text from a chunk sequence.
///
/// Inverse of [`chunk_text`]; used by tests to check the round-trip
/// invariant and by callers that want the full extracted text back from a
/// loaded index without re-extracting the document.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        let tail: String = chunk
            .content
            .chars()
            .skip(chunk.overlap_with_previous)
            .collect();
        out.push_str(&tail);
    }
    out
}
