//! Strategy-driven splitting of raw document text into embeddable chunks.
//!
//! The strategy is persisted per document, so a re-run of the embed pass
//! reproduces the same segmentation; the size limits live in pipeline
//! configuration and apply to every strategy. All limits are measured in
//! characters, and slicing is always done on character boundaries.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// How a document's raw text is segmented before embedding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Blank-line paragraphs, repacked greedily up to the size cap.
    #[default]
    Paragraph,
    /// Sentence boundaries (`.`, `!`, `?` followed by whitespace), repacked
    /// greedily up to the size cap.
    Sentence,
    /// Fixed character windows with overlap; ignores text structure.
    SlidingWindow,
}

impl ChunkStrategy {
    /// Stable name used in store columns and payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStrategy::Paragraph => "paragraph",
            ChunkStrategy::Sentence => "sentence",
            ChunkStrategy::SlidingWindow => "sliding_window",
        }
    }
}

impl fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkStrategy {
    type Err = UnknownChunkStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paragraph" => Ok(ChunkStrategy::Paragraph),
            "sentence" => Ok(ChunkStrategy::Sentence),
            "sliding_window" => Ok(ChunkStrategy::SlidingWindow),
            other => Err(UnknownChunkStrategy {
                strategy: other.to_string(),
            }),
        }
    }
}

/// Raised when a stored document row names a strategy this build lacks.
#[derive(Debug, Clone, Error, Diagnostic)]
#[error("unknown chunk strategy: {strategy}")]
#[diagnostic(
    code(gleanforge::chunking::unknown_strategy),
    help("valid strategies are paragraph, sentence, sliding_window")
)]
pub struct UnknownChunkStrategy {
    pub strategy: String,
}

/// Size limits applied by every strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Upper bound on chunk length in characters.
    pub max_chars: usize,
    /// Characters shared between consecutive sliding windows; also used when
    /// an oversized paragraph or sentence falls back to window splitting.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 1200,
            overlap: 150,
        }
    }
}

/// One segment of a document, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    /// Zero-based position within the document.
    pub index: usize,
    pub text: String,
}

/// Splits `text` according to `strategy`, returning indexed, non-empty
/// pieces. Whitespace-only input yields no pieces.
pub fn chunk_text(text: &str, strategy: ChunkStrategy, config: &ChunkingConfig) -> Vec<ChunkPiece> {
    let normalized = text.replace("\r\n", "\n");
    let trimmed = normalized.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let texts = match strategy {
        ChunkStrategy::Paragraph => {
            let units: Vec<String> = trimmed
                .split("\n\n")
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
            pack_units(units, config, "\n\n")
        }
        ChunkStrategy::Sentence => pack_units(split_sentences(trimmed), config, " "),
        ChunkStrategy::SlidingWindow => split_window(trimmed, config.max_chars, config.overlap),
    };

    texts
        .into_iter()
        .enumerate()
        .map(|(index, text)| ChunkPiece { index, text })
        .collect()
}

/// Greedily packs units into chunks no longer than the cap; a single unit
/// over the cap falls back to window splitting.
fn pack_units(units: Vec<String>, config: &ChunkingConfig, joiner: &str) -> Vec<String> {
    let max = config.max_chars.max(1);
    let joiner_chars = joiner.chars().count();
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;

    for unit in units {
        let unit_chars = unit.chars().count();
        if unit_chars > max {
            if !buf.is_empty() {
                out.push(std::mem::take(&mut buf));
                buf_chars = 0;
            }
            out.extend(split_window(&unit, max, config.overlap));
            continue;
        }
        let sep = if buf.is_empty() { 0 } else { joiner_chars };
        if !buf.is_empty() && buf_chars + sep + unit_chars > max {
            out.push(std::mem::take(&mut buf));
            buf_chars = 0;
        }
        if !buf.is_empty() {
            buf.push_str(joiner);
            buf_chars += joiner_chars;
        }
        buf.push_str(&unit);
        buf_chars += unit_chars;
    }

    if !buf.is_empty() {
        out.push(buf);
    }
    out
}

/// Fixed windows of `max_chars` characters advancing by `max_chars - overlap`.
fn split_window(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let max = max_chars.max(1);
    let stride = max.saturating_sub(overlap).max(1);

    let mut out = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + max).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            out.push(piece.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += stride;
    }
    out
}

/// Splits on sentence-ending punctuation followed by whitespace. Newlines
/// inside a sentence are preserved; the split point stays with the sentence.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let boundary = chars.peek().is_none_or(|next| next.is_whitespace());
            if boundary {
                let sentence = current.trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                current.clear();
            }
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}
