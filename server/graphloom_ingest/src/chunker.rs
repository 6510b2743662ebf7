//! Document chunking.
//!
//! Splitting is a pure function of `(content, strategy)`: no side effects,
//! deterministic, and therefore safe to re-run when a document is ingested
//! again. Chunk provenance all over the pipeline depends on that stability.

use std::str::FromStr;

use anyhow::bail;

/// How a document is split into chunks before extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    /// The whole document as a single chunk.
    FullDocument,
    /// Split on triple-newline paragraph separators.
    Paragraph,
    /// Split on sentence terminators, Latin and CJK.
    Sentence,
}

impl ChunkStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStrategy::FullDocument => "full_document",
            ChunkStrategy::Paragraph => "paragraph",
            ChunkStrategy::Sentence => "sentence",
        }
    }
}

impl FromStr for ChunkStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full_document" => Ok(ChunkStrategy::FullDocument),
            "paragraph" => Ok(ChunkStrategy::Paragraph),
            "sentence" => Ok(ChunkStrategy::Sentence),
            other => bail!(
                "unknown chunk strategy '{}' (expected one of: full_document, paragraph, sentence)",
                other
            ),
        }
    }
}

/// Sentence terminators for [`ChunkStrategy::Sentence`]. A run of one or
/// more of these is a single boundary.
const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '。', '！', '？'];

/// Split `content` into an ordered sequence of non-empty trimmed chunks.
///
/// Empty or whitespace-only input yields an empty sequence under every
/// strategy.
pub fn split_document(content: &str, strategy: ChunkStrategy) -> Vec<String> {
    match strategy {
        ChunkStrategy::FullDocument => {
            let trimmed = content.trim();
            if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![trimmed.to_string()]
            }
        }
        ChunkStrategy::Paragraph => content
            .split("\n\n\n")
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect(),
        ChunkStrategy::Sentence => split_sentences(content),
    }
}

/// Split on any run of sentence terminators; the terminators themselves are
/// delimiters and are not part of any chunk.
fn split_sentences(content: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for ch in content.chars() {
        if SENTENCE_TERMINATORS.contains(&ch) {
            flush_segment(&mut chunks, &mut current);
        } else {
            current.push(ch);
        }
    }
    flush_segment(&mut chunks, &mut current);

    chunks
}

fn flush_segment(chunks: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
    current.clear();
}
