
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Boundaries tried in order: paragraph, line, sentence, word, then a hard character cut
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Configuration for text chunking, measured in characters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks
    pub overlap_size: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap_size: 200,
        }
    }
}

/// Recursive boundary-aware text splitter
///
/// Text is split on the coarsest separator present, pieces that still exceed the
/// chunk size are split again with the next separator, and small neighbouring
/// pieces are merged back into windows that share up to `overlap_size` characters.
#[derive(Debug, Clone)]
pub struct TextChunker {
    config: ChunkingConfig,
    separators: Vec<&'static str>,
}

impl TextChunker {
    #[inline]
    pub fn new(config: ChunkingConfig) -> Self {
        Self {
            config,
            separators: DEFAULT_SEPARATORS.to_vec(),
        }
    }

    #[inline]
    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Split `text` into trimmed, non-empty chunks. Blank input yields no chunks.
    #[inline]
    pub fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chunks = self.split_recursive(text, &self.separators);
        debug!(
            "Chunked {} characters into {} chunks",
            text.chars().count(),
            chunks.len()
        );
        chunks
    }

    fn split_recursive(&self, text: &str, separators: &[&'static str]) -> Vec<String> {
        let mut chunks = Vec::new();

        let (separator, remaining) = pick_separator(text, separators);
        let splits = split_keeping_separator(text, separator);

        let mut pending: Vec<&str> = Vec::new();
        for piece in splits {
            if char_len(piece) < self.config.chunk_size {
                pending.push(piece);
                continue;
            }

            if !pending.is_empty() {
                chunks.extend(self.merge_splits(&pending));
                pending.clear();
            }

            if remaining.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    chunks.push(trimmed.to_string());
                }
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge_splits(&pending));
        }

        chunks
    }

    /// Greedily pack pieces into windows, carrying a tail of at most `overlap_size`
    /// characters into the next window
    fn merge_splits(&self, pieces: &[&str]) -> Vec<String> {
        let chunk_size = self.config.chunk_size;
        let overlap = self.config.overlap_size;

        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);

            if total + len > chunk_size {
                if total > chunk_size {
                    warn!(
                        "Created a chunk of size {}, which is longer than the specified {}",
                        total, chunk_size
                    );
                }

                if !window.is_empty() {
                    push_joined(&mut chunks, &window);

                    while total > overlap || (total + len > chunk_size && total > 0) {
                        match window.pop_front() {
                            Some(front) => total -= char_len(front),
                            None => break,
                        }
                    }
                }
            }

            window.push_back(piece);
            total += len;
        }

        push_joined(&mut chunks, &window);
        chunks
    }
}

/// Chunk `text` with the given configuration
#[inline]
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    TextChunker::new(config.clone()).chunk(text)
}

fn pick_separator<'a>(
    text: &str,
    separators: &'a [&'static str],
) -> (&'static str, &'a [&'static str]) {
    for (i, separator) in separators.iter().enumerate() {
        if separator.is_empty() {
            return (*separator, &[]);
        }
        if text.contains(separator) {
            return (*separator, &separators[i + 1..]);
        }
    }
    ("", &[])
}

/// Split on `separator`, leaving the separator attached to the end of each piece
fn split_keeping_separator<'t>(text: &'t str, separator: &str) -> Vec<&'t str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| text.get(i..i + c.len_utf8()).unwrap_or_default())
            .collect();
    }

    text.split_inclusive(separator)
        .filter(|piece| !piece.is_empty())
        .collect()
}

fn push_joined(chunks: &mut Vec<String>, window: &VecDeque<&str>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

#[inline]
fn char_len(text: &str) -> usize {
    text.chars().count()
}
