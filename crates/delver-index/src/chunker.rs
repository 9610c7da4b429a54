//! Line-aware text chunking with exact overlap.

use crate::error::IndexError;
use crate::types::{Chunk, Document};

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Maximum chunk length in chars.
    pub max_chunk_length: usize,
    /// Chars shared between consecutive chunks. Must be below `max_chunk_length`.
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_length: 1000,
            overlap: 200,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidConfig`] if the overlap is not smaller than
    /// the maximum length or the maximum length is zero.
    pub fn new(config: ChunkerConfig) -> Result<Self, IndexError> {
        if config.max_chunk_length == 0 {
            return Err(IndexError::InvalidConfig(
                "max_chunk_length must be positive".into(),
            ));
        }
        if config.overlap >= config.max_chunk_length {
            return Err(IndexError::InvalidConfig(format!(
                "chunk overlap {} must be smaller than max_chunk_length {}",
                config.overlap, config.max_chunk_length
            )));
        }
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    #[must_use]
    pub fn split(&self, document: &Document) -> Vec<Chunk> {
        self.split_text(&document.path, &document.content)
    }

    /// Split `text` into chunks.
    ///
    /// Each cut lands just after a newline when one exists far enough into the
    /// window to make progress, preferring a blank line in the back half of
    /// the window. Otherwise the cut is a hard one at `max_chunk_length`.
    /// Chunk `i + 1` always starts exactly `overlap` chars before chunk `i` ends.
    #[must_use]
    pub fn split_text(&self, path: &str, text: &str) -> Vec<Chunk> {
        let offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        let total = offsets.len();
        if total == 0 {
            return Vec::new();
        }
        let byte_at = |c: usize| if c == total { text.len() } else { offsets[c] };
        let ends_line = |c: usize| text.as_bytes()[offsets[c - 1]] == b'\n';

        let max = self.config.max_chunk_length;
        let overlap = self.config.overlap;
        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let hard_end = (start + max).min(total);
            let end = if hard_end == total {
                total
            } else {
                let floor = start + overlap + 1;
                let half = start + max / 2;
                let paragraph = (floor.max(half)..=hard_end)
                    .rev()
                    .find(|&c| c >= 2 && ends_line(c) && ends_line(c - 1));
                paragraph
                    .or_else(|| (floor..=hard_end).rev().find(|&c| ends_line(c)))
                    .unwrap_or(hard_end)
            };

            chunks.push(Chunk {
                path: path.to_owned(),
                ordinal: chunks.len(),
                text: text[byte_at(start)..byte_at(end)].to_owned(),
                start,
                end,
            });

            if end == total {
                break;
            }
            start = end - overlap;
        }

        chunks
    }
}

/// Index of the chunk containing char offset `pos`, preferring the earliest.
#[must_use]
pub fn chunk_ordinal_at(chunks: &[Chunk], pos: usize) -> Option<usize> {
    chunks
        .iter()
        .find(|c| c.start <= pos && pos < c.end)
        .map(|c| c.ordinal)
}
