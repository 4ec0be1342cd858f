use crate::error::{Result, ReviewError};
use crate::tokenizer::Tokenizer;

pub const DEFAULT_CHUNK_SIZE: usize = 40_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 1_250;

/// Token window used to split oversized text. `overlap` is always smaller
/// than `size`, so every step advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkWindow {
    size: usize,
    overlap: usize,
}

impl ChunkWindow {
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 || overlap >= size {
            return Err(ReviewError::InvalidChunkWindow { size, overlap });
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }
}

impl Default for ChunkWindow {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Splits a token stream into overlapping windows.
///
/// The first window is `[0, size)`; each following window starts `overlap`
/// tokens before the previous end. Iteration stops once fewer than `overlap`
/// tokens remain past the next start, so a stream of `overlap` tokens or
/// fewer produces no windows at all.
pub fn chunk_tokens(tokens: &[usize], window: ChunkWindow) -> Vec<Vec<usize>> {
    let mut chunks = Vec::new();
    let limit = tokens.len().saturating_sub(window.overlap);
    let mut start = 0usize;
    while start < limit {
        let end = (start + window.size).min(tokens.len());
        chunks.push(tokens[start..end].to_vec());
        start = end - window.overlap;
    }
    chunks
}

pub fn chunk(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Vec<usize>>> {
    let chunker = Chunker::new(Tokenizer::cl100k()?, ChunkWindow::new(chunk_size, overlap)?);
    Ok(chunker.chunk(text))
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    tokenizer: Tokenizer,
    window: ChunkWindow,
}

impl Chunker {
    pub fn new(tokenizer: Tokenizer, window: ChunkWindow) -> Self {
        Self { tokenizer, window }
    }

    pub fn window(&self) -> ChunkWindow {
        self.window
    }

    pub fn chunk(&self, text: &str) -> Vec<Vec<usize>> {
        chunk_tokens(&self.tokenizer.encode(text), self.window)
    }

    /// Chunks `text` and decodes every window back to a string.
    pub fn chunk_text(&self, text: &str) -> Result<Vec<String>> {
        self.chunk(text)
            .iter()
            .map(|tokens| self.tokenizer.decode_window(tokens))
            .collect()
    }
}
