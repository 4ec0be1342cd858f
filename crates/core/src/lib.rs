mod chunk;
mod document;
mod error;
mod pdf;
pub mod placeholder;
mod tokenizer;

pub use chunk::{
    chunk, chunk_tokens, ChunkWindow, Chunker, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE,
};
pub use document::{page_marker, Document, Page, PageInput};
pub use error::{Result, ReviewError};
pub use pdf::{clean_text, parse_pdf};
pub use tokenizer::{estimate_tokens, Tokenizer};
