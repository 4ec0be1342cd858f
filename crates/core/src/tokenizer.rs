use std::fmt;

use once_cell::sync::OnceCell;
use tiktoken_rs::CoreBPE;

use crate::error::{Result, ReviewError};

static CL100K: OnceCell<CoreBPE> = OnceCell::new();

/// Longest run of tokens a single UTF-8 character can be split across.
const MAX_SPLIT_TOKENS: usize = 3;

/// Shared cl100k encoder. Built once per process; cloning is free.
#[derive(Clone, Copy)]
pub struct Tokenizer {
    bpe: &'static CoreBPE,
}

impl Tokenizer {
    pub fn cl100k() -> Result<Self> {
        let bpe = CL100K.get_or_try_init(|| {
            tiktoken_rs::cl100k_base().map_err(|e| ReviewError::Tokenizer(e.to_string()))
        })?;
        Ok(Self { bpe })
    }

    pub fn encode(&self, text: &str) -> Vec<usize> {
        self.bpe.encode_with_special_tokens(text)
    }

    pub fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }

    pub fn decode(&self, tokens: &[usize]) -> Result<String> {
        self.bpe
            .decode(tokens.to_vec())
            .map_err(|e| ReviewError::Tokenizer(e.to_string()))
    }

    /// Decodes a window cut out of a longer token stream. A window edge may
    /// fall inside a multi-byte character; the partial tokens are dropped.
    pub fn decode_window(&self, tokens: &[usize]) -> Result<String> {
        if let Ok(text) = self.decode(tokens) {
            return Ok(text);
        }
        for trimmed in 1..=MAX_SPLIT_TOKENS * 2 {
            for head in 0..=trimmed.min(MAX_SPLIT_TOKENS) {
                let tail = trimmed - head;
                if tail > MAX_SPLIT_TOKENS || head + tail >= tokens.len() {
                    continue;
                }
                if let Ok(text) = self.decode(&tokens[head..tokens.len() - tail]) {
                    return Ok(text);
                }
            }
        }
        Err(ReviewError::Tokenizer(format!(
            "window of {} tokens does not decode to utf-8",
            tokens.len()
        )))
    }
}

impl fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokenizer").field("encoding", &"cl100k_base").finish()
    }
}

pub fn estimate_tokens(text: &str) -> Result<usize> {
    Ok(Tokenizer::cl100k()?.count(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrips_ascii() {
        let tokenizer = Tokenizer::cl100k().unwrap();
        let tokens = tokenizer.encode("Strategic document review");
        assert!(!tokens.is_empty());
        assert_eq!(
            tokenizer.decode(&tokens).unwrap(),
            "Strategic document review"
        );
    }

    #[test]
    fn decode_window_drops_split_characters() {
        let tokenizer = Tokenizer::cl100k().unwrap();
        let text = "日本語のテキスト と English mixed 文章";
        let tokens = tokenizer.encode(text);
        for start in 0..tokens.len().saturating_sub(4) {
            let decoded = tokenizer.decode_window(&tokens[start..]).unwrap();
            assert!(text.ends_with(decoded.as_str()));
        }
    }

    #[test]
    fn count_matches_encode_length() {
        let tokenizer = Tokenizer::cl100k().unwrap();
        let text = "The quick brown fox jumps over the lazy dog.";
        assert_eq!(tokenizer.count(text), tokenizer.encode(text).len());
        assert_eq!(estimate_tokens(text).unwrap(), tokenizer.count(text));
    }
}
