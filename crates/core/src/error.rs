use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("pdf extraction failed for {name}: {reason}")]
    Pdf { name: String, reason: String },
    #[error("unsupported input format: {0}")]
    UnsupportedInput(String),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("invalid chunk window: size={size} overlap={overlap}")]
    InvalidChunkWindow { size: usize, overlap: usize },
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("other: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ReviewError>;

impl From<anyhow::Error> for ReviewError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}
