pub mod embedding;
pub mod indexer;
pub mod retriever;
pub mod similarity;

pub use embedding::{
    EmbeddingClient, EmbeddingProvider, EmbeddingProviderKind, HashEmbedder, HashEmbedderConfig,
    InputType,
};
pub use indexer::{Indexer, IndexerConfig, SplitMode, DEFAULT_EMBED_BATCH};
pub use retriever::{grounding_block, research_questions, Retriever, DEFAULT_TOP_N};
pub use similarity::{cosine_similarity, top_n, ScoredId};
