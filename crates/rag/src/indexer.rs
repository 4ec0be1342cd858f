use anyhow::{anyhow, Context, Result};
use docreview_core::{ChunkWindow, Chunker, Document, Tokenizer};
use docreview_index::{IndexChunk, ProjectIndex};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::embedding::{EmbeddingProvider, InputType};
use crate::similarity::cosine_similarity;

pub const DEFAULT_EMBED_BATCH: usize = 100;
pub const DEFAULT_SPLIT_TOKENS: usize = 512;
pub const DEFAULT_SPLIT_OVERLAP: usize = 64;
pub const DEFAULT_BREAKPOINT_PERCENTILE: f32 = 95.0;

static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+\s+").expect("valid sentence regex"));

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SplitMode {
    /// Fixed token windows per page.
    Tokens { size: usize, overlap: usize },
    /// Sentence groups, broken where consecutive sentences drift apart.
    Semantic { percentile: f32 },
}

impl Default for SplitMode {
    fn default() -> Self {
        SplitMode::Semantic {
            percentile: DEFAULT_BREAKPOINT_PERCENTILE,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IndexerConfig {
    pub mode: SplitMode,
    pub batch_size: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            mode: SplitMode::default(),
            batch_size: DEFAULT_EMBED_BATCH,
        }
    }
}

/// Splits documents into retrieval chunks and embeds them.
pub struct Indexer<'a> {
    embedder: &'a dyn EmbeddingProvider,
    tokenizer: Tokenizer,
    config: IndexerConfig,
}

impl<'a> Indexer<'a> {
    pub fn new(embedder: &'a dyn EmbeddingProvider, config: IndexerConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(anyhow!("embedding batch size must be positive"));
        }
        Ok(Self {
            embedder,
            tokenizer: Tokenizer::cl100k()?,
            config,
        })
    }

    /// Splits and embeds `document`, then appends it to `index` under
    /// `filename`. Returns `false` when the file was already indexed.
    pub async fn index_document(
        &self,
        index: &mut ProjectIndex,
        filename: &str,
        document: &Document,
    ) -> Result<bool> {
        if index.contains(filename) {
            tracing::info!(filename, "file already indexed, skipping");
            return Ok(false);
        }
        let chunks = self.split(filename, document).await?;
        let embeddings = self.embed_chunks(&chunks).await?;
        tracing::info!(filename, chunks = chunks.len(), "indexed document");
        index.append(filename, chunks, embeddings)
    }

    pub async fn split(&self, title: &str, document: &Document) -> Result<Vec<IndexChunk>> {
        let mut chunks = Vec::new();
        for (page_number, page) in document.pages() {
            if page.text.trim().is_empty() {
                continue;
            }
            let pieces = match self.config.mode {
                SplitMode::Tokens { size, overlap } => self.split_tokens(&page.text, size, overlap)?,
                SplitMode::Semantic { percentile } => {
                    self.split_semantic(&page.text, percentile).await?
                }
            };
            chunks.extend(pieces.into_iter().map(|text| IndexChunk {
                text,
                title: title.to_string(),
                page_number,
            }));
        }
        Ok(chunks)
    }

    pub async fn embed_chunks(&self, chunks: &[IndexChunk]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        self.embed_batched(&texts).await
    }

    async fn embed_batched(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size) {
            let embedded = self
                .embedder
                .embed(batch, InputType::Document)
                .await
                .context("failed to embed index chunks")?;
            if embedded.len() != batch.len() {
                return Err(anyhow!(
                    "embedding provider returned {} vectors for {} texts",
                    embedded.len(),
                    batch.len()
                ));
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    fn split_tokens(&self, text: &str, size: usize, overlap: usize) -> Result<Vec<String>> {
        let chunker = Chunker::new(self.tokenizer, ChunkWindow::new(size, overlap)?);
        let pieces = chunker.chunk_text(text)?;
        // Pages no longer than the overlap produce no window.
        if pieces.is_empty() {
            return Ok(vec![text.trim().to_string()]);
        }
        Ok(pieces)
    }

    async fn split_semantic(&self, text: &str, percentile: f32) -> Result<Vec<String>> {
        let sentences = split_sentences(text);
        if sentences.len() < 2 {
            return Ok(sentences);
        }
        let embeddings = self.embed_batched(&sentences).await?;
        let distances: Vec<f32> = embeddings
            .windows(2)
            .map(|pair| 1.0 - cosine_similarity(&pair[0], &pair[1]))
            .collect();
        let threshold = percentile_of(&distances, percentile);
        Ok(group_sentences(&sentences, &distances, threshold))
    }
}

pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for boundary in SENTENCE_END.find_iter(text) {
        push_sentence(&mut sentences, &text[start..boundary.end()]);
        start = boundary.end();
    }
    push_sentence(&mut sentences, &text[start..]);
    sentences
}

fn push_sentence(sentences: &mut Vec<String>, raw: &str) {
    let sentence = raw.trim();
    if !sentence.is_empty() {
        sentences.push(sentence.to_string());
    }
}

/// Linear-interpolated percentile, `pct` in `[0, 100]`.
pub fn percentile_of(values: &[f32], pct: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f32;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f32;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// `distances[i]` is the gap between `sentences[i]` and `sentences[i + 1]`.
fn group_sentences(sentences: &[String], distances: &[f32], threshold: f32) -> Vec<String> {
    let mut groups = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for (i, sentence) in sentences.iter().enumerate() {
        current.push(sentence);
        let breaks = distances.get(i).map_or(false, |d| *d > threshold);
        if breaks {
            groups.push(current.join(" "));
            current.clear();
        }
    }
    if !current.is_empty() {
        groups.push(current.join(" "));
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingClient;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct CountingEmbedder {
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        async fn embed(&self, inputs: &[String], _input_type: InputType) -> Result<Vec<Vec<f32>>> {
            self.batches.lock().push(inputs.len());
            Ok(inputs.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[test]
    fn sentences_split_on_terminal_punctuation() {
        let sentences = split_sentences("Bus use grew. Did cycling? Yes!  Budget is flat");
        assert_eq!(
            sentences,
            vec!["Bus use grew.", "Did cycling?", "Yes!", "Budget is flat"]
        );
    }

    #[test]
    fn percentile_interpolates() {
        let values = [0.0, 1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile_of(&values, 50.0), 2.0);
        assert!((percentile_of(&values, 95.0) - 3.8).abs() < 1e-6);
        assert_eq!(percentile_of(&[], 95.0), 0.0);
    }

    #[test]
    fn groups_break_above_threshold() {
        let sentences: Vec<String> = ["a.", "b.", "c.", "d."].iter().map(|s| s.to_string()).collect();
        let groups = group_sentences(&sentences, &[0.1, 0.9, 0.2], 0.5);
        assert_eq!(groups, vec!["a. b.", "c. d."]);
    }

    #[tokio::test]
    async fn token_mode_keeps_page_numbers() {
        let embedder = EmbeddingClient::hash();
        let indexer = Indexer::new(
            &embedder,
            IndexerConfig {
                mode: SplitMode::Tokens { size: 8, overlap: 2 },
                batch_size: 100,
            },
        )
        .unwrap();
        let document = Document::from_pages([
            "one two three four five six seven eight nine ten eleven twelve",
            "",
            "short",
        ])
        .unwrap();
        let chunks = indexer.split("plan.pdf", &document).await.unwrap();
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|chunk| chunk.title == "plan.pdf"));
        assert!(chunks.iter().all(|chunk| chunk.page_number != 2));
        assert_eq!(chunks.last().unwrap().page_number, 3);
        assert_eq!(chunks.last().unwrap().text, "short");
    }

    #[tokio::test]
    async fn embeddings_are_batched() {
        let embedder = CountingEmbedder {
            batches: Mutex::new(Vec::new()),
        };
        let indexer = Indexer::new(
            &embedder,
            IndexerConfig {
                mode: SplitMode::Tokens { size: 8, overlap: 2 },
                batch_size: 2,
            },
        )
        .unwrap();
        let chunks: Vec<IndexChunk> = (0..5)
            .map(|i| IndexChunk {
                text: format!("chunk {i}"),
                title: "t".into(),
                page_number: 1,
            })
            .collect();
        let vectors = indexer.embed_chunks(&chunks).await.unwrap();
        assert_eq!(vectors.len(), 5);
        assert_eq!(*embedder.batches.lock(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn reindexing_is_a_noop() {
        let embedder = EmbeddingClient::hash();
        let indexer = Indexer::new(&embedder, IndexerConfig::default()).unwrap();
        let document =
            Document::from_pages(["Ridership rose. Fares fell. The council approved lanes."]).unwrap();
        let mut index = ProjectIndex::new();
        assert!(indexer.index_document(&mut index, "a.pdf", &document).await.unwrap());
        let before = index.clone();
        assert!(!indexer.index_document(&mut index, "a.pdf", &document).await.unwrap());
        assert_eq!(index, before);
        assert_eq!(index.textstore().len(), index.vectorstore().len());
    }

    #[test]
    fn zero_batch_is_rejected() {
        let embedder = EmbeddingClient::hash();
        let config = IndexerConfig {
            batch_size: 0,
            ..IndexerConfig::default()
        };
        assert!(Indexer::new(&embedder, config).is_err());
    }
}
