use anyhow::{anyhow, Context, Result};
use docreview_core::placeholder::QUESTION;
use docreview_index::{IndexChunk, ProjectIndex, VectorIndex};
use docreview_llm::{CompletionProvider, LlmRequest};
use indexmap::IndexMap;

use crate::embedding::{EmbeddingProvider, InputType};
use crate::similarity::{top_n, ScoredId};

pub const DEFAULT_TOP_N: usize = 30;

/// Answers research questions from the chunks most similar to each question.
pub struct Retriever {
    index: VectorIndex,
}

impl Retriever {
    pub fn new(index: VectorIndex) -> Self {
        Self { index }
    }

    pub fn from_project(index: &ProjectIndex) -> Self {
        Self::new(index.to_vector_index())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Embedding width of the stored chunks, `None` for an empty index.
    pub fn dimensions(&self) -> Option<usize> {
        self.index.embedding(0).map(<[f32]>::len)
    }

    /// Best `top_n` chunks for a query vector, most similar first.
    pub fn top_chunks(&self, query: &[f32], top_n_chunks: usize) -> Vec<(&IndexChunk, f32)> {
        let hits = top_n(
            query,
            self.index.entries().map(|(id, _, embedding)| (id, embedding)),
            top_n_chunks,
        );
        hits.into_iter()
            .filter_map(|ScoredId { id, score }| self.index.chunk(id).map(|chunk| (chunk, score)))
            .collect()
    }

    /// One completion per question, issued in order. `template` must still
    /// contain the question placeholder; each question is substituted into a
    /// fresh copy of it.
    pub async fn answer(
        &self,
        questions: &[String],
        top_n_chunks: usize,
        template: &str,
        completion: &dyn CompletionProvider,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<IndexMap<String, String>> {
        let mut answers = IndexMap::new();
        if questions.is_empty() {
            return Ok(answers);
        }
        let query_vectors = embedder
            .embed(questions, InputType::Document)
            .await
            .context("failed to embed research questions")?;
        if query_vectors.len() != questions.len() {
            return Err(anyhow!(
                "embedded {} of {} research questions",
                query_vectors.len(),
                questions.len()
            ));
        }

        if let (Some(stored), Some(query)) = (self.dimensions(), query_vectors.first()) {
            if stored != query.len() {
                return Err(anyhow!(
                    "index embeddings have {stored} dimensions but question embeddings have {}; \
                     rebuild the index with the current embedding provider",
                    query.len()
                ));
            }
        }

        for (question, vector) in questions.iter().zip(query_vectors.iter()) {
            if answers.contains_key(question) {
                tracing::debug!(question = %question, "skipping repeated question");
                continue;
            }
            let hits = self.top_chunks(vector, top_n_chunks);
            tracing::info!(
                question = %question,
                chunks = hits.len(),
                "answering research question"
            );
            let grounding = grounding_block(hits.iter().map(|(chunk, _)| *chunk));
            let system = template.replace(QUESTION, question);
            let response = completion
                .complete(&LlmRequest::new(system, grounding))
                .await
                .with_context(|| format!("completion failed for question {question:?}"))?;
            answers.insert(question.clone(), response.content);
        }
        Ok(answers)
    }
}

/// Wraps every chunk with the document name and page it came from so the
/// model can cite them.
pub fn grounding_block<'a, I>(chunks: I) -> String
where
    I: IntoIterator<Item = &'a IndexChunk>,
{
    chunks
        .into_iter()
        .map(|chunk| {
            format!(
                "!!! START CHUNK !!! DOCUMENT NAME TO REFERENCE: {} PAGE NUMBER TO REFERENCE: {} DOCUMENT TEXT: {} !!! END CHUNK !!!",
                chunk.title, chunk.page_number, chunk.text
            )
        })
        .collect()
}

/// Every bullet line of the rendered research-questions text is a question.
pub fn research_questions(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("- ").or_else(|| line.strip_prefix('-')))
        .map(str::trim)
        .filter(|question| !question.is_empty())
        .map(str::to_string)
        .collect()
}
