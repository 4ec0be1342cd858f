use std::collections::HashSet;
use std::convert::TryFrom;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// A retrieval unit: a fragment of one document with its source page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexChunk {
    pub text: String,
    pub title: String,
    pub page_number: u32,
}

/// Persisted per-project index. `textstore[i]` is embedded as
/// `vectorstore[i]`; the two stores always have the same length.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawProjectIndex")]
pub struct ProjectIndex {
    filenames: Vec<String>,
    textstore: Vec<IndexChunk>,
    vectorstore: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
struct RawProjectIndex {
    #[serde(default)]
    filenames: Vec<String>,
    #[serde(default)]
    textstore: Vec<IndexChunk>,
    #[serde(default)]
    vectorstore: Vec<Vec<f32>>,
}

impl TryFrom<RawProjectIndex> for ProjectIndex {
    type Error = anyhow::Error;

    fn try_from(raw: RawProjectIndex) -> Result<Self> {
        ensure_parallel(raw.textstore.len(), raw.vectorstore.len())?;
        let mut seen = HashSet::new();
        let filenames = raw
            .filenames
            .into_iter()
            .filter(|name| seen.insert(name.clone()))
            .collect();
        Ok(Self {
            filenames,
            textstore: raw.textstore,
            vectorstore: raw.vectorstore,
        })
    }
}

impl ProjectIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.filenames.iter().any(|name| name == filename)
    }

    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    pub fn textstore(&self) -> &[IndexChunk] {
        &self.textstore
    }

    pub fn vectorstore(&self) -> &[Vec<f32>] {
        &self.vectorstore
    }

    pub fn len(&self) -> usize {
        self.textstore.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textstore.is_empty()
    }

    /// Adds one document's chunks. Returns `Ok(false)` without touching the
    /// stores when `filename` has already been indexed.
    pub fn append(
        &mut self,
        filename: &str,
        chunks: Vec<IndexChunk>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<bool> {
        if self.contains(filename) {
            tracing::info!(filename, "file already indexed");
            return Ok(false);
        }
        ensure_parallel(chunks.len(), embeddings.len())?;
        tracing::debug!(filename, chunks = chunks.len(), "appending to index");
        self.filenames.push(filename.to_string());
        self.textstore.extend(chunks);
        self.vectorstore.extend(embeddings);
        Ok(true)
    }

    pub fn to_vector_index(&self) -> VectorIndex {
        VectorIndex {
            chunks: self.textstore.clone(),
            embeddings: self.vectorstore.clone(),
        }
    }
}

/// In-memory lookup from integer id to chunk and embedding. Ids are
/// assigned in insertion order starting at zero.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    chunks: Vec<IndexChunk>,
    embeddings: Vec<Vec<f32>>,
}

impl VectorIndex {
    pub fn build(corpus: Vec<IndexChunk>, embeddings: Vec<Vec<f32>>) -> Result<Self> {
        ensure_parallel(corpus.len(), embeddings.len())?;
        Ok(Self {
            chunks: corpus,
            embeddings,
        })
    }

    pub fn extend(&mut self, corpus: Vec<IndexChunk>, embeddings: Vec<Vec<f32>>) -> Result<()> {
        ensure_parallel(corpus.len(), embeddings.len())?;
        self.chunks.extend(corpus);
        self.embeddings.extend(embeddings);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk(&self, id: usize) -> Option<&IndexChunk> {
        self.chunks.get(id)
    }

    pub fn embedding(&self, id: usize) -> Option<&[f32]> {
        self.embeddings.get(id).map(|v| v.as_slice())
    }

    pub fn entries(&self) -> impl Iterator<Item = (usize, &IndexChunk, &[f32])> {
        self.chunks
            .iter()
            .zip(self.embeddings.iter())
            .enumerate()
            .map(|(id, (chunk, embedding))| (id, chunk, embedding.as_slice()))
    }
}

fn ensure_parallel(chunks: usize, embeddings: usize) -> Result<()> {
    if chunks != embeddings {
        return Err(anyhow!(
            "chunk/embedding count mismatch: {chunks} chunks, {embeddings} embeddings"
        ));
    }
    Ok(())
}
