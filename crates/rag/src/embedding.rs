use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const VOYAGE_EMBEDDINGS_URL: &str = "https://api.voyageai.com/v1/embeddings";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    Document,
    Query,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Document => "document",
            InputType::Query => "query",
        }
    }
}

/// Turns texts into vectors, one vector per input, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, inputs: &[String], input_type: InputType) -> Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProviderKind {
    Hash,
    OpenAi,
    Voyage,
}

impl EmbeddingProviderKind {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "hash" => Some(Self::Hash),
            "openai" => Some(Self::OpenAi),
            "voyage" => Some(Self::Voyage),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hash => "hash",
            Self::OpenAi => "openai",
            Self::Voyage => "voyage",
        }
    }
}

#[derive(Clone)]
pub enum EmbeddingBackend {
    Hash(HashEmbedder),
    Remote(RemoteEmbeddingClient),
}

#[derive(Clone)]
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
}

impl EmbeddingClient {
    pub fn new(
        kind: EmbeddingProviderKind,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let backend = match kind {
            EmbeddingProviderKind::Hash => EmbeddingBackend::Hash(HashEmbedder::default()),
            EmbeddingProviderKind::OpenAi | EmbeddingProviderKind::Voyage => {
                let api_key = api_key
                    .ok_or_else(|| anyhow!("an api key is required for {} embeddings", kind.as_str()))?;
                EmbeddingBackend::Remote(RemoteEmbeddingClient {
                    http: Client::new(),
                    kind,
                    model: model.into(),
                    api_key,
                })
            }
        };
        Ok(Self { backend })
    }

    pub fn hash() -> Self {
        Self {
            backend: EmbeddingBackend::Hash(HashEmbedder::default()),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingClient {
    async fn embed(&self, inputs: &[String], input_type: InputType) -> Result<Vec<Vec<f32>>> {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => Ok(inputs
                .iter()
                .map(|text| embedder.embed_text(text))
                .collect()),
            EmbeddingBackend::Remote(client) => client.embed_batch(inputs, input_type).await,
        }
    }
}

#[derive(Clone)]
pub struct RemoteEmbeddingClient {
    http: Client,
    kind: EmbeddingProviderKind,
    model: String,
    api_key: String,
}

impl RemoteEmbeddingClient {
    async fn embed_batch(&self, inputs: &[String], input_type: InputType) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let (url, payload) = match self.kind {
            EmbeddingProviderKind::Voyage => (
                VOYAGE_EMBEDDINGS_URL,
                serde_json::json!({
                    "model": self.model,
                    "input": inputs,
                    "input_type": input_type.as_str(),
                }),
            ),
            _ => (
                OPENAI_EMBEDDINGS_URL,
                serde_json::json!({
                    "model": self.model,
                    "input": inputs,
                }),
            ),
        };
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("{} embeddings request failed", self.kind.as_str()))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "{} embeddings request failed: {}",
                self.kind.as_str(),
                response.status()
            ));
        }
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("failed to decode embeddings response")?;
        let vectors = order_embeddings(parsed.data);
        if vectors.len() != inputs.len() {
            return Err(anyhow!(
                "embeddings response returned {} vectors for {} inputs",
                vectors.len(),
                inputs.len()
            ));
        }
        Ok(vectors)
    }
}

fn order_embeddings(mut data: Vec<EmbeddingData>) -> Vec<Vec<f32>> {
    data.sort_by_key(|item| item.index);
    data.into_iter().map(|item| item.embedding).collect()
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct HashEmbedderConfig {
    pub dimensions: usize,
    pub seed: u64,
}

impl Default for HashEmbedderConfig {
    fn default() -> Self {
        Self {
            dimensions: 64,
            seed: 1337,
        }
    }
}

/// Bag-of-words hashing embedder. Needs no network access, which makes it
/// the backend for offline runs and tests.
#[derive(Clone, Default)]
pub struct HashEmbedder {
    config: HashEmbedderConfig,
}

impl HashEmbedder {
    pub fn new(config: HashEmbedderConfig) -> Self {
        Self { config }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let dims = self.config.dimensions.max(1);
        let mut vector = vec![0f32; dims];
        for token in text.split_whitespace() {
            let bucket = self.bucket_for(token);
            vector[bucket] += 1.0;
        }
        normalize(&mut vector);
        vector
    }

    fn bucket_for(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        hasher.write_u64(self.config.seed);
        token.to_lowercase().hash(&mut hasher);
        (hasher.finish() as usize) % self.config.dimensions.max(1)
    }
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_backend_embeds_in_order() {
        let client = EmbeddingClient::hash();
        let inputs = vec!["climate plan".to_string(), "".to_string()];
        let vectors = client.embed(&inputs, InputType::Document).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 64);
        assert!(vectors[1].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn hash_embedder_is_case_insensitive() {
        let embedder = HashEmbedder::default();
        assert_eq!(embedder.embed_text("Transit"), embedder.embed_text("transit"));
    }

    #[test]
    fn remote_backends_need_keys() {
        assert!(EmbeddingClient::new(EmbeddingProviderKind::Voyage, "voyage-large-2-instruct", None).is_err());
        assert!(EmbeddingClient::new(EmbeddingProviderKind::Hash, "hash", None).is_ok());
    }

    #[test]
    fn response_data_is_reordered_by_index() {
        let data = vec![
            EmbeddingData { embedding: vec![2.0], index: 1 },
            EmbeddingData { embedding: vec![1.0], index: 0 },
        ];
        assert_eq!(order_embeddings(data), vec![vec![1.0], vec![2.0]]);
    }
}
