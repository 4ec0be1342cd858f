use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Local => "local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "openai" => Some(LlmProvider::OpenAi),
            "local" => Some(LlmProvider::Local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseFormat {
    #[default]
    Text,
    JsonObject,
}

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
    pub response_format: ResponseFormat,
}

impl LlmRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            user: user.into(),
            response_format: ResponseFormat::Text,
        }
    }

    pub fn json(mut self) -> Self {
        self.response_format = ResponseFormat::JsonObject;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: String,
    /// Set when the provider reports a structured refusal instead of an answer.
    pub refused: bool,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// A text-generation backend: one system prompt and one user message in,
/// one completion out.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    model: String,
    config: ProviderConfig,
}

#[derive(Clone)]
enum ProviderConfig {
    OpenAi(OpenAiConfig),
    Local,
}

#[derive(Clone)]
struct OpenAiConfig {
    api_key: String,
    base_url: String,
}

impl LlmClient {
    pub fn new(
        provider: LlmProvider,
        model: impl Into<String>,
        api_key: Option<String>,
        base_url: Option<String>,
    ) -> Result<Self> {
        let model = model.into();
        let config = match provider {
            LlmProvider::OpenAi => {
                let api_key =
                    api_key.ok_or_else(|| anyhow!("OPENAI_API_KEY is required for openai"))?;
                validate_api_key(&api_key)?;
                ProviderConfig::OpenAi(OpenAiConfig {
                    api_key,
                    base_url: base_url.unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
                })
            }
            LlmProvider::Local => ProviderConfig::Local,
        };
        Ok(Self {
            http: Client::new(),
            provider,
            model,
            config,
        })
    }

    pub fn local() -> Self {
        Self {
            http: Client::new(),
            provider: LlmProvider::Local,
            model: "local".to_string(),
            config: ProviderConfig::Local,
        }
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub async fn chat(&self, req: &LlmRequest) -> Result<LlmResponse> {
        match &self.config {
            ProviderConfig::OpenAi(cfg) => self.chat_openai(cfg, req).await,
            ProviderConfig::Local => Ok(chat_local(req)),
        }
    }

    async fn chat_openai(&self, cfg: &OpenAiConfig, req: &LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", cfg.base_url.trim_end_matches('/'));
        let mut messages = Vec::new();
        if let Some(system) = &req.system {
            messages.push(json!({"role": "system", "content": system }));
        }
        messages.push(json!({"role": "user", "content": req.user }));
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
        });
        if req.response_format == ResponseFormat::JsonObject {
            payload["response_format"] = json!({ "type": "json_object" });
        }
        let response = self
            .http
            .post(&url)
            .bearer_auth(&cfg.api_key)
            .json(&payload)
            .send()
            .await
            .with_context(|| "openai request failed")?;
        let value = decode_openai_body(response).await?;
        let refusal = extract_openai_refusal(&value);
        let content = match (&refusal, extract_openai_text(&value)) {
            (_, Some(text)) => text,
            (Some(reason), None) => reason.clone(),
            (None, None) => return Err(anyhow!("missing text in OpenAI response")),
        };
        let usage: OpenAiUsage = value
            .get("usage")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();
        tracing::debug!(
            model = %self.model,
            prompt_tokens = usage.prompt_tokens.unwrap_or(0),
            completion_tokens = usage.completion_tokens.unwrap_or(0),
            "openai completion"
        );
        Ok(LlmResponse {
            content,
            refused: refusal.is_some(),
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
        })
    }
}

#[async_trait]
impl CompletionProvider for LlmClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.chat(request).await
    }
}

/// Offline backend used for dry runs: echoes a short digest of the user
/// message, or an empty JSON object when JSON output was requested.
fn chat_local(req: &LlmRequest) -> LlmResponse {
    let content = match req.response_format {
        ResponseFormat::JsonObject => "{}".to_string(),
        ResponseFormat::Text => summarize_text(&req.user, 40),
    };
    LlmResponse::text(content)
}

async fn decode_openai_body(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(anyhow!(format!(
            "openai returned error (status {}): {}",
            status, body
        )));
    }
    serde_json::from_str(&body).context("failed to decode openai response")
}

fn summarize_text(text: &str, max_words: usize) -> String {
    if max_words == 0 {
        return String::new();
    }
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<&str>>()
        .join(" ")
}

fn validate_api_key(value: &str) -> Result<()> {
    if !value.starts_with("sk-") {
        return Err(anyhow!(
            "OPENAI_API_KEY must start with 'sk-' (see https://platform.openai.com/)"
        ));
    }
    Ok(())
}

fn first_message(value: &Value) -> Option<&Value> {
    value
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
}

fn extract_openai_text(value: &Value) -> Option<String> {
    let content = first_message(value)?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(|t| t.as_str()))
        .map(|text| text.to_string())
}

fn extract_openai_refusal(value: &Value) -> Option<String> {
    first_message(value)?
        .get("refusal")
        .and_then(|v| v.as_str())
        .map(|text| text.to_string())
}

#[derive(Default, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_roundtrip() {
        for provider in [LlmProvider::OpenAi, LlmProvider::Local] {
            assert_eq!(LlmProvider::from_str(provider.as_str()), Some(provider));
        }
        assert_eq!(LlmProvider::from_str("OpenAI"), Some(LlmProvider::OpenAi));
        assert!(LlmProvider::from_str("gemini").is_none());
    }

    #[test]
    fn openai_requires_well_formed_key() {
        assert!(LlmClient::new(LlmProvider::OpenAi, "gpt-4o", None, None).is_err());
        assert!(
            LlmClient::new(LlmProvider::OpenAi, "gpt-4o", Some("bad".into()), None).is_err()
        );
        assert!(
            LlmClient::new(LlmProvider::OpenAi, "gpt-4o", Some("sk-test".into()), None).is_ok()
        );
    }

    #[test]
    fn extracts_text_and_refusal() {
        let value = json!({
            "choices": [{ "message": { "content": "Answer", "refusal": null } }]
        });
        assert_eq!(extract_openai_text(&value).as_deref(), Some("Answer"));
        assert!(extract_openai_refusal(&value).is_none());

        let refused = json!({
            "choices": [{ "message": { "content": null, "refusal": "I can't help" } }]
        });
        assert!(extract_openai_text(&refused).is_none());
        assert_eq!(
            extract_openai_refusal(&refused).as_deref(),
            Some("I can't help")
        );
    }

    #[tokio::test]
    async fn local_backend_is_deterministic() {
        let client = LlmClient::local();
        let request = LlmRequest::new("system", "one two three");
        let first = client.complete(&request).await.unwrap();
        let second = client.complete(&request).await.unwrap();
        assert_eq!(first.content, "one two three");
        assert_eq!(first.content, second.content);

        let json_reply = client.complete(&request.clone().json()).await.unwrap();
        assert_eq!(json_reply.content, "{}");
    }
}
