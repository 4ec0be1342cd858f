use docreview_core::{ChunkWindow, Chunker, Document, Tokenizer};
use docreview_llm::{CompletionProvider, LlmRequest, LlmResponse};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::catalog::{SkillCatalog, SkillDefinition, SUMMARIZATION};
use crate::error::SkillError;
use crate::template::{contiguous_on, populate, AgentInternals};

pub const DEFAULT_TOKEN_THRESHOLD: usize = 32_000;

/// Heuristic for dropping chunk responses that are apologies rather than
/// analysis. Structured refusals from the provider are always dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefusalPolicy {
    /// Case-sensitive substring match on the response text.
    Substring(String),
    Disabled,
}

impl Default for RefusalPolicy {
    fn default() -> Self {
        RefusalPolicy::Substring("sorry".to_string())
    }
}

impl RefusalPolicy {
    pub fn is_refusal(&self, response: &LlmResponse) -> bool {
        if response.refused {
            return true;
        }
        match self {
            RefusalPolicy::Substring(needle) => response.content.contains(needle.as_str()),
            RefusalPolicy::Disabled => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The completion provider returned an error.
    Request,
    /// Every response was a refusal.
    NoUsableOutput,
    /// The skill this one depends on did not complete.
    Prerequisite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SkillOutcome {
    Completed {
        output: String,
        chunks: usize,
    },
    Failed {
        kind: FailureKind,
        error: String,
        chunks: usize,
    },
}

impl SkillOutcome {
    pub fn output(&self) -> Option<&str> {
        match self {
            SkillOutcome::Completed { output, .. } => Some(output),
            SkillOutcome::Failed { .. } => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SkillOutcome::Completed { .. })
    }

    fn failed(kind: FailureKind, error: impl Into<String>, chunks: usize) -> Self {
        SkillOutcome::Failed {
            kind,
            error: error.into(),
            chunks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainSettings {
    pub token_threshold: usize,
    pub window: ChunkWindow,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            token_threshold: DEFAULT_TOKEN_THRESHOLD,
            window: ChunkWindow::default(),
        }
    }
}

/// Runs catalog skills over one document, one skill at a time.
pub struct SkillChain<'a> {
    catalog: &'a SkillCatalog,
    completion: &'a dyn CompletionProvider,
    chunker: Chunker,
    token_threshold: usize,
    refusal: RefusalPolicy,
}

impl<'a> SkillChain<'a> {
    pub fn new(
        catalog: &'a SkillCatalog,
        completion: &'a dyn CompletionProvider,
        settings: ChainSettings,
        refusal: RefusalPolicy,
    ) -> Result<Self, SkillError> {
        Ok(Self {
            catalog,
            completion,
            chunker: Chunker::new(Tokenizer::cl100k()?, settings.window),
            token_threshold: settings.token_threshold,
            refusal,
        })
    }

    /// Outcomes keyed by skill name, in execution order. Errors are returned
    /// only for invalid requests or unreadable documents; a failing skill is
    /// reported in its outcome and the remaining skills still run.
    pub async fn run<S: AsRef<str>>(
        &self,
        requested: &[S],
        internals: &AgentInternals,
        document: &Document,
    ) -> Result<IndexMap<String, SkillOutcome>, SkillError> {
        let plan = self.catalog.plan(requested)?;
        let blob = document.annotated_text();
        if document.is_empty() || blob.trim().is_empty() {
            return Err(SkillError::EmptyDocument);
        }
        let total_tokens = document.total_tokens();
        let chunks = if total_tokens > self.token_threshold {
            let chunks = self.chunker.chunk_text(&blob)?;
            tracing::debug!(total_tokens, chunks = chunks.len(), "document chunked");
            if chunks.is_empty() {
                None
            } else {
                Some(chunks)
            }
        } else {
            None
        };

        let mut outcomes: IndexMap<String, SkillOutcome> = IndexMap::new();
        for skill in plan {
            let outcome = self
                .run_skill(skill, internals, &blob, chunks.as_deref(), &outcomes)
                .await;
            match &outcome {
                SkillOutcome::Completed { chunks, .. } => {
                    tracing::info!(skill = %skill.name, chunks, "skill completed")
                }
                SkillOutcome::Failed { kind, error, .. } => {
                    tracing::warn!(skill = %skill.name, ?kind, error = %error, "skill failed")
                }
            }
            outcomes.insert(skill.name.clone(), outcome);
        }
        Ok(outcomes)
    }

    async fn run_skill(
        &self,
        skill: &SkillDefinition,
        internals: &AgentInternals,
        blob: &str,
        chunks: Option<&[String]>,
        done: &IndexMap<String, SkillOutcome>,
    ) -> SkillOutcome {
        let mut prompt = populate(skill, internals);
        if let Some(prerequisite) = &skill.contiguous_on {
            match done.get(prerequisite).and_then(SkillOutcome::output) {
                Some(prior) => prompt = contiguous_on(&prompt, prior),
                None => {
                    return SkillOutcome::failed(
                        FailureKind::Prerequisite,
                        format!("prerequisite {prerequisite:?} did not complete"),
                        0,
                    )
                }
            }
        }

        let Some(chunks) = chunks else {
            return match self.request(&prompt, blob.to_string()).await {
                Ok(response) if response.refused => {
                    SkillOutcome::failed(FailureKind::NoUsableOutput, "the provider refused the request", 1)
                }
                Ok(response) => SkillOutcome::Completed {
                    output: response.content,
                    chunks: 1,
                },
                Err(err) => SkillOutcome::failed(FailureKind::Request, format!("{err:#}"), 1),
            };
        };

        let summary = done.get(SUMMARIZATION).and_then(SkillOutcome::output);
        let mut kept = Vec::with_capacity(chunks.len());
        for (idx, chunk) in chunks.iter().enumerate() {
            let user = match summary {
                Some(summary) => format!("{summary}\n\n{chunk}"),
                None => chunk.clone(),
            };
            match self.request(&prompt, user).await {
                Ok(response) if self.refusal.is_refusal(&response) => {
                    tracing::debug!(skill = %skill.name, chunk = idx, "dropping refused chunk response");
                }
                Ok(response) => kept.push(response.content),
                Err(err) => {
                    return SkillOutcome::failed(
                        FailureKind::Request,
                        format!("chunk {idx}: {err:#}"),
                        chunks.len(),
                    )
                }
            }
        }
        if kept.is_empty() {
            return SkillOutcome::failed(
                FailureKind::NoUsableOutput,
                "every chunk response was a refusal",
                chunks.len(),
            );
        }
        SkillOutcome::Completed {
            output: kept.join("\n\n"),
            chunks: chunks.len(),
        }
    }

    async fn request(&self, system: &str, user: String) -> anyhow::Result<LlmResponse> {
        self.completion.complete(&LlmRequest::new(system, user)).await
    }
}
