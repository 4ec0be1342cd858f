use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use docreview_core::placeholder::QUESTION;
use docreview_core::ChunkWindow;
use docreview_llm::LlmProvider;
use docreview_rag::{
    EmbeddingProviderKind, IndexerConfig, SplitMode, DEFAULT_EMBED_BATCH, DEFAULT_TOP_N,
};
use docreview_skills::{
    populate, AgentInternals, ChainSettings, ContextField, RefusalPolicy, SkillCatalog,
    SkillDefinition, DEFAULT_TOKEN_THRESHOLD,
};
use serde::Deserialize;

pub const DEFAULT_CONFIG: &str = "docreview.yaml";
pub const DEFAULT_MAX_ATTEMPTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerStyle {
    Named,
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexSplit {
    Semantic,
    Tokens,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub split: IndexSplit,
    pub split_tokens: usize,
    pub split_overlap: usize,
    pub breakpoint_percentile: f32,
    pub batch_size: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            split: IndexSplit::Semantic,
            split_tokens: docreview_rag::indexer::DEFAULT_SPLIT_TOKENS,
            split_overlap: docreview_rag::indexer::DEFAULT_SPLIT_OVERLAP,
            breakpoint_percentile: docreview_rag::indexer::DEFAULT_BREAKPOINT_PERCENTILE,
            batch_size: DEFAULT_EMBED_BATCH,
        }
    }
}

/// Pipeline settings, read once from YAML and the environment and then
/// passed by reference to every stage.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub store_root: PathBuf,
    pub tmp_folder: String,
    pub context_file: String,
    pub index_file: String,
    pub answers_file: String,
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub token_threshold: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub refusal: RefusalPolicy,
    pub max_attempts: usize,
    pub top_n: usize,
    pub markers: MarkerStyle,
    pub index: IndexSettings,
    pub default_skills: Vec<String>,
    /// Replaces the built-in skill catalog when set.
    pub skills: Option<Vec<SkillDefinition>>,
    /// Replaces the built-in research-answering prompt when set.
    pub research_answering: Option<SkillDefinition>,
    pub notion_version: String,
    #[serde(skip)]
    pub secrets: Secrets,
}

#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub openai_api_key: Option<String>,
    pub voyage_api_key: Option<String>,
    pub notion_token: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store_root: PathBuf::from("."),
            tmp_folder: "tmp".to_string(),
            context_file: "context.json".to_string(),
            index_file: "index.json".to_string(),
            answers_file: "research_questions.json".to_string(),
            provider: "openai".to_string(),
            model: None,
            base_url: None,
            embedding_provider: "voyage".to_string(),
            embedding_model: "voyage-large-2-instruct".to_string(),
            token_threshold: DEFAULT_TOKEN_THRESHOLD,
            chunk_size: docreview_core::DEFAULT_CHUNK_SIZE,
            chunk_overlap: docreview_core::DEFAULT_CHUNK_OVERLAP,
            refusal: RefusalPolicy::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            top_n: DEFAULT_TOP_N,
            markers: MarkerStyle::Named,
            index: IndexSettings::default(),
            default_skills: SkillCatalog::builtin().names().map(str::to_string).collect(),
            skills: None,
            research_answering: None,
            notion_version: "2022-06-28".to_string(),
            secrets: Secrets::default(),
        }
    }
}

impl PipelineConfig {
    /// Reads `path` when it exists (defaults otherwise), applies environment
    /// overrides and validates the result.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            Self::from_yaml(&raw)
                .with_context(|| format!("invalid docreview config {}", path.display()))?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };
        config.apply_env(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup("DOCREVIEW_PROVIDER") {
            self.provider = provider;
        }
        if let Some(model) = lookup("DOCREVIEW_MODEL") {
            self.model = Some(model);
        }
        if let Some(provider) = lookup("DOCREVIEW_EMBEDDING_PROVIDER") {
            self.embedding_provider = provider;
        }
        if let Some(root) = lookup("DOCREVIEW_STORE_ROOT") {
            self.store_root = PathBuf::from(root);
        }
        self.secrets = Secrets {
            openai_api_key: lookup("OPENAI_API_KEY"),
            voyage_api_key: lookup("VOYAGE_API_KEY"),
            notion_token: lookup("NOTION_API_TOKEN"),
        };
    }

    pub fn validate(&self) -> Result<()> {
        self.llm_provider()?;
        self.embedding_kind()?;
        self.chain_settings()?;
        self.indexer_config()?;
        AgentInternals::new(self.markers().into()).context("invalid marker configuration")?;
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be at least 1"));
        }
        let catalog = self.catalog()?;
        catalog
            .plan(&self.default_skills)
            .context("default_skills do not match the skill catalog")?;
        self.check_prompts(&catalog)
    }

    /// Every prompt must resolve under the configured markers. A `{{field}}`
    /// marker left after substitution means prompts and markers disagree.
    fn check_prompts(&self, catalog: &SkillCatalog) -> Result<()> {
        let stripped = self.markers().with_replacements(|_| Some(String::new()));
        let research = self.research_answering();
        let skills = catalog
            .names()
            .filter_map(|name| catalog.get(name))
            .chain(std::iter::once(&research));
        for skill in skills {
            let prompt = populate(skill, &stripped);
            if let Some(field) = ContextField::ALL
                .iter()
                .find(|field| prompt.contains(&field.named_marker()))
            {
                return Err(anyhow!(
                    "skill {} keeps the marker {} unresolved under the configured {:?} markers",
                    skill.name,
                    field.named_marker(),
                    self.markers
                ));
            }
        }
        if !populate(&research, &stripped).contains(QUESTION) {
            return Err(anyhow!("research_answering prompt must contain {QUESTION}"));
        }
        Ok(())
    }

    pub fn research_answering(&self) -> SkillDefinition {
        self.research_answering
            .clone()
            .unwrap_or_else(SkillDefinition::research_answering)
    }

    pub fn llm_provider(&self) -> Result<LlmProvider> {
        LlmProvider::from_str(&self.provider)
            .ok_or_else(|| anyhow!("unknown provider {}", self.provider))
    }

    pub fn model(&self) -> Result<String> {
        if let Some(model) = &self.model {
            return Ok(model.clone());
        }
        Ok(default_model(self.llm_provider()?).to_string())
    }

    pub fn embedding_kind(&self) -> Result<EmbeddingProviderKind> {
        EmbeddingProviderKind::from_str(&self.embedding_provider)
            .ok_or_else(|| anyhow!("unknown embedding provider {}", self.embedding_provider))
    }

    pub fn embedding_api_key(&self) -> Result<Option<String>> {
        Ok(match self.embedding_kind()? {
            EmbeddingProviderKind::Voyage => self.secrets.voyage_api_key.clone(),
            EmbeddingProviderKind::OpenAi => self.secrets.openai_api_key.clone(),
            EmbeddingProviderKind::Hash => None,
        })
    }

    pub fn catalog(&self) -> Result<SkillCatalog> {
        match &self.skills {
            Some(skills) => {
                SkillCatalog::new(skills.clone()).context("invalid skill catalog in config")
            }
            None => Ok(SkillCatalog::builtin()),
        }
    }

    pub fn chain_settings(&self) -> Result<ChainSettings> {
        Ok(ChainSettings {
            token_threshold: self.token_threshold,
            window: ChunkWindow::new(self.chunk_size, self.chunk_overlap)?,
        })
    }

    pub fn indexer_config(&self) -> Result<IndexerConfig> {
        let mode = match self.index.split {
            IndexSplit::Semantic => SplitMode::Semantic {
                percentile: self.index.breakpoint_percentile,
            },
            IndexSplit::Tokens => {
                ChunkWindow::new(self.index.split_tokens, self.index.split_overlap)?;
                SplitMode::Tokens {
                    size: self.index.split_tokens,
                    overlap: self.index.split_overlap,
                }
            }
        };
        if self.index.batch_size == 0 {
            return Err(anyhow!("index.batch_size must be positive"));
        }
        Ok(IndexerConfig {
            mode,
            batch_size: self.index.batch_size,
        })
    }

    /// Markers with empty replacements, ready to be filled from a context.
    pub fn markers(&self) -> AgentInternals {
        match self.markers {
            MarkerStyle::Named => AgentInternals::named(),
            MarkerStyle::Legacy => AgentInternals::legacy(),
        }
    }

    pub fn tmp_key(&self, project: &str, name: &str) -> String {
        format!("{}/{}/{}", project.trim_end_matches('/'), self.tmp_folder, name)
    }
}

fn default_model(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::OpenAi => "gpt-4o",
        LlmProvider::Local => "local",
    }
}
