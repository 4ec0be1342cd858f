use anyhow::{anyhow, Context, Result};
use docreview_index::ProjectIndex;
use docreview_llm::CompletionProvider;
use docreview_rag::{research_questions, EmbeddingProvider, Indexer, Retriever};
use docreview_skills::{populate, AgentInternals, SkillCatalog, SkillChain, SkillOutcome};
use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::blob::{self, BlobStore};
use crate::config::PipelineConfig;
use crate::context::{build_context, ProjectContext};
use crate::logging;
use crate::publish::{self, PagePublisher};

/// External collaborators, borrowed for the lifetime of one pipeline.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub store: &'a dyn BlobStore,
    pub llm: &'a dyn CompletionProvider,
    pub embedder: &'a dyn EmbeddingProvider,
    pub publisher: Option<&'a dyn PagePublisher>,
}

/// Skill outputs for one document, as written to
/// `tmp/skills/<file name>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillRecord {
    pub document: String,
    pub skills: IndexMap<String, SkillOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub document: String,
    pub stage: String,
    pub error: String,
}

impl DocumentFailure {
    fn new(document: &str, stage: &str, err: &anyhow::Error) -> Self {
        Self {
            document: document.to_string(),
            stage: stage.to_string(),
            error: format!("{err:#}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexReport {
    pub indexed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<DocumentFailure>,
    pub chunks: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub indexed: Vec<String>,
    pub succeeded: Vec<String>,
    pub failed: Vec<DocumentFailure>,
    pub answered: usize,
    pub pages: usize,
}

pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    services: Services<'a>,
    catalog: SkillCatalog,
    markers: AgentInternals,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a PipelineConfig, services: Services<'a>) -> Result<Self> {
        Ok(Self {
            config,
            services,
            catalog: config.catalog()?,
            markers: config.markers(),
        })
    }

    /// Blobs directly under the project folder, minus the proposal.
    pub async fn list_documents(&self, project: &str, proposal: Option<&str>) -> Result<Vec<String>> {
        let prefix = format!("{}/", project.trim_end_matches('/'));
        let keys = self.services.store.list(&prefix).await?;
        let proposal = proposal.map(|name| project_key(project, name));
        Ok(blob::direct_children(project, &keys)
            .into_iter()
            .filter(|key| Some(key) != proposal.as_ref())
            .collect())
    }

    /// Reads the context blob, or extracts it from the proposal when it is
    /// absent or `overwrite` is set.
    pub async fn ensure_context(
        &self,
        project: &str,
        proposal: &str,
        overwrite: bool,
    ) -> Result<ProjectContext> {
        let key = self.config.tmp_key(project, &self.config.context_file);
        if !overwrite && self.services.store.exists(&key).await? {
            tracing::info!(key = %key, "reusing stored context");
            return blob::get_json(self.services.store, &key).await;
        }
        let proposal_key = project_key(project, proposal);
        let document = blob::load_document(self.services.store, &proposal_key)
            .await
            .with_context(|| format!("failed to load proposal {proposal_key}"))?;
        let context = build_context(
            self.services.llm,
            &document.annotated_text(),
            &self.markers,
            self.config.max_attempts,
        )
        .await?;
        blob::put_json(self.services.store, &key, &context, true).await?;
        tracing::info!(key = %key, client = %context.context.client, "context written");
        Ok(context)
    }

    pub async fn load_context(&self, project: &str) -> Result<ProjectContext> {
        let key = self.config.tmp_key(project, &self.config.context_file);
        blob::get_json(self.services.store, &key)
            .await
            .with_context(|| format!("no usable context for {project}; run the context step first"))
    }

    pub async fn load_index(&self, project: &str) -> Result<ProjectIndex> {
        let key = self.config.tmp_key(project, &self.config.index_file);
        if self.services.store.exists(&key).await? {
            blob::get_json(self.services.store, &key).await
        } else {
            Ok(ProjectIndex::new())
        }
    }

    /// Embeds every document into the project index, one at a time. The
    /// index blob is rewritten once at the end when anything changed.
    pub async fn index_documents(
        &self,
        project: &str,
        documents: &[String],
        overwrite: bool,
    ) -> Result<IndexReport> {
        let mut index = if overwrite {
            ProjectIndex::new()
        } else {
            self.load_index(project).await?
        };
        let indexer = Indexer::new(self.services.embedder, self.config.indexer_config()?)?;
        let mut report = IndexReport::default();

        for key in documents {
            let name = blob::file_name(key);
            let outcome = async {
                let document = blob::load_document(self.services.store, key).await?;
                indexer.index_document(&mut index, name, &document).await
            }
            .await;
            match outcome {
                Ok(true) => report.indexed.push(key.clone()),
                Ok(false) => report.skipped.push(key.clone()),
                Err(err) => {
                    tracing::warn!(document = %key, error = %format!("{err:#}"), "indexing failed");
                    report.failed.push(DocumentFailure::new(key, "index", &err));
                }
            }
        }

        report.chunks = index.len();
        if overwrite || !report.indexed.is_empty() {
            let key = self.config.tmp_key(project, &self.config.index_file);
            blob::put_json(self.services.store, &key, &index, true).await?;
            tracing::info!(key = %key, chunks = index.len(), "index written");
        }
        Ok(report)
    }

    /// Runs the skill chain over one document using the stored context.
    pub async fn run_skills<S: AsRef<str>>(
        &self,
        project: &str,
        document: &str,
        skills: &[S],
        parent_page: Option<&str>,
    ) -> Result<(SkillRecord, usize)> {
        let context = self.load_context(project).await?;
        let internals = context.internals_for(&self.markers)?;
        let requested = self.requested(skills);
        self.skills_for(project, &project_key(project, document), &requested, &internals, parent_page)
            .await
    }

    async fn skills_for(
        &self,
        project: &str,
        key: &str,
        skills: &[String],
        internals: &AgentInternals,
        parent_page: Option<&str>,
    ) -> Result<(SkillRecord, usize)> {
        let document = blob::load_document(self.services.store, key).await?;
        let chain = SkillChain::new(
            &self.catalog,
            self.services.llm,
            self.config.chain_settings()?,
            self.config.refusal.clone(),
        )?;
        let outcomes = chain.run(skills, internals, &document).await?;
        let record = SkillRecord {
            document: key.to_string(),
            skills: outcomes,
        };
        let out_key = self.config.tmp_key(project, &skills_blob_name(key));
        blob::put_json(self.services.store, &out_key, &record, true).await?;

        let mut pages = 0;
        if let Some((publisher, parent)) = self.publish_target(parent_page) {
            let document_page = publish::publish(publisher, parent, blob::file_stem(key), None, None)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("no page created for {key}"))?;
            pages += 1;
            for (skill, outcome) in &record.skills {
                if let Some(output) = outcome.output() {
                    pages += publish::publish(
                        publisher,
                        &document_page,
                        blob::file_name(key),
                        Some(skill.as_str()),
                        Some(output),
                    )
                    .await?
                    .len();
                }
            }
        }
        Ok((record, pages))
    }

    /// Answers the context's research questions against the project index.
    /// A stored answers blob is returned as-is unless `overwrite` is set.
    /// Answers are published before the blob is written, so a failed publish
    /// is retried by the next run.
    pub async fn answer_questions(
        &self,
        project: &str,
        top_n: Option<usize>,
        parent_page: Option<&str>,
        overwrite: bool,
    ) -> Result<(IndexMap<String, String>, usize)> {
        let key = self.config.tmp_key(project, &self.config.answers_file);
        if !overwrite && self.services.store.exists(&key).await? {
            tracing::info!(key = %key, "reusing stored answers");
            return Ok((blob::get_json(self.services.store, &key).await?, 0));
        }
        let context = self.load_context(project).await?;
        let internals = context.internals_for(&self.markers)?;
        let questions = research_questions(&context.context.research_questions);
        let index = self.load_index(project).await?;
        if index.is_empty() {
            tracing::warn!(project, "answering against an empty index");
        }
        let retriever = Retriever::from_project(&index);
        let template = populate(&self.config.research_answering(), &internals);
        let answers = retriever
            .answer(
                &questions,
                top_n.unwrap_or(self.config.top_n),
                &template,
                self.services.llm,
                self.services.embedder,
            )
            .await?;

        let mut pages = 0;
        if let Some((publisher, parent)) = self.publish_target(parent_page) {
            for (question, answer) in &answers {
                pages += publish::publish(publisher, parent, question, None, Some(answer))
                    .await?
                    .len();
            }
        }
        blob::put_json(self.services.store, &key, &answers, true).await?;
        Ok((answers, pages))
    }

    /// Context, index, per-document skills and research answers. Document
    /// failures are collected in the report; only project-level failures
    /// (context, index blob, answers) abort the run.
    pub async fn run<S: AsRef<str>>(
        &self,
        project: &str,
        proposal: &str,
        skills: &[S],
        parent_page: Option<&str>,
        overwrite: bool,
    ) -> Result<PipelineReport> {
        let documents = self.list_documents(project, Some(proposal)).await?;
        tracing::info!(project, documents = documents.len(), "starting run");

        let context = self
            .ensure_context(project, proposal, overwrite)
            .instrument(logging::stage("context"))
            .await?;
        let internals = context.internals_for(&self.markers)?;

        let index_report = self
            .index_documents(project, &documents, overwrite)
            .instrument(logging::stage("index"))
            .await?;

        let requested = self.requested(skills);
        let (requested, internals) = (&requested, &internals);
        let tasks = documents.iter().map(|key| {
            let span = tracing::info_span!("document", document = %key);
            async move {
                let outcome = self
                    .skills_for(project, key, requested, internals, parent_page)
                    .await;
                (key, outcome)
            }
            .instrument(span)
        });
        let results = join_all(tasks).instrument(logging::stage("skills")).await;

        let mut report = PipelineReport {
            indexed: index_report.indexed,
            failed: index_report.failed,
            ..PipelineReport::default()
        };
        for (key, outcome) in results {
            match outcome {
                Ok((record, pages)) => {
                    let failed_skills = record.skills.values().filter(|o| !o.is_completed()).count();
                    tracing::info!(document = %key, failed_skills, pages, "document done");
                    report.succeeded.push(key.clone());
                    report.pages += pages;
                }
                Err(err) => {
                    tracing::warn!(document = %key, error = %format!("{err:#}"), "document failed");
                    report.failed.push(DocumentFailure::new(key, "skills", &err));
                }
            }
        }

        let (answers, pages) = self
            .answer_questions(project, None, parent_page, overwrite)
            .instrument(logging::stage("answers"))
            .await?;
        report.answered = answers.len();
        report.pages += pages;
        Ok(report)
    }

    fn requested<S: AsRef<str>>(&self, skills: &[S]) -> Vec<String> {
        if skills.is_empty() {
            self.config.default_skills.clone()
        } else {
            skills.iter().map(|s| s.as_ref().to_string()).collect()
        }
    }

    fn publish_target<'p>(&self, parent_page: Option<&'p str>) -> Option<(&'a dyn PagePublisher, &'p str)> {
        let parent = parent_page?;
        match self.services.publisher {
            Some(publisher) => Some((publisher, parent)),
            None => {
                tracing::warn!("parent page given but no publisher configured, skipping publish");
                None
            }
        }
    }
}

/// Skills blob name for a document. The full file name keeps documents
/// that share a stem apart.
pub fn skills_blob_name(key: &str) -> String {
    format!("skills/{}.json", blob::file_name(key))
}

/// `name` as a key under `project`, unless it already is one.
pub fn project_key(project: &str, name: &str) -> String {
    let project = project.trim_end_matches('/');
    if name.starts_with(&format!("{project}/")) {
        name.to_string()
    } else {
        format!("{project}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_joined_once() {
        assert_eq!(project_key("city/p1", "plan.pdf"), "city/p1/plan.pdf");
        assert_eq!(project_key("city/p1/", "city/p1/plan.pdf"), "city/p1/plan.pdf");
    }

    #[test]
    fn skills_blobs_keep_the_extension() {
        assert_eq!(skills_blob_name("p/report.pdf"), "skills/report.pdf.json");
        assert_ne!(skills_blob_name("p/report.json"), skills_blob_name("p/report.JSON"));
    }
}
