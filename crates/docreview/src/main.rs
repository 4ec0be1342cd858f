use anyhow::Result;
use clap::Parser;
use serde::Serialize;

use docreview::cli::{Cli, Command};
use docreview::config::PipelineConfig;
use docreview::pipeline::{Pipeline, Services};
use docreview::{logging, LocalBlobStore, NotionPublisher, PagePublisher};
use docreview_llm::LlmClient;
use docreview_rag::EmbeddingClient;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = if cli.verbose {
        true
    } else {
        logging::env_flag()
    };
    logging::init(verbose);
    let config = PipelineConfig::load(&cli.config)?;

    let store = LocalBlobStore::new(&config.store_root);
    let llm = LlmClient::new(
        config.llm_provider()?,
        config.model()?,
        config.secrets.openai_api_key.clone(),
        config.base_url.clone(),
    )?;
    let embedder = EmbeddingClient::new(
        config.embedding_kind()?,
        config.embedding_model.clone(),
        config.embedding_api_key()?,
    )?;
    let notion = config
        .secrets
        .notion_token
        .as_ref()
        .map(|token| NotionPublisher::new(token.clone(), config.notion_version.clone()));
    let services = Services {
        store: &store,
        llm: &llm,
        embedder: &embedder,
        publisher: notion.as_ref().map(|p| p as &dyn PagePublisher),
    };
    let pipeline = Pipeline::new(&config, services)?;

    match cli.command {
        Command::Context {
            project,
            proposal,
            overwrite,
        } => print_json(&pipeline.ensure_context(&project, &proposal, overwrite).await?),
        Command::Index {
            project,
            proposal,
            overwrite,
        } => {
            let documents = pipeline.list_documents(&project, Some(&proposal)).await?;
            print_json(&pipeline.index_documents(&project, &documents, overwrite).await?)
        }
        Command::Skills {
            project,
            file,
            skills,
            parent_page,
        } => {
            let (record, _) = pipeline
                .run_skills(&project, &file, &skills, parent_page.as_deref())
                .await?;
            print_json(&record)
        }
        Command::Answer {
            project,
            top_n,
            parent_page,
            overwrite,
        } => {
            let (answers, _) = pipeline
                .answer_questions(&project, top_n, parent_page.as_deref(), overwrite)
                .await?;
            print_json(&answers)
        }
        Command::Run {
            project,
            proposal,
            skills,
            parent_page,
            overwrite,
        } => print_json(
            &pipeline
                .run(&project, &proposal, &skills, parent_page.as_deref(), overwrite)
                .await?,
        ),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
