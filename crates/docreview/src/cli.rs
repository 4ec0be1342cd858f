use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::config::DEFAULT_CONFIG;

#[derive(Parser, Debug)]
#[command(name = "docreview", about = "Strategic document review pipeline")]
pub struct Cli {
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract client, problem statement and research questions from the proposal.
    Context {
        project: String,
        #[arg(long)]
        proposal: String,
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// Embed every project document into the project index.
    Index {
        project: String,
        #[arg(long)]
        proposal: String,
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// Run the skill chain over one document.
    Skills {
        project: String,
        file: String,
        /// Comma-separated skill names; the configured defaults when omitted.
        #[arg(long, value_delimiter = ',')]
        skills: Vec<String>,
        #[arg(long)]
        parent_page: Option<String>,
    },
    /// Answer the research questions against the project index.
    Answer {
        project: String,
        #[arg(long)]
        top_n: Option<usize>,
        #[arg(long)]
        parent_page: Option<String>,
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// Context, index, skills and answers in one go.
    Run {
        project: String,
        #[arg(long)]
        proposal: String,
        #[arg(long, value_delimiter = ',')]
        skills: Vec<String>,
        #[arg(long)]
        parent_page: Option<String>,
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_skill_list() {
        let cli = Cli::parse_from([
            "docreview",
            "--verbose",
            "run",
            "city/sub_project_1",
            "--proposal",
            "proposal.pdf",
            "--skills",
            "summarization,keypoints,quotes",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG));
        match cli.command {
            Command::Run {
                project,
                skills,
                parent_page,
                overwrite,
                ..
            } => {
                assert_eq!(project, "city/sub_project_1");
                assert_eq!(skills, ["summarization", "keypoints", "quotes"]);
                assert!(parent_page.is_none());
                assert!(!overwrite);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
