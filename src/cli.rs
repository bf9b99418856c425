// src/cli.rs

use clap::{Args, Parser, Subcommand};
use git_lineage::config::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Trace every line added by each sharing forward to the repository tip
    Survival(Common),
    /// Score each sharing's changeset against its conversation
    Similarity {
        #[command(flatten)]
        common: Common,

        /// Conversation store (JSON object keyed by conversation id)
        #[arg(long)]
        conversations: PathBuf,

        /// Cutoff reported against; overrides `inspired_threshold`
        #[arg(long)]
        threshold: Option<f64>,

        /// Checkpoint every group/unit score, not just the top records
        #[arg(long)]
        all_scores: bool,
    },
}

#[derive(Args, Debug)]
pub struct Common {
    /// Sharing table (JSON Lines)
    #[arg(short, long)]
    pub sharings: PathBuf,

    /// Repository availability record (JSON array)
    #[arg(short, long)]
    pub repositories: PathBuf,

    /// Checkpoint store; created if missing, resumed if present
    #[arg(short, long)]
    pub checkpoint: PathBuf,

    /// Where to write one summary row per sharing (JSON Lines)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Worker threads
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Bound on commits walked from a change to the tip
    #[arg(long)]
    pub max_commits: Option<usize>,

    /// Tip ref for repositories whose availability entry names none
    #[arg(long)]
    pub tip: Option<String>,

    /// Unchanged lines kept around each run of changed lines
    #[arg(long)]
    pub context_lines: Option<usize>,

    /// Base directory for relative clone paths
    #[arg(long)]
    pub repositories_root: Option<PathBuf>,
}

impl Common {
    /// Loads the config file, if any, then applies flag overrides
    pub fn config(&self) -> Result<Config, git_lineage::error::InputError> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(workers) = self.workers {
            config.workers = Some(workers);
        }
        if let Some(max_commits) = self.max_commits {
            config.max_commits = max_commits;
        }
        if let Some(tip) = &self.tip {
            config.tip = tip.clone();
        }
        if let Some(context_lines) = self.context_lines {
            config.context_lines = context_lines;
        }
        if let Some(root) = &self.repositories_root {
            config.repositories_root = Some(root.clone());
        }
        Ok(config)
    }
}
