// src/main.rs

mod cli;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Command, Common};
use git_lineage::config::Config;
use git_lineage::inputs::{load_sharings, Availability, ConversationStore, SharingTable};
use git_lineage::pipeline::{self, RunReport};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn,git_lineage=info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let start_time = Instant::now();

    let report = match &cli.command {
        Command::Survival(common) => {
            let (config, table, availability) = load_common(common)?;
            let outcome = pipeline::run_survival(&table.sharings, &availability, &config, &common.checkpoint)?;
            if let Some(output) = &common.output {
                pipeline::write_rows(output, &pipeline::survival_rows(&table.sharings, &outcome))?;
            }
            RunReport::for_survival(table.sharings.len(), &outcome)
                .with_rejected_rows(table.rejected)
        }
        Command::Similarity {
            common,
            conversations,
            threshold,
            all_scores,
        } => {
            let (mut config, table, availability) = load_common(common)?;
            config.keep_all_scores |= *all_scores;
            let conversations = ConversationStore::load(conversations)
                .with_context(|| format!("loading conversations from {}", conversations.display()))?;
            info!(conversations = conversations.len(), "loaded conversation store");
            let outcome = pipeline::run_similarity(
                &table.sharings,
                &availability,
                &conversations,
                &config,
                &common.checkpoint,
            )?;
            if let Some(output) = &common.output {
                pipeline::write_rows(output, &pipeline::similarity_rows(&table.sharings, &outcome))?;
            }
            let threshold = threshold.unwrap_or(config.inspired_threshold);
            RunReport::for_similarity(table.sharings.len(), &outcome, threshold)
                .with_rejected_rows(table.rejected)
        }
    };

    println!("{report}");
    println!("Total time: {:.2?}", start_time.elapsed());
    Ok(())
}

fn load_common(common: &Common) -> anyhow::Result<(Config, SharingTable, Availability)> {
    let config = common.config().context("loading configuration")?;
    let table = load_sharings(&common.sharings)?;
    let availability = Availability::load(&common.repositories, config.repositories_root.as_deref())?;
    info!(
        sharings = table.sharings.len(),
        rejected = table.rejected,
        "loaded sharing table"
    );
    Ok((config, table, availability))
}
