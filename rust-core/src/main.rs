use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use csat::common::config::AppCfg;
use csat::common::log;
use csat::evaluation::FsRegistry;
use csat::inference::{Predictor, RawRecord};
use csat::pipeline::{self, Stage};

#[derive(Parser, Debug)]
#[command(name = "csat", version, about = "Customer-satisfaction training pipeline")]
struct Cli {
    /// Pipeline configuration document.
    #[arg(long, global = true, default_value = "config/pipeline.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every stage, or a single stage from its persisted inputs.
    Run {
        /// ingestion, validation, features, transformation, training or evaluation.
        #[arg(long)]
        stage: Option<String>,
    },
    /// Score one raw JSON record against the production bundle.
    Predict {
        /// File holding a JSON object of raw feature values.
        #[arg(long, conflicts_with = "json")]
        record: Option<PathBuf>,
        /// Inline JSON object of raw feature values.
        #[arg(long)]
        json: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = AppCfg::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    log::init(&cfg.logging.level);

    match cli.command {
        Commands::Run { stage: None } => {
            let run = pipeline::run_pipeline(&cfg)?;
            println!("champion: {} ({}, tag {})", run.champion, run.version, run.tag);
        }
        Commands::Run { stage: Some(stage) } => {
            let stage: Stage = stage.parse()?;
            pipeline::run_single(&cfg, stage)?;
        }
        Commands::Predict { record, json } => {
            let raw = match (record, json) {
                (Some(path), _) => fs::read_to_string(&path)
                    .with_context(|| format!("reading record {}", path.display()))?,
                (None, Some(json)) => json,
                (None, None) => anyhow::bail!("pass --record <file> or --json '<object>'"),
            };
            let record: RawRecord = serde_json::from_str(&raw).context("record must be a JSON object")?;
            let predictor = Predictor::new(FsRegistry::new(&cfg.serving.registry_dir), cfg.serving.reload);
            let prediction = predictor.predict(&record)?;
            println!("{}", serde_json::to_string(&prediction)?);
        }
    }
    Ok(())
}
