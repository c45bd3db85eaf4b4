// Main module for fraud scoring. Trains the encoder and forest from a transaction
// corpus, persists them as one artifact set, and scores new transactions with it.
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, LoggingConfig};
use crate::evaluation::EvaluationReport;
use crate::serving::{RiskLevel, ScoreRequest, ServingContext};

//imports other modules in fraud_scoring
mod artifacts;
mod config;
mod corpus_reader;
mod encoder;
mod error;
mod evaluation;
mod forest;
mod serving;
mod split;
mod training;
mod transaction;

#[derive(Parser)]
#[command(name = "fraud_scoring")]
#[command(about = "Train and serve a per-user transaction fraud classifier")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to config/fraud_scoring.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the encoder and forest on a corpus and write the artifact set
    Train {
        /// Transaction corpus (JSON array or .csv)
        #[arg(long)]
        corpus: Option<PathBuf>,

        /// User whose transactions are trained on
        #[arg(long)]
        user: Option<String>,

        /// Output directory for the artifact set
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Number of trees in the forest
        #[arg(long)]
        trees: Option<usize>,

        /// Random seed for the split and the forest
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Score one transaction
    Score {
        /// Artifact set directory
        #[arg(short, long)]
        model_dir: Option<PathBuf>,

        /// Whole request as JSON instead of individual flags
        #[arg(long, conflicts_with_all = ["amount", "city", "province", "merchant", "date"])]
        json: Option<String>,

        #[arg(long, required_unless_present = "json")]
        amount: Option<f64>,

        #[arg(long, required_unless_present = "json")]
        city: Option<String>,

        #[arg(long, required_unless_present = "json")]
        province: Option<String>,

        /// Merchant reference text
        #[arg(long)]
        merchant: Option<String>,

        /// Transaction time, defaults to now
        #[arg(long)]
        date: Option<String>,
    },

    /// Answer JSON requests read line by line from stdin
    Serve {
        /// Artifact set directory
        #[arg(short, long)]
        model_dir: Option<PathBuf>,
    },

    /// Describe a stored artifact set
    Inspect {
        /// Artifact set directory
        #[arg(short, long)]
        model_dir: Option<PathBuf>,
    },
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("fraud_scoring={}", logging.level)))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

// Prints the holdout evaluation of a finished training run
// Inputs: evaluation report and split sizes
// Outputs: Prints formatted report to console
fn print_evaluation(report: &EvaluationReport, train_rows: usize, holdout_rows: usize) {
    let percent = |value: Option<f64>| match value {
        Some(v) => format!("{:.1}%", v * 100.0),
        None => "n/a".to_string(),
    };

    println!("\nHoldout Evaluation (threshold {:.2}):", report.threshold);
    println!("Training rows: {}", train_rows);
    println!("Holdout rows: {}", holdout_rows);
    if report.support == 0 {
        println!("Holdout split is empty, nothing to evaluate.");
        return;
    }
    let c = &report.confusion;
    println!("Confusion: tp={} fp={} tn={} fn={}",
        c.true_positives, c.false_positives, c.true_negatives, c.false_negatives);
    println!("Accuracy: {}", percent(report.accuracy));
    println!("Precision: {}", percent(report.precision));
    println!("Recall: {}", percent(report.recall));
    println!("F1: {}", percent(report.f1));
}

fn run_train(
    config: &AppConfig,
    corpus: Option<PathBuf>,
    user: Option<String>,
    out: Option<PathBuf>,
) -> Result<()> {
    let corpus = corpus.unwrap_or_else(|| config.corpus.path.clone());
    let user = user.unwrap_or_else(|| config.corpus.user.clone());
    let out = out.unwrap_or_else(|| config.artifacts.dir.clone());

    // A data error anywhere aborts before anything is written
    let rows = corpus_reader::load_corpus(&corpus, &user)
        .with_context(|| format!("failed to load corpus {}", corpus.display()))?;
    let outcome = training::train(&rows, &config.training).context("training failed")?;
    outcome
        .persist(&out)
        .with_context(|| format!("failed to write artifacts to {}", out.display()))?;

    println!("Artifact set {} written to {}", outcome.artifacts.id, out.display());
    print_evaluation(&outcome.report, outcome.train_rows, outcome.holdout_rows);
    Ok(())
}

fn load_context(config: &AppConfig, model_dir: Option<PathBuf>) -> Result<ServingContext> {
    let dir = model_dir.unwrap_or_else(|| config.artifacts.dir.clone());
    let context = ServingContext::load(&dir)
        .with_context(|| format!("failed to load artifact set from {}", dir.display()))?;
    info!(artifact_set = context.artifact_set(), "serving context ready");
    Ok(context)
}

fn run_serve(context: &ServingContext) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = context.respond_json(&line);
        serde_json::to_writer(&mut stdout, &reply)?;
        writeln!(stdout)?;
        stdout.flush()?;
    }
    Ok(())
}

fn run_inspect(context: &ServingContext) {
    let encoder = context.encoder();
    println!("Artifact set: {}", context.artifact_set());
    println!("Format version: {}", artifacts::FORMAT_VERSION);
    println!("Trees: {}", context.classifier().n_trees());
    println!("Vector width: {}", encoder.width());
    println!("Amount mean: {:.4}  std: {:.4}", encoder.amount.mean, encoder.amount.std);
    println!("\nFeatures:");
    for (i, name) in encoder.feature_names().iter().enumerate() {
        println!("{:>4}  {}", i, name);
    }
}

// Main entry point for fraud scoring
// Key steps:
// 1. Resolve configuration and start logging
// 2. Dispatch to train, score, serve or inspect
fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Train { corpus, user, out, trees, seed } => {
            if let Some(trees) = trees {
                config.training.n_trees = trees;
            }
            if let Some(seed) = seed {
                config.training.seed = seed;
            }
            run_train(&config, corpus, user, out)
        }
        Commands::Score { model_dir, json, amount, city, province, merchant, date } => {
            let context = load_context(&config, model_dir)?;
            let request: ScoreRequest = match json {
                Some(json) => serde_json::from_str(&json).context("invalid --json request")?,
                None => ScoreRequest {
                    amount: amount.context("--amount is required")?,
                    city: city.context("--city is required")?,
                    province: province.context("--province is required")?,
                    merchant,
                    date,
                },
            };
            let response = context.handle(&request)?;
            println!("Likelihood of fraud: {:.2}%", response.fraud_probability * 100.0);
            println!("Risk Level: {}", RiskLevel::from_probability(response.fraud_probability).label());
            Ok(())
        }
        Commands::Serve { model_dir } => {
            let context = load_context(&config, model_dir)?;
            run_serve(&context)
        }
        Commands::Inspect { model_dir } => {
            let context = load_context(&config, model_dir)?;
            run_inspect(&context);
            Ok(())
        }
    }
}
