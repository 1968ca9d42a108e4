// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Training CLI for the review sentiment classifier
//!
//! Usage:
//!   sentiment-train --data ./data --neutral drop --subsample 5000
//!   sentiment-train --config train.json --workers 4
//!   sentiment-train --synthetic 2000 --neutral negative

use anyhow::{bail, Result};
use clap::Parser;
use review_sentiment::datasets::{synthetic_reviews, NeutralPolicy};
use review_sentiment::pipeline::{TrainingConfig, TrainingPipeline};
use review_sentiment::plots::bar_chart;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sentiment-train")]
#[command(about = "Train and evaluate the review sentiment classifier")]
#[command(version)]
struct Args {
    /// Reviews CSV, or a directory containing Reviews.csv
    #[arg(short, long, default_value = "data")]
    data: PathBuf,

    /// Train on a generated corpus of this many reviews instead of --data
    #[arg(long)]
    synthetic: Option<usize>,

    /// JSON config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 3-star reviews: drop them or label them negative (required unless set in --config)
    #[arg(short, long)]
    neutral: Option<NeutralPolicy>,

    /// Keep a random subset of this many reviews
    #[arg(long)]
    subsample: Option<usize>,

    /// Random seed for reproducibility
    #[arg(short, long)]
    seed: Option<u64>,

    /// Cross-validation folds
    #[arg(long)]
    cv_folds: Option<usize>,

    /// Regularisation strengths to search (comma-separated)
    #[arg(long, value_delimiter = ',')]
    c: Option<Vec<f64>>,

    /// Grid-search threads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Output directory for results
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Where to write the trained model
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Hide the grid-search progress bar
    #[arg(long)]
    quiet: bool,
}

fn build_config(args: &Args) -> Result<TrainingConfig> {
    let mut config = match (&args.config, args.neutral) {
        (Some(path), _) => TrainingConfig::from_json_file(path)?,
        (None, Some(neutral)) => TrainingConfig::new(neutral),
        (None, None) => bail!("--neutral <drop|negative> is required when no --config is given"),
    };

    if let Some(neutral) = args.neutral {
        config.neutral = neutral;
    }
    if let Some(n) = args.subsample {
        config.subsample = Some(n);
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(k) = args.cv_folds {
        config.cv_folds = k;
    }
    if let Some(ref c) = args.c {
        config.grid.c_values = c.clone();
    }
    if args.workers.is_some() {
        config.workers = args.workers;
    }
    if let Some(ref out) = args.output {
        config.output_dir = out.clone();
    }
    if let Some(ref model) = args.model {
        config.model_path = model.clone();
    }
    if args.quiet {
        config.show_progress = false;
    }

    Ok(config)
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    tracing::info!("Review Sentiment Training Pipeline");
    tracing::info!("==================================");
    tracing::info!("Neutral policy: {:?}", config.neutral);
    tracing::info!("Seed: {}", config.seed);
    tracing::info!("Grid: {} candidates x {} folds", config.grid.len(), config.cv_folds);

    let pipeline = TrainingPipeline::new(config);
    let run = match args.synthetic {
        Some(n) => pipeline.run(&synthetic_reviews(n, pipeline.config().seed))?,
        None => pipeline.run_from_path(&args.data)?,
    };
    let results = &run.results;

    println!("\n{}", "=".repeat(70));
    println!("TRAINING SUMMARY");
    println!("{}", "=".repeat(70));
    println!(
        "\nBest parameters: {} (mean CV F1={:.4})",
        results.best_params, results.best_cv_score
    );
    println!("\nCross-validation:");
    println!("{:-<70}", "");
    println!("{:<6} {:>10} {:>10}  {}", "Rank", "Mean F1", "Std", "Parameters");
    println!("{:-<70}", "");
    for r in &results.cv_results {
        println!(
            "{:<6} {:>10} {:>10}  {}",
            r.rank.map_or("-".to_string(), |v| v.to_string()),
            r.mean_score.map_or("-".to_string(), |v| format!("{:.4}", v)),
            r.std_score.map_or("-".to_string(), |v| format!("{:.4}", v)),
            r.params
        );
    }
    println!("{:-<70}", "");

    println!("\n{}", results.evaluation.format());
    println!("{}", bar_chart("Predicted sentiment counts", &results.evaluation.predicted_counts, 40));

    if !results.misclassified.is_empty() {
        println!("Misclassified test cases (first {}):", results.misclassified.len());
        for case in &results.misclassified {
            let preview: String = case.text.chars().take(80).collect();
            println!(
                "  true={} pred={} p={:.3}  {}",
                case.truth, case.predicted, case.positive_probability, preview
            );
        }
    }

    let written = pipeline.write_artifacts(&run)?;
    println!();
    for path in written {
        println!("Saved: {}", path.display());
    }

    println!("\nTraining complete!");

    Ok(())
}
