// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Reproducible training pipeline for review sentiment
//!
//! Orchestrates:
//! - Dataset preparation and the stratified hold-out split
//! - Cross-validated grid search and the final refit
//! - Held-out evaluation
//! - Artifact, results and report serialization

use crate::classifier::ClassifierConfig;
use crate::datasets::{label_distribution, prepare, stratified_split, NeutralPolicy, PreparedDataset, PrepareStats, ReviewTable};
use crate::features::VectorizerConfig;
use crate::metrics::{misclassified, EvaluationReport, MisclassifiedCase};
use crate::model::{PipelineParams, SentimentModel};
use crate::plots::{bar_chart, write_counts_png, COUNTS_CHART_FILE};
use crate::selection::{CandidateResult, GridSearch, ParamGrid};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Number of misclassified held-out examples kept in the results
pub const MISCLASSIFIED_LIMIT: usize = 25;

fn default_seed() -> u64 {
    42
}

fn default_test_fraction() -> f64 {
    0.2
}

fn default_cv_folds() -> usize {
    5
}

fn default_max_iter() -> usize {
    1000
}

fn default_tol() -> f64 {
    1e-4
}

fn default_true() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_model_path() -> PathBuf {
    PathBuf::from("data/sentiment_model.bin")
}

/// Configuration for a training run.
///
/// `neutral` has no default: a config file that omits it does not parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Treatment of 3-star reviews
    pub neutral: NeutralPolicy,
    /// Keep a seeded random subset of this many prepared reviews
    #[serde(default)]
    pub subsample: Option<usize>,
    /// Random seed for subsampling, splitting and fold assignment
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Share of prepared reviews held out for evaluation
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    #[serde(default = "default_cv_folds")]
    pub cv_folds: usize,
    /// Grid-search threads (rayon global pool when absent)
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default = "default_tol")]
    pub tol: f64,
    #[serde(default)]
    pub grid: ParamGrid,
    #[serde(default = "default_true")]
    pub sublinear_tf: bool,
    #[serde(default = "default_true")]
    pub strip_accents: bool,
    /// Directory for results, report, processed data and charts
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    #[serde(default = "default_true")]
    pub show_progress: bool,
    /// Write the cleaned, labelled rows to `processed_reviews.csv`
    #[serde(default = "default_true")]
    pub export_processed: bool,
}

impl TrainingConfig {
    pub fn new(neutral: NeutralPolicy) -> Self {
        Self {
            neutral,
            subsample: None,
            seed: default_seed(),
            test_fraction: default_test_fraction(),
            cv_folds: default_cv_folds(),
            workers: None,
            max_iter: default_max_iter(),
            tol: default_tol(),
            grid: ParamGrid::default(),
            sublinear_tf: true,
            strip_accents: true,
            output_dir: default_output_dir(),
            model_path: default_model_path(),
            show_progress: true,
            export_processed: true,
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Settings shared by every grid candidate
    pub fn base_params(&self) -> PipelineParams {
        PipelineParams {
            vectorizer: VectorizerConfig {
                sublinear_tf: self.sublinear_tf,
                strip_accents: self.strip_accents,
                ..VectorizerConfig::default()
            },
            classifier: ClassifierConfig {
                max_iter: self.max_iter,
                tol: self.tol,
                ..ClassifierConfig::default()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSummary {
    /// Where the reviews came from, if read from disk
    pub source: Option<String>,
    pub stats: PrepareStats,
    pub train_samples: usize,
    pub test_samples: usize,
    pub label_distribution: HashMap<String, usize>,
}

/// Complete results of a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingResults {
    pub config: TrainingConfig,
    pub dataset: DatasetSummary,
    pub cv_results: Vec<CandidateResult>,
    pub best_params: PipelineParams,
    pub best_cv_score: f64,
    pub evaluation: EvaluationReport,
    pub misclassified: Vec<MisclassifiedCase>,
    pub vocabulary_size: usize,
    pub converged: bool,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

/// Everything a run produces
#[derive(Debug)]
pub struct TrainingRun {
    pub results: TrainingResults,
    pub model: SentimentModel,
    pub prepared: PreparedDataset,
}

/// Main training pipeline
pub struct TrainingPipeline {
    config: TrainingConfig,
}

impl TrainingPipeline {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Load reviews from a CSV file or a directory holding `Reviews.csv`, then run
    pub fn run_from_path(&self, path: &Path) -> Result<TrainingRun> {
        let table = ReviewTable::from_path(path).with_context(|| format!("Failed to load reviews from {}", path.display()))?;
        let mut run = self.run(&table)?;
        run.results.dataset.source = Some(path.display().to_string());
        Ok(run)
    }

    /// Run the full pipeline on an in-memory table
    pub fn run(&self, table: &ReviewTable) -> Result<TrainingRun> {
        let config = &self.config;

        let prepared = prepare(table, config.neutral, config.subsample, config.seed)?;
        let (train_idx, test_idx) = stratified_split(&prepared.labels, config.test_fraction, config.seed)?;
        let (train_texts, train_labels) = prepared.subset(&train_idx);
        let (test_texts, test_labels) = prepared.subset(&test_idx);

        tracing::info!(
            "Split {} examples into train={} and test={}",
            prepared.len(),
            train_idx.len(),
            test_idx.len()
        );

        let outcome = GridSearch::new(config.grid.clone(), config.base_params())
            .with_folds(config.cv_folds)
            .with_seed(config.seed)
            .with_workers(config.workers)
            .with_progress(config.show_progress)
            .fit(&train_texts, &train_labels)
            .context("Model selection failed")?;
        let model = outcome.model;

        let probabilities: Vec<f64> = model.predict_proba_batch(&test_texts).iter().map(|p| p[1]).collect();
        let predictions = model.predict_batch(&test_texts);
        let evaluation = EvaluationReport::evaluate(&test_labels, &predictions, &probabilities)?;

        tracing::info!(
            "Held-out: accuracy {:.4}, positive F1 {:.4}, ROC-AUC {}",
            evaluation.accuracy,
            evaluation.positive.f1_score,
            evaluation.roc_auc.map_or_else(|| "n/a".to_string(), |v| format!("{:.4}", v))
        );

        let misclassified = misclassified(&test_texts, &test_labels, &predictions, &probabilities, MISCLASSIFIED_LIMIT);

        let dataset = DatasetSummary {
            source: None,
            stats: prepared.stats.clone(),
            train_samples: train_idx.len(),
            test_samples: test_idx.len(),
            label_distribution: label_distribution(&prepared.labels)
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        };

        let results = TrainingResults {
            config: config.clone(),
            dataset,
            cv_results: outcome.cv_results,
            best_params: outcome.best_params,
            best_cv_score: outcome.best_score,
            evaluation,
            misclassified,
            vocabulary_size: model.vocabulary().len(),
            converged: model.classifier().converged(),
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };

        Ok(TrainingRun {
            results,
            model,
            prepared,
        })
    }

    /// Save results to JSON file
    pub fn save_results(results: &TrainingResults, output_path: &Path) -> Result<()> {
        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(output_path, json)?;
        tracing::info!("Results saved to {}", output_path.display());
        Ok(())
    }

    /// Write model, results, report, processed data and chart. Returns the paths written.
    pub fn write_artifacts(&self, run: &TrainingRun) -> Result<Vec<PathBuf>> {
        let out = &self.config.output_dir;
        std::fs::create_dir_all(out).with_context(|| format!("Failed to create {}", out.display()))?;
        let mut written = Vec::new();

        run.model
            .save(&self.config.model_path)
            .with_context(|| format!("Failed to save model to {}", self.config.model_path.display()))?;
        written.push(self.config.model_path.clone());

        let results_path = out.join("results.json");
        Self::save_results(&run.results, &results_path)?;
        written.push(results_path);

        let report_path = out.join("report.md");
        std::fs::write(&report_path, Self::generate_report(&run.results))?;
        tracing::info!("Report saved to {}", report_path.display());
        written.push(report_path);

        if self.config.export_processed {
            let processed_path = out.join("processed_reviews.csv");
            run.prepared.write_csv(&processed_path)?;
            tracing::info!("Processed reviews saved to {}", processed_path.display());
            written.push(processed_path);
        }

        let chart_path = out.join(COUNTS_CHART_FILE);
        match write_counts_png("Predicted sentiment counts", &run.results.evaluation.predicted_counts, &chart_path) {
            Ok(true) => written.push(chart_path),
            Ok(false) => {}
            Err(e) => tracing::warn!("Could not draw {}: {}", chart_path.display(), e),
        }

        Ok(written)
    }

    /// Generate a markdown report
    pub fn generate_report(results: &TrainingResults) -> String {
        let mut report = String::new();

        report.push_str("# Review Sentiment Training Report\n\n");
        report.push_str(&format!("**Generated:** {}\n\n", results.timestamp.format("%Y-%m-%d %H:%M:%S UTC")));
        report.push_str(&format!("**Version:** {}\n\n", results.version));

        let ds = &results.dataset;
        report.push_str("## Dataset\n\n");
        if let Some(ref source) = ds.source {
            report.push_str(&format!("- **Source:** {}\n", source));
        }
        report.push_str(&format!("- **Input Rows:** {}\n", ds.stats.input_rows));
        report.push_str(&format!("- **Prepared Rows:** {}\n", ds.stats.output_rows));
        report.push_str(&format!(
            "- **Dropped:** {} unusable scores, {} neutral, {} by subsampling\n",
            ds.stats.invalid_score + ds.stats.out_of_range_score,
            ds.stats.dropped_neutral,
            ds.stats.subsampled_out
        ));
        report.push_str(&format!("- **Neutral Policy:** {:?}\n", results.config.neutral));
        report.push_str(&format!("- **Split Sizes:** Train={}, Test={}\n", ds.train_samples, ds.test_samples));
        let mut dist: Vec<_> = ds.label_distribution.iter().collect();
        dist.sort();
        let dist: Vec<String> = dist.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        report.push_str(&format!("- **Labels:** {}\n\n", dist.join(", ")));

        report.push_str("## Model Selection\n\n");
        report.push_str(&format!(
            "**Best Parameters:** {} (mean CV F1={:.4})\n\n",
            results.best_params, results.best_cv_score
        ));
        report.push_str(&format!(
            "**Vocabulary Size:** {} | **Converged:** {}\n\n",
            results.vocabulary_size, results.converged
        ));
        report.push_str("| Rank | Parameters | Mean F1 | Std | Fold Scores |\n");
        report.push_str("|------|------------|---------|-----|-------------|\n");
        for r in &results.cv_results {
            let rank = r.rank.map_or("-".to_string(), |v| v.to_string());
            let mean = r.mean_score.map_or("-".to_string(), |v| format!("{:.4}", v));
            let std = r.std_score.map_or("-".to_string(), |v| format!("{:.4}", v));
            let folds: Vec<String> = r.fold_scores.iter().map(|s| format!("{:.3}", s)).collect();
            report.push_str(&format!("| {} | {} | {} | {} | {} |\n", rank, r.params, mean, std, folds.join(" ")));
        }

        report.push_str("\n## Held-out Evaluation\n\n");
        report.push_str(&format!("```\n{}\n```\n\n", results.evaluation.format()));
        report.push_str(&format!(
            "```\n{}```\n\n",
            bar_chart("Predicted sentiment counts", &results.evaluation.predicted_counts, 40)
        ));

        if !results.misclassified.is_empty() {
            report.push_str("## Misclassified Examples\n\n");
            report.push_str("| Truth | Predicted | P(POSITIVE) | Text |\n");
            report.push_str("|-------|-----------|-------------|------|\n");
            for case in &results.misclassified {
                let preview: String = case.text.chars().take(100).collect();
                report.push_str(&format!(
                    "| {} | {} | {:.3} | {} |\n",
                    case.truth, case.predicted, case.positive_probability, preview
                ));
            }
            report.push('\n');
        }

        report.push_str("## Configuration\n\n");
        report.push_str(&format!(
            "```json\n{}\n```\n",
            serde_json::to_string_pretty(&results.config).unwrap_or_default()
        ));

        report
    }
}
