// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Product-review sentiment classification
//!
//! This crate provides:
//! - Deterministic review-text normalization
//! - TF-IDF features over word n-grams with a frozen vocabulary
//! - Class-balanced L2 logistic regression
//! - Stratified k-fold grid search with refit on the full training set
//! - Held-out evaluation (confusion matrix, per-class P/R/F1, ROC-AUC)
//! - Dataset preparation from review tables with seeded randomness

pub mod classifier;
pub mod datasets;
pub mod error;
pub mod features;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod plots;
pub mod selection;

pub use classifier::{ClassifierConfig, LogisticRegression};
pub use datasets::{prepare, NeutralPolicy, PreparedDataset, ReviewRecord, ReviewTable, Sentiment};
pub use error::{Result, SentimentError};
pub use features::{DocFrequency, FeatureVector, TfidfVectorizer, VectorizerConfig, Vocabulary};
pub use metrics::{ClassCounts, ClassMetrics, ConfusionMatrix, EvaluationReport};
pub use model::{PipelineParams, SentimentModel, SentimentPrediction};
pub use normalize::normalize;
pub use pipeline::{TrainingConfig, TrainingPipeline, TrainingResults};
pub use selection::{GridSearch, GridSearchOutcome, ParamGrid};
