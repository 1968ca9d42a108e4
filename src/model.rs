// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Fitted pipeline: a frozen vocabulary plus the classifier trained on it.
//!
//! A [`SentimentModel`] is immutable once built. Inference takes `&self`, so one
//! instance can be shared across threads; retraining produces a new instance.

use crate::classifier::{ClassifierConfig, LogisticRegression};
use crate::datasets::Sentiment;
use crate::error::{Result, SentimentError};
use crate::features::{FeatureVector, TfidfVectorizer, VectorizerConfig, Vocabulary};
use crate::normalize::{normalize, normalize_bytes};
use bincode::Options;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// One point of the hyperparameter grid
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineParams {
    pub vectorizer: VectorizerConfig,
    pub classifier: ClassifierConfig,
}

impl std::fmt::Display for PipelineParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let v = &self.vectorizer;
        write!(
            f,
            "C={} ngram=({},{}) min_df={} max_df={} max_features={}",
            self.classifier.c,
            v.ngram_range.0,
            v.ngram_range.1,
            v.min_df,
            v.max_df,
            v.max_features.map_or_else(|| "none".to_string(), |n| n.to_string()),
        )
    }
}

/// Result of scoring one raw text
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentPrediction {
    pub label: Sentiment,
    /// `max(p0, p1)`
    pub confidence: f64,
    /// `[P(NEGATIVE), P(POSITIVE)]`
    pub probabilities: [f64; 2],
}

/// Highest-weighted tokens in each direction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopFeatures {
    /// Strongest evidence for POSITIVE, largest weight first
    pub positive: Vec<(String, f64)>,
    /// Strongest evidence for NEGATIVE, most negative weight first
    pub negative: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentModel {
    params: PipelineParams,
    vectorizer: TfidfVectorizer,
    vocabulary: Vocabulary,
    classifier: LogisticRegression,
    trained_at: DateTime<Utc>,
    version: String,
}

impl SentimentModel {
    /// Fit vocabulary and classifier on already-normalized texts
    pub fn fit<S: AsRef<str>>(params: &PipelineParams, texts: &[S], labels: &[Sentiment]) -> Result<Self> {
        if texts.len() != labels.len() {
            return Err(SentimentError::schema(format!(
                "{} texts but {} labels",
                texts.len(),
                labels.len()
            )));
        }

        let vectorizer = TfidfVectorizer::new(params.vectorizer.clone());
        let (vocabulary, features) = vectorizer.fit_transform(texts)?;
        let classifier = LogisticRegression::fit(&params.classifier, &features, labels, vocabulary.len())?;

        Ok(Self {
            params: params.clone(),
            vectorizer,
            vocabulary,
            classifier,
            trained_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    fn features(&self, cleaned: &str) -> FeatureVector {
        self.vectorizer.transform(cleaned, &self.vocabulary)
    }

    /// `[P(NEGATIVE), P(POSITIVE)]` for a normalized text
    pub fn predict_proba(&self, cleaned: &str) -> [f64; 2] {
        self.classifier.predict_proba(&self.features(cleaned))
    }

    pub fn predict(&self, cleaned: &str) -> Sentiment {
        self.classifier.predict(&self.features(cleaned))
    }

    pub fn predict_proba_batch<S: AsRef<str>>(&self, cleaned: &[S]) -> Vec<[f64; 2]> {
        cleaned.iter().map(|t| self.predict_proba(t.as_ref())).collect()
    }

    pub fn predict_batch<S: AsRef<str>>(&self, cleaned: &[S]) -> Vec<Sentiment> {
        cleaned.iter().map(|t| self.predict(t.as_ref())).collect()
    }

    /// Normalize and score one raw text
    pub fn classify(&self, raw: &str) -> SentimentPrediction {
        self.prediction(&normalize(raw))
    }

    /// Like [`SentimentModel::classify`], for input that may not be valid UTF-8
    pub fn classify_bytes(&self, raw: &[u8]) -> SentimentPrediction {
        self.prediction(&normalize_bytes(raw))
    }

    fn prediction(&self, cleaned: &str) -> SentimentPrediction {
        let probabilities = self.predict_proba(cleaned);
        let label = if probabilities[1] >= 0.5 {
            Sentiment::Positive
        } else {
            Sentiment::Negative
        };
        SentimentPrediction {
            label,
            confidence: probabilities[0].max(probabilities[1]),
            probabilities,
        }
    }

    /// `(token, coefficient)` for every vocabulary entry, in index order
    pub fn feature_weights(&self) -> Vec<(String, f64)> {
        self.vocabulary
            .terms()
            .iter()
            .zip(self.classifier.weights())
            .map(|(term, w)| (term.clone(), *w))
            .collect()
    }

    /// The `n` most positive and `n` most negative coefficients
    pub fn top_features(&self, n: usize) -> TopFeatures {
        let mut weights = self.feature_weights();
        weights.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let positive = weights.iter().filter(|(_, w)| *w > 0.0).take(n).cloned().collect();
        let negative = weights.iter().rev().filter(|(_, w)| *w < 0.0).take(n).cloned().collect();
        TopFeatures { positive, negative }
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn classifier(&self) -> &LogisticRegression {
        &self.classifier
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Write the model as a single bincode blob, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, self)?;
        tracing::info!("Saved model ({} features) to {}", self.vocabulary.len(), path.display());
        Ok(())
    }

    /// Read a model written by [`SentimentModel::save`]
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(SentimentError::ModelNotAvailable(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let limit = file.metadata()?.len();
        let model: Self = artifact_options(limit).deserialize_from(BufReader::new(file))?;
        tracing::info!(
            "Loaded model v{} trained {} ({} features)",
            model.version,
            model.trained_at.format("%Y-%m-%d %H:%M"),
            model.vocabulary.len()
        );
        Ok(model)
    }

    /// Like [`SentimentModel::load`], but a missing file is `Ok(None)`
    pub fn load_if_exists(path: &Path) -> Result<Option<Self>> {
        match Self::load(path) {
            Ok(model) => Ok(Some(model)),
            Err(SentimentError::ModelNotAvailable(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Decoding options matching `bincode::serialize_into`, with no claimed length
/// allowed past `limit` bytes
fn artifact_options(limit: u64) -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(limit)
}
