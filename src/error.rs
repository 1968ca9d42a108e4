// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Error types for the sentiment pipeline
//!
//! Fatal conditions are split by who can fix them:
//! - `Schema`: the input table is missing required columns
//! - `Configuration`: a grid or vectorizer setting cannot produce a model
//! - `ModelNotAvailable`: an inference caller asked for an artifact that is not there
//!
//! Classifier non-convergence is deliberately absent: it is logged, not raised.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SentimentError {
    /// Required input fields missing or of the wrong shape
    #[error("Schema error: {0}")]
    Schema(String),

    /// Hyperparameters or thresholds that leave nothing to fit
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No persisted model at the given path
    #[error("Model not available at {}", .0.display())]
    ModelNotAvailable(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Artifact encoding error: {0}")]
    Artifact(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SentimentError {
    pub fn schema<S: Into<String>>(msg: S) -> Self {
        SentimentError::Schema(msg.into())
    }

    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        SentimentError::Configuration(msg.into())
    }

    /// True for errors the caller can only fix by changing settings
    pub fn is_configuration(&self) -> bool {
        matches!(self, SentimentError::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, SentimentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SentimentError::schema("Missing columns: Score");
        assert_eq!(err.to_string(), "Schema error: Missing columns: Score");

        let err = SentimentError::configuration("hyperparameter grid is empty");
        assert!(err.is_configuration());
        assert!(err.to_string().contains("grid is empty"));

        let err = SentimentError::ModelNotAvailable(PathBuf::from("data/model.bin"));
        assert_eq!(err.to_string(), "Model not available at data/model.bin");
    }
}
