// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Evaluation of held-out predictions
//!
//! Implements:
//! - Confusion matrix
//! - Per-class precision, recall and F1 with macro and weighted averages
//! - ROC-AUC over positive-class probabilities
//! - Accuracy, MCC and Brier score
//! - Class counts for charting and a list of misclassified cases

use crate::datasets::Sentiment;
use crate::error::{Result, SentimentError};
use serde::{Deserialize, Serialize};

/// Confusion matrix with POSITIVE as the positive class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Positive reviews predicted positive
    pub tp: usize,
    /// Negative reviews predicted negative
    pub tn: usize,
    /// Negative reviews predicted positive
    pub fp: usize,
    /// Positive reviews predicted negative
    pub fn_: usize,
}

fn ratio(num: usize, denom: usize) -> f64 {
    if denom == 0 {
        0.0
    } else {
        num as f64 / denom as f64
    }
}

fn harmonic_mean(precision: f64, recall: f64) -> f64 {
    let denom = precision + recall;
    if denom == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / denom
    }
}

impl ConfusionMatrix {
    /// Pairs are taken in order; extra entries in the longer slice are ignored
    pub fn from_predictions(ground_truth: &[Sentiment], predictions: &[Sentiment]) -> Self {
        let mut matrix = Self::default();

        for (truth, pred) in ground_truth.iter().zip(predictions) {
            match (truth, pred) {
                (Sentiment::Positive, Sentiment::Positive) => matrix.tp += 1,
                (Sentiment::Negative, Sentiment::Negative) => matrix.tn += 1,
                (Sentiment::Negative, Sentiment::Positive) => matrix.fp += 1,
                (Sentiment::Positive, Sentiment::Negative) => matrix.fn_ += 1,
            }
        }

        matrix
    }

    pub fn total(&self) -> usize {
        self.tp + self.tn + self.fp + self.fn_
    }

    /// (TP + TN) / Total
    pub fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.total())
    }

    /// Precision, recall, F1 and support for one class
    pub fn class_metrics(&self, class: Sentiment) -> ClassMetrics {
        let (hits, false_alarms, misses) = match class {
            Sentiment::Positive => (self.tp, self.fp, self.fn_),
            Sentiment::Negative => (self.tn, self.fn_, self.fp),
        };
        let precision = ratio(hits, hits + false_alarms);
        let recall = ratio(hits, hits + misses);
        ClassMetrics {
            precision,
            recall,
            f1_score: harmonic_mean(precision, recall),
            support: hits + misses,
        }
    }

    /// Matthews correlation coefficient, in [-1, 1]
    pub fn mcc(&self) -> f64 {
        let tp = self.tp as f64;
        let tn = self.tn as f64;
        let fp = self.fp as f64;
        let fn_ = self.fn_ as f64;

        let numerator = tp * tn - fp * fn_;
        let denominator = ((tp + fp) * (tp + fn_) * (tn + fp) * (tn + fn_)).sqrt();

        if denominator == 0.0 {
            return 0.0;
        }
        numerator / denominator
    }

    /// Row-major `[[TN, FP], [FN, TP]]`, rows are true labels
    pub fn as_rows(&self) -> [[usize; 2]; 2] {
        [[self.tn, self.fp], [self.fn_, self.tp]]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

impl ClassMetrics {
    fn macro_average(a: &ClassMetrics, b: &ClassMetrics) -> ClassMetrics {
        ClassMetrics {
            precision: (a.precision + b.precision) / 2.0,
            recall: (a.recall + b.recall) / 2.0,
            f1_score: (a.f1_score + b.f1_score) / 2.0,
            support: a.support + b.support,
        }
    }

    fn weighted_average(a: &ClassMetrics, b: &ClassMetrics) -> ClassMetrics {
        let support = a.support + b.support;
        if support == 0 {
            return ClassMetrics::default();
        }
        let wa = a.support as f64 / support as f64;
        let wb = b.support as f64 / support as f64;
        ClassMetrics {
            precision: wa * a.precision + wb * b.precision,
            recall: wa * a.recall + wb * b.recall,
            f1_score: wa * a.f1_score + wb * b.f1_score,
            support,
        }
    }
}

/// Number of examples per label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCounts {
    pub negative: usize,
    pub positive: usize,
}

impl ClassCounts {
    pub fn from_labels(labels: &[Sentiment]) -> Self {
        let positive = labels.iter().filter(|l| **l == Sentiment::Positive).count();
        Self {
            negative: labels.len() - positive,
            positive,
        }
    }

    pub fn get(&self, class: Sentiment) -> usize {
        match class {
            Sentiment::Negative => self.negative,
            Sentiment::Positive => self.positive,
        }
    }

    pub fn total(&self) -> usize {
        self.negative + self.positive
    }

    /// `(label, count)` in display order
    pub fn entries(&self) -> [(Sentiment, usize); 2] {
        [(Sentiment::Negative, self.negative), (Sentiment::Positive, self.positive)]
    }
}

/// Area under the ROC curve for positive-class scores.
///
/// Tied scores are treated as one threshold step. `None` when only one
/// class is present.
pub fn roc_auc(ground_truth: &[Sentiment], scores: &[f64]) -> Option<f64> {
    let mut pairs: Vec<(Sentiment, f64)> = ground_truth.iter().copied().zip(scores.iter().copied()).collect();
    pairs.sort_by(|a, b| b.1.total_cmp(&a.1));

    let n_pos = pairs.iter().filter(|(l, _)| *l == Sentiment::Positive).count() as f64;
    let n_neg = pairs.len() as f64 - n_pos;
    if n_pos == 0.0 || n_neg == 0.0 {
        return None;
    }

    let mut tp = 0.0;
    let mut fp = 0.0;
    let mut tpr_prev = 0.0;
    let mut fpr_prev = 0.0;
    let mut auc = 0.0;

    let mut i = 0;
    while i < pairs.len() {
        let threshold = pairs[i].1;
        while i < pairs.len() && pairs[i].1 == threshold {
            if pairs[i].0 == Sentiment::Positive {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            i += 1;
        }

        let tpr = tp / n_pos;
        let fpr = fp / n_neg;
        auc += (fpr - fpr_prev) * (tpr + tpr_prev) / 2.0;
        tpr_prev = tpr;
        fpr_prev = fpr;
    }

    Some(auc)
}

/// Mean squared error of positive-class probabilities (lower is better)
pub fn brier_score(ground_truth: &[Sentiment], probabilities: &[f64]) -> Option<f64> {
    if ground_truth.is_empty() {
        return None;
    }
    let sum: f64 = ground_truth
        .iter()
        .zip(probabilities)
        .map(|(label, p)| (p - label.to_binary() as f64).powi(2))
        .sum();
    Some(sum / ground_truth.len() as f64)
}

/// Summary of one held-out evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub confusion_matrix: ConfusionMatrix,
    pub negative: ClassMetrics,
    pub positive: ClassMetrics,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
    pub accuracy: f64,
    pub mcc: f64,
    /// Absent when probabilities were not supplied or only one class is present
    pub roc_auc: Option<f64>,
    pub brier_score: Option<f64>,
    pub true_counts: ClassCounts,
    pub predicted_counts: ClassCounts,
}

impl EvaluationReport {
    /// Evaluate predictions against truth.
    ///
    /// `probabilities` are P(POSITIVE) per example; pass an empty slice to skip
    /// the probabilistic metrics.
    pub fn evaluate(ground_truth: &[Sentiment], predictions: &[Sentiment], probabilities: &[f64]) -> Result<Self> {
        if ground_truth.len() != predictions.len() {
            return Err(SentimentError::schema(format!(
                "{} true labels but {} predictions",
                ground_truth.len(),
                predictions.len()
            )));
        }
        if !probabilities.is_empty() && probabilities.len() != ground_truth.len() {
            return Err(SentimentError::schema(format!(
                "{} true labels but {} probabilities",
                ground_truth.len(),
                probabilities.len()
            )));
        }

        let cm = ConfusionMatrix::from_predictions(ground_truth, predictions);
        let negative = cm.class_metrics(Sentiment::Negative);
        let positive = cm.class_metrics(Sentiment::Positive);
        let (roc_auc, brier) = if probabilities.is_empty() {
            (None, None)
        } else {
            (roc_auc(ground_truth, probabilities), brier_score(ground_truth, probabilities))
        };

        Ok(Self {
            macro_avg: ClassMetrics::macro_average(&negative, &positive),
            weighted_avg: ClassMetrics::weighted_average(&negative, &positive),
            accuracy: cm.accuracy(),
            mcc: cm.mcc(),
            roc_auc,
            brier_score: brier,
            true_counts: ClassCounts::from_labels(ground_truth),
            predicted_counts: ClassCounts::from_labels(predictions),
            confusion_matrix: cm,
            negative,
            positive,
        })
    }

    /// Plain-text report with three decimals
    pub fn format(&self) -> String {
        let row = |name: &str, m: &ClassMetrics| {
            format!(
                "{:>12} {:>9.3} {:>9.3} {:>9.3} {:>9}\n",
                name, m.precision, m.recall, m.f1_score, m.support
            )
        };

        let mut output = String::from("Classification Report\n=====================\n");
        output.push_str(&format!("{:>12} {:>9} {:>9} {:>9} {:>9}\n\n", "", "precision", "recall", "f1-score", "support"));
        output.push_str(&row("NEGATIVE", &self.negative));
        output.push_str(&row("POSITIVE", &self.positive));
        output.push('\n');
        output.push_str(&format!(
            "{:>12} {:>9} {:>9} {:>9.3} {:>9}\n",
            "accuracy",
            "",
            "",
            self.accuracy,
            self.confusion_matrix.total()
        ));
        output.push_str(&row("macro avg", &self.macro_avg));
        output.push_str(&row("weighted avg", &self.weighted_avg));

        let [[tn, fp], [fn_, tp]] = self.confusion_matrix.as_rows();
        output.push_str(&format!(
            r#"
Confusion Matrix (rows: true, columns: predicted)
                NEGATIVE  POSITIVE
    NEGATIVE   {:>8}  {:>8}
    POSITIVE   {:>8}  {:>8}
"#,
            tn, fp, fn_, tp
        ));

        match self.roc_auc {
            Some(auc) => output.push_str(&format!("\nROC-AUC:      {:.3}\n", auc)),
            None => output.push_str("\nROC-AUC:      n/a\n"),
        }
        output.push_str(&format!("MCC:          {:.3}\n", self.mcc));
        if let Some(brier) = self.brier_score {
            output.push_str(&format!("Brier Score:  {:.3}\n", brier));
        }

        output
    }
}

/// A held-out example the model got wrong
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MisclassifiedCase {
    pub text: String,
    pub truth: Sentiment,
    pub predicted: Sentiment,
    pub positive_probability: f64,
}

/// First `limit` examples whose prediction differs from the truth, in input order
pub fn misclassified(
    texts: &[String],
    ground_truth: &[Sentiment],
    predictions: &[Sentiment],
    probabilities: &[f64],
    limit: usize,
) -> Vec<MisclassifiedCase> {
    texts
        .iter()
        .zip(ground_truth)
        .zip(predictions)
        .zip(probabilities)
        .filter(|(((_, truth), pred), _)| truth != pred)
        .take(limit)
        .map(|(((text, truth), pred), p)| MisclassifiedCase {
            text: text.clone(),
            truth: *truth,
            predicted: *pred,
            positive_probability: *p,
        })
        .collect()
}
