// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Hyperparameter search with stratified k-fold cross-validation
//!
//! Every (candidate, fold) pair is an independent fit scored by positive-class
//! F1 on the held-out fold. Pairs run on a rayon pool; results are collected in
//! job order, so the reduction to per-candidate means does not depend on
//! scheduling. The best mean wins, ties go to the earliest candidate, and the
//! winner is refit on the full training set.

use crate::datasets::Sentiment;
use crate::error::{Result, SentimentError};
use crate::features::DocFrequency;
use crate::metrics::ConfusionMatrix;
use crate::model::{PipelineParams, SentimentModel};
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};

/// Values to try for each tunable setting.
///
/// Candidates are the cartesian product, enumerated with `c_values` varying
/// fastest, then `max_features`, `max_df`, `min_df` and `ngram_ranges`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamGrid {
    pub c_values: Vec<f64>,
    pub ngram_ranges: Vec<(usize, usize)>,
    pub min_df: Vec<DocFrequency>,
    pub max_df: Vec<DocFrequency>,
    pub max_features: Vec<Option<usize>>,
}

impl Default for ParamGrid {
    fn default() -> Self {
        Self {
            c_values: vec![0.5, 1.0, 2.0],
            ngram_ranges: vec![(1, 2)],
            min_df: vec![DocFrequency::Count(5)],
            max_df: vec![DocFrequency::Proportion(0.9)],
            max_features: vec![Some(100_000)],
        }
    }
}

impl ParamGrid {
    pub fn len(&self) -> usize {
        self.c_values.len()
            * self.ngram_ranges.len()
            * self.min_df.len()
            * self.max_df.len()
            * self.max_features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expand into concrete parameter sets. Settings not on the grid come from `base`.
    pub fn candidates(&self, base: &PipelineParams) -> Result<Vec<PipelineParams>> {
        let axes = [
            ("c_values", self.c_values.len()),
            ("ngram_ranges", self.ngram_ranges.len()),
            ("min_df", self.min_df.len()),
            ("max_df", self.max_df.len()),
            ("max_features", self.max_features.len()),
        ];
        if let Some((name, _)) = axes.iter().find(|(_, n)| *n == 0) {
            return Err(SentimentError::configuration(format!(
                "hyperparameter grid is empty: no values for {}",
                name
            )));
        }

        let mut out = Vec::with_capacity(self.len());
        for &ngram_range in &self.ngram_ranges {
            for &min_df in &self.min_df {
                for &max_df in &self.max_df {
                    for &max_features in &self.max_features {
                        for &c in &self.c_values {
                            let mut params = base.clone();
                            params.vectorizer.ngram_range = ngram_range;
                            params.vectorizer.min_df = min_df;
                            params.vectorizer.max_df = max_df;
                            params.vectorizer.max_features = max_features;
                            params.classifier.c = c;
                            out.push(params);
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Assign each example to one of `k` folds so that every fold keeps the
/// overall class proportions.
///
/// Members of each class are shuffled with `seed` and dealt round-robin; the
/// dealing continues where the previous class stopped so fold sizes differ by
/// at most one.
pub fn stratified_folds(labels: &[Sentiment], k: usize, seed: u64) -> Result<Vec<usize>> {
    if k < 2 {
        return Err(SentimentError::configuration(format!("cv_folds must be at least 2, got {}", k)));
    }
    if k > labels.len() {
        return Err(SentimentError::configuration(format!(
            "cv_folds={} exceeds the number of training examples ({})",
            k,
            labels.len()
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut assignment = vec![0; labels.len()];
    let mut dealt = 0;

    for class in [Sentiment::Negative, Sentiment::Positive] {
        let mut members: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        if !members.is_empty() && members.len() < k {
            tracing::warn!(
                "Only {} {} examples for {} folds; some folds will lack this class",
                members.len(),
                class,
                k
            );
        }
        members.shuffle(&mut rng);
        for idx in members {
            assignment[idx] = dealt % k;
            dealt += 1;
        }
    }

    Ok(assignment)
}

/// Cross-validation outcome for one candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateResult {
    pub params: PipelineParams,
    pub fold_scores: Vec<f64>,
    /// `None` when a fold could not be fitted
    pub mean_score: Option<f64>,
    pub std_score: Option<f64>,
    /// 1 = best; equal means share a rank
    pub rank: Option<usize>,
    /// Why the candidate was skipped
    pub error: Option<String>,
}

/// Everything produced by a search
#[derive(Debug, Clone)]
pub struct GridSearchOutcome {
    pub best_index: usize,
    pub best_params: PipelineParams,
    pub best_score: f64,
    pub cv_results: Vec<CandidateResult>,
    /// Winner refit on all training data
    pub model: SentimentModel,
}

#[derive(Debug, Clone)]
pub struct GridSearch {
    grid: ParamGrid,
    base: PipelineParams,
    folds: usize,
    seed: u64,
    workers: Option<usize>,
    show_progress: bool,
}

impl GridSearch {
    pub fn new(grid: ParamGrid, base: PipelineParams) -> Self {
        Self {
            grid,
            base,
            folds: 5,
            seed: 42,
            workers: None,
            show_progress: false,
        }
    }

    pub fn with_folds(mut self, folds: usize) -> Self {
        self.folds = folds;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Size of a dedicated thread pool; `None` uses rayon's global pool
    pub fn with_workers(mut self, workers: Option<usize>) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Search the grid on normalized `texts`, then refit the winner on all of them
    pub fn fit<S: AsRef<str> + Sync>(&self, texts: &[S], labels: &[Sentiment]) -> Result<GridSearchOutcome> {
        if texts.len() != labels.len() {
            return Err(SentimentError::schema(format!(
                "{} texts but {} labels",
                texts.len(),
                labels.len()
            )));
        }

        let candidates = self.grid.candidates(&self.base)?;
        let fold_of = stratified_folds(labels, self.folds, self.seed)?;
        let jobs: Vec<(usize, usize)> = (0..candidates.len())
            .flat_map(|c| (0..self.folds).map(move |f| (c, f)))
            .collect();

        tracing::info!(
            "Grid search: {} candidates x {} folds = {} fits",
            candidates.len(),
            self.folds,
            jobs.len()
        );

        let pb = if self.show_progress {
            ProgressBar::new(jobs.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} CV fits: [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let run = || -> Vec<Result<f64>> {
            jobs.par_iter()
                .map(|&(c, f)| {
                    let score = score_fold(&candidates[c], texts, labels, &fold_of, f);
                    pb.inc(1);
                    score
                })
                .collect()
        };

        let scores = match self.workers {
            Some(n) => ThreadPoolBuilder::new()
                .num_threads(n)
                .thread_name(|i| format!("grid-search-{i}"))
                .build()
                .map_err(|e| SentimentError::configuration(format!("Failed to create thread pool: {e}")))?
                .install(run),
            None => run(),
        };
        pb.finish_and_clear();

        let mut scores = scores.into_iter();
        let mut cv_results = Vec::with_capacity(candidates.len());
        for params in candidates {
            let mut fold_scores = Vec::with_capacity(self.folds);
            let mut error = None;
            for score in scores.by_ref().take(self.folds) {
                match score {
                    Ok(s) => fold_scores.push(s),
                    Err(e) if e.is_configuration() => {
                        error.get_or_insert_with(|| e.to_string());
                    }
                    Err(e) => return Err(e),
                }
            }

            let (mean_score, std_score) = match &error {
                Some(msg) => {
                    tracing::warn!("Skipping candidate {}: {}", params, msg);
                    (None, None)
                }
                None => {
                    let (mean, std) = mean_std(&fold_scores);
                    tracing::info!("{}: mean F1 {:.4} (+/- {:.4})", params, mean, std);
                    (Some(mean), Some(std))
                }
            };

            cv_results.push(CandidateResult {
                params,
                fold_scores,
                mean_score,
                std_score,
                rank: None,
                error,
            });
        }

        assign_ranks(&mut cv_results);

        let mut best: Option<(usize, f64)> = None;
        for (i, result) in cv_results.iter().enumerate() {
            if let Some(mean) = result.mean_score {
                if best.map_or(true, |(_, b)| mean > b) {
                    best = Some((i, mean));
                }
            }
        }
        let (best_index, best_score) = best.ok_or_else(|| {
            SentimentError::configuration("no grid candidate could be fitted on every fold; relax the vectorizer thresholds")
        })?;

        let best_params = cv_results[best_index].params.clone();
        tracing::info!("Best parameters: {} (mean F1 {:.4})", best_params, best_score);

        let model = SentimentModel::fit(&best_params, texts, labels)?;
        if !model.classifier().converged() {
            tracing::warn!("Final refit stopped at the iteration budget");
        }

        Ok(GridSearchOutcome {
            best_index,
            best_params,
            best_score,
            cv_results,
            model,
        })
    }
}

/// Fit on every fold but `fold`, return positive-class F1 on `fold`
fn score_fold<S: AsRef<str>>(
    params: &PipelineParams,
    texts: &[S],
    labels: &[Sentiment],
    fold_of: &[usize],
    fold: usize,
) -> Result<f64> {
    let mut train_texts = Vec::new();
    let mut train_labels = Vec::new();
    let mut val_texts = Vec::new();
    let mut val_labels = Vec::new();

    for (i, text) in texts.iter().enumerate() {
        if fold_of[i] == fold {
            val_texts.push(text.as_ref());
            val_labels.push(labels[i]);
        } else {
            train_texts.push(text.as_ref());
            train_labels.push(labels[i]);
        }
    }

    let model = SentimentModel::fit(params, &train_texts, &train_labels)?;
    let predictions = model.predict_batch(&val_texts);
    Ok(ConfusionMatrix::from_predictions(&val_labels, &predictions)
        .class_metrics(Sentiment::Positive)
        .f1_score)
}

/// Mean and population standard deviation
fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn assign_ranks(results: &mut [CandidateResult]) {
    let means: Vec<Option<f64>> = results.iter().map(|r| r.mean_score).collect();
    for (result, own) in results.iter_mut().zip(&means) {
        result.rank = own.map(|m| 1 + means.iter().flatten().filter(|other| **other > m).count());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::{prepare, synthetic_reviews, NeutralPolicy};

    fn small_grid() -> ParamGrid {
        ParamGrid {
            c_values: vec![0.5, 1.0],
            ngram_ranges: vec![(1, 1), (1, 2)],
            min_df: vec![DocFrequency::Count(2)],
            max_df: vec![DocFrequency::Proportion(0.9)],
            max_features: vec![None],
        }
    }

    fn training_data() -> (Vec<String>, Vec<Sentiment>) {
        let data = prepare(&synthetic_reviews(300, 5), NeutralPolicy::Negative, None, 0).unwrap();
        (data.texts, data.labels)
    }

    #[test]
    fn test_grid_enumeration_order() {
        let candidates = small_grid().candidates(&PipelineParams::default()).unwrap();
        assert_eq!(candidates.len(), 4);

        let order: Vec<(f64, (usize, usize))> = candidates
            .iter()
            .map(|p| (p.classifier.c, p.vectorizer.ngram_range))
            .collect();
        assert_eq!(order, vec![(0.5, (1, 1)), (1.0, (1, 1)), (0.5, (1, 2)), (1.0, (1, 2))]);
    }

    #[test]
    fn test_default_grid() {
        let grid = ParamGrid::default();
        assert_eq!(grid.len(), 3);
        let candidates = grid.candidates(&PipelineParams::default()).unwrap();
        assert_eq!(candidates[0].vectorizer.min_df, DocFrequency::Count(5));
        assert_eq!(candidates[2].classifier.c, 2.0);
    }

    #[test]
    fn test_empty_grid_is_configuration_error() {
        let grid = ParamGrid {
            c_values: vec![],
            ..ParamGrid::default()
        };
        assert!(grid.is_empty());
        let err = grid.candidates(&PipelineParams::default()).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("c_values"));
    }

    #[test]
    fn test_stratified_folds() {
        let labels: Vec<Sentiment> = (0..103)
            .map(|i| if i % 4 == 0 { Sentiment::Negative } else { Sentiment::Positive })
            .collect();
        let folds = stratified_folds(&labels, 5, 1).unwrap();

        assert_eq!(folds.len(), labels.len());
        for f in 0..5 {
            let members: Vec<usize> = (0..labels.len()).filter(|&i| folds[i] == f).collect();
            assert!(members.len() == 20 || members.len() == 21);
            let neg = members.iter().filter(|&&i| labels[i] == Sentiment::Negative).count();
            assert!(neg == 5 || neg == 6, "fold {} has {} negatives", f, neg);
        }
        assert_eq!(folds, stratified_folds(&labels, 5, 1).unwrap());
        assert!(stratified_folds(&labels, 1, 1).is_err());
        assert!(stratified_folds(&labels[..3], 5, 1).is_err());
    }

    #[test]
    fn test_search_selects_argmax_and_refits() {
        let (texts, labels) = training_data();
        let outcome = GridSearch::new(small_grid(), PipelineParams::default())
            .with_folds(3)
            .fit(&texts, &labels)
            .unwrap();

        assert_eq!(outcome.cv_results.len(), 4);
        for result in &outcome.cv_results {
            assert_eq!(result.fold_scores.len(), 3);
            assert!(result.mean_score.unwrap() <= outcome.best_score);
        }
        assert_eq!(outcome.cv_results[outcome.best_index].rank, Some(1));
        assert_eq!(outcome.best_params, outcome.cv_results[outcome.best_index].params);
        assert_eq!(outcome.model.params(), &outcome.best_params);
        assert_eq!(outcome.model.vocabulary().n_documents(), texts.len());
        assert!(outcome.best_score > 0.8);
    }

    #[test]
    fn test_ties_go_to_earliest_candidate() {
        let (texts, labels) = training_data();
        let grid = ParamGrid {
            c_values: vec![1.0, 1.0],
            ..small_grid()
        };
        let outcome = GridSearch::new(grid, PipelineParams::default())
            .with_folds(3)
            .fit(&texts, &labels)
            .unwrap();

        let means: Vec<f64> = outcome.cv_results.iter().map(|r| r.mean_score.unwrap()).collect();
        assert_eq!(means[0], means[1]);
        let best = means.iter().cloned().fold(f64::MIN, f64::max);
        let first_best = means.iter().position(|m| *m == best).unwrap();
        assert_eq!(outcome.best_index, first_best);
    }

    #[test]
    fn test_unfittable_candidates_are_skipped() {
        let (texts, labels) = training_data();
        let grid = ParamGrid {
            c_values: vec![1.0],
            min_df: vec![DocFrequency::Count(100_000), DocFrequency::Count(2)],
            ..small_grid()
        };
        let outcome = GridSearch::new(grid, PipelineParams::default())
            .with_folds(3)
            .fit(&texts, &labels)
            .unwrap();

        let skipped = &outcome.cv_results[0];
        assert!(skipped.mean_score.is_none());
        assert!(skipped.rank.is_none());
        assert!(skipped.error.is_some());
        assert_eq!(outcome.best_params.vectorizer.min_df, DocFrequency::Count(2));

        let hopeless = ParamGrid {
            min_df: vec![DocFrequency::Count(100_000)],
            ..small_grid()
        };
        let err = GridSearch::new(hopeless, PipelineParams::default())
            .with_folds(3)
            .fit(&texts, &labels)
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_dedicated_pool_matches_global_pool() {
        let (texts, labels) = training_data();
        let search = GridSearch::new(small_grid(), PipelineParams::default()).with_folds(3);
        let a = search.clone().fit(&texts, &labels).unwrap();
        let b = search.with_workers(Some(2)).fit(&texts, &labels).unwrap();

        let scores = |o: &GridSearchOutcome| -> Vec<Vec<f64>> {
            o.cv_results.iter().map(|r| r.fold_scores.clone()).collect()
        };
        assert_eq!(scores(&a), scores(&b));
        assert_eq!(a.best_index, b.best_index);
    }

    #[test]
    fn test_mean_std() {
        let (mean, std) = mean_std(&[1.0, 3.0]);
        assert_eq!(mean, 2.0);
        assert_eq!(std, 1.0);
    }
}
