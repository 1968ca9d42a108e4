// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! L2-regularised logistic regression with balanced class weights
//!
//! Minimises
//!
//! ```text
//! 0.5 * ||w||^2 + C * sum_i s_i * ln(1 + exp(-y_i * (w.x_i + b)))
//! ```
//!
//! where `s_i = n / (2 * n_class(y_i))`, so both classes carry the same total
//! weight however skewed the labels are. The intercept `b` is not penalised.
//! Solved with L-BFGS; running out of iterations logs a warning and keeps the
//! last iterate.

use crate::datasets::Sentiment;
use crate::error::{Result, SentimentError};
use crate::features::FeatureVector;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// L-BFGS memory size
const HISTORY: usize = 10;
/// Armijo sufficient-decrease constant
const ARMIJO: f64 = 1e-4;
const MAX_LINE_SEARCH_STEPS: usize = 50;
/// Relative objective decrease below which the solver stops
const FTOL: f64 = 2.2e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Inverse regularisation strength; smaller is stronger
    pub c: f64,
    /// Solver iteration budget
    pub max_iter: usize,
    /// Stop once the gradient norm falls below `tol` times its starting value
    pub tol: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 1000,
            tol: 1e-4,
        }
    }
}

impl ClassifierConfig {
    pub fn with_c(c: f64) -> Self {
        Self {
            c,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.c.is_finite() && self.c > 0.0) {
            return Err(SentimentError::configuration(format!(
                "regularisation strength C must be positive and finite, got {}",
                self.c
            )));
        }
        if self.max_iter == 0 {
            return Err(SentimentError::configuration("max_iter must be at least 1"));
        }
        Ok(())
    }
}

/// Fitted binary logistic regression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    config: ClassifierConfig,
    weights: Vec<f64>,
    bias: f64,
    /// Balanced weights for (negative, positive)
    class_weights: [f64; 2],
    n_iter: usize,
    converged: bool,
}

impl LogisticRegression {
    /// Fit on sparse rows whose indices lie below `n_features`
    pub fn fit(
        config: &ClassifierConfig,
        features: &[FeatureVector],
        labels: &[Sentiment],
        n_features: usize,
    ) -> Result<Self> {
        config.validate()?;

        if features.len() != labels.len() {
            return Err(SentimentError::schema(format!(
                "{} feature rows but {} labels",
                features.len(),
                labels.len()
            )));
        }

        let n_pos = labels.iter().filter(|l| **l == Sentiment::Positive).count();
        let n_neg = labels.len() - n_pos;
        if n_pos == 0 || n_neg == 0 {
            return Err(SentimentError::configuration(format!(
                "training data needs both classes, got {} positive and {} negative",
                n_pos, n_neg
            )));
        }

        let n = labels.len() as f64;
        let class_weights = [n / (2.0 * n_neg as f64), n / (2.0 * n_pos as f64)];

        let problem = Problem {
            features,
            targets: labels.iter().map(|l| l.to_binary() as f64).collect(),
            sample_weights: labels.iter().map(|l| class_weights[l.to_binary() as usize]).collect(),
            c: config.c,
            n_features,
        };

        let solution = minimize(&problem, config.max_iter, config.tol);

        if !solution.converged {
            tracing::warn!(
                "Logistic regression (C={}) did not converge within {} iterations; using last iterate",
                config.c,
                config.max_iter
            );
        }

        let mut params = solution.params;
        let bias = params.pop().unwrap_or(0.0);

        Ok(Self {
            config: config.clone(),
            weights: params,
            bias,
            class_weights,
            n_iter: solution.n_iter,
            converged: solution.converged,
        })
    }

    /// Raw score `w.x + b`
    pub fn decision_function(&self, features: &FeatureVector) -> f64 {
        features.dot(&self.weights) + self.bias
    }

    /// `[P(negative), P(positive)]`
    pub fn predict_proba(&self, features: &FeatureVector) -> [f64; 2] {
        let p1 = sigmoid(self.decision_function(features));
        [1.0 - p1, p1]
    }

    pub fn predict(&self, features: &FeatureVector) -> Sentiment {
        if self.predict_proba(features)[1] >= 0.5 {
            Sentiment::Positive
        } else {
            Sentiment::Negative
        }
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub fn class_weights(&self) -> [f64; 2] {
        self.class_weights
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    pub fn converged(&self) -> bool {
        self.converged
    }
}

/// Objective over the parameter vector `[w_0 .. w_{d-1}, b]`
struct Problem<'a> {
    features: &'a [FeatureVector],
    targets: Vec<f64>,
    sample_weights: Vec<f64>,
    c: f64,
    n_features: usize,
}

impl Problem<'_> {
    fn dim(&self) -> usize {
        self.n_features + 1
    }

    /// Objective value; writes the gradient into `grad`
    fn evaluate(&self, params: &[f64], grad: &mut [f64]) -> f64 {
        let d = self.n_features;
        let (w, b) = (&params[..d], params[d]);

        let mut loss = 0.5 * dot(w, w);
        grad[..d].copy_from_slice(w);
        grad[d] = 0.0;

        for ((x, &t), &sw) in self.features.iter().zip(&self.targets).zip(&self.sample_weights) {
            let z = x.dot(w) + b;
            let margin = if t > 0.5 { z } else { -z };
            loss += self.c * sw * softplus(-margin);

            let residual = self.c * sw * (sigmoid(z) - t);
            for (i, v) in x.entries() {
                grad[*i] += residual * v;
            }
            grad[d] += residual;
        }

        loss
    }
}

struct Solution {
    params: Vec<f64>,
    n_iter: usize,
    converged: bool,
}

fn minimize(problem: &Problem<'_>, max_iter: usize, tol: f64) -> Solution {
    let n = problem.dim();
    let mut x = vec![0.0; n];
    let mut g = vec![0.0; n];
    let mut f = problem.evaluate(&x, &mut g);

    let threshold = tol * norm(&g).max(1.0);
    if norm(&g) <= threshold {
        return Solution {
            params: x,
            n_iter: 0,
            converged: true,
        };
    }

    let mut history: VecDeque<(Vec<f64>, Vec<f64>, f64)> = VecDeque::with_capacity(HISTORY);
    let mut x_new = vec![0.0; n];
    let mut g_new = vec![0.0; n];
    let mut n_iter = 0;
    let mut converged = false;

    while n_iter < max_iter {
        n_iter += 1;

        let mut direction = two_loop(&g, &history);
        let mut slope = dot(&g, &direction);
        if !(slope < 0.0) {
            history.clear();
            direction = g.iter().map(|v| -v).collect();
            slope = -dot(&g, &g);
        }

        let mut step = if history.is_empty() { 1.0 / norm(&g).max(1.0) } else { 1.0 };
        let mut f_new = f;
        let mut accepted = false;
        for _ in 0..MAX_LINE_SEARCH_STEPS {
            for i in 0..n {
                x_new[i] = x[i] + step * direction[i];
            }
            f_new = problem.evaluate(&x_new, &mut g_new);
            if f_new <= f + ARMIJO * step * slope {
                accepted = true;
                break;
            }
            step *= 0.5;
        }

        if !accepted {
            converged = norm(&g) <= threshold;
            break;
        }

        let s: Vec<f64> = x_new.iter().zip(&x).map(|(a, b)| a - b).collect();
        let y: Vec<f64> = g_new.iter().zip(&g).map(|(a, b)| a - b).collect();
        let sy = dot(&s, &y);
        if sy > 1e-10 {
            if history.len() == HISTORY {
                history.pop_front();
            }
            history.push_back((s, y, 1.0 / sy));
        }

        let decrease = f - f_new;
        std::mem::swap(&mut x, &mut x_new);
        std::mem::swap(&mut g, &mut g_new);
        f = f_new;

        if norm(&g) <= threshold || decrease <= FTOL * f.abs().max(1.0) {
            converged = true;
            break;
        }
    }

    Solution {
        params: x,
        n_iter,
        converged,
    }
}

/// L-BFGS two-loop recursion; returns the search direction `-H g`
fn two_loop(g: &[f64], history: &VecDeque<(Vec<f64>, Vec<f64>, f64)>) -> Vec<f64> {
    let mut q = g.to_vec();
    let mut alphas = Vec::with_capacity(history.len());

    for (s, y, rho) in history.iter().rev() {
        let alpha = rho * dot(s, &q);
        axpy(&mut q, -alpha, y);
        alphas.push(alpha);
    }

    if let Some((s, y, _)) = history.back() {
        let gamma = dot(s, y) / dot(y, y);
        q.iter_mut().for_each(|v| *v *= gamma);
    }

    for ((s, y, rho), alpha) in history.iter().zip(alphas.iter().rev()) {
        let beta = rho * dot(y, &q);
        axpy(&mut q, alpha - beta, s);
    }

    q.iter_mut().for_each(|v| *v = -*v);
    q
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

fn axpy(target: &mut [f64], scale: f64, x: &[f64]) {
    for (t, v) in target.iter_mut().zip(x) {
        *t += scale * v;
    }
}

/// `ln(1 + e^x)` without overflow
fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}
