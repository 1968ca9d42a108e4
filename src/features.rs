// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Sparse TF-IDF features over word n-grams
//!
//! `TfidfVectorizer::fit` learns a frozen [`Vocabulary`] from a corpus;
//! `TfidfVectorizer::transform` maps any text onto that vocabulary. Terms that
//! were not kept at fit time are dropped silently.
//!
//! Weighting per term: `tf' * idf`, where `tf'` is the raw count or
//! `1 + ln(count)` with sublinear scaling, and
//! `idf = ln((1 + N) / (1 + df)) + 1`. Rows are L2-normalised.

use crate::error::{Result, SentimentError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Runs of two or more word characters
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w\w+\b").unwrap());

/// Document-frequency threshold, either an absolute document count or a
/// fraction of the corpus
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocFrequency {
    Count(usize),
    Proportion(f64),
}

impl DocFrequency {
    /// Threshold expressed in documents for a corpus of `n_docs`
    pub fn to_count(&self, n_docs: usize) -> f64 {
        match *self {
            DocFrequency::Count(c) => c as f64,
            DocFrequency::Proportion(p) => p * n_docs as f64,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if let DocFrequency::Proportion(p) = *self {
            if !(0.0..=1.0).contains(&p) {
                return Err(SentimentError::configuration(format!(
                    "{} proportion must lie in [0, 1], got {}",
                    name, p
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for DocFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocFrequency::Count(c) => write!(f, "{}", c),
            DocFrequency::Proportion(p) => write!(f, "{}", p),
        }
    }
}

/// Vectorizer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorizerConfig {
    /// Inclusive (min, max) n-gram length in tokens
    pub ngram_range: (usize, usize),
    /// Terms in fewer documents than this are discarded
    pub min_df: DocFrequency,
    /// Terms in more documents than this are discarded
    pub max_df: DocFrequency,
    /// Keep only the most frequent terms (by corpus count)
    pub max_features: Option<usize>,
    /// Use `1 + ln(tf)` instead of raw counts
    pub sublinear_tf: bool,
    /// Fold accented Latin letters to their base letter
    pub strip_accents: bool,
}

impl Default for VectorizerConfig {
    fn default() -> Self {
        Self {
            ngram_range: (1, 2),
            min_df: DocFrequency::Count(5),
            max_df: DocFrequency::Proportion(0.9),
            max_features: Some(100_000),
            sublinear_tf: true,
            strip_accents: true,
        }
    }
}

impl VectorizerConfig {
    pub fn validate(&self) -> Result<()> {
        let (lo, hi) = self.ngram_range;
        if lo == 0 || lo > hi {
            return Err(SentimentError::configuration(format!(
                "invalid ngram_range ({}, {}): need 1 <= min <= max",
                lo, hi
            )));
        }
        self.min_df.validate("min_df")?;
        self.max_df.validate("max_df")?;
        if self.max_features == Some(0) {
            return Err(SentimentError::configuration("max_features must be positive"));
        }
        Ok(())
    }
}

/// Frozen term → index mapping with per-term IDF weights.
///
/// Lookup works both ways: [`Vocabulary::index_of`] for a token,
/// [`Vocabulary::term`] for a feature index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    terms: Vec<String>,
    index: HashMap<String, usize>,
    idf: Vec<f64>,
    n_documents: usize,
}

impl Vocabulary {
    fn from_document_frequencies(mut kept: Vec<(String, usize)>, n_documents: usize) -> Self {
        kept.sort_by(|a, b| a.0.cmp(&b.0));

        let n = n_documents as f64;
        let mut terms = Vec::with_capacity(kept.len());
        let mut idf = Vec::with_capacity(kept.len());
        let mut index = HashMap::with_capacity(kept.len());

        for (i, (term, df)) in kept.into_iter().enumerate() {
            idf.push(((1.0 + n) / (1.0 + df as f64)).ln() + 1.0);
            index.insert(term.clone(), i);
            terms.push(term);
        }

        Self {
            terms,
            index,
            idf,
            n_documents,
        }
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn index_of(&self, term: &str) -> Option<usize> {
        self.index.get(term).copied()
    }

    pub fn term(&self, index: usize) -> Option<&str> {
        self.terms.get(index).map(String::as_str)
    }

    pub fn idf(&self, index: usize) -> f64 {
        self.idf[index]
    }

    /// Terms in feature-index order
    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Number of documents the vocabulary was fitted on
    pub fn n_documents(&self) -> usize {
        self.n_documents
    }
}

/// Sparse, index-sorted feature row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    entries: Vec<(usize, f64)>,
}

impl FeatureVector {
    /// Build from (index, value) pairs; indices must be unique
    pub fn from_entries(mut entries: Vec<(usize, f64)>) -> Self {
        entries.sort_by_key(|(i, _)| *i);
        Self { entries }
    }

    pub fn entries(&self) -> &[(usize, f64)] {
        &self.entries
    }

    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    pub fn is_zero(&self) -> bool {
        self.entries.iter().all(|(_, v)| *v == 0.0)
    }

    pub fn get(&self, index: usize) -> f64 {
        self.entries
            .binary_search_by_key(&index, |(i, _)| *i)
            .map(|pos| self.entries[pos].1)
            .unwrap_or(0.0)
    }

    /// Dot product with a dense weight vector
    pub fn dot(&self, weights: &[f64]) -> f64 {
        self.entries.iter().map(|(i, v)| weights[*i] * v).sum()
    }

    pub fn norm(&self) -> f64 {
        self.entries.iter().map(|(_, v)| v * v).sum::<f64>().sqrt()
    }
}

/// TF-IDF vectorizer over word n-grams
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    config: VectorizerConfig,
}

impl TfidfVectorizer {
    pub fn new(config: VectorizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VectorizerConfig {
        &self.config
    }

    /// Lowercase, optionally fold accents, tokenize and expand to n-grams
    pub fn analyze(&self, text: &str) -> Vec<String> {
        let mut doc = text.to_lowercase();
        if self.config.strip_accents {
            doc = strip_accents(&doc);
        }

        let tokens: Vec<&str> = TOKEN_RE.find_iter(&doc).map(|m| m.as_str()).collect();
        let (min_n, max_n) = self.config.ngram_range;
        let mut terms = Vec::new();

        for n in min_n..=max_n.min(tokens.len()) {
            for window in tokens.windows(n) {
                terms.push(window.join(" "));
            }
        }

        terms
    }

    /// Learn the vocabulary and IDF weights of `corpus`
    pub fn fit<S: AsRef<str>>(&self, corpus: &[S]) -> Result<Vocabulary> {
        self.config.validate()?;

        let n_docs = corpus.len();
        if n_docs == 0 {
            return Err(SentimentError::configuration("cannot fit a vocabulary on an empty corpus"));
        }

        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut term_count: HashMap<String, usize> = HashMap::new();

        for doc in corpus {
            let mut seen: HashSet<String> = HashSet::new();
            for term in self.analyze(doc.as_ref()) {
                *term_count.entry(term.clone()).or_insert(0) += 1;
                seen.insert(term);
            }
            for term in seen {
                *doc_freq.entry(term).or_insert(0) += 1;
            }
        }

        if doc_freq.is_empty() {
            return Err(SentimentError::configuration(
                "empty vocabulary: no document contains a token of two or more word characters",
            ));
        }

        let min_count = self.config.min_df.to_count(n_docs);
        let max_count = self.config.max_df.to_count(n_docs);
        if max_count < min_count {
            return Err(SentimentError::configuration(format!(
                "max_df={} corresponds to fewer documents than min_df={}",
                self.config.max_df, self.config.min_df
            )));
        }

        let mut kept: Vec<(String, usize)> = doc_freq
            .into_iter()
            .filter(|(_, df)| (*df as f64) >= min_count && (*df as f64) <= max_count)
            .collect();

        if let Some(limit) = self.config.max_features {
            if kept.len() > limit {
                kept.sort_by(|a, b| {
                    let ca = term_count.get(&a.0).copied().unwrap_or(0);
                    let cb = term_count.get(&b.0).copied().unwrap_or(0);
                    cb.cmp(&ca).then_with(|| a.0.cmp(&b.0))
                });
                kept.truncate(limit);
            }
        }

        if kept.is_empty() {
            return Err(SentimentError::configuration(format!(
                "after pruning no terms remain (min_df={}, max_df={}, {} documents); lower min_df or raise max_df",
                self.config.min_df, self.config.max_df, n_docs
            )));
        }

        let vocabulary = Vocabulary::from_document_frequencies(kept, n_docs);
        tracing::debug!(
            "Vocabulary fitted: {} terms from {} documents (ngram_range={:?})",
            vocabulary.len(),
            n_docs,
            self.config.ngram_range
        );
        Ok(vocabulary)
    }

    /// Map a text onto a fitted vocabulary
    pub fn transform(&self, text: &str, vocabulary: &Vocabulary) -> FeatureVector {
        let mut counts: HashMap<usize, usize> = HashMap::new();
        for term in self.analyze(text) {
            if let Some(idx) = vocabulary.index_of(&term) {
                *counts.entry(idx).or_insert(0) += 1;
            }
        }

        let mut entries: Vec<(usize, f64)> = counts
            .into_iter()
            .map(|(idx, count)| {
                let tf = count as f64;
                let tf = if self.config.sublinear_tf { 1.0 + tf.ln() } else { tf };
                (idx, tf * vocabulary.idf(idx))
            })
            .collect();
        // sort before summing so the norm does not depend on hash order
        entries.sort_by_key(|(i, _)| *i);

        let norm = entries.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, v) in entries.iter_mut() {
                *v /= norm;
            }
        }

        FeatureVector { entries }
    }

    pub fn transform_all<S: AsRef<str>>(&self, texts: &[S], vocabulary: &Vocabulary) -> Vec<FeatureVector> {
        texts.iter().map(|t| self.transform(t.as_ref(), vocabulary)).collect()
    }

    pub fn fit_transform<S: AsRef<str>>(&self, corpus: &[S]) -> Result<(Vocabulary, Vec<FeatureVector>)> {
        let vocabulary = self.fit(corpus)?;
        let features = self.transform_all(corpus, &vocabulary);
        Ok((vocabulary, features))
    }
}

/// Fold accented Latin letters onto ASCII. Expects lowercase input.
fn strip_accents(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
            'é' | 'è' | 'ê' | 'ë' | 'ē' | 'ė' | 'ę' | 'ě' => 'e',
            'í' | 'ì' | 'î' | 'ï' | 'ī' | 'į' => 'i',
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'ō' | 'ő' => 'o',
            'ú' | 'ù' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' | 'ų' => 'u',
            'ý' | 'ÿ' => 'y',
            'ñ' | 'ń' | 'ň' => 'n',
            'ç' | 'ć' | 'č' => 'c',
            'ś' | 'š' => 's',
            'ź' | 'ż' | 'ž' => 'z',
            'ř' => 'r',
            'ď' => 'd',
            'ť' => 't',
            'ğ' => 'g',
            _ => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relaxed(ngram_range: (usize, usize)) -> VectorizerConfig {
        VectorizerConfig {
            ngram_range,
            min_df: DocFrequency::Count(1),
            max_df: DocFrequency::Proportion(1.0),
            max_features: None,
            sublinear_tf: false,
            strip_accents: false,
        }
    }

    fn corpus() -> Vec<&'static str> {
        vec![
            "great coffee great price",
            "terrible coffee",
            "great service",
            "the price was terrible",
        ]
    }

    #[test]
    fn test_analyze_tokens_and_ngrams() {
        let v = TfidfVectorizer::new(relaxed((1, 2)));
        let terms = v.analyze("I don't like a bad bag");
        assert_eq!(
            terms,
            vec!["don", "like", "bad", "bag", "don like", "like bad", "bad bag"]
        );
    }

    #[test]
    fn test_analyze_short_text_with_wide_range() {
        let v = TfidfVectorizer::new(relaxed((1, 3)));
        assert_eq!(v.analyze("good tea"), vec!["good", "tea", "good tea"]);
        assert!(v.analyze("").is_empty());
    }

    #[test]
    fn test_strip_accents() {
        let mut config = relaxed((1, 1));
        config.strip_accents = true;
        let v = TfidfVectorizer::new(config);
        assert_eq!(v.analyze("Crème Brûlée naïve"), vec!["creme", "brulee", "naive"]);
    }

    #[test]
    fn test_fit_vocabulary_is_sorted_and_bidirectional() {
        let v = TfidfVectorizer::new(relaxed((1, 1)));
        let vocab = v.fit(&corpus()).unwrap();

        let terms: Vec<&str> = vocab.terms().iter().map(String::as_str).collect();
        assert_eq!(
            terms,
            vec!["coffee", "great", "price", "service", "terrible", "the", "was"]
        );
        for (i, term) in vocab.terms().iter().enumerate() {
            assert_eq!(vocab.index_of(term), Some(i));
            assert_eq!(vocab.term(i), Some(term.as_str()));
        }
        assert_eq!(vocab.term(100), None);
        assert_eq!(vocab.n_documents(), 4);
    }

    #[test]
    fn test_smoothed_idf() {
        let v = TfidfVectorizer::new(relaxed((1, 1)));
        let vocab = v.fit(&corpus()).unwrap();

        // "great" appears in 2 of 4 documents
        let great = vocab.index_of("great").unwrap();
        let expected = (5.0f64 / 3.0).ln() + 1.0;
        assert!((vocab.idf(great) - expected).abs() < 1e-12);

        // "service" appears in 1 of 4
        let service = vocab.index_of("service").unwrap();
        assert!((vocab.idf(service) - ((5.0f64 / 2.0).ln() + 1.0)).abs() < 1e-12);
    }

    #[test]
    fn test_min_and_max_df_pruning() {
        let mut config = relaxed((1, 1));
        config.min_df = DocFrequency::Count(2);
        config.max_df = DocFrequency::Proportion(0.5);
        let vocab = TfidfVectorizer::new(config).fit(&corpus()).unwrap();

        // coffee, great, price, terrible each appear in exactly 2 docs
        let terms: Vec<&str> = vocab.terms().iter().map(String::as_str).collect();
        assert_eq!(terms, vec!["coffee", "great", "price", "terrible"]);

        let mut config = relaxed((1, 1));
        config.max_df = DocFrequency::Proportion(0.3);
        let vocab = TfidfVectorizer::new(config).fit(&corpus()).unwrap();
        assert!(vocab.index_of("great").is_none());
        assert!(vocab.index_of("service").is_some());
    }

    #[test]
    fn test_max_features_keeps_most_frequent() {
        let mut config = relaxed((1, 1));
        config.max_features = Some(2);
        let vocab = TfidfVectorizer::new(config).fit(&corpus()).unwrap();

        // great: 3 occurrences; coffee, price, terrible: 2 each -> tie broken by token order
        let terms: Vec<&str> = vocab.terms().iter().map(String::as_str).collect();
        assert_eq!(terms, vec!["coffee", "great"]);
    }

    #[test]
    fn test_fit_fails_when_pruning_removes_everything() {
        let mut config = relaxed((1, 1));
        config.min_df = DocFrequency::Count(10);
        config.max_df = DocFrequency::Count(20);
        let err = TfidfVectorizer::new(config).fit(&corpus()).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("no terms remain"));
    }

    #[test]
    fn test_fit_fails_on_tokenless_corpus() {
        let v = TfidfVectorizer::new(relaxed((1, 1)));
        let err = v.fit(&["", "a b c", "!"]).unwrap_err();
        assert!(err.is_configuration());

        let err = v.fit::<&str>(&[]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_fit_rejects_inverted_df_bounds() {
        let mut config = relaxed((1, 1));
        config.min_df = DocFrequency::Count(3);
        config.max_df = DocFrequency::Proportion(0.5);
        let err = TfidfVectorizer::new(config).fit(&corpus()).unwrap_err();
        assert!(err.to_string().contains("fewer documents than min_df"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = relaxed((2, 1));
        assert!(config.validate().is_err());
        config.ngram_range = (1, 1);
        config.max_df = DocFrequency::Proportion(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_transform_is_l2_normalised() {
        let v = TfidfVectorizer::new(relaxed((1, 2)));
        let vocab = v.fit(&corpus()).unwrap();
        let fv = v.transform("great coffee great price", &vocab);

        assert!((fv.norm() - 1.0).abs() < 1e-9);
        assert!(fv.entries().windows(2).all(|w| w[0].0 < w[1].0));
        assert!(fv.entries().iter().all(|(_, x)| *x >= 0.0));
        assert!(fv.get(vocab.index_of("great coffee").unwrap()) > 0.0);
    }

    #[test]
    fn test_sublinear_tf_dampens_repeats() {
        let mut config = relaxed((1, 1));
        let raw = TfidfVectorizer::new(config.clone());
        config.sublinear_tf = true;
        let damped = TfidfVectorizer::new(config);

        let vocab = raw.fit(&corpus()).unwrap();
        let text = "great great great great coffee";
        let great = vocab.index_of("great").unwrap();
        let coffee = vocab.index_of("coffee").unwrap();

        let r = raw.transform(text, &vocab);
        let d = damped.transform(text, &vocab);
        assert!(r.get(great) / r.get(coffee) > d.get(great) / d.get(coffee));
    }

    #[test]
    fn test_unseen_and_empty_text_give_zero_vector() {
        let v = TfidfVectorizer::new(relaxed((1, 2)));
        let vocab = v.fit(&corpus()).unwrap();

        let unseen = v.transform("zebra quantum xylophone", &vocab);
        assert_eq!(unseen.nnz(), 0);
        assert!(unseen.is_zero());

        let empty = v.transform("", &vocab);
        assert!(empty.is_zero());
        assert_eq!(empty.dot(&vec![1.0; vocab.len()]), 0.0);
    }

    #[test]
    fn test_fitting_is_deterministic() {
        let v = TfidfVectorizer::new(VectorizerConfig {
            min_df: DocFrequency::Count(1),
            ..VectorizerConfig::default()
        });
        let (a, fa) = v.fit_transform(&corpus()).unwrap();
        let (b, fb) = v.fit_transform(&corpus()).unwrap();

        assert_eq!(a, b);
        assert_eq!(fa, fb);
        assert_eq!(
            v.transform("great terrible price", &a),
            v.transform("great terrible price", &b)
        );
    }
}
