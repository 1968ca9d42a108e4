// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Review tables and their conversion into labelled training data

use crate::error::{Result, SentimentError};
use crate::normalize::normalize;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Column holding the free review text
pub const TEXT_COLUMN: &str = "Text";
/// Column holding the 1-5 star rating
pub const SCORE_COLUMN: &str = "Score";
/// File looked up when a directory is given instead of a CSV path
pub const REVIEWS_FILE: &str = "Reviews.csv";

/// Binary sentiment label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sentiment {
    Negative,
    Positive,
}

impl Sentiment {
    /// 1 = positive, 0 = negative
    pub fn to_binary(&self) -> u8 {
        match self {
            Sentiment::Negative => 0,
            Sentiment::Positive => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Negative => "NEGATIVE",
            Sentiment::Positive => "POSITIVE",
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// What happens to 3-star reviews. Intentionally has no default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NeutralPolicy {
    /// Remove 3-star reviews before labelling
    Drop,
    /// Keep 3-star reviews and label them negative
    Negative,
}

impl std::str::FromStr for NeutralPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop" => Ok(NeutralPolicy::Drop),
            "negative" => Ok(NeutralPolicy::Negative),
            other => Err(format!("unknown neutral policy '{}' (expected 'drop' or 'negative')", other)),
        }
    }
}

/// Label for a star rating: positive iff `score >= 4`. `None` means the row is dropped.
pub fn label_for_score(score: i64, neutral: NeutralPolicy) -> Option<Sentiment> {
    match (score, neutral) {
        (3, NeutralPolicy::Drop) => None,
        (s, _) if s >= 4 => Some(Sentiment::Positive),
        _ => Some(Sentiment::Negative),
    }
}

/// One raw row as read from the source table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub text: Option<String>,
    pub score: Option<String>,
}

impl ReviewRecord {
    pub fn new(text: &str, score: i64) -> Self {
        Self {
            text: Some(text.to_string()),
            score: Some(score.to_string()),
        }
    }
}

/// Raw reviews plus the column names of the source they came from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewTable {
    columns: Vec<String>,
    records: Vec<ReviewRecord>,
}

fn validate_columns(columns: &[String]) -> Result<()> {
    let mut missing: Vec<&str> = [TEXT_COLUMN, SCORE_COLUMN]
        .into_iter()
        .filter(|required| !columns.iter().any(|c| c == required))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    missing.sort_unstable();
    Err(SentimentError::schema(format!("Missing columns: {}", missing.join(", "))))
}

impl ReviewTable {
    /// Build a table from in-memory rows; `columns` must name both required fields
    pub fn new(columns: Vec<String>, records: Vec<ReviewRecord>) -> Result<Self> {
        validate_columns(&columns)?;
        Ok(Self { columns, records })
    }

    /// Load from a CSV file, or from `Reviews.csv` inside a directory
    pub fn from_path(path: &Path) -> Result<Self> {
        let file_path = if path.is_dir() { path.join(REVIEWS_FILE) } else { path.to_path_buf() };
        if !file_path.exists() {
            return Err(SentimentError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", file_path.display()),
            )));
        }

        let table = Self::from_reader(File::open(&file_path)?)?;
        tracing::info!("Loaded {} reviews from {}", table.len(), file_path.display());
        Ok(table)
    }

    /// Read CSV with a header row. Only the text and score columns are kept.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let columns: Vec<String> = reader
            .byte_headers()?
            .iter()
            .map(|h| String::from_utf8_lossy(h).trim().to_string())
            .collect();
        validate_columns(&columns)?;

        let text_idx = columns.iter().position(|c| c == TEXT_COLUMN).unwrap_or_default();
        let score_idx = columns.iter().position(|c| c == SCORE_COLUMN).unwrap_or_default();

        let field = |record: &csv::ByteRecord, idx: usize| -> Option<String> {
            record
                .get(idx)
                .filter(|bytes| !bytes.is_empty())
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        };

        let mut records = Vec::new();
        for result in reader.byte_records() {
            let record = result?;
            records.push(ReviewRecord {
                text: field(&record, text_idx),
                score: field(&record, score_idx),
            });
        }

        Ok(Self { columns, records })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[ReviewRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Interpret a raw score field the way a lenient numeric coercion would:
/// integers, or decimals truncated toward zero
pub fn parse_score(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<i64>() {
        return Some(v);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v.trunc() as i64)
}

/// Row counts observed while preparing a table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrepareStats {
    pub input_rows: usize,
    pub invalid_score: usize,
    pub out_of_range_score: usize,
    pub dropped_neutral: usize,
    pub missing_text: usize,
    pub subsampled_out: usize,
    pub output_rows: usize,
}

/// Cleaned texts with aligned labels
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreparedDataset {
    pub texts: Vec<String>,
    pub labels: Vec<Sentiment>,
    pub stats: PrepareStats,
}

impl PreparedDataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Rows at `indices`, in that order
    pub fn subset(&self, indices: &[usize]) -> (Vec<String>, Vec<Sentiment>) {
        (
            indices.iter().map(|&i| self.texts[i].clone()).collect(),
            indices.iter().map(|&i| self.labels[i]).collect(),
        )
    }

    /// Write the cleaned rows as `cleaned_text,sentiment_label`
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["cleaned_text", "sentiment_label"])?;
        for (text, label) in self.texts.iter().zip(&self.labels) {
            writer.write_record([text.as_str(), &label.to_binary().to_string()])?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Turn raw reviews into cleaned, labelled examples.
///
/// Rows whose score cannot be read as a number, or falls outside 1..=5, are
/// dropped. Missing text becomes the empty string. With `subsample`, a uniform
/// random subset of that size (seeded) is kept; original order is preserved.
pub fn prepare(
    table: &ReviewTable,
    neutral: NeutralPolicy,
    subsample: Option<usize>,
    seed: u64,
) -> Result<PreparedDataset> {
    validate_columns(&table.columns)?;

    let mut stats = PrepareStats {
        input_rows: table.len(),
        ..Default::default()
    };

    let mut kept: Vec<(Option<&str>, Sentiment)> = Vec::with_capacity(table.len());
    for record in table.records() {
        let score = match record.score.as_deref().and_then(parse_score) {
            Some(s) => s,
            None => {
                stats.invalid_score += 1;
                continue;
            }
        };
        if !(1..=5).contains(&score) {
            stats.out_of_range_score += 1;
            continue;
        }
        match label_for_score(score, neutral) {
            Some(label) => kept.push((record.text.as_deref(), label)),
            None => stats.dropped_neutral += 1,
        }
    }

    if let Some(n) = subsample {
        if kept.len() > n {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut chosen = rand::seq::index::sample(&mut rng, kept.len(), n).into_vec();
            chosen.sort_unstable();
            stats.subsampled_out = kept.len() - n;
            kept = chosen.into_iter().map(|i| kept[i]).collect();
        }
    }

    let mut texts = Vec::with_capacity(kept.len());
    let mut labels = Vec::with_capacity(kept.len());
    for (text, label) in kept {
        if text.is_none() {
            stats.missing_text += 1;
        }
        texts.push(normalize(text.unwrap_or("")));
        labels.push(label);
    }
    stats.output_rows = labels.len();

    if stats.invalid_score + stats.out_of_range_score > 0 {
        tracing::warn!(
            "Dropped {} rows with unusable scores ({} non-numeric, {} outside 1-5)",
            stats.invalid_score + stats.out_of_range_score,
            stats.invalid_score,
            stats.out_of_range_score
        );
    }
    tracing::info!(
        "Prepared {} examples (neutral policy: {:?}, {} neutral dropped, {} removed by subsampling)",
        stats.output_rows,
        neutral,
        stats.dropped_neutral,
        stats.subsampled_out
    );

    Ok(PreparedDataset { texts, labels, stats })
}

/// Seeded split that keeps each class's share in both parts.
///
/// Returns sorted `(train, test)` index lists.
pub fn stratified_split(labels: &[Sentiment], test_fraction: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(SentimentError::configuration(format!(
            "test fraction must lie strictly between 0 and 1, got {}",
            test_fraction
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();

    for class in [Sentiment::Negative, Sentiment::Positive] {
        let mut members: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
        members.shuffle(&mut rng);
        let n_test = (members.len() as f64 * test_fraction).round() as usize;
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }

    if train.is_empty() || test.is_empty() {
        return Err(SentimentError::configuration(format!(
            "cannot split {} examples with test fraction {}",
            labels.len(),
            test_fraction
        )));
    }

    train.sort_unstable();
    test.sort_unstable();
    Ok((train, test))
}

/// Count of each label
pub fn label_distribution(labels: &[Sentiment]) -> HashMap<Sentiment, usize> {
    let mut dist = HashMap::new();
    for label in labels {
        *dist.entry(*label).or_insert(0) += 1;
    }
    dist
}

const POSITIVE_PHRASES: &[&str] = &[
    "Absolutely amazing flavor",
    "Best snack I have found",
    "I love this stuff",
    "Great value and fast shipping",
    "Highly recommend it to everyone",
    "Excellent quality, will buy again",
    "My kids love it",
    "Delicious and fresh",
    "Perfect for my morning routine",
    "Wonderful taste, five stars",
];

const NEGATIVE_PHRASES: &[&str] = &[
    "Terrible taste",
    "Complete waste of money",
    "It arrived stale and broken",
    "Would not recommend",
    "Awful quality, very disappointed",
    "Worst thing I have bought",
    "The package was damaged",
    "Tasted like cardboard",
    "Returned it immediately",
    "Horrible smell, threw it away",
];

const FILLER_PHRASES: &[&str] = &[
    "I bought this product last month.",
    "Ordered this product from the seller online.",
    "The box says it is organic.",
    "Used it with coffee and tea.",
    "Got it on sale this week.",
];

/// Deterministic review table for demos and tests.
///
/// Roughly 70% of rows are 4-5 stars, 20% are 1-2 stars and 10% are 3 stars,
/// with some URL, hashtag and punctuation noise mixed in.
pub fn synthetic_reviews(size: usize, seed: u64) -> ReviewTable {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let records = (0..size)
        .map(|i| {
            let roll: f64 = rng.gen();
            let (score, first, second) = if roll < 0.7 {
                (rng.gen_range(4..=5), POSITIVE_PHRASES, POSITIVE_PHRASES)
            } else if roll < 0.9 {
                (rng.gen_range(1..=2), NEGATIVE_PHRASES, NEGATIVE_PHRASES)
            } else {
                (3, POSITIVE_PHRASES, NEGATIVE_PHRASES)
            };

            let mut text = format!(
                "{}! {} {}.",
                first[rng.gen_range(0..first.len())],
                FILLER_PHRASES[rng.gen_range(0..FILLER_PHRASES.len())],
                second[rng.gen_range(0..second.len())],
            );
            match rng.gen_range(0..6) {
                0 => text.push_str(&format!(" https://example.com/p/{}", i)),
                1 => text.push_str(" #snacktime"),
                2 => text.push_str(" :)"),
                _ => {}
            }

            ReviewRecord::new(&text, score)
        })
        .collect();

    ReviewTable {
        columns: vec!["Id".to_string(), SCORE_COLUMN.to_string(), TEXT_COLUMN.to_string()],
        records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[(&str, &str)]) -> ReviewTable {
        let records = rows
            .iter()
            .map(|(text, score)| ReviewRecord {
                text: if text.is_empty() { None } else { Some(text.to_string()) },
                score: if score.is_empty() { None } else { Some(score.to_string()) },
            })
            .collect();
        ReviewTable::new(vec![TEXT_COLUMN.to_string(), SCORE_COLUMN.to_string()], records).unwrap()
    }

    #[test]
    fn test_label_for_score() {
        for score in 1..=5 {
            let kept = label_for_score(score, NeutralPolicy::Negative).unwrap();
            assert_eq!(kept == Sentiment::Positive, score >= 4);
        }
        assert_eq!(label_for_score(3, NeutralPolicy::Drop), None);
        assert_eq!(label_for_score(3, NeutralPolicy::Negative), Some(Sentiment::Negative));
        assert_eq!(label_for_score(4, NeutralPolicy::Drop), Some(Sentiment::Positive));
        assert_eq!(label_for_score(2, NeutralPolicy::Drop), Some(Sentiment::Negative));
    }

    #[test]
    fn test_neutral_policy_parsing() {
        assert_eq!("drop".parse::<NeutralPolicy>().unwrap(), NeutralPolicy::Drop);
        assert_eq!("NEGATIVE".parse::<NeutralPolicy>().unwrap(), NeutralPolicy::Negative);
        assert!("keep".parse::<NeutralPolicy>().is_err());
    }

    #[test]
    fn test_missing_columns_is_schema_error() {
        let err = ReviewTable::new(vec!["Text".to_string()], vec![]).unwrap_err();
        assert!(matches!(err, SentimentError::Schema(_)));
        assert!(err.to_string().contains("Score"));

        let csv = "Id,Summary\n1,great\n";
        let err = ReviewTable::from_reader(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("Missing columns: Score, Text"));
    }

    #[test]
    fn test_from_reader_keeps_required_columns() {
        let csv = "Id,Score,Summary,Text\n\
                   1,5,yum,\"Great, tasty!\"\n\
                   2,,meh,No score here\n\
                   3,2,bad,\n";
        let table = ReviewTable::from_reader(csv.as_bytes()).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.columns().len(), 4);
        assert_eq!(table.records()[0], ReviewRecord::new("Great, tasty!", 5));
        assert_eq!(table.records()[1].score, None);
        assert_eq!(table.records()[2].text, None);
    }

    #[test]
    fn test_from_reader_tolerates_invalid_utf8() {
        let mut csv = b"Text,Score\n".to_vec();
        csv.extend_from_slice(b"good \xff value,5\n");
        let table = ReviewTable::from_reader(csv.as_slice()).unwrap();
        let prepared = prepare(&table, NeutralPolicy::Drop, None, 0).unwrap();
        assert_eq!(prepared.texts, vec!["good value".to_string()]);
    }

    #[test]
    fn test_from_path_accepts_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(REVIEWS_FILE), "Text,Score\nLovely,5\n").unwrap();
        let table = ReviewTable::from_path(dir.path()).unwrap();
        assert_eq!(table.len(), 1);

        let missing = tempfile::tempdir().unwrap();
        let err = ReviewTable::from_path(missing.path()).unwrap_err();
        assert!(matches!(err, SentimentError::Io(_)));
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("4"), Some(4));
        assert_eq!(parse_score(" 5 "), Some(5));
        assert_eq!(parse_score("4.0"), Some(4));
        assert_eq!(parse_score("3.7"), Some(3));
        assert_eq!(parse_score("five"), None);
        assert_eq!(parse_score("NaN"), None);
    }

    #[test]
    fn test_prepare_labels_and_cleans() {
        let t = table(&[
            ("Loved it!!!", "5"),
            ("It's ok", "3"),
            ("Hated it", "1"),
            ("", "4"),
            ("Bad score", "abc"),
            ("Too many stars", "9"),
        ]);

        let prepared = prepare(&t, NeutralPolicy::Negative, None, 0).unwrap();
        assert_eq!(prepared.texts, vec!["loved it", "it's ok", "hated it", ""]);
        assert_eq!(
            prepared.labels,
            vec![Sentiment::Positive, Sentiment::Negative, Sentiment::Negative, Sentiment::Positive]
        );
        assert_eq!(prepared.stats.invalid_score, 1);
        assert_eq!(prepared.stats.out_of_range_score, 1);
        assert_eq!(prepared.stats.missing_text, 1);
        assert_eq!(prepared.stats.output_rows, 4);

        let dropped = prepare(&t, NeutralPolicy::Drop, None, 0).unwrap();
        assert_eq!(dropped.len(), 3);
        assert_eq!(dropped.stats.dropped_neutral, 1);
        assert!(!dropped.texts.contains(&"it's ok".to_string()));
    }

    #[test]
    fn test_prepare_label_rule_on_synthetic_data() {
        let t = synthetic_reviews(300, 7);
        let scores: Vec<i64> = t
            .records()
            .iter()
            .map(|r| r.score.as_deref().and_then(parse_score).unwrap())
            .collect();

        let kept = prepare(&t, NeutralPolicy::Negative, None, 0).unwrap();
        assert_eq!(kept.len(), scores.len());
        for (label, score) in kept.labels.iter().zip(&scores) {
            assert_eq!(*label == Sentiment::Positive, *score >= 4);
        }

        let dropped = prepare(&t, NeutralPolicy::Drop, None, 0).unwrap();
        let non_neutral = scores.iter().filter(|s| **s != 3).count();
        assert_eq!(dropped.len(), non_neutral);
    }

    #[test]
    fn test_prepare_subsample() {
        let t = synthetic_reviews(200, 1);
        let a = prepare(&t, NeutralPolicy::Negative, Some(50), 99).unwrap();
        let b = prepare(&t, NeutralPolicy::Negative, Some(50), 99).unwrap();
        assert_eq!(a.len(), 50);
        assert_eq!(a.texts, b.texts);
        assert_eq!(a.stats.subsampled_out, 150);

        let all = prepare(&t, NeutralPolicy::Negative, Some(10_000), 99).unwrap();
        assert_eq!(all.len(), 200);
        assert_eq!(all.stats.subsampled_out, 0);
    }

    #[test]
    fn test_stratified_split_preserves_proportions() {
        let labels: Vec<Sentiment> = (0..100)
            .map(|i| if i < 80 { Sentiment::Positive } else { Sentiment::Negative })
            .collect();
        let (train, test) = stratified_split(&labels, 0.2, 42).unwrap();

        assert_eq!(train.len(), 80);
        assert_eq!(test.len(), 20);
        let test_pos = test.iter().filter(|&&i| labels[i] == Sentiment::Positive).count();
        assert_eq!(test_pos, 16);

        let mut all: Vec<usize> = train.iter().chain(&test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());

        assert_eq!(stratified_split(&labels, 0.2, 42).unwrap(), (train, test));
        assert!(stratified_split(&labels, 1.0, 42).is_err());
    }

    #[test]
    fn test_synthetic_reviews_are_deterministic() {
        let a = synthetic_reviews(50, 3);
        let b = synthetic_reviews(50, 3);
        assert_eq!(a.records(), b.records());
        assert_eq!(a.len(), 50);

        let prepared = prepare(&a, NeutralPolicy::Drop, None, 0).unwrap();
        let dist = label_distribution(&prepared.labels);
        assert!(dist.get(&Sentiment::Positive).copied().unwrap_or(0) > 0);
        assert!(dist.get(&Sentiment::Negative).copied().unwrap_or(0) > 0);
    }

    #[test]
    fn test_write_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.csv");
        let prepared = prepare(&table(&[("Nice", "5"), ("Meh", "2")]), NeutralPolicy::Drop, None, 0).unwrap();
        prepared.write_csv(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "cleaned_text,sentiment_label\nnice,1\nmeh,0\n");
    }
}
