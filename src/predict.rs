// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Inference CLI for a trained review sentiment model
//!
//! Usage:
//!   sentiment-predict "Terrible product. Complete waste of money."
//!   sentiment-predict --model data/sentiment_model.bin
//!
//! Without a text argument an interactive prompt starts. Commands:
//!   tc    score the built-in hard cases
//!   tf    show the most positive and negative features
//!   quit  exit

use anyhow::Result;
use clap::Parser;
use review_sentiment::model::{SentimentModel, SentimentPrediction};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Reviews that lexical models tend to get wrong
const HARD_CASES: &[(&str, &str)] = &[
    ("sarcasm", "Oh wonderful, it fell apart on day two. Exactly what I wanted!"),
    ("sarcasm", "Perfect choice if you enjoy throwing money away."),
    ("mixed", "Lovely design and quick delivery, but it died within a week."),
    ("mixed", "Awful packaging and slow shipping, yet the product itself is excellent."),
    ("backhanded", "It works. Barely."),
    ("backhanded", "Not the worst thing I have ever bought."),
    ("negation", "This is not bad at all."),
    ("negation", "I can't really complain."),
    ("lukewarm", "It's fine. Does the job. Nothing special."),
    ("expectation", "The photos made it look far better than it really is."),
    ("conditional", "Great, as long as you don't mind the smell and the noise."),
    ("comparative", "The cheap knockoff I had before worked better than this."),
    ("neutral", "Well, it is certainly a product."),
];

#[derive(Parser, Debug)]
#[command(name = "sentiment-predict")]
#[command(about = "Classify review text with a trained sentiment model")]
#[command(version)]
struct Args {
    /// Text to classify; starts an interactive prompt when omitted
    text: Option<String>,

    /// Trained model file
    #[arg(short, long, default_value = "data/sentiment_model.bin")]
    model: PathBuf,

    /// Number of features listed per direction by `tf`
    #[arg(long, default_value_t = 20)]
    top: usize,
}

fn print_prediction(prediction: &SentimentPrediction) {
    println!("Prediction: {}", prediction.label);
    println!(
        "Probabilities: [NEGATIVE {:.4}, POSITIVE {:.4}]",
        prediction.probabilities[0], prediction.probabilities[1]
    );
    println!("Confidence: {:.2}%", prediction.confidence * 100.0);
}

fn print_hard_cases(model: &SentimentModel) {
    for (i, (kind, review)) in HARD_CASES.iter().enumerate() {
        let p = model.classify(review);
        println!("\n{}. [{}] {}", i + 1, kind, review);
        println!(
            "   Prediction: {} | Confidence: {:.2}% | [{:.4}, {:.4}]",
            p.label,
            p.confidence * 100.0,
            p.probabilities[0],
            p.probabilities[1]
        );
    }
    println!();
}

fn print_top_features(model: &SentimentModel, n: usize) {
    let top = model.top_features(n);

    println!("\nPositive features:");
    for (term, weight) in &top.positive {
        println!("{:30} | {:+.4}", term, weight);
    }
    println!("\nNegative features:");
    for (term, weight) in &top.negative {
        println!("{:30} | {:+.4}", term, weight);
    }
    println!();
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let Some(model) = SentimentModel::load_if_exists(&args.model)? else {
        eprintln!(
            "Model not available at {}. Train one first with `sentiment-train`.",
            args.model.display()
        );
        return Ok(());
    };

    if let Some(ref text) = args.text {
        print_prediction(&model.classify(text));
        return Ok(());
    }

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        print!("enter a review: ");
        stdout.flush()?;

        let mut line = Vec::new();
        if stdin.lock().read_until(b'\n', &mut line)? == 0 {
            break;
        }

        match String::from_utf8_lossy(&line).trim() {
            "quit" | "exit" | "q" => break,
            "tc" => print_hard_cases(&model),
            "tf" => print_top_features(&model, args.top),
            _ => {
                print_prediction(&model.classify_bytes(&line));
                println!();
            }
        }
    }

    Ok(())
}
