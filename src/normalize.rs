// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Deterministic review-text cleaning
//!
//! Steps, in order:
//! 1. drop URL-like runs (`http...`, `www....`, case-insensitive)
//! 2. drop `@mention` and `#hashtag` tokens
//! 3. replace everything that is not an ASCII letter, ASCII whitespace or `'` with a space
//! 4. collapse runs of two or more ASCII whitespace characters into one space
//! 5. trim
//! 6. lowercase
//!
//! Protocol-less URLs (`amazon.com/dp/...`) are not caught by step 1 and
//! survive step 3 as plain words (`amazon com dp`). Trained artifacts depend on
//! that behaviour, so it is kept.
//!
//! Non-ASCII whitespace (NBSP, em space) counts as a non-letter in step 3, so
//! the output is pure ASCII.

use once_cell::sync::Lazy;
use regex::Regex;

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)http\S+|www\.\S+").unwrap());
static MENTION_HASHTAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[@#]\w+").unwrap());
static NON_LETTERS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z'[:space:]]").unwrap());
static MULTI_WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[[:space:]]{2,}").unwrap());

/// Clean a single review text. Total: every input yields a (possibly empty) string.
pub fn normalize(text: &str) -> String {
    let s = URL_RE.replace_all(text, "");
    let s = MENTION_HASHTAG_RE.replace_all(&s, "");
    let s = NON_LETTERS_RE.replace_all(&s, " ");
    let s = MULTI_WS_RE.replace_all(&s, " ");
    s.trim().to_ascii_lowercase()
}

/// Clean raw bytes, degrading invalid UTF-8 to replacement characters first
pub fn normalize_bytes(bytes: &[u8]) -> String {
    normalize(&String::from_utf8_lossy(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tricky_inputs() -> Vec<&'static str> {
        vec![
            "",
            "   ",
            "This product is absolutely amazing! Best purchase ever.",
            "Terrible product. Complete waste of money.",
            "Check https://example.com/x?y=1 and www.shop.com/item now!!",
            "HTTPS://LOUD.EXAMPLE.COM is gone, HTTPfoo too",
            "visit amazon.com/dp/B00ABC123 for details",
            "@seller thanks #blessed #5stars",
            "I can't   believe\t\tit's\n\nnot butter",
            "Café crème brûlée — 10/10 ★★★★★",
            "tabs\tstay\tsingle",
            "ht@xtp and wwwwww",
            "\u{00A0}leading nbsp and trailing\u{2003}",
            "mid\u{00A0}string\u{2003}spaces\u{00A0} \u{2009}here",
            "don't  ''' quote's",
            "1234 5678 !!!",
        ]
    }

    #[test]
    fn test_normalize_end_to_end_example() {
        assert_eq!(
            normalize("This product is absolutely amazing! Best purchase ever."),
            "this product is absolutely amazing best purchase ever"
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for input in tricky_inputs() {
            let once = normalize(input);
            let twice = normalize(&once);
            assert_eq!(once, twice, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_output_alphabet() {
        for input in tricky_inputs() {
            let out = normalize(input);
            assert!(out.is_ascii(), "non-ASCII output {:?}", out);
            assert!(
                out.chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_whitespace() || c == '\''),
                "unexpected character in {:?}",
                out
            );
            assert_eq!(out, out.trim());
        }
    }

    #[test]
    fn test_urls_and_mentions_removed() {
        assert_eq!(
            normalize("Check https://example.com/x?y=1 and www.shop.com/item now!!"),
            "check and now"
        );
        assert_eq!(normalize("HTTPS://LOUD.EXAMPLE.COM is gone, HTTPfoo too"), "is gone too");
        assert_eq!(normalize("@seller thanks #blessed #5stars"), "thanks");
    }

    #[test]
    fn test_protocol_less_url_leaks_as_words() {
        assert_eq!(
            normalize("visit amazon.com/dp/B00ABC123 for details"),
            "visit amazon com dp b abc for details"
        );
    }

    #[test]
    fn test_whitespace_and_apostrophes() {
        assert_eq!(normalize("I can't   believe\t\tit's\n\nnot butter"), "i can't believe it's not butter");
        assert_eq!(normalize("tabs\tstay\tsingle"), "tabs\tstay\tsingle");
    }

    #[test]
    fn test_empty_and_symbol_only_inputs() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
        assert_eq!(normalize("1234 5678 !!!"), "");
    }

    #[test]
    fn test_invalid_utf8_degrades() {
        let bytes = b"great \xff\xfe value";
        assert_eq!(normalize_bytes(bytes), "great value");
    }

    #[test]
    fn test_unicode_whitespace_becomes_space() {
        assert_eq!(normalize("great\u{00A0}value\u{2003}here"), "great value here");
        assert_eq!(normalize("a \u{00A0} b\u{3000}\u{3000}c"), "a b c");
    }
}
