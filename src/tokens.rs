//! Token-based translation metrics.
//!
//! These ratios drive both the progress summary sent with every save and
//! the unmodified-MT abuse warning. The unmodified measure is an
//! order-insensitive token overlap, not an edit distance, and the abuse
//! threshold is calibrated against exactly this behavior.

use crate::i18n::LanguageRegistry;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

static WORD_REGEX: OnceLock<Regex> = OnceLock::new();

fn word_regex() -> &'static Regex {
    WORD_REGEX.get_or_init(|| Regex::new(r"\S+").expect("static token regex"))
}

/// Split text into tokens.
///
/// Text in a CJK-script language yields one token per codepoint; any other
/// language yields maximal runs of non-whitespace characters.
pub fn tokenize<'a>(text: &'a str, language: &str) -> Vec<&'a str> {
    if text.is_empty() {
        return Vec::new();
    }

    if LanguageRegistry::get().is_cjk(language) {
        return text
            .char_indices()
            .map(|(start, c)| &text[start..start + c.len_utf8()])
            .collect();
    }

    word_regex().find_iter(text).map(|m| m.as_str()).collect()
}

/// Number of tokens in `text`.
pub fn token_count(text: &str, language: &str) -> usize {
    tokenize(text, language).len()
}

/// Translation progress of `target` relative to `source`.
///
/// Identical strings (including two empty ones) are fully translated. The
/// ratio is not capped: a translation longer than its source exceeds 1.
pub fn progress_ratio(source: &str, target: &str, language: &str) -> f64 {
    if source == target {
        return 1.0;
    }
    if source.is_empty() || target.is_empty() {
        return 0.0;
    }

    let source_tokens = token_count(source, language);
    if source_tokens == 0 {
        return 0.0;
    }

    token_count(target, language) as f64 / source_tokens as f64
}

/// Share of tokens that survived unchanged between `baseline` and `current`.
///
/// The longer token sequence is the reference; each of its tokens counts as
/// unmodified when it occurs anywhere in the shorter sequence. When both
/// sequences have the same length the lexicographically smaller one is the
/// reference, so swapping the arguments never changes the result.
pub fn unmodified_ratio(baseline: &str, current: &str, language: &str) -> f64 {
    if baseline == current {
        return 1.0;
    }
    if baseline.is_empty() || current.is_empty() {
        return 0.0;
    }

    let baseline_tokens = tokenize(baseline, language);
    let current_tokens = tokenize(current, language);

    let (big, small) = if current_tokens.len() > baseline_tokens.len()
        || (current_tokens.len() == baseline_tokens.len() && current_tokens < baseline_tokens)
    {
        (current_tokens, baseline_tokens)
    } else {
        (baseline_tokens, current_tokens)
    };

    if big.is_empty() {
        return 0.0;
    }

    let small: HashSet<&str> = small.into_iter().collect();
    let unmodified = big.iter().filter(|token| small.contains(*token)).count();

    unmodified as f64 / big.len() as f64
}
