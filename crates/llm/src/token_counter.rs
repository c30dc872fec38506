//! Heuristic token estimation for quota accounting.
//!
//! This is an estimator, not a tokenizer: it approximates token cost from the
//! word count and applies fixed adjustments for code-heavy and
//! punctuation-heavy text. It must stay deterministic and free of I/O so the
//! same text always meters the same, before and after a completion.

use std::sync::LazyLock;

use regex::Regex;

/// Average words per token for English-like text (~1.33 tokens per word).
const WORDS_PER_TOKEN: f64 = 0.75;

/// Punctuation and symbols that tend to tokenize into extra pieces.
static SPECIAL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[{}\[\]().,;:!?@#$%^&*+=~`|\\/<>"'-]"#).expect("the character class is valid"));

/// Approximate the token cost of a text blob.
///
/// Returns 0 only for empty text; any non-empty text counts as at least one
/// token. Adjustments stack multiplicatively: ×1.2 for code markers, ×1.1 for
/// special characters, floored to an integer at each step.
pub(crate) fn estimate(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }

    let words = text.split_whitespace().count();
    let mut tokens = (words as f64 / WORDS_PER_TOKEN) as u64;

    if has_code_blocks(text) {
        tokens = (tokens as f64 * 1.2) as u64;
    }

    if SPECIAL_CHARS.is_match(text) {
        tokens = (tokens as f64 * 1.1) as u64;
    }

    tokens.max(1)
}

/// Fenced code markers or indentation runs signal code-heavy text.
fn has_code_blocks(text: &str) -> bool {
    text.contains("```") || text.contains("    ") || text.contains('\t')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero() {
        assert_eq!(estimate(""), 0);
    }

    #[test]
    fn non_empty_text_is_at_least_one() {
        assert!(estimate("a") >= 1);
        assert!(estimate("?") >= 1);
    }

    #[test]
    fn plain_prose_tracks_word_count() {
        // Six words, no code, no special characters.
        let text = "the quick brown fox jumps high";
        assert_eq!(estimate(text), 8); // floor(6 / 0.75)
    }

    #[test]
    fn code_blocks_cost_more() {
        let plain = "let x equal one plus two and three and four";
        let fenced = "```\nlet x equal one plus two and three and four\n```";

        assert!(estimate(fenced) > estimate(plain));
    }

    #[test]
    fn special_characters_cost_more() {
        let plain = "alpha beta gamma delta epsilon zeta eta theta";
        let punctuated = "alpha, beta; gamma: delta! epsilon? zeta (eta) theta";

        assert!(estimate(punctuated) > estimate(plain));
    }

    #[test]
    fn adjustments_stack() {
        // 12 words -> 16 base tokens, ×1.2 -> 19, ×1.1 -> 20.
        let text = "fn main() prints hello world with twelve words in this sample\tend";
        assert_eq!(estimate(text), 20);
    }

    #[test]
    fn deterministic_across_calls() {
        let text = "analyze the pros and cons of rewriting this parser";
        assert_eq!(estimate(text), estimate(text));
    }
}
