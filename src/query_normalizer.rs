//! Deterministic Unicode/case/whitespace query normalization.
//!
//! Grounded in `original_source/src/services/query_normalizer.py`; NFKC folding comes
//! from the `unicode-normalization` crate, the idiomatic Rust counterpart of Python's
//! `unicodedata.normalize('NFKC', ...)`.

use unicode_normalization::UnicodeNormalization;

/// Pure, stateless normalization pipeline: NFKC -> lowercase -> collapse whitespace ->
/// trim. Empty input yields empty output; `normalize(normalize(x)) == normalize(x)`.
pub struct QueryNormalizer;

impl QueryNormalizer {
    pub fn normalize(query: &str) -> String {
        if query.is_empty() {
            return String::new();
        }

        let nfkc: String = query.nfkc().collect();
        let lower = nfkc.to_lowercase();

        let mut out = String::with_capacity(lower.len());
        let mut last_was_space = true; // trims leading whitespace
        for ch in lower.chars() {
            if ch.is_whitespace() {
                if !last_was_space {
                    out.push(' ');
                    last_was_space = true;
                }
            } else {
                out.push(ch);
                last_was_space = false;
            }
        }
        if out.ends_with(' ') {
            out.pop();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_fullwidth_case_and_whitespace() {
        assert_eq!(
            QueryNormalizer::normalize("  Ｈｅｌｌｏ   World  "),
            "hello world"
        );
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert_eq!(QueryNormalizer::normalize(""), "");
    }

    #[test]
    fn is_idempotent() {
        let once = QueryNormalizer::normalize("  Ｈｅｌｌｏ   World  ");
        let twice = QueryNormalizer::normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn collapses_tabs_and_newlines_too() {
        assert_eq!(QueryNormalizer::normalize("a\t\tb\n\nc"), "a b c");
    }
}
