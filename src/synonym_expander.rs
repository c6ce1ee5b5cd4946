//! Per-token OR-group query expansion against a loaded synonym map.
//!
//! Grounded in `original_source/src/services/synonym_expander.py`. The dictionary is
//! loaded once at construction and is read-only thereafter, so concurrent lookups need
//! no locking.

use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

pub struct SynonymExpander {
    synonyms: HashMap<String, Vec<String>>,
}

impl SynonymExpander {
    /// Loads the dictionary from `path`. A missing or malformed file degrades
    /// gracefully to identity expansion rather than failing construction.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let synonyms = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<HashMap<String, Vec<String>>>(&contents)
            {
                Ok(map) => map,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to parse synonym file, falling back to identity expansion");
                    HashMap::new()
                }
            },
            Err(_) => {
                warn!(path = %path.display(), "synonym file not found, falling back to identity expansion");
                HashMap::new()
            }
        };
        Self { synonyms }
    }

    pub fn from_map(synonyms: HashMap<String, Vec<String>>) -> Self {
        Self { synonyms }
    }

    /// Expands a normalized query into OR-groups joined by spaces (AND semantics in
    /// the target full-text dialect). Deterministic: synonym sets are sorted.
    pub fn expand(&self, normalized_query: &str) -> String {
        if normalized_query.is_empty() {
            return String::new();
        }

        normalized_query
            .split_whitespace()
            .map(|token| self.expand_token(token))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn expand_token(&self, token: &str) -> String {
        let mut variants: Vec<String> = self
            .synonyms
            .get(token)
            .cloned()
            .unwrap_or_default();
        variants.push(token.to_string());
        variants.sort();
        variants.dedup();

        if variants.len() > 1 {
            format!("({})", variants.join(" OR "))
        } else {
            token.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expander_with(entries: &[(&str, &[&str])]) -> SynonymExpander {
        let map = entries
            .iter()
            .map(|(k, vs)| {
                (
                    k.to_string(),
                    vs.iter().map(|v| v.to_string()).collect(),
                )
            })
            .collect();
        SynonymExpander::from_map(map)
    }

    #[test]
    fn expands_known_term_into_or_group() {
        let expander = expander_with(&[("ai", &["artificial intelligence"])]);
        assert_eq!(
            expander.expand("ai search"),
            "(ai OR artificial intelligence) search"
        );
    }

    #[test]
    fn unknown_terms_pass_through_unchanged() {
        let expander = expander_with(&[]);
        assert_eq!(expander.expand("rust crate"), "rust crate");
    }

    #[test]
    fn missing_file_degrades_to_identity() {
        let expander = SynonymExpander::load("/nonexistent/path/synonyms.json");
        assert_eq!(expander.expand("rust crate"), "rust crate");
    }

    #[test]
    fn empty_query_expands_to_empty() {
        let expander = expander_with(&[("ai", &["ml"])]);
        assert_eq!(expander.expand(""), "");
    }

    #[test]
    fn duplicate_variants_are_deduplicated() {
        let expander = expander_with(&[("car", &["car", "automobile"])]);
        assert_eq!(expander.expand("car"), "(automobile OR car)");
    }
}
