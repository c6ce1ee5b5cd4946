//! Query-relation-based intent broadening.
//!
//! Not present in `original_source`'s `SearchService` pipeline — implemented directly
//! against the `query_relations` table already defined in
//! [`crate::model::QueryRelation`], in the same trait-backed-by-`Repository` style as
//! the rest of the search pipeline.

use crate::error::Result;
use crate::repository::Repository;

pub struct IntentExpander<R: Repository> {
    repository: R,
}

impl<R: Repository> IntentExpander<R> {
    pub fn new(repository: R) -> Self {
        Self { repository }
    }

    /// Returns `"<query> OR <target>"` when a `query_relations` row with
    /// `score >= 0.8` exists for `normalized_query` (highest-scoring on ties),
    /// otherwise the query unchanged. Runs before synonym expansion.
    pub async fn expand(&self, normalized_query: &str) -> Result<String> {
        match self.repository.best_query_relation(normalized_query).await? {
            Some(relation) => Ok(format!("{} OR {}", normalized_query, relation.target_query)),
            None => Ok(normalized_query.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::repository::InMemoryRepository;
    use std::sync::Arc;
    use std::time::Duration;

    fn settings() -> Arc<Settings> {
        Arc::new(Settings {
            database_url: String::new(),
            redis_url: String::new(),
            redis_ttl_seconds: 300,
            user_agent: "test".into(),
            request_timeout: Duration::from_secs(10),
            job_timeout: Duration::from_secs(60),
            max_depth: 3,
            default_interval_seconds: 86_400,
            error_interval_seconds: 21_600,
            domain_lock_ttl_seconds: 60,
            base_score: 100.0,
            depth_penalty: 10.0,
            error_penalty: 20.0,
            max_retries: 5,
            robots_cache_ttl_seconds: 86_400,
            max_urls_per_domain: 1_000,
            max_url_length: 256,
            max_path_segment_repeats: 3,
            synonym_file_path: String::new(),
        })
    }

    #[tokio::test]
    async fn expands_when_relation_meets_threshold() {
        let repository = InMemoryRepository::new(settings());
        repository.seed_query_relation("car", "automobile", 0.9).await;
        let expander = IntentExpander::new(repository);
        assert_eq!(expander.expand("car").await.unwrap(), "car OR automobile");
    }

    #[tokio::test]
    async fn leaves_query_unchanged_below_threshold() {
        let repository = InMemoryRepository::new(settings());
        repository.seed_query_relation("car", "bike", 0.5).await;
        let expander = IntentExpander::new(repository);
        assert_eq!(expander.expand("car").await.unwrap(), "car");
    }

    #[tokio::test]
    async fn leaves_query_unchanged_with_no_relations() {
        let repository = InMemoryRepository::new(settings());
        let expander = IntentExpander::new(repository);
        assert_eq!(expander.expand("car").await.unwrap(), "car");
    }
}
