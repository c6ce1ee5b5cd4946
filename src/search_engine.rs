//! The query orchestration — normalize, log, expand intent, expand synonyms, probe
//! cache, query the index, snippet, derive keywords, populate cache, return.
//!
//! Grounded in `original_source/src/services/search_service.py`'s `SearchService.search`
//! for control flow; `keywords` (top-5 by frequency across returned titles) is computed
//! in Rust rather than deferred to an index tokenizer, since the full-text index is
//! an external deployment concern that this crate only talks to through
//! `Repository::search_pages`.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::error::{Result, SearchError};
use crate::intent_expander::IntentExpander;
use crate::model::{SearchFilters, SearchPayload, SearchResponse, SearchResultItem};
use crate::query_normalizer::QueryNormalizer;
use crate::repository::Repository;
use crate::result_cache::ResultCache;
use crate::snippet_generator::SnippetGenerator;
use crate::synonym_expander::SynonymExpander;

pub struct SearchEngine<R: Repository> {
    repository: R,
    intent_expander: IntentExpander<R>,
    synonym_expander: Arc<SynonymExpander>,
    cache: ResultCache,
}

impl<R: Repository> SearchEngine<R> {
    pub fn new(repository: R, synonym_expander: Arc<SynonymExpander>, cache: ResultCache) -> Self {
        let intent_expander = IntentExpander::new(repository.clone());
        Self {
            repository,
            intent_expander,
            synonym_expander,
            cache,
        }
    }

    pub async fn search(
        &self,
        raw_query: &str,
        filters: &SearchFilters,
        limit: i64,
    ) -> Result<SearchResponse> {
        let normalized = QueryNormalizer::normalize(raw_query);
        if normalized.is_empty() {
            return Err(SearchError::EmptyQuery.into());
        }

        let search_id = self.repository.log_search(raw_query, &normalized).await?;

        if let Some(cached) = self.cache.get(&normalized, filters, limit).await {
            return Ok(SearchResponse {
                search_id,
                payload: cached,
            });
        }

        let intent = self.intent_expander.expand(&normalized).await?;
        let expanded = self.synonym_expander.expand(&intent);

        let rows = self
            .repository
            .search_pages(&expanded, filters, limit)
            .await
            .map_err(SearchError::Index)?;

        let results: Vec<SearchResultItem> = rows
            .into_iter()
            .map(|row| SearchResultItem {
                url: row.url,
                title: row.title.clone(),
                snippet: SnippetGenerator::generate(&row.content, &normalized),
                score: row.score,
                img_url: if filters.include_images { row.image_url } else { None },
            })
            .collect();

        let keywords = top_keywords(results.iter().map(|r| r.title.as_str()));

        let payload = SearchPayload {
            query: normalized.clone(),
            count: results.len(),
            results,
            keywords,
        };

        self.cache.put(&normalized, filters, limit, &payload).await;

        Ok(SearchResponse { search_id, payload })
    }

    /// Failures are logged, not raised.
    pub async fn log_click(&self, search_id: i64, url: &str, rank: i32) {
        if let Err(err) = self.repository.log_click(search_id, url, rank).await {
            warn!(search_id, url, rank, error = %err, "click log failed");
        }
    }
}

/// Top-5 tokens (length > 1) by frequency across the given titles, lowercased.
fn top_keywords<'a>(titles: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut counts: HashMap<String, u32> = HashMap::new();
    for title in titles {
        for token in title.split_whitespace() {
            let normalized: String = token
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase();
            if normalized.len() > 1 {
                *counts.entry(normalized).or_insert(0) += 1;
            }
        }
    }
    let mut ranked: Vec<(String, u32)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(5).map(|(word, _)| word).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PageUpsert;
    use crate::repository::InMemoryRepository;
    use crate::store::InMemoryStore;
    use std::collections::HashMap as Map;

    fn engine() -> SearchEngine<InMemoryRepository> {
        let settings = Arc::new(crate::config::Settings {
            database_url: String::new(),
            redis_url: String::new(),
            redis_ttl_seconds: 300,
            user_agent: "test".into(),
            request_timeout: std::time::Duration::from_secs(10),
            job_timeout: std::time::Duration::from_secs(60),
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
        });
        let repository = InMemoryRepository::new(settings);
        let synonym_expander = Arc::new(SynonymExpander::from_map(Map::new()));
        let cache = ResultCache::new(Arc::new(InMemoryStore::new()), 300);
        SearchEngine::new(repository, synonym_expander, cache)
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let engine = engine();
        let result = engine.search("   ", &SearchFilters::default(), 20).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn returns_matching_page_with_snippet_and_keywords() {
        let engine = engine();
        engine
            .repository
            .upsert_page(&PageUpsert {
                url: "https://x.com/rust".into(),
                title: "Rust Programming Guide".into(),
                content: "Rust is a systems programming language. It is fast.".into(),
                category: "general".into(),
                published_at: None,
                images: vec![],
                representative_image_hash: None,
            })
            .await
            .unwrap();

        let response = engine.search("rust", &SearchFilters::default(), 20).await.unwrap();
        assert_eq!(response.payload.count, 1);
        assert!(response.payload.results[0].snippet.contains("Rust"));
        assert!(response.payload.keywords.contains(&"rust".to_string()));
    }

    #[tokio::test]
    async fn identical_query_twice_hits_cache_with_fresh_search_id() {
        let engine = engine();
        engine
            .repository
            .upsert_page(&PageUpsert {
                url: "https://x.com/rust".into(),
                title: "Rust".into(),
                content: "Rust content".into(),
                category: "general".into(),
                published_at: None,
                images: vec![],
                representative_image_hash: None,
            })
            .await
            .unwrap();

        let first = engine.search("rust", &SearchFilters::default(), 20).await.unwrap();
        let second = engine.search("rust", &SearchFilters::default(), 20).await.unwrap();
        assert_ne!(first.search_id, second.search_id);
        assert_eq!(first.payload.query, second.payload.query);
    }
}
