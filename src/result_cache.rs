//! Keyed cache of full response payloads with TTL.
//!
//! Grounded in `original_source/src/services/redis_cache.py`. Backed by the same
//! [`KvStore`] contract the domain lock and robots cache use; write failures are
//! logged, not raised, and deserialization errors on read are treated as a miss.

use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::model::{SearchFilters, SearchPayload};
use crate::store::KvStore;

pub struct ResultCache {
    store: Arc<dyn KvStore>,
    ttl_seconds: u64,
}

#[derive(Serialize)]
struct CacheKeyPayload<'a> {
    f: &'a SearchFilters,
    l: i64,
    q: &'a str,
}

impl ResultCache {
    pub fn new(store: Arc<dyn KvStore>, ttl_seconds: u64) -> Self {
        Self { store, ttl_seconds }
    }

    /// `search:<sha256(json({q, f, l}, sorted keys))>`. Field names are alphabetized
    /// on the struct so `serde_json`'s derive emits them in the same sorted order the
    /// Python `json.dumps(..., sort_keys=True)` would.
    fn key(query: &str, filters: &SearchFilters, limit: i64) -> String {
        let payload = CacheKeyPayload {
            f: filters,
            l: limit,
            q: query,
        };
        let serialized = serde_json::to_string(&payload).expect("payload is always serializable");
        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        format!("search:{}", hex::encode(hasher.finalize()))
    }

    pub async fn get(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: i64,
    ) -> Option<SearchPayload> {
        let key = Self::key(query, filters, limit);
        match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(payload) => Some(payload),
                Err(err) => {
                    warn!(%key, error = %err, "cache payload failed to deserialize, treating as miss");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(%key, error = %err, "cache read failed, degrading to a miss");
                None
            }
        }
    }

    pub async fn put(&self, query: &str, filters: &SearchFilters, limit: i64, payload: &SearchPayload) {
        let key = Self::key(query, filters, limit);
        let serialized = match serde_json::to_string(payload) {
            Ok(s) => s,
            Err(err) => {
                warn!(%key, error = %err, "failed to serialize payload for caching");
                return;
            }
        };
        if let Err(err) = self.store.set_ex(&key, &serialized, self.ttl_seconds).await {
            warn!(%key, error = %err, "cache write failed, continuing without it");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SearchResultItem;
    use crate::store::InMemoryStore;

    fn sample_payload() -> SearchPayload {
        SearchPayload {
            query: "rust".into(),
            count: 1,
            results: vec![SearchResultItem {
                url: "https://example.com".into(),
                title: "Example".into(),
                snippet: "an example".into(),
                score: 1.0,
                img_url: None,
            }],
            keywords: vec!["rust".into()],
        }
    }

    #[tokio::test]
    async fn round_trips_within_ttl() {
        let cache = ResultCache::new(Arc::new(InMemoryStore::new()), 300);
        let filters = SearchFilters::default();
        let payload = sample_payload();

        cache.put("rust", &filters, 20, &payload).await;
        let fetched = cache.get("rust", &filters, 20).await.expect("cache hit");
        assert_eq!(fetched.query, payload.query);
        assert_eq!(fetched.results.len(), 1);
    }

    #[tokio::test]
    async fn distinct_filters_are_distinct_keys() {
        let cache = ResultCache::new(Arc::new(InMemoryStore::new()), 300);
        let payload = sample_payload();
        cache.put("rust", &SearchFilters::default(), 20, &payload).await;

        let other = SearchFilters {
            category: Some("news".into()),
            ..Default::default()
        };
        assert!(cache.get("rust", &other, 20).await.is_none());
    }

    #[tokio::test]
    async fn corrupted_payload_is_treated_as_miss() {
        let store = Arc::new(InMemoryStore::new());
        let cache = ResultCache::new(store.clone(), 300);
        let filters = SearchFilters::default();
        let key = ResultCache::key("rust", &filters, 20);
        store.set_ex(&key, "not json", 300).await.unwrap();

        assert!(cache.get("rust", &filters, 20).await.is_none());
    }
}
