//! Fetches, caches, and evaluates `robots.txt` per host.
//!
//! Grounded in `crawly.rs`'s `RobotsCache`/`robots_cache` field and its use of the
//! `robotstxt` crate's `DefaultMatcher`, generalized from an in-process `IndexMap` to
//! the shared [`KvStore`] contract (`original_source/src/crawler/robots.py` backs this
//! with Redis so the cache is shared across Dispatcher and Worker processes).

use std::sync::Arc;
use std::time::Duration;

use robotstxt::DefaultMatcher;
use tracing::debug;
use url::Url;

use crate::store::KvStore;

pub struct RobotsGate {
    client: reqwest::Client,
    store: Arc<dyn KvStore>,
    ttl_seconds: u64,
    user_agent: String,
}

impl RobotsGate {
    pub fn new(
        client: reqwest::Client,
        store: Arc<dyn KvStore>,
        ttl_seconds: u64,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            client,
            store,
            ttl_seconds,
            user_agent: user_agent.into(),
        }
    }

    /// Returns whether `url` is allowed for the configured user-agent.
    ///
    /// - Cache hit: re-evaluate the cached raw body (cheap; re-parsing beats re-fetching).
    /// - 4xx/5xx response: cache a permissive decision (empty body) for the TTL.
    /// - Network error: permissive, but *not* cached, so the next call retries the fetch.
    pub async fn is_allowed(&self, url: &str) -> bool {
        let parsed = match Url::parse(url) {
            Ok(u) => u,
            Err(_) => return false,
        };
        let host = match parsed.host_str() {
            Some(h) => h.to_string(),
            None => return false,
        };
        let cache_key = format!("robots:{host}");

        let body = match self.store.get(&cache_key).await {
            Ok(Some(cached)) => {
                debug!(%host, "robots.txt cache hit");
                cached
            }
            _ => {
                let robots_url = format!("{}://{}/robots.txt", parsed.scheme(), host);
                match self.client.get(&robots_url).send().await {
                    Ok(response) if response.status().is_success() => {
                        let text = response.text().await.unwrap_or_default();
                        let _ = self.store.set_ex(&cache_key, &text, self.ttl_seconds).await;
                        text
                    }
                    Ok(_) => {
                        // 4xx/5xx: cache the permissive decision.
                        let _ = self.store.set_ex(&cache_key, "", self.ttl_seconds).await;
                        return true;
                    }
                    Err(_) => {
                        // Network error: permissive without caching, retry next call.
                        return true;
                    }
                }
            }
        };

        if body.is_empty() {
            return true;
        }

        DefaultMatcher::default().one_agent_allowed_by_robots(&body, &self.user_agent, url)
    }
}

/// Wraps a `reqwest::Client` with the configured request timeout and user agent.
pub fn build_http_client(timeout: Duration, user_agent: &str) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent.to_string())
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn cached_disallow_rule_blocks_without_refetch() {
        let store = Arc::new(InMemoryStore::new());
        store
            .set_ex("robots:example.com", "User-agent: *\nDisallow: /private", 86_400)
            .await
            .unwrap();

        let gate = RobotsGate::new(
            reqwest::Client::new(),
            store,
            86_400,
            "SearchEngineBot/1.0",
        );

        assert!(!gate.is_allowed("https://example.com/private/page").await);
        assert!(gate.is_allowed("https://example.com/public/page").await);
    }

    #[tokio::test]
    async fn empty_cached_body_is_permissive() {
        let store = Arc::new(InMemoryStore::new());
        store.set_ex("robots:example.com", "", 86_400).await.unwrap();
        let gate = RobotsGate::new(reqwest::Client::new(), store, 86_400, "bot");
        assert!(gate.is_allowed("https://example.com/anything").await);
    }

    #[tokio::test]
    async fn malformed_url_is_disallowed() {
        let gate = RobotsGate::new(
            reqwest::Client::new(),
            Arc::new(InMemoryStore::new()),
            86_400,
            "bot",
        );
        assert!(!gate.is_allowed("not a url").await);
    }
}
