//! Periodic selection of due URLs into dispatched work items.
//!
//! Grounded in `original_source/src/crawler/scheduler.py`'s
//! `CrawlScheduler.dispatch_pending_jobs`, rendered with `crawly.rs`'s `Semaphore`-gated
//! concurrency idiom — here the semaphore is replaced by the per-domain `SETNX` lock,
//! since politeness (not raw concurrency) is what's being rate-shaped.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::anomaly_gate::AnomalyGate;
use crate::config::Settings;
use crate::error::Result;
use crate::model::WorkItem;
use crate::queue::WorkQueue;
use crate::repository::Repository;
use crate::robots_gate::RobotsGate;
use crate::store::KvStore;

pub struct Dispatcher<R: Repository> {
    repository: R,
    store: Arc<dyn KvStore>,
    anomaly_gate: AnomalyGate,
    robots_gate: RobotsGate,
    queue: Arc<dyn WorkQueue>,
    settings: Arc<Settings>,
}

impl<R: Repository> Dispatcher<R> {
    pub fn new(
        repository: R,
        store: Arc<dyn KvStore>,
        anomaly_gate: AnomalyGate,
        robots_gate: RobotsGate,
        queue: Arc<dyn WorkQueue>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            repository,
            store,
            anomaly_gate,
            robots_gate,
            queue,
            settings,
        }
    }

    /// One dispatch tick: fetch due candidates, filter through the politeness gates in
    /// order, stop once `limit` dispatches succeed. Returns the number dispatched.
    #[instrument(skip(self))]
    pub async fn tick(&self, limit: i64) -> Result<u32> {
        let candidates = self.repository.fetch_due(limit).await?;
        let mut dispatched = 0u32;

        for candidate in candidates {
            if dispatched as i64 >= limit {
                break;
            }

            let lock_key = format!("lock:{}", candidate.domain);
            if self.store.exists(&lock_key).await.unwrap_or(false) {
                continue;
            }

            if self.anomaly_gate.over_quota(&candidate.domain).await {
                continue;
            }

            if !self.robots_gate.is_allowed(&candidate.url).await {
                self.repository.mark_blocked(&candidate.url, "robots").await?;
                continue;
            }

            let acquired = self
                .store
                .set_nx_ex(&lock_key, "1", self.settings.domain_lock_ttl_seconds)
                .await
                .unwrap_or(false);
            if !acquired {
                continue;
            }

            if !self.repository.reserve(&candidate.url).await? {
                let _ = self.store.del(&lock_key).await;
                continue;
            }

            self.queue
                .push(&WorkItem {
                    url: candidate.url.clone(),
                    depth: candidate.depth.max(0) as u32,
                })
                .await?;

            debug!(url = %candidate.url, domain = %candidate.domain, "dispatched");
            dispatched += 1;
        }

        if dispatched > 0 {
            info!(dispatched, "dispatch tick complete");
        }
        Ok(dispatched)
    }

    /// Resets `crawling` rows that have outlived `2*JOB_TIMEOUT` back to `pending` —
    /// a crashed Worker must not strand a URL forever.
    #[instrument(skip(self))]
    pub async fn reap_stale_reservations(&self) -> Result<u64> {
        let threshold =
            chrono::Utc::now() - chrono::Duration::seconds(2 * self.settings.job_timeout.as_secs() as i64);
        let reset = self.repository.reap_stale_reservations(threshold).await?;
        if reset > 0 {
            warn!(reset, "reaped stale reservations");
        }
        Ok(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryWorkQueue;
    use crate::repository::InMemoryRepository;
    use crate::store::InMemoryStore;

    fn settings() -> Arc<Settings> {
        Arc::new(Settings {
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
        })
    }

    fn dispatcher(settings: Arc<Settings>) -> (Dispatcher<InMemoryRepository>, InMemoryRepository) {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
        let repository = InMemoryRepository::new(settings.clone());
        let anomaly_gate = AnomalyGate::new(
            store.clone(),
            settings.max_url_length,
            settings.max_path_segment_repeats,
            settings.max_urls_per_domain,
        );
        let robots_gate = RobotsGate::new(
            reqwest::Client::new(),
            store.clone(),
            settings.robots_cache_ttl_seconds,
            settings.user_agent.clone(),
        );
        let queue: Arc<dyn WorkQueue> = Arc::new(InMemoryWorkQueue::new());
        let dispatcher = Dispatcher::new(
            repository.clone(),
            store,
            anomaly_gate,
            robots_gate,
            queue,
            settings,
        );
        (dispatcher, repository)
    }

    #[tokio::test]
    async fn dispatches_up_to_limit_and_reserves() {
        let settings = settings();
        let (dispatcher, repository) = dispatcher(settings);
        repository.register("https://x.com/a", "x.com", 0).await.unwrap();
        repository.register("https://y.com/a", "y.com", 0).await.unwrap();

        let dispatched = dispatcher.tick(10).await.unwrap();
        assert_eq!(dispatched, 2);
        assert_eq!(
            repository.status_of("https://x.com/a").await,
            Some(crate::model::UrlStatus::Crawling)
        );
    }

    #[tokio::test]
    async fn second_url_on_same_domain_is_skipped_by_lock() {
        let settings = settings();
        let (dispatcher, repository) = dispatcher(settings);
        repository.register("https://x.com/a", "x.com", 0).await.unwrap();
        repository.register("https://x.com/b", "x.com", 0).await.unwrap();

        let dispatched = dispatcher.tick(10).await.unwrap();
        assert_eq!(dispatched, 1);
    }

    #[tokio::test]
    async fn stops_at_limit() {
        let settings = settings();
        let (dispatcher, repository) = dispatcher(settings);
        for i in 0..5 {
            repository
                .register(&format!("https://d{i}.com/a"), &format!("d{i}.com"), 0)
                .await
                .unwrap();
        }
        let dispatched = dispatcher.tick(2).await.unwrap();
        assert_eq!(dispatched, 2);
    }
}
