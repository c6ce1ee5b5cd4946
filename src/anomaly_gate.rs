//! Spider-trap and per-domain-quota guards.
//!
//! Grounded in `original_source/src/crawler/anomaly_detector.py`.

use std::sync::Arc;

use url::Url;

use crate::store::KvStore;

pub struct AnomalyGate {
    store: Arc<dyn KvStore>,
    max_url_length: usize,
    max_path_segment_repeats: usize,
    max_urls_per_domain: u64,
}

const DOMAIN_QUOTA_WINDOW_SECONDS: u64 = 86_400;

impl AnomalyGate {
    pub fn new(
        store: Arc<dyn KvStore>,
        max_url_length: usize,
        max_path_segment_repeats: usize,
        max_urls_per_domain: u64,
    ) -> Self {
        Self {
            store,
            max_url_length,
            max_path_segment_repeats,
            max_urls_per_domain,
        }
    }

    /// True if `url` looks like a spider trap: too long, or a path segment repeats
    /// consecutively at least `max_path_segment_repeats` times (e.g. calendar-style
    /// `/cal/cal/cal/cal`).
    pub fn is_anomalous(&self, url: &str) -> bool {
        if url.len() > self.max_url_length {
            return true;
        }

        let path = match Url::parse(url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => return false,
        };

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return false;
        }

        let mut repeat_count = 0usize;
        let mut last_segment: Option<&str> = None;
        for segment in segments {
            if Some(segment) == last_segment {
                repeat_count += 1;
            } else {
                repeat_count = 0;
            }
            if repeat_count >= self.max_path_segment_repeats {
                return true;
            }
            last_segment = Some(segment);
        }
        false
    }

    /// True once `domain`'s rolling 24h crawl count exceeds the configured quota.
    pub async fn over_quota(&self, domain: &str) -> bool {
        let key = format!("domain:count:{domain}");
        match self.store.get(&key).await {
            Ok(Some(raw)) => raw
                .parse::<u64>()
                .map(|count| count > self.max_urls_per_domain)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Records a successful crawl against `domain`'s 24h sliding counter.
    pub async fn register_success(&self, domain: &str) {
        let key = format!("domain:count:{domain}");
        if self.store.incr(&key).await.is_ok() {
            let _ = self.store.expire(&key, DOMAIN_QUOTA_WINDOW_SECONDS).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn gate() -> AnomalyGate {
        AnomalyGate::new(Arc::new(InMemoryStore::new()), 256, 3, 1_000)
    }

    #[test]
    fn repeated_path_segments_are_anomalous() {
        let gate = gate();
        assert!(gate.is_anomalous("https://x.com/a/a/a/a"));
        assert!(!gate.is_anomalous("https://x.com/a/b/c/d"));
    }

    #[test]
    fn overly_long_urls_are_anomalous() {
        let gate = gate();
        let long_url = format!("https://x.com/{}", "a".repeat(300));
        assert!(gate.is_anomalous(&long_url));
    }

    #[test]
    fn root_path_is_never_anomalous() {
        let gate = gate();
        assert!(!gate.is_anomalous("https://x.com/"));
    }

    #[tokio::test]
    async fn quota_trips_after_threshold() {
        let gate = AnomalyGate::new(Arc::new(InMemoryStore::new()), 256, 3, 2);
        assert!(!gate.over_quota("x.com").await);
        gate.register_success("x.com").await;
        gate.register_success("x.com").await;
        assert!(!gate.over_quota("x.com").await);
        gate.register_success("x.com").await;
        assert!(gate.over_quota("x.com").await);
    }
}
