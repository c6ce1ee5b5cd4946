//! Fetch → parse → index → register-links → complete, per work item.
//!
//! Grounded in `crawly.rs`'s `Crawler::crawl` fetch/MIME-gate idiom (`reqwest` +
//! `Content-Type` check), fused with the pipeline ordering of
//! `original_source/src/workers/crawler_worker.py` — frequency/eligibility checks
//! already folded into `Repository::fetch_due`/`reserve`, so a Worker only fetches,
//! indexes, and reports.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};
use url::Url;

use crate::anomaly_gate::AnomalyGate;
use crate::config::Settings;
use crate::error::{CrawlError, Result};
use crate::indexer::Indexer;
use crate::link_extractor::LinkExtractor;
use crate::model::WorkItem;
use crate::parser::PageParser;
use crate::repository::Repository;
use crate::robots_gate::RobotsGate;

pub struct Worker<R: Repository, P: PageParser> {
    repository: R,
    indexer: Indexer<R>,
    parser: Arc<P>,
    anomaly_gate: AnomalyGate,
    robots_gate: RobotsGate,
    client: reqwest::Client,
    settings: Arc<Settings>,
}

impl<R: Repository, P: PageParser> Worker<R, P> {
    pub fn new(
        repository: R,
        parser: Arc<P>,
        anomaly_gate: AnomalyGate,
        robots_gate: RobotsGate,
        client: reqwest::Client,
        settings: Arc<Settings>,
    ) -> Self {
        let indexer = Indexer::new(repository.clone());
        Self {
            repository,
            indexer,
            parser,
            anomaly_gate,
            robots_gate,
            client,
            settings,
        }
    }

    /// Runs one work item end to end, enforcing `JOB_TIMEOUT` around the whole
    /// pipeline. The job itself never retries — that policy lives in
    /// `Repository::complete`'s `error_count`/`next_crawl_at` bookkeeping.
    #[instrument(skip(self, item), fields(url = %item.url))]
    pub async fn process(&self, item: WorkItem) -> Result<()> {
        match tokio::time::timeout(self.settings.job_timeout, self.run(&item)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                warn!(error = %err, "worker job failed");
                self.repository.complete(&item.url, false).await?;
                Ok(())
            }
            Err(_) => {
                warn!("worker job exceeded JOB_TIMEOUT");
                self.repository.complete(&item.url, false).await?;
                Ok(())
            }
        }
    }

    async fn run(&self, item: &WorkItem) -> Result<()> {
        let html = match self.fetch(&item.url).await {
            Ok(html) => html,
            Err(err) => {
                warn!(error = %err, "fetch failed");
                self.repository.complete(&item.url, false).await?;
                return Ok(());
            }
        };

        let record = match self.parser.parse(&item.url, &html) {
            Ok(record) => record,
            Err(message) => {
                warn!(%message, "parse failed");
                self.repository.complete(&item.url, false).await?;
                return Ok(());
            }
        };

        self.indexer.index(&record).await?;

        let Ok(base) = Url::parse(&item.url) else {
            self.repository.complete(&item.url, true).await?;
            return Ok(());
        };
        let extractor = LinkExtractor::new(base.as_str()).map_err(|e| {
            crate::error::CoreError::Other(anyhow::anyhow!("invalid base url: {e}"))
        })?;
        let links = extractor.extract(&html);

        if item.depth + 1 <= self.settings.max_depth {
            for link in links {
                if self.anomaly_gate.is_anomalous(&link) {
                    continue;
                }
                if !self.robots_gate.is_allowed(&link).await {
                    continue;
                }
                if let Ok(parsed) = Url::parse(&link) {
                    let domain = parsed.host_str().unwrap_or_default().to_string();
                    if self.anomaly_gate.over_quota(&domain).await {
                        continue;
                    }
                    self.repository
                        .register(&link, &domain, (item.depth + 1) as i32)
                        .await?;
                }
            }
        }

        self.repository.complete(&item.url, true).await?;
        let domain = base.host_str().unwrap_or_default();
        self.anomaly_gate.register_success(domain).await;

        info!("crawl completed");
        Ok(())
    }

    async fn fetch(&self, url: &str) -> std::result::Result<String, CrawlError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| CrawlError::Fetch {
                url: url.to_string(),
                source,
            })?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.contains("text/html") {
            return Err(CrawlError::UnsupportedContentType {
                url: url.to_string(),
                content_type,
            });
        }

        response.text().await.map_err(|source| CrawlError::Fetch {
            url: url.to_string(),
            source,
        })
    }
}

pub fn build_client(settings: &Settings) -> reqwest::Result<reqwest::Client> {
    crate::robots_gate::build_http_client(
        Duration::from_secs(settings.request_timeout.as_secs()),
        &settings.user_agent,
    )
}
