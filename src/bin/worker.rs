//! The Worker process: N parallel consumers pulling from the shared work queue.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use webcrawl_search::anomaly_gate::AnomalyGate;
use webcrawl_search::config::Settings;
use webcrawl_search::parser::DefaultPageParser;
use webcrawl_search::queue::{RedisWorkQueue, WorkQueue};
use webcrawl_search::repository::PgRepository;
use webcrawl_search::robots_gate::RobotsGate;
use webcrawl_search::store::{KvStore, RedisStore};
use webcrawl_search::worker::{build_client, Worker};

const WORKER_CONCURRENCY: usize = 8;
const POP_TIMEOUT_SECONDS: u64 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Arc::new(Settings::from_env()?);
    let repository = PgRepository::connect(settings.clone()).await?;
    let store: Arc<dyn KvStore> = Arc::new(RedisStore::connect(&settings.redis_url).await?);
    let queue: Arc<dyn WorkQueue> = Arc::new(RedisWorkQueue::connect(&settings.redis_url)?);
    let client = build_client(&settings)?;

    let mut handles = Vec::with_capacity(WORKER_CONCURRENCY);
    for id in 0..WORKER_CONCURRENCY {
        let repository = repository.clone();
        let store = store.clone();
        let queue = queue.clone();
        let client = client.clone();
        let settings = settings.clone();

        handles.push(tokio::spawn(async move {
            let anomaly_gate = AnomalyGate::new(
                store.clone(),
                settings.max_url_length,
                settings.max_path_segment_repeats,
                settings.max_urls_per_domain,
            );
            let robots_gate = RobotsGate::new(
                client.clone(),
                store,
                settings.robots_cache_ttl_seconds,
                settings.user_agent.clone(),
            );
            let worker = Worker::new(
                repository,
                Arc::new(DefaultPageParser),
                anomaly_gate,
                robots_gate,
                client,
                settings,
            );

            loop {
                match queue.pop(POP_TIMEOUT_SECONDS).await {
                    Ok(Some(item)) => {
                        if let Err(err) = worker.process(item).await {
                            tracing::error!(worker = id, error = %err, "worker process failed");
                        }
                    }
                    Ok(None) => continue,
                    Err(err) => {
                        tracing::error!(worker = id, error = %err, "queue pop failed");
                    }
                }
            }
        }));
    }

    for handle in handles {
        handle.await?;
    }
    Ok(())
}
