//! The Dispatcher process: periodic tick + reservation reaper.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use webcrawl_search::anomaly_gate::AnomalyGate;
use webcrawl_search::config::Settings;
use webcrawl_search::dispatcher::Dispatcher;
use webcrawl_search::queue::RedisWorkQueue;
use webcrawl_search::repository::PgRepository;
use webcrawl_search::robots_gate::{build_http_client, RobotsGate};
use webcrawl_search::store::{KvStore, RedisStore};

const TICK_INTERVAL: Duration = Duration::from_secs(10);
const DISPATCH_LIMIT: i64 = 50;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Arc::new(Settings::from_env()?);
    let repository = PgRepository::connect(settings.clone()).await?;
    let store: Arc<dyn KvStore> = Arc::new(RedisStore::connect(&settings.redis_url).await?);
    let queue = Arc::new(RedisWorkQueue::connect(&settings.redis_url)?);

    let anomaly_gate = AnomalyGate::new(
        store.clone(),
        settings.max_url_length,
        settings.max_path_segment_repeats,
        settings.max_urls_per_domain,
    );
    let client = build_http_client(settings.request_timeout, &settings.user_agent)?;
    let robots_gate = RobotsGate::new(
        client,
        store.clone(),
        settings.robots_cache_ttl_seconds,
        settings.user_agent.clone(),
    );

    let dispatcher = Dispatcher::new(repository, store, anomaly_gate, robots_gate, queue, settings);

    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(err) = dispatcher.tick(DISPATCH_LIMIT).await {
            tracing::error!(error = %err, "dispatch tick failed");
        }
        if let Err(err) = dispatcher.reap_stale_reservations().await {
            tracing::error!(error = %err, "reservation reap failed");
        }
    }
}
