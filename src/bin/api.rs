//! The API process: plain async handlers for search, click feedback, and crawl
//! administration, deliberately not wired to any router (routing itself is out of
//! scope). A real deployment mounts these onto axum/actix-web.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;
use webcrawl_search::config::Settings;
use webcrawl_search::model::SearchFilters;
use webcrawl_search::repository::{PgRepository, Repository};
use webcrawl_search::result_cache::ResultCache;
use webcrawl_search::search_engine::SearchEngine;
use webcrawl_search::store::RedisStore;
use webcrawl_search::synonym_expander::SynonymExpander;

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    category: Option<String>,
    domain: Option<String>,
    date_from: Option<chrono::DateTime<chrono::Utc>>,
    date_to: Option<chrono::DateTime<chrono::Utc>>,
    include_images: Option<bool>,
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct ClickRequest {
    search_id: i64,
    url: String,
    rank: i32,
}

#[derive(Deserialize)]
struct AdminCrawlRequest {
    urls: Vec<String>,
}

async fn handle_search(engine: &SearchEngine<PgRepository>, query: SearchQuery) -> Value {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let filters = SearchFilters {
        category: query.category,
        domain: query.domain,
        published_from: query.date_from,
        published_to: query.date_to,
        include_images: query.include_images.unwrap_or(false),
    };

    match engine.search(&query.q, &filters, limit).await {
        Ok(response) => json!(response),
        Err(_) => json!({ "error": "q must not be empty" }),
    }
}

async fn handle_click(engine: &SearchEngine<PgRepository>, request: ClickRequest) -> Value {
    engine.log_click(request.search_id, &request.url, request.rank).await;
    json!({ "status": "ok" })
}

async fn handle_admin_crawl(repository: &PgRepository, request: AdminCrawlRequest) -> Value {
    let mut target_count = 0;
    for url in &request.urls {
        if let Ok(parsed) = url::Url::parse(url) {
            let domain = parsed.host_str().unwrap_or_default().to_string();
            if repository.register(url, &domain, 0).await.is_ok() {
                target_count += 1;
            }
        }
    }
    json!({ "message": "seeds registered", "target_count": target_count })
}

async fn handle_crawl_status(repository: &PgRepository) -> Value {
    match repository.status_counts().await {
        Ok(counts) => json!(counts),
        Err(_) => json!({}),
    }
}

async fn handle_crawl_domains(repository: &PgRepository, limit: i64) -> Value {
    match repository.domain_stats(limit).await {
        Ok(stats) => json!(stats),
        Err(_) => json!([]),
    }
}

async fn handle_crawl_queue(repository: &PgRepository, limit: i64) -> Value {
    match repository.queue_head(limit).await {
        Ok(rows) => json!(rows.into_iter().map(|r| r.url).collect::<Vec<_>>()),
        Err(_) => json!([]),
    }
}

fn handle_health() -> Value {
    json!({ "status": "ok" })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Arc::new(Settings::from_env()?);
    let repository = PgRepository::connect(settings.clone()).await?;
    let redis_store = Arc::new(RedisStore::connect(&settings.redis_url).await?);
    let synonym_expander = Arc::new(SynonymExpander::load(&settings.synonym_file_path));
    let cache = ResultCache::new(redis_store, settings.redis_ttl_seconds);
    let engine = SearchEngine::new(repository.clone(), synonym_expander, cache);

    let _ = handle_health();
    let _ = handle_crawl_status(&repository).await;
    let _ = handle_crawl_domains(&repository, 10).await;
    let _ = handle_crawl_queue(&repository, 10).await;
    let _ = handle_search(
        &engine,
        SearchQuery {
            q: String::new(),
            category: None,
            domain: None,
            date_from: None,
            date_to: None,
            include_images: None,
            limit: None,
        },
    )
    .await;
    let _ = handle_click(
        &engine,
        ClickRequest {
            search_id: 0,
            url: String::new(),
            rank: 0,
        },
    )
    .await;
    let _ = handle_admin_crawl(&repository, AdminCrawlRequest { urls: vec![] }).await;

    tracing::info!("api handlers constructed; mount onto your HTTP router of choice");
    Ok(())
}
