//! Owns all durable state transitions against `crawl_urls`, `web_pages`, `images`,
//! `page_images`, `search_logs`, `click_logs` and `query_relations`.
//!
//! Structurally grounded in `original_source/src/crawler/repository.py`, rendered in
//! the async-trait-backed-repository idiom of `foiacquire`'s
//! `src/repository/crawl/async_urls.rs`/`async_claims.rs`: a trait describing the
//! contract, a `sqlx`-backed implementation, and an in-memory fake for tests — the
//! seam that keeps Worker/Dispatcher testable without a live Postgres.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::config::Settings;
use crate::error::{RepositoryError, Result};
use crate::model::{
    DomainStat, DueUrl, PageSearchRow, PageUpsert, QueryRelation, SearchFilters, StatusCounts,
    UrlStatus,
};

#[async_trait]
pub trait Repository: Clone + Send + Sync + 'static {
    /// Insert-if-absent with `status=pending`, `next_crawl_at=now`,
    /// `score = BASE_SCORE - depth*DEPTH_PENALTY`. Idempotent.
    async fn register(&self, url: &str, domain: &str, depth: i32) -> Result<()>;

    /// Up to `5*limit` rows where `status in (pending, done, error)` and
    /// `next_crawl_at <= now`, ordered by `score DESC, next_crawl_at ASC` — the
    /// Dispatcher filters and truncates to `limit` dispatches.
    async fn fetch_due(&self, limit: i64) -> Result<Vec<DueUrl>>;

    /// Conditional `status=crawling` update; `true` only if the prior status was
    /// eligible. The optimistic-concurrency guard that lets two Dispatchers race
    /// safely on the same row.
    async fn reserve(&self, url: &str) -> Result<bool>;

    async fn mark_blocked(&self, url: &str, reason: &str) -> Result<()>;

    /// On success: done/reset-error_count/reset-score/next_crawl_at=+DEFAULT_INTERVAL.
    /// On failure: increment error_count, subtract ERROR_PENALTY, error/+ERROR_INTERVAL;
    /// past MAX_RETRIES, delete the URL and its page row instead.
    async fn complete(&self, url: &str, success: bool) -> Result<()>;

    /// Transactional page + image-asset + page-image-link upsert, recomputing
    /// `search_text`.
    async fn upsert_page(&self, page: &PageUpsert) -> Result<()>;

    /// Full-text query against the page index with filter composition. `query` is
    /// already synonym/intent-expanded.
    async fn search_pages(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: i64,
    ) -> Result<Vec<PageSearchRow>>;

    /// Resets any `crawling` row whose `updated_at` is older than `older_than` back to
    /// `pending`, recovering reservations stranded by a crashed Worker.
    async fn reap_stale_reservations(&self, older_than: DateTime<Utc>) -> Result<u64>;

    async fn status_counts(&self) -> Result<StatusCounts>;
    async fn domain_stats(&self, limit: i64) -> Result<Vec<DomainStat>>;
    /// Same ordering as `fetch_due`, exposed read-only for `GET /crawl/queue`.
    async fn queue_head(&self, limit: i64) -> Result<Vec<DueUrl>>;

    async fn log_search(&self, raw_query: &str, normalized_query: &str) -> Result<i64>;
    async fn log_click(&self, search_id: i64, url: &str, rank: i32) -> Result<()>;

    /// The best (`score >= 0.8`, ties broken by highest score) relation for
    /// `normalized_query`, or `None`.
    async fn best_query_relation(&self, normalized_query: &str) -> Result<Option<QueryRelation>>;
}

#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
    settings: Arc<Settings>,
}

impl PgRepository {
    pub async fn connect(settings: Arc<Settings>) -> Result<Self> {
        let pool = PgPool::connect(&settings.database_url)
            .await
            .map_err(RepositoryError::Database)?;
        Ok(Self { pool, settings })
    }

    pub fn from_pool(pool: PgPool, settings: Arc<Settings>) -> Self {
        Self { pool, settings }
    }

    fn base_score_for_depth(&self, depth: i32) -> f64 {
        self.settings.base_score - depth as f64 * self.settings.depth_penalty
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn register(&self, url: &str, domain: &str, depth: i32) -> Result<()> {
        let score = self.base_score_for_depth(depth);
        sqlx::query(
            r#"
            INSERT INTO crawl_urls (url, domain, depth, status, next_crawl_at, score, error_count, updated_at)
            VALUES ($1, $2, $3, 'pending', now(), $4, 0, now())
            ON CONFLICT (url) DO NOTHING
            "#,
        )
        .bind(url)
        .bind(domain)
        .bind(depth)
        .bind(score)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::Database)?;
        Ok(())
    }

    async fn fetch_due(&self, limit: i64) -> Result<Vec<DueUrl>> {
        let rows = sqlx::query_as::<_, DueUrl>(
            r#"
            SELECT url, domain, depth, score, next_crawl_at, error_count
            FROM crawl_urls
            WHERE status IN ('pending', 'done', 'error') AND next_crawl_at <= now()
            ORDER BY score DESC, next_crawl_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit * 5)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::Database)?;
        Ok(rows)
    }

    async fn reserve(&self, url: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_urls
            SET status = 'crawling', updated_at = now()
            WHERE url = $1 AND status IN ('pending', 'done', 'error')
            "#,
        )
        .bind(url)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_blocked(&self, url: &str, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE crawl_urls
            SET status = 'blocked', blocked_reason = $2, updated_at = now()
            WHERE url = $1
            "#,
        )
        .bind(url)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::Database)?;
        Ok(())
    }

    async fn complete(&self, url: &str, success: bool) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::Database)?;

        let row: Option<(i32, i32, f64)> = sqlx::query_as(
            "SELECT error_count, depth, score FROM crawl_urls WHERE url = $1 FOR UPDATE",
        )
        .bind(url)
        .fetch_optional(&mut *tx)
        .await
        .map_err(RepositoryError::Database)?;

        let Some((error_count, depth, score)) = row else {
            tx.commit().await.map_err(RepositoryError::Database)?;
            return Ok(());
        };

        if success {
            let new_score = self.base_score_for_depth(depth);
            sqlx::query(
                r#"
                UPDATE crawl_urls
                SET status = 'done',
                    error_count = 0,
                    score = $2,
                    last_crawled_at = now(),
                    updated_at = now(),
                    next_crawl_at = now() + ($3 || ' seconds')::interval
                WHERE url = $1
                "#,
            )
            .bind(url)
            .bind(new_score)
            .bind(self.settings.default_interval_seconds.to_string())
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::Database)?;
        } else {
            let new_errors = error_count + 1;
            let new_score = score - self.settings.error_penalty;

            if new_errors > self.settings.max_retries as i32 {
                sqlx::query(
                    "UPDATE crawl_urls SET status = 'deleted', deleted_at = now(), updated_at = now() WHERE url = $1",
                )
                .bind(url)
                .execute(&mut *tx)
                .await
                .map_err(RepositoryError::Database)?;

                sqlx::query("DELETE FROM web_pages WHERE url = $1")
                    .bind(url)
                    .execute(&mut *tx)
                    .await
                    .map_err(RepositoryError::Database)?;
            } else {
                sqlx::query(
                    r#"
                    UPDATE crawl_urls
                    SET status = 'error',
                        error_count = $2,
                        score = $3,
                        last_crawled_at = now(),
                        updated_at = now(),
                        next_crawl_at = now() + ($4 || ' seconds')::interval
                    WHERE url = $1
                    "#,
                )
                .bind(url)
                .bind(new_errors)
                .bind(new_score)
                .bind(self.settings.error_interval_seconds.to_string())
                .execute(&mut *tx)
                .await
                .map_err(RepositoryError::Database)?;
            }
        }

        tx.commit().await.map_err(RepositoryError::Database)?;
        Ok(())
    }

    async fn upsert_page(&self, page: &PageUpsert) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(RepositoryError::Database)?;

        let alt_texts = page
            .images
            .iter()
            .filter_map(|(_, link)| link.alt.as_deref())
            .collect::<Vec<_>>()
            .join(" ");
        let search_text = format!("{} {} {}", page.title, page.content, alt_texts);

        sqlx::query(
            r#"
            INSERT INTO web_pages (url, title, content, category, published_at, search_text, representative_image_id, updated_at, crawled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, now(), now())
            ON CONFLICT (url) DO UPDATE SET
                title = EXCLUDED.title,
                content = EXCLUDED.content,
                category = EXCLUDED.category,
                published_at = COALESCE(EXCLUDED.published_at, web_pages.published_at),
                search_text = EXCLUDED.search_text,
                representative_image_id = EXCLUDED.representative_image_id,
                updated_at = now(),
                crawled_at = now()
            "#,
        )
        .bind(&page.url)
        .bind(&page.title)
        .bind(&page.content)
        .bind(&page.category)
        .bind(page.published_at)
        .bind(&search_text)
        .bind(&page.representative_image_hash)
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::Database)?;

        for (asset, _) in &page.images {
            sqlx::query(
                "INSERT INTO images (hash, canonical_url) VALUES ($1, $2) ON CONFLICT (hash) DO NOTHING",
            )
            .bind(&asset.hash)
            .bind(&asset.canonical_url)
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::Database)?;
        }

        sqlx::query("DELETE FROM page_images WHERE page_url = $1")
            .bind(&page.url)
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::Database)?;

        for (asset, link) in &page.images {
            sqlx::query(
                "INSERT INTO page_images (page_url, image_hash, alt, position) VALUES ($1, $2, $3, $4)",
            )
            .bind(&page.url)
            .bind(&asset.hash)
            .bind(&link.alt)
            .bind(link.position as i32)
            .execute(&mut *tx)
            .await
            .map_err(RepositoryError::Database)?;
        }

        tx.commit().await.map_err(RepositoryError::Database)?;
        Ok(())
    }

    async fn search_pages(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: i64,
    ) -> Result<Vec<PageSearchRow>> {
        let tsquery = expanded_query_to_tsquery(query);

        let mut sql = String::from(
            r#"
            SELECT
                w.url,
                w.title,
                w.content,
                w.category,
                w.published_at,
                ts_rank(to_tsvector('english', w.search_text), to_tsquery('english', $1)) AS score
            "#,
        );
        if filters.include_images {
            sql.push_str(", i.canonical_url AS image_url");
        } else {
            sql.push_str(", NULL::text AS image_url");
        }
        sql.push_str(
            r#"
            FROM web_pages w
            LEFT JOIN images i ON i.hash = w.representative_image_id
            WHERE to_tsvector('english', w.search_text) @@ to_tsquery('english', $1)
            "#,
        );

        let mut bind_index = 2;
        if filters.category.is_some() {
            sql.push_str(&format!(" AND w.category = ${bind_index}"));
            bind_index += 1;
        }
        if filters.domain.is_some() {
            sql.push_str(&format!(" AND w.url LIKE ${bind_index}"));
            bind_index += 1;
        }
        if filters.published_from.is_some() {
            sql.push_str(&format!(" AND w.published_at >= ${bind_index}"));
            bind_index += 1;
        }
        if filters.published_to.is_some() {
            sql.push_str(&format!(" AND w.published_at <= ${bind_index}"));
            bind_index += 1;
        }
        sql.push_str(&format!(" ORDER BY score DESC LIMIT ${bind_index}"));

        let mut query_builder = sqlx::query_as::<_, PageSearchRow>(&sql).bind(tsquery);
        if let Some(category) = &filters.category {
            query_builder = query_builder.bind(category);
        }
        if let Some(domain) = &filters.domain {
            query_builder = query_builder.bind(format!("%{domain}%"));
        }
        if let Some(from) = filters.published_from {
            query_builder = query_builder.bind(from);
        }
        if let Some(to) = filters.published_to {
            query_builder = query_builder.bind(to);
        }
        query_builder = query_builder.bind(limit);

        let rows = query_builder
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::Database)?;
        Ok(rows)
    }

    async fn reap_stale_reservations(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE crawl_urls SET status = 'pending', updated_at = now() WHERE status = 'crawling' AND updated_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::Database)?;
        Ok(result.rows_affected())
    }

    async fn status_counts(&self) -> Result<StatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM crawl_urls GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(RepositoryError::Database)?;
        Ok(rows.into_iter().collect())
    }

    async fn domain_stats(&self, limit: i64) -> Result<Vec<DomainStat>> {
        let rows = sqlx::query_as::<_, DomainStat>(
            r#"
            SELECT domain, COUNT(*) AS count, MAX(last_crawled_at) AS last_crawled_at
            FROM crawl_urls
            GROUP BY domain
            ORDER BY count DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::Database)?;
        Ok(rows)
    }

    async fn queue_head(&self, limit: i64) -> Result<Vec<DueUrl>> {
        let rows = sqlx::query_as::<_, DueUrl>(
            r#"
            SELECT url, domain, depth, score, next_crawl_at, error_count
            FROM crawl_urls
            WHERE status IN ('pending', 'done', 'error')
            ORDER BY score DESC, next_crawl_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::Database)?;
        Ok(rows)
    }

    async fn log_search(&self, raw_query: &str, normalized_query: &str) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO search_logs (raw_query, normalized_query, created_at) VALUES ($1, $2, now()) RETURNING id",
        )
        .bind(raw_query)
        .bind(normalized_query)
        .fetch_one(&self.pool)
        .await
        .map_err(RepositoryError::Database)?;
        Ok(id)
    }

    async fn log_click(&self, search_id: i64, url: &str, rank: i32) -> Result<()> {
        sqlx::query(
            "INSERT INTO click_logs (search_log_id, url, rank, created_at) VALUES ($1, $2, $3, now())",
        )
        .bind(search_id)
        .bind(url)
        .bind(rank)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::Database)?;
        Ok(())
    }

    async fn best_query_relation(&self, normalized_query: &str) -> Result<Option<QueryRelation>> {
        let row = sqlx::query_as::<_, QueryRelation>(
            r#"
            SELECT source_query, target_query, score
            FROM query_relations
            WHERE source_query = $1 AND score >= 0.8
            ORDER BY score DESC
            LIMIT 1
            "#,
        )
        .bind(normalized_query)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::Database)?;
        Ok(row)
    }
}

/// Converts a `SynonymExpander`-shaped query (`"(a OR b) c"`, AND-by-adjacency) into
/// Postgres `to_tsquery` syntax (`"(a | b) & c"`). The full-text index itself is an
/// external deployment concern; this is the one translation the core must own to talk
/// to *a* Postgres-backed index.
fn expanded_query_to_tsquery(expanded: &str) -> String {
    let mut groups = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();

    for ch in expanded.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth -= 1;
                current.push(ch);
            }
            ' ' if depth == 0 => {
                if !current.is_empty() {
                    groups.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }

    groups
        .into_iter()
        .map(|g| g.replace(" OR ", " | "))
        .collect::<Vec<_>>()
        .join(" & ")
}

/// In-memory fake satisfying [`Repository`], used by unit tests for `Dispatcher`,
/// `Worker` and `SearchEngine` so they don't need a live Postgres.
#[derive(Clone)]
pub struct InMemoryRepository {
    inner: Arc<Mutex<InMemoryState>>,
    settings: Arc<Settings>,
}

#[derive(Default)]
struct InMemoryState {
    urls: HashMap<String, UrlRow>,
    pages: HashMap<String, PageUpsert>,
    query_relations: Vec<QueryRelation>,
    next_search_id: i64,
    clicks: Vec<(i64, String, i32)>,
}

#[derive(Clone)]
struct UrlRow {
    domain: String,
    depth: i32,
    status: UrlStatus,
    score: f64,
    error_count: i32,
    next_crawl_at: DateTime<Utc>,
    last_crawled_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    blocked_reason: Option<String>,
}

impl InMemoryRepository {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(InMemoryState::default())),
            settings,
        }
    }

    pub async fn seed_query_relation(&self, source: &str, target: &str, score: f64) {
        let mut guard = self.inner.lock().await;
        guard.query_relations.push(QueryRelation {
            source_query: source.to_string(),
            target_query: target.to_string(),
            score,
        });
    }

    pub async fn status_of(&self, url: &str) -> Option<UrlStatus> {
        self.inner.lock().await.urls.get(url).map(|row| row.status)
    }

    pub async fn page_exists(&self, url: &str) -> bool {
        self.inner.lock().await.pages.contains_key(url)
    }

    fn base_score_for_depth(&self, depth: i32) -> f64 {
        self.settings.base_score - depth as f64 * self.settings.depth_penalty
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn register(&self, url: &str, domain: &str, depth: i32) -> Result<()> {
        let mut guard = self.inner.lock().await;
        if guard.urls.contains_key(url) {
            return Ok(());
        }
        let now = Utc::now();
        guard.urls.insert(
            url.to_string(),
            UrlRow {
                domain: domain.to_string(),
                depth,
                status: UrlStatus::Pending,
                score: self.base_score_for_depth(depth),
                error_count: 0,
                next_crawl_at: now,
                last_crawled_at: None,
                updated_at: now,
                blocked_reason: None,
            },
        );
        Ok(())
    }

    async fn fetch_due(&self, limit: i64) -> Result<Vec<DueUrl>> {
        let guard = self.inner.lock().await;
        let now = Utc::now();
        let mut due: Vec<(String, UrlRow)> = guard
            .urls
            .iter()
            .filter(|(_, row)| {
                matches!(row.status, UrlStatus::Pending | UrlStatus::Done | UrlStatus::Error)
                    && row.next_crawl_at <= now
            })
            .map(|(url, row)| (url.clone(), row.clone()))
            .collect();
        due.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.next_crawl_at.cmp(&b.1.next_crawl_at))
        });
        due.truncate((limit * 5).max(0) as usize);
        Ok(due
            .into_iter()
            .map(|(url, row)| DueUrl {
                url,
                domain: row.domain,
                depth: row.depth,
                score: row.score,
                next_crawl_at: row.next_crawl_at,
                error_count: row.error_count,
            })
            .collect())
    }

    async fn reserve(&self, url: &str) -> Result<bool> {
        let mut guard = self.inner.lock().await;
        match guard.urls.get_mut(url) {
            Some(row)
                if matches!(row.status, UrlStatus::Pending | UrlStatus::Done | UrlStatus::Error) =>
            {
                row.status = UrlStatus::Crawling;
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_blocked(&self, url: &str, reason: &str) -> Result<()> {
        let mut guard = self.inner.lock().await;
        if let Some(row) = guard.urls.get_mut(url) {
            row.status = UrlStatus::Blocked;
            row.blocked_reason = Some(reason.to_string());
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn complete(&self, url: &str, success: bool) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let depth = match guard.urls.get(url) {
            Some(row) => row.depth,
            None => return Ok(()),
        };
        let base_score = self.base_score_for_depth(depth);
        let settings = self.settings.clone();

        let Some(row) = guard.urls.get_mut(url) else {
            return Ok(());
        };

        let now = Utc::now();
        if success {
            row.status = UrlStatus::Done;
            row.error_count = 0;
            row.score = base_score;
            row.last_crawled_at = Some(now);
            row.updated_at = now;
            row.next_crawl_at = now + ChronoDuration::seconds(settings.default_interval_seconds);
        } else {
            let new_errors = row.error_count + 1;
            let new_score = row.score - settings.error_penalty;
            if new_errors > settings.max_retries as i32 {
                row.status = UrlStatus::Deleted;
                row.updated_at = now;
                guard.pages.remove(url);
            } else {
                row.status = UrlStatus::Error;
                row.error_count = new_errors;
                row.score = new_score;
                row.last_crawled_at = Some(now);
                row.updated_at = now;
                row.next_crawl_at = now + ChronoDuration::seconds(settings.error_interval_seconds);
            }
        }
        Ok(())
    }

    async fn upsert_page(&self, page: &PageUpsert) -> Result<()> {
        let mut guard = self.inner.lock().await;
        guard.pages.insert(page.url.clone(), page.clone());
        Ok(())
    }

    async fn search_pages(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: i64,
    ) -> Result<Vec<PageSearchRow>> {
        let guard = self.inner.lock().await;
        let terms: Vec<String> = query
            .split_whitespace()
            .flat_map(|group| {
                group
                    .trim_start_matches('(')
                    .trim_end_matches(')')
                    .split(" OR ")
                    .map(|s| s.to_lowercase())
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut rows: Vec<PageSearchRow> = guard
            .pages
            .values()
            .filter(|page| {
                if let Some(category) = &filters.category {
                    if &page.category != category {
                        return false;
                    }
                }
                if let Some(domain) = &filters.domain {
                    if !page.url.contains(domain.as_str()) {
                        return false;
                    }
                }
                if let Some(from) = filters.published_from {
                    if page.published_at.map(|p| p < from).unwrap_or(true) {
                        return false;
                    }
                }
                if let Some(to) = filters.published_to {
                    if page.published_at.map(|p| p > to).unwrap_or(false) {
                        return false;
                    }
                }
                let haystack = format!("{} {}", page.title, page.content).to_lowercase();
                terms.iter().any(|t| haystack.contains(t.as_str()))
            })
            .map(|page| {
                let haystack = format!("{} {}", page.title, page.content).to_lowercase();
                let score = terms.iter().filter(|t| haystack.contains(t.as_str())).count() as f64;
                PageSearchRow {
                    url: page.url.clone(),
                    title: page.title.clone(),
                    content: page.content.clone(),
                    category: page.category.clone(),
                    published_at: page.published_at,
                    score,
                    image_url: None,
                }
            })
            .collect();

        rows.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn reap_stale_reservations(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut guard = self.inner.lock().await;
        let mut reset = 0u64;
        for row in guard.urls.values_mut() {
            if matches!(row.status, UrlStatus::Crawling) && row.updated_at < older_than {
                row.status = UrlStatus::Pending;
                row.updated_at = Utc::now();
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn status_counts(&self) -> Result<StatusCounts> {
        let guard = self.inner.lock().await;
        let mut counts = StatusCounts::new();
        for row in guard.urls.values() {
            *counts.entry(row.status.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn domain_stats(&self, limit: i64) -> Result<Vec<DomainStat>> {
        let guard = self.inner.lock().await;
        let mut per_domain: HashMap<String, (i64, Option<DateTime<Utc>>)> = HashMap::new();
        for row in guard.urls.values() {
            let entry = per_domain.entry(row.domain.clone()).or_insert((0, None));
            entry.0 += 1;
            entry.1 = match (entry.1, row.last_crawled_at) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, None) => a,
                (None, b) => b,
            };
        }
        let mut stats: Vec<DomainStat> = per_domain
            .into_iter()
            .map(|(domain, (count, last_crawled_at))| DomainStat {
                domain,
                count,
                last_crawled_at,
            })
            .collect();
        stats.sort_by(|a, b| b.count.cmp(&a.count));
        stats.truncate(limit.max(0) as usize);
        Ok(stats)
    }

    async fn queue_head(&self, limit: i64) -> Result<Vec<DueUrl>> {
        let guard = self.inner.lock().await;
        let mut due: Vec<(String, UrlRow)> = guard
            .urls
            .iter()
            .filter(|(_, row)| {
                matches!(row.status, UrlStatus::Pending | UrlStatus::Done | UrlStatus::Error)
            })
            .map(|(url, row)| (url.clone(), row.clone()))
            .collect();
        due.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.next_crawl_at.cmp(&b.1.next_crawl_at))
        });
        due.truncate(limit.max(0) as usize);
        Ok(due
            .into_iter()
            .map(|(url, row)| DueUrl {
                url,
                domain: row.domain,
                depth: row.depth,
                score: row.score,
                next_crawl_at: row.next_crawl_at,
                error_count: row.error_count,
            })
            .collect())
    }

    async fn log_search(&self, _raw_query: &str, _normalized_query: &str) -> Result<i64> {
        let mut guard = self.inner.lock().await;
        guard.next_search_id += 1;
        Ok(guard.next_search_id)
    }

    async fn log_click(&self, search_id: i64, url: &str, rank: i32) -> Result<()> {
        let mut guard = self.inner.lock().await;
        guard.clicks.push((search_id, url.to_string(), rank));
        Ok(())
    }

    async fn best_query_relation(&self, normalized_query: &str) -> Result<Option<QueryRelation>> {
        let guard = self.inner.lock().await;
        Ok(guard
            .query_relations
            .iter()
            .filter(|r| r.source_query == normalized_query && r.score >= 0.8)
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[tokio::test]
    async fn register_is_idempotent() {
        let repo = InMemoryRepository::new(settings());
        repo.register("https://x.com/", "x.com", 0).await.unwrap();
        repo.register("https://x.com/", "x.com", 0).await.unwrap();
        let due = repo.fetch_due(10).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn reserve_succeeds_once_for_concurrent_attempts() {
        let repo = InMemoryRepository::new(settings());
        repo.register("https://x.com/", "x.com", 0).await.unwrap();
        assert!(repo.reserve("https://x.com/").await.unwrap());
        assert!(!repo.reserve("https://x.com/").await.unwrap());
    }

    #[tokio::test]
    async fn retry_past_max_retries_deletes_url_and_page() {
        let repo = InMemoryRepository::new(settings());
        repo.register("https://x.com/", "x.com", 0).await.unwrap();
        repo.upsert_page(&PageUpsert {
            url: "https://x.com/".into(),
            title: "t".into(),
            content: "c".into(),
            category: "general".into(),
            published_at: None,
            images: vec![],
            representative_image_hash: None,
        })
        .await
        .unwrap();

        for _ in 0..6 {
            repo.reserve("https://x.com/").await.ok();
            repo.complete("https://x.com/", false).await.unwrap();
        }

        assert_eq!(repo.status_of("https://x.com/").await, Some(UrlStatus::Deleted));
        assert!(!repo.page_exists("https://x.com/").await);
    }

    #[tokio::test]
    async fn success_resets_score_and_error_count() {
        let repo = InMemoryRepository::new(settings());
        repo.register("https://x.com/p", "x.com", 1).await.unwrap();
        repo.complete("https://x.com/p", false).await.unwrap();
        repo.complete("https://x.com/p", true).await.unwrap();
        assert_eq!(repo.status_of("https://x.com/p").await, Some(UrlStatus::Done));
    }

    #[test]
    fn tsquery_translates_or_groups_and_ands_adjacency() {
        assert_eq!(
            expanded_query_to_tsquery("(ai OR ml) search"),
            "(ai | ml) & search"
        );
        assert_eq!(expanded_query_to_tsquery("rust"), "rust");
    }

    #[tokio::test]
    async fn best_query_relation_picks_highest_scoring_tie() {
        let repo = InMemoryRepository::new(settings());
        repo.seed_query_relation("car", "automobile", 0.9).await;
        repo.seed_query_relation("car", "vehicle", 0.95).await;
        repo.seed_query_relation("car", "bike", 0.5).await;

        let best = repo.best_query_relation("car").await.unwrap().unwrap();
        assert_eq!(best.target_query, "vehicle");
    }
}
