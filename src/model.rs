//! The data model shared by `Repository`, `Indexer`, `Dispatcher` and `Worker`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The state of a URL in its crawl lifecycle.
///
/// `pending -> crawling -> {done, error, blocked, deleted}`, with `done`/`error`
/// re-becoming eligible once `next_crawl_at <= now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlStatus {
    Pending,
    Crawling,
    Done,
    Error,
    Blocked,
    Deleted,
}

impl UrlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlStatus::Pending => "pending",
            UrlStatus::Crawling => "crawling",
            UrlStatus::Done => "done",
            UrlStatus::Error => "error",
            UrlStatus::Blocked => "blocked",
            UrlStatus::Deleted => "deleted",
        }
    }
}

impl std::str::FromStr for UrlStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UrlStatus::Pending),
            "crawling" => Ok(UrlStatus::Crawling),
            "done" => Ok(UrlStatus::Done),
            "error" => Ok(UrlStatus::Error),
            "blocked" => Ok(UrlStatus::Blocked),
            "deleted" => Ok(UrlStatus::Deleted),
            other => Err(format!("unknown url status: {other}")),
        }
    }
}

/// Primary crawl-state row, keyed by the normalized URL.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UrlRecord {
    pub url: String,
    pub domain: String,
    pub depth: i32,
    pub status: String,
    pub score: f64,
    pub error_count: i32,
    pub next_crawl_at: DateTime<Utc>,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub blocked_reason: Option<String>,
}

impl UrlRecord {
    pub fn status(&self) -> UrlStatus {
        self.status.parse().unwrap_or(UrlStatus::Error)
    }
}

/// A candidate dispatched by `fetch_due`, carrying only what the Dispatcher needs.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DueUrl {
    pub url: String,
    pub domain: String,
    pub depth: i32,
    pub score: f64,
    pub next_crawl_at: DateTime<Utc>,
    pub error_count: i32,
}

/// A unit of work handed from the Dispatcher to a Worker, and the wire shape pushed
/// onto the `WorkQueue` (JSON framing, not a bare scalar tuple).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub url: String,
    pub depth: u32,
}

/// One candidate outbound image discovered while parsing a page, before it has been
/// resolved to a content-addressed [`ImageAsset`].
#[derive(Debug, Clone)]
pub struct ImageCandidate {
    pub url: String,
    pub alt: Option<String>,
    pub position: u32,
}

/// Output of the "parse raw HTML -> structured record" collaborator.
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub url: String,
    pub title: String,
    pub content: String,
    pub category: String,
    pub published_at: Option<DateTime<Utc>>,
    pub links: Vec<String>,
    pub images: Vec<ImageCandidate>,
}

/// A globally unique image asset, keyed by the content-address hash of its canonical
/// URL (query string stripped).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ImageAsset {
    pub hash: String,
    pub canonical_url: String,
}

/// A page-image association, rebuilt wholesale on every crawl of the page.
#[derive(Debug, Clone)]
pub struct PageImageLink {
    pub image_hash: String,
    pub alt: Option<String>,
    pub position: u32,
}

/// The persisted page record — title/content/category plus the precomputed
/// `search_text` the full-text index matches against.
#[derive(Debug, Clone)]
pub struct PageUpsert {
    pub url: String,
    pub title: String,
    pub content: String,
    pub category: String,
    pub published_at: Option<DateTime<Utc>>,
    pub images: Vec<(ImageAsset, PageImageLink)>,
    /// Hash of the image selected by `indexer::select_representative_image`, if any.
    pub representative_image_hash: Option<String>,
}

/// A single full-text search hit, as returned by `Repository::search_pages` before
/// snippet generation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PageSearchRow {
    pub url: String,
    pub title: String,
    pub content: String,
    pub category: String,
    pub published_at: Option<DateTime<Utc>>,
    pub score: f64,
    pub image_url: Option<String>,
}

/// Filters accepted by `SearchEngine::search` / `Repository::search_pages`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchFilters {
    pub category: Option<String>,
    pub domain: Option<String>,
    pub published_from: Option<DateTime<Utc>>,
    pub published_to: Option<DateTime<Utc>>,
    pub include_images: bool,
}

/// One item in a rendered search response, with `content` already dropped in favor of
/// a snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub score: f64,
    pub img_url: Option<String>,
}

/// The full response payload a client receives from a search, and the same payload
/// shape cached by `ResultCache`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPayload {
    pub query: String,
    pub count: usize,
    pub results: Vec<SearchResultItem>,
    pub keywords: Vec<String>,
}

/// `SearchEngine::search`'s full return value, including the search-log id clients use
/// for click feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub search_id: i64,
    #[serde(flatten)]
    pub payload: SearchPayload,
}

/// One row of the `query_relations` table consulted by `IntentExpander`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueryRelation {
    pub source_query: String,
    pub target_query: String,
    pub score: f64,
}

/// Aggregate status counts, as returned by `GET /crawl/status`.
pub type StatusCounts = std::collections::HashMap<String, i64>;

/// One row of `GET /crawl/domains`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct DomainStat {
    pub domain: String,
    pub count: i64,
    pub last_crawled_at: Option<DateTime<Utc>>,
}
