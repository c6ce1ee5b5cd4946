//! Crate-wide error types.
//!
//! Library code returns the specific error enum for its layer; call sites that only
//! need to propagate collapse everything into [`CoreError`] via `?`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("no row found for url {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("rejected content type {content_type} for {url}")]
    UnsupportedContentType { url: String, content_type: String },
    #[error("parse failed for {url}: {message}")]
    Parse { url: String, message: String },
    #[error("job for {url} exceeded its timeout")]
    Timeout { url: String },
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("empty query after normalization")]
    EmptyQuery,
    #[error("index query failed: {0}")]
    Index(#[from] RepositoryError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Crawl(#[from] CrawlError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
