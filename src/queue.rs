//! The Dispatcher-to-Worker hand-off.
//!
//! The Dispatcher never calls Worker logic directly; it only ever writes
//! [`WorkItem`]s onto a queue, which keeps the two independently scalable
//! processes. Grounded in `server.rs`'s split of a request boundary from a
//! `crawly::Crawler`, generalized to a list-backed queue in the idiom
//! `original_source/src/workers/crawler_worker.py` pulls from.

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::error::{Result, StoreError};
use crate::model::WorkItem;

#[async_trait]
pub trait WorkQueue: Send + Sync + 'static {
    async fn push(&self, item: &WorkItem) -> Result<()>;
    /// Blocks up to `timeout_seconds` for a work item, returning `None` on timeout.
    async fn pop(&self, timeout_seconds: u64) -> Result<Option<WorkItem>>;
    async fn len(&self) -> Result<u64>;
}

const QUEUE_KEY: &str = "crawl:work_queue";

pub struct RedisWorkQueue {
    client: redis::Client,
}

impl RedisWorkQueue {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(StoreError::Redis)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn push(&self, item: &WorkItem) -> Result<()> {
        let payload = serde_json::to_string(item).map_err(StoreError::Serialization)?;
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(StoreError::Redis)?;
        let _: () = conn.rpush(QUEUE_KEY, payload).await.map_err(StoreError::Redis)?;
        Ok(())
    }

    async fn pop(&self, timeout_seconds: u64) -> Result<Option<WorkItem>> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(StoreError::Redis)?;
        let popped: Option<(String, String)> = conn
            .blpop(QUEUE_KEY, timeout_seconds as f64)
            .await
            .map_err(StoreError::Redis)?;
        match popped {
            Some((_, payload)) => {
                let item = serde_json::from_str(&payload).map_err(StoreError::Serialization)?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    async fn len(&self) -> Result<u64> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(StoreError::Redis)?;
        let len: u64 = conn.llen(QUEUE_KEY).await.map_err(StoreError::Redis)?;
        Ok(len)
    }
}

/// In-memory FIFO fake for Dispatcher/Worker unit tests.
pub struct InMemoryWorkQueue {
    items: Mutex<std::collections::VecDeque<WorkItem>>,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(std::collections::VecDeque::new()),
        }
    }
}

impl Default for InMemoryWorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn push(&self, item: &WorkItem) -> Result<()> {
        self.items.lock().await.push_back(item.clone());
        Ok(())
    }

    async fn pop(&self, _timeout_seconds: u64) -> Result<Option<WorkItem>> {
        Ok(self.items.lock().await.pop_front())
    }

    async fn len(&self) -> Result<u64> {
        Ok(self.items.lock().await.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pushes_and_pops_in_fifo_order() {
        let queue = InMemoryWorkQueue::new();
        queue.push(&WorkItem { url: "https://x.com/a".into(), depth: 0 }).await.unwrap();
        queue.push(&WorkItem { url: "https://x.com/b".into(), depth: 1 }).await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 2);
        let first = queue.pop(0).await.unwrap().unwrap();
        assert_eq!(first.url, "https://x.com/a");
        let second = queue.pop(0).await.unwrap().unwrap();
        assert_eq!(second.url, "https://x.com/b");
        assert!(queue.pop(0).await.unwrap().is_none());
    }
}
