//! Short-lived read cache for range query results.
//!
//! Holds at most one result per time window. Entries expire after the
//! configured TTL; there is no other eviction.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::store::QueryResult;
use crate::window::TimeWindow;

struct CacheEntry {
    result: Arc<QueryResult>,
    cached_at: Instant,
}

pub struct QueryCache {
    entries: RwLock<HashMap<TimeWindow, CacheEntry>>,
    ttl: Duration,
}

impl QueryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn with_ttl_secs(ttl_secs: u64) -> Self {
        Self::new(Duration::from_secs(ttl_secs))
    }

    /// Cached result for `window` if it is still fresh.
    pub async fn get(&self, window: TimeWindow) -> Option<Arc<QueryResult>> {
        let entries = self.entries.read().await;
        entries
            .get(&window)
            .filter(|entry| entry.cached_at.elapsed() < self.ttl)
            .map(|entry| Arc::clone(&entry.result))
    }

    /// Store `result` for `window`, replacing any previous entry.
    pub async fn insert(&self, window: TimeWindow, result: QueryResult) -> Arc<QueryResult> {
        let result = Arc::new(result);
        let mut entries = self.entries.write().await;
        entries.insert(
            window,
            CacheEntry {
                result: Arc::clone(&result),
                cached_at: Instant::now(),
            },
        );
        result
    }

    /// Return the fresh cached result, or run `fetch` and cache its output.
    ///
    /// Errors from `fetch` are returned as-is and nothing is cached.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        window: TimeWindow,
        fetch: F,
    ) -> Result<Arc<QueryResult>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<QueryResult, E>>,
    {
        if let Some(hit) = self.get(window).await {
            tracing::debug!(window = %window, "Query cache hit");
            return Ok(hit);
        }

        let result = fetch().await?;
        Ok(self.insert(window, result).await)
    }

    /// Number of entries held, fresh or stale.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
