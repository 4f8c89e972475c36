//! Event store client
//!
//! Provides an `EventStore` trait with implementations for:
//! - **PostgreSQL**: events table with a JSONB document column
//! - **Memory**: an in-process collection, optionally loaded from a JSON file
//!
//! Every backend answers the same range query: events with `createdAt`
//! strictly greater than the lower bound, newest first, at most one page.
//! When more rows exist than fit in a page the result is flagged `paginated`
//! so callers can warn that it is incomplete.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::StoreConfig;
use crate::models::Event;

// ============================================================================
// EventStore trait
// ============================================================================

/// Abstraction over event stores.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Fetch one page of events with `createdAt > start_millis`, newest first.
    async fn fetch_since(&self, start_millis: i64) -> Result<QueryResult, StoreError>;

    /// Short description of the backend's health, e.g. the server version.
    async fn health(&self) -> Result<String, StoreError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// One range query's worth of events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub events: Vec<Event>,
    /// More events matched than one page holds; `events` is incomplete.
    pub paginated: bool,
    pub start_millis: i64,
    pub fetched_at: DateTime<Utc>,
}

/// Raw `(event_id, created_at, attributes)` row of the events table.
pub type EventRow = (String, i64, serde_json::Value);

impl QueryResult {
    /// Decode raw rows (fetched with one extra row as a look-ahead) into a
    /// page. Pagination is decided on the raw row count, so rows that fail to
    /// decode never hide a truncated result. Returns the page and the number
    /// of skipped rows.
    pub fn from_rows<R, F, E>(
        mut rows: Vec<R>,
        page_size: usize,
        start_millis: i64,
        mut decode: F,
    ) -> (Self, usize)
    where
        F: FnMut(R) -> Result<Event, E>,
        E: std::fmt::Display,
    {
        let paginated = rows.len() > page_size;
        rows.truncate(page_size);

        let mut skipped = 0usize;
        let events: Vec<Event> = rows
            .into_iter()
            .filter_map(|row| match decode(row) {
                Ok(event) => Some(event),
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(error = %e, "Skipping undecodable event");
                    None
                }
            })
            .collect();

        let result = Self {
            events,
            paginated,
            start_millis,
            fetched_at: Utc::now(),
        };
        (result, skipped)
    }

    /// Trim `events` (fetched with one extra row as a look-ahead) to a page.
    fn from_page(mut events: Vec<Event>, page_size: usize, start_millis: i64) -> Self {
        let paginated = events.len() > page_size;
        events.truncate(page_size);
        Self {
            events,
            paginated,
            start_millis,
            fetched_at: Utc::now(),
        }
    }
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid table name: {0:?}")]
    InvalidTable(String),

    #[error("Fixture error: {0}")]
    Fixture(String),

    #[error("Unknown store backend: {0:?}")]
    UnknownBackend(String),

    #[error("All {attempts} query attempts failed: {last}")]
    RetryExhausted { attempts: usize, last: String },
}

/// Create the configured store backend.
///
/// `pool` is required for the `postgres` backend and ignored otherwise.
pub fn create_store(
    config: &StoreConfig,
    pool: Option<PgPool>,
) -> Result<Box<dyn EventStore>, StoreError> {
    match config.backend.as_str() {
        "postgres" => {
            let pool = pool.ok_or_else(|| {
                StoreError::Fixture("postgres backend requires a database pool".to_string())
            })?;
            Ok(Box::new(PgEventStore::new(pool, config)?))
        }
        "file" => {
            let path = config.fixture_path.as_deref().ok_or_else(|| {
                StoreError::Fixture("file backend requires store.fixture_path".to_string())
            })?;
            let store = MemoryEventStore::from_file(path)?
                .with_page_size(config.page_size as usize);
            Ok(Box::new(store))
        }
        other => Err(StoreError::UnknownBackend(other.to_string())),
    }
}

// ============================================================================
// PgEventStore
// ============================================================================

/// Events table layout: `event_id TEXT, created_at BIGINT, attributes JSONB`.
pub struct PgEventStore {
    pool: PgPool,
    query: String,
    page_size: usize,
    max_retries: usize,
    retry_delay_ms: u64,
}

impl PgEventStore {
    pub fn new(pool: PgPool, config: &StoreConfig) -> Result<Self, StoreError> {
        let table = validate_table_name(&config.table)?;
        let query = format!(
            "SELECT event_id, created_at, attributes FROM {} \
             WHERE created_at > $1 ORDER BY created_at DESC LIMIT $2",
            table
        );
        Ok(Self {
            pool,
            query,
            page_size: config.page_size.max(1) as usize,
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        })
    }

    async fn fetch_once(
        &self,
        start_millis: i64,
    ) -> Result<Vec<EventRow>, sqlx::Error> {
        sqlx::query_as(&self.query)
            .bind(start_millis)
            .bind(self.page_size as i64 + 1)
            .fetch_all(&self.pool)
            .await
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn fetch_since(&self, start_millis: i64) -> Result<QueryResult, StoreError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.retry_delay_ms.max(1))
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.max_retries);

        let rows = Retry::spawn(retry_strategy, || self.fetch_once(start_millis))
            .await
            .map_err(|e| {
                tracing::error!(
                    attempts = self.max_retries + 1,
                    error = %e,
                    "All event store query attempts failed"
                );
                StoreError::RetryExhausted {
                    attempts: self.max_retries + 1,
                    last: e.to_string(),
                }
            })?;

        let decode = |(id, created_at, doc): EventRow| {
            Event::from_document(id.clone(), created_at, doc)
                .map_err(|e| format!("event {}: {}", id, e))
        };
        let (result, skipped) = QueryResult::from_rows(rows, self.page_size, start_millis, decode);
        tracing::info!(
            start_millis,
            events = result.events.len(),
            skipped,
            paginated = result.paginated,
            "Fetched events from PostgreSQL"
        );
        Ok(result)
    }

    async fn health(&self) -> Result<String, StoreError> {
        Ok(crate::db::health_check(&self.pool).await?)
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

fn validate_table_name(table: &str) -> Result<&str, StoreError> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && !table.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(table)
    } else {
        Err(StoreError::InvalidTable(table.to_string()))
    }
}

// ============================================================================
// MemoryEventStore
// ============================================================================

/// In-process store with the same query semantics as the database backend.
#[derive(Debug, Clone)]
pub struct MemoryEventStore {
    events: Vec<Event>,
    page_size: usize,
}

impl MemoryEventStore {
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events,
            page_size: usize::MAX - 1,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Load a JSON array of event documents. Records that fail to decode are
    /// skipped with a warning.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Fixture(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        let documents: Vec<serde_json::Value> =
            serde_json::from_str(raw).map_err(|e| StoreError::Fixture(e.to_string()))?;

        let total = documents.len();
        let events: Vec<Event> = documents
            .into_iter()
            .filter_map(|doc| match serde_json::from_value::<Event>(doc) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable event in fixture");
                    None
                }
            })
            .collect();

        tracing::info!(loaded = events.len(), total, "Loaded events fixture");
        Ok(Self::new(events))
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn fetch_since(&self, start_millis: i64) -> Result<QueryResult, StoreError> {
        let mut events: Vec<Event> = self
            .events
            .iter()
            .filter(|e| e.created_at > start_millis)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events.truncate(self.page_size.saturating_add(1));
        Ok(QueryResult::from_page(events, self.page_size, start_millis))
    }

    async fn health(&self) -> Result<String, StoreError> {
        Ok(format!("memory ({} events)", self.events.len()))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture() -> MemoryEventStore {
        MemoryEventStore::from_json(
            &json!([
                {"uat": "A", "saidi": "S1", "createdAt": 1000},
                {"uat": "A", "saidi": "S1", "createdAt": 3000},
                {"uat": "B", "saidi": "S2", "createdAt": 2000},
                {"uat": "C", "saidi": "S3", "createdAt": 4000},
                {"uat": "broken"}
            ])
            .to_string(),
        )
        .expect("fixture should load")
    }

    #[tokio::test]
    async fn test_memory_store_filters_strictly_greater_and_sorts_desc() {
        let store = fixture();
        let result = store.fetch_since(1000).await.unwrap();

        let times: Vec<i64> = result.events.iter().map(|e| e.created_at).collect();
        assert_eq!(times, vec![4000, 3000, 2000]);
        assert!(!result.paginated);
        assert_eq!(result.start_millis, 1000);
    }

    #[tokio::test]
    async fn test_memory_store_flags_pagination() {
        let store = fixture().with_page_size(2);
        let result = store.fetch_since(0).await.unwrap();

        assert_eq!(result.events.len(), 2);
        assert!(result.paginated, "four matching rows exceed a page of two");
        assert_eq!(result.events[0].created_at, 4000);
    }

    #[tokio::test]
    async fn test_exact_page_is_not_paginated() {
        let store = fixture().with_page_size(4);
        let result = store.fetch_since(0).await.unwrap();
        assert_eq!(result.events.len(), 4);
        assert!(!result.paginated);
    }

    #[tokio::test]
    async fn test_undecodable_rows_are_skipped() {
        let store = fixture();
        assert_eq!(store.health().await.unwrap(), "memory (4 events)");
    }

    #[test]
    fn test_undecodable_row_in_full_page_still_flags_pagination() {
        let rows = vec![
            json!({"uat": "A", "saidi": "S1", "createdAt": 3000}),
            json!({"uat": "A", "saidi": "S1"}),
            json!({"uat": "A", "saidi": "S1", "createdAt": 1000}),
        ];
        let (result, skipped) =
            QueryResult::from_rows(rows, 2, 0, serde_json::from_value::<Event>);

        assert!(result.paginated, "three rows for a page of two is a truncated result");
        assert_eq!(skipped, 1);
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].created_at, 3000);
    }

    #[test]
    fn test_table_rows_within_page_are_not_paginated() {
        let rows: Vec<EventRow> = vec![
            ("e2".to_string(), 2000, json!({"uat": "A"})),
            ("e1".to_string(), 1000, json!(null)),
        ];
        let (result, skipped) = QueryResult::from_rows(rows, 2, 500, |(id, ts, doc)| {
            Event::from_document(id, ts, doc)
        });

        assert!(!result.paginated);
        assert_eq!(skipped, 0);
        assert_eq!(result.events.len(), 2);
        assert_eq!(result.events[1].event_id.as_deref(), Some("e1"));
        assert_eq!(result.start_millis, 500);
    }

    #[test]
    fn test_fixture_must_be_an_array() {
        let result = MemoryEventStore::from_json("{\"uat\": \"A\"}");
        assert!(matches!(result, Err(StoreError::Fixture(_))));
    }

    #[test]
    fn test_table_name_validation() {
        assert!(validate_table_name("analytics_events").is_ok());
        assert!(validate_table_name("public.visu_analytics").is_ok());
        assert!(validate_table_name("events; DROP TABLE x").is_err());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("1events").is_err());
    }

    #[test]
    fn test_create_store_rejects_unknown_backend() {
        let config = StoreConfig {
            backend: "dynamo".to_string(),
            ..StoreConfig::default()
        };
        assert!(matches!(
            create_store(&config, None),
            Err(StoreError::UnknownBackend(_))
        ));
    }

    #[tokio::test]
    async fn test_create_store_file_backend_reconstructs_sessions() {
        let config = StoreConfig {
            backend: "file".to_string(),
            fixture_path: Some("../fixtures/events.json".to_string()),
            ..StoreConfig::default()
        };
        let store = create_store(&config, None).unwrap();
        assert_eq!(store.name(), "memory");

        let result = store.fetch_since(0).await.unwrap();
        assert_eq!(result.events.len(), 7);

        let sessions = crate::reconstruct(&result.events);
        let ids: Vec<&str> = sessions.iter().map(|s| s.saidi.as_str()).collect();
        assert_eq!(ids, vec!["s-1", "s-2"], "sessions without a country are dropped");
        assert_eq!(sessions[0].total_time, "11 minutes, 1 second");
        assert_eq!(sessions[1].total_time, "1 minute, 30 seconds");
        assert_eq!(sessions[1].country, "BR");
        assert_eq!(sessions[1].device_type.as_deref(), Some("mobile"));
    }

    #[test]
    fn test_create_store_postgres_requires_pool() {
        let config = StoreConfig::default();
        assert!(create_store(&config, None).is_err());
    }
}
