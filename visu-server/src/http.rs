//! Visu HTTP REST API
//!
//! Axum-based HTTP server exposing the dashboard views as JSON. Runs alongside
//! the Unix socket IPC server on port 8767 (configurable).
//!
//! Each endpoint has a thin axum handler that delegates to an inner function;
//! the inner functions build a `VisuRequest` and go through the same router as
//! IPC, so both surfaces answer identically.
//!
//! Endpoints:
//! - GET  /health       : store health
//! - GET  /version      : server version info
//! - POST /dashboard    : every aggregation view plus the session table
//! - POST /sessions     : session durations only
//! - POST /lookup       : per-session timelines for a visitor or session token
//! - POST /last-sessions: most recently active sessions
//! - POST /cities       : cities seen in the window, for the exclusion filter

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use visu_core::ipc::{VisuRequest, VisuResponse};
use visu_core::{LookupField, TimeWindow, VisuConfig};

use crate::dashboard::Dashboard;

/// Shared state for all HTTP handlers
pub struct HttpState {
    pub dashboard: Arc<Dashboard>,
    pub config: VisuConfig,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/dashboard", post(dashboard_handler))
        .route("/sessions", post(sessions_handler))
        .route("/lookup", post(lookup_handler))
        .route("/last-sessions", post(last_sessions_handler))
        .route("/cities", post(cities_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    dashboard: Arc<Dashboard>,
    config: VisuConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let state = Arc::new(HttpState { dashboard, config });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Visu HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct WindowRequest {
    #[serde(default)]
    pub window: TimeWindow,
    #[serde(default)]
    pub exclude_cities: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LookupRequest {
    #[serde(default)]
    pub window: TimeWindow,
    pub token: Option<String>,
    #[serde(default)]
    pub by: LookupField,
    #[serde(default)]
    pub exclude_cities: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LastSessionsRequest {
    #[serde(default)]
    pub window: TimeWindow,
    pub limit: Option<usize>,
    #[serde(default)]
    pub exclude_cities: Vec<String>,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }
}

// ============================================================================
// Inner (directly testable) functions
// ============================================================================

/// Inner health check: asks the store and returns (status_code, json_body).
pub async fn health_inner(
    dashboard: &Dashboard,
    socket_path: &str,
) -> (StatusCode, serde_json::Value) {
    match dashboard.store_health().await {
        Ok(v) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "store": dashboard.store_name(),
                "store_version": v,
                "socket": socket_path,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "visu/1",
    })
}

pub async fn dashboard_inner(
    dashboard: &Dashboard,
    req: WindowRequest,
) -> (StatusCode, serde_json::Value) {
    dispatch(
        dashboard,
        VisuRequest::Dashboard {
            window: req.window,
            exclude_cities: req.exclude_cities,
        },
    )
    .await
}

pub async fn sessions_inner(
    dashboard: &Dashboard,
    req: WindowRequest,
) -> (StatusCode, serde_json::Value) {
    dispatch(
        dashboard,
        VisuRequest::Sessions {
            window: req.window,
            exclude_cities: req.exclude_cities,
        },
    )
    .await
}

/// Inner lookup: validates the token before dispatching.
pub async fn lookup_inner(
    dashboard: &Dashboard,
    req: LookupRequest,
) -> (StatusCode, serde_json::Value) {
    let token = match req.token {
        Some(t) if !t.trim().is_empty() => t,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                serde_json::json!(ErrorResponse::new("token field is required")),
            );
        }
    };

    dispatch(
        dashboard,
        VisuRequest::Lookup {
            window: req.window,
            token,
            by: req.by,
            exclude_cities: req.exclude_cities,
        },
    )
    .await
}

pub async fn last_sessions_inner(
    dashboard: &Dashboard,
    req: LastSessionsRequest,
) -> (StatusCode, serde_json::Value) {
    dispatch(
        dashboard,
        VisuRequest::LastSessions {
            window: req.window,
            limit: req.limit,
            exclude_cities: req.exclude_cities,
        },
    )
    .await
}

pub async fn cities_inner(
    dashboard: &Dashboard,
    req: WindowRequest,
) -> (StatusCode, serde_json::Value) {
    dispatch(dashboard, VisuRequest::Cities { window: req.window }).await
}

/// Route an IPC request and time it.
async fn dispatch(dashboard: &Dashboard, request: VisuRequest) -> (StatusCode, serde_json::Value) {
    let start = Instant::now();
    let response = crate::router::handle_request(request, dashboard).await;
    let took_ms = start.elapsed().as_millis() as u64;

    match response_to_http(response) {
        Ok(mut data) => {
            if let Some(obj) = data.as_object_mut() {
                obj.insert("took_ms".to_string(), serde_json::json!(took_ms));
            }
            (StatusCode::OK, data)
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!(ErrorResponse::new(e)),
        ),
    }
}

// ============================================================================
// Axum handler wrappers (thin: delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.dashboard, &state.config.service.socket_path).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn dashboard_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<WindowRequest>,
) -> impl IntoResponse {
    let (status, body) = dashboard_inner(&state.dashboard, req).await;
    (status, Json(body))
}

pub async fn sessions_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<WindowRequest>,
) -> impl IntoResponse {
    let (status, body) = sessions_inner(&state.dashboard, req).await;
    (status, Json(body))
}

pub async fn lookup_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<LookupRequest>,
) -> impl IntoResponse {
    let (status, body) = lookup_inner(&state.dashboard, req).await;
    (status, Json(body))
}

pub async fn last_sessions_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<LastSessionsRequest>,
) -> impl IntoResponse {
    let (status, body) = last_sessions_inner(&state.dashboard, req).await;
    (status, Json(body))
}

pub async fn cities_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<WindowRequest>,
) -> impl IntoResponse {
    let (status, body) = cities_inner(&state.dashboard, req).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

/// Convert an IPC `VisuResponse` into an HTTP body value, or an error string.
pub fn response_to_http(response: VisuResponse) -> std::result::Result<serde_json::Value, String> {
    if response.is_ok() {
        Ok(response.data.unwrap_or(serde_json::json!({})))
    } else {
        Err(response.error.unwrap_or_else(|| "unknown error".to_string()))
    }
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use visu_core::config::DisplayConfig;
    use visu_core::{EventStore, MemoryEventStore, QueryCache, QueryResult, StoreError};

    struct FailingStore;

    #[async_trait]
    impl EventStore for FailingStore {
        async fn fetch_since(&self, _start_millis: i64) -> Result<QueryResult, StoreError> {
            Err(StoreError::Fixture("store offline".to_string()))
        }

        async fn health(&self) -> Result<String, StoreError> {
            Err(StoreError::Fixture("store offline".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn dashboard(store: Arc<dyn EventStore>) -> Dashboard {
        Dashboard::with_display(store, QueryCache::with_ttl_secs(120), DisplayConfig::default())
    }

    fn empty_dashboard() -> Dashboard {
        dashboard(Arc::new(MemoryEventStore::new(Vec::new())))
    }

    // ========================================================================
    // TEST 1: version_inner is pure and returns correct fields
    // ========================================================================
    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "visu/1", "protocol must be visu/1");
    }

    // ========================================================================
    // TEST 2: response_to_http: ok response extracts data
    // ========================================================================
    #[test]
    fn test_response_to_http_ok() {
        let resp = VisuResponse::ok(serde_json::json!({"sessions": [], "event_count": 0}));
        let data = response_to_http(resp).unwrap();
        assert_eq!(data["event_count"], 0);
    }

    // ========================================================================
    // TEST 3: response_to_http: error with no message returns fallback
    // ========================================================================
    #[test]
    fn test_response_to_http_error_no_message() {
        let mut resp = VisuResponse::err("x");
        resp.error = None;
        assert_eq!(response_to_http(resp).unwrap_err(), "unknown error");
    }

    // ========================================================================
    // TEST 4: health_inner: memory store is healthy
    // ========================================================================
    #[tokio::test]
    async fn test_health_inner_ok() {
        let (status, body) = health_inner(&empty_dashboard(), "/tmp/visu.sock").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["store"], "memory");
        assert_eq!(body["socket"], "/tmp/visu.sock");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    // ========================================================================
    // TEST 5: health_inner: failing store is 503
    // ========================================================================
    #[tokio::test]
    async fn test_health_inner_unhealthy() {
        let (status, body) = health_inner(&dashboard(Arc::new(FailingStore)), "/tmp/visu.sock").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
    }

    // ========================================================================
    // TEST 6: lookup_inner: missing or blank token is 400
    // ========================================================================
    #[tokio::test]
    async fn test_lookup_inner_requires_token() {
        let dash = empty_dashboard();
        for token in [None, Some("   ".to_string())] {
            let req = LookupRequest {
                token,
                ..LookupRequest::default()
            };
            let (status, body) = lookup_inner(&dash, req).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["status"], "error");
        }
    }

    // ========================================================================
    // TEST 7: empty store renders empty views, not errors
    // ========================================================================
    #[tokio::test]
    async fn test_dashboard_inner_empty_store() {
        let (status, body) = dashboard_inner(&empty_dashboard(), WindowRequest::default()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totals"]["events"], 0);
        assert!(body["sessions"].as_array().unwrap().is_empty());
        assert_eq!(body["window"], "today");
        assert!(body["took_ms"].is_number());
    }

    // ========================================================================
    // TEST 8: store failure is 500 with error body
    // ========================================================================
    #[tokio::test]
    async fn test_sessions_inner_store_failure() {
        let (status, body) =
            sessions_inner(&dashboard(Arc::new(FailingStore)), WindowRequest::default()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
        assert!(body["error"].as_str().unwrap().contains("store offline"));
    }
}
