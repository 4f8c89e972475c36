use crate::dashboard::Dashboard;
use serde::Serialize;
use visu_core::ipc::{VisuRequest, VisuResponse};

/// Default number of sessions for the "last sessions" view when none is given.
pub const DEFAULT_LAST_SESSIONS: usize = 10;

pub async fn handle_request(request: VisuRequest, dashboard: &Dashboard) -> VisuResponse {
    match request {
        VisuRequest::Ping => VisuResponse::pong(),
        VisuRequest::Health => match dashboard.store_health().await {
            Ok(v) => VisuResponse::ok(serde_json::json!({
                "store": dashboard.store_name(),
                "store_version": v,
                "status": "healthy"
            })),
            Err(e) => VisuResponse::err(format!("Store health check failed: {}", e)),
        },
        VisuRequest::Dashboard {
            window,
            exclude_cities,
        } => respond(dashboard.dashboard(window, &exclude_cities).await),
        VisuRequest::Sessions {
            window,
            exclude_cities,
        } => respond(dashboard.sessions(window, &exclude_cities).await),
        VisuRequest::Lookup {
            window,
            token,
            by,
            exclude_cities,
        } => {
            if token.trim().is_empty() {
                return VisuResponse::err("token is required");
            }
            respond(dashboard.lookup(window, &token, by, &exclude_cities).await)
        }
        VisuRequest::LastSessions {
            window,
            limit,
            exclude_cities,
        } => {
            let limit = limit.unwrap_or(DEFAULT_LAST_SESSIONS);
            respond(dashboard.last_sessions(window, limit, &exclude_cities).await)
        }
        VisuRequest::Cities { window } => respond(dashboard.cities(window).await),
    }
}

fn respond<T, E>(result: Result<T, E>) -> VisuResponse
where
    T: Serialize,
    E: std::fmt::Display,
{
    match result {
        Ok(report) => match serde_json::to_value(report) {
            Ok(data) => VisuResponse::ok(data),
            Err(e) => VisuResponse::err(format!("Failed to serialize report: {}", e)),
        },
        Err(e) => {
            tracing::error!(error = %e, "Render pass failed");
            VisuResponse::err(e.to_string())
        }
    }
}
