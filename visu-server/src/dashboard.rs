//! Dashboard service: one render pass per request
//!
//! Fetches the window's events through the query cache, then derives the
//! requested views. Aggregation views and the session table are computed from
//! the same event collection; neither depends on the other.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use visu_core::config::DisplayConfig;
use visu_core::lookup::{self, LookupField, SessionTimeline};
use visu_core::views::{
    self, CountryShare, InteractionCount, LocationCount, TimeBucket, Totals, ValueCount,
    VisitorInteractions,
};
use visu_core::{
    reconstruct, Event, EventStore, QueryCache, QueryResult, SessionSummary, StoreError,
    TimeWindow, VisuConfig,
};

pub const PAGINATION_WARNING: &str =
    "Results are paginated: the store holds more events for this window than one page, views are incomplete";

pub struct Dashboard {
    store: Arc<dyn EventStore>,
    cache: QueryCache,
    display: DisplayConfig,
}

// ============================================================================
// Report DTOs
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowInfo {
    pub window: TimeWindow,
    pub label: String,
    pub start_millis: i64,
    pub event_count: usize,
    pub paginated: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardReport {
    #[serde(flatten)]
    pub info: WindowInfo,
    pub totals: Totals,
    pub visitors_over_time: Vec<TimeBucket>,
    pub countries: Vec<CountryShare>,
    pub url_params: Vec<ValueCount>,
    pub referrers: Vec<ValueCount>,
    pub dash_layouts: Vec<ValueCount>,
    pub page_views: Vec<ValueCount>,
    pub news_types: Vec<ValueCount>,
    pub interactions: Vec<InteractionCount>,
    pub locations: Vec<LocationCount>,
    pub visitor_locations: Vec<LocationCount>,
    pub visitor_interactions: Vec<VisitorInteractions>,
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsReport {
    #[serde(flatten)]
    pub info: WindowInfo,
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineReport {
    #[serde(flatten)]
    pub info: WindowInfo,
    pub sessions: Vec<SessionTimeline>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitiesReport {
    #[serde(flatten)]
    pub info: WindowInfo,
    pub cities: Vec<String>,
}

// ============================================================================
// Service
// ============================================================================

impl Dashboard {
    pub fn new(store: Arc<dyn EventStore>, config: &VisuConfig) -> Self {
        Self {
            store,
            cache: QueryCache::with_ttl_secs(config.cache.ttl_seconds),
            display: config.display.clone(),
        }
    }

    pub fn with_display(
        store: Arc<dyn EventStore>,
        cache: QueryCache,
        display: DisplayConfig,
    ) -> Self {
        Self {
            store,
            cache,
            display,
        }
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    pub async fn store_health(&self) -> Result<String, StoreError> {
        self.store.health().await
    }

    /// Events for `window`, from cache when fresh.
    pub async fn fetch(&self, window: TimeWindow) -> Result<Arc<QueryResult>, StoreError> {
        self.cache
            .get_or_fetch(window, move || async move {
                let start = window.start_millis(Utc::now(), self.display.day_start_offset());
                tracing::info!(window = %window, start_millis = start, store = self.store.name(), "Querying event store");
                self.store.fetch_since(start).await
            })
            .await
    }

    pub async fn dashboard(
        &self,
        window: TimeWindow,
        exclude_cities: &[String],
    ) -> Result<DashboardReport, StoreError> {
        let result = self.fetch(window).await?;
        let events = views::exclude_cities(&result.events, exclude_cities);
        let offset = self.display.display_offset();

        Ok(DashboardReport {
            info: window_info(window, &result, events.len()),
            totals: views::totals(&events),
            visitors_over_time: views::visitors_over_time(&events, window.is_short(), offset),
            countries: views::country_breakdown(&events),
            url_params: views::value_counts(&events, "urlParams"),
            referrers: views::value_counts(&events, "referrer"),
            dash_layouts: views::value_counts(&events, "dashLayout"),
            page_views: views::value_counts(&events, "pageView"),
            news_types: views::value_counts(&events, "newsType"),
            interactions: views::interaction_counters(&events),
            locations: views::location_breakdown(&events),
            visitor_locations: views::visitor_locations(&events),
            visitor_interactions: views::visitor_interactions(&events),
            sessions: reconstruct(&events),
        })
    }

    pub async fn sessions(
        &self,
        window: TimeWindow,
        exclude_cities: &[String],
    ) -> Result<SessionsReport, StoreError> {
        let result = self.fetch(window).await?;
        let events = views::exclude_cities(&result.events, exclude_cities);
        Ok(SessionsReport {
            info: window_info(window, &result, events.len()),
            sessions: reconstruct(&events),
        })
    }

    pub async fn lookup(
        &self,
        window: TimeWindow,
        token: &str,
        by: LookupField,
        exclude_cities: &[String],
    ) -> Result<TimelineReport, StoreError> {
        let result = self.fetch(window).await?;
        let events = views::exclude_cities(&result.events, exclude_cities);
        let sessions = lookup::lookup(&events, token, by, self.display.display_offset());
        Ok(TimelineReport {
            info: window_info(window, &result, events.len()),
            sessions,
        })
    }

    /// Most recent sessions; `limit` is capped at `display.max_last_sessions`.
    pub async fn last_sessions(
        &self,
        window: TimeWindow,
        limit: usize,
        exclude_cities: &[String],
    ) -> Result<TimelineReport, StoreError> {
        let result = self.fetch(window).await?;
        let events: Vec<Event> = views::exclude_cities(&result.events, exclude_cities);
        let limit = limit.min(self.display.max_last_sessions);
        Ok(TimelineReport {
            info: window_info(window, &result, events.len()),
            sessions: lookup::last_sessions(&events, limit, self.display.display_offset()),
        })
    }

    pub async fn cities(&self, window: TimeWindow) -> Result<CitiesReport, StoreError> {
        let result = self.fetch(window).await?;
        Ok(CitiesReport {
            info: window_info(window, &result, result.events.len()),
            cities: views::cities(&result.events),
        })
    }
}

fn window_info(window: TimeWindow, result: &QueryResult, event_count: usize) -> WindowInfo {
    let mut warnings = Vec::new();
    if result.paginated {
        tracing::warn!(window = %window, events = result.events.len(), "Event store result is paginated");
        warnings.push(PAGINATION_WARNING.to_string());
    }
    WindowInfo {
        window,
        label: window.label().to_string(),
        start_millis: result.start_millis,
        event_count,
        paginated: result.paginated,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use visu_core::MemoryEventStore;

    fn dashboard_with(events: serde_json::Value, page_size: usize) -> Dashboard {
        let store = MemoryEventStore::from_json(&events.to_string())
            .unwrap()
            .with_page_size(page_size);
        Dashboard::with_display(
            Arc::new(store),
            QueryCache::with_ttl_secs(120),
            DisplayConfig::default(),
        )
    }

    fn recent(offset_ms: i64) -> i64 {
        Utc::now().timestamp_millis() - offset_ms
    }

    #[tokio::test]
    async fn test_dashboard_combines_views_and_sessions() {
        let dash = dashboard_with(
            json!([
                {"uat": "A", "saidi": "S1", "createdAt": recent(61_000), "country": "US"},
                {"uat": "A", "saidi": "S1", "createdAt": recent(1_000), "pingClick": true},
                {"uat": "B", "saidi": "S2", "createdAt": recent(5_000)}
            ]),
            100,
        );

        let report = dash.dashboard(TimeWindow::Last24Hours, &[]).await.unwrap();
        assert_eq!(report.totals.events, 3);
        assert_eq!(report.totals.unique_visitors, 2);
        assert_eq!(report.sessions.len(), 1, "S2 has no country");
        assert_eq!(report.sessions[0].total_time, "1 minute");
        assert!(!report.info.paginated);
        assert!(report.info.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_pagination_surfaces_warning() {
        let dash = dashboard_with(
            json!([
                {"uat": "A", "saidi": "S1", "createdAt": recent(3_000)},
                {"uat": "A", "saidi": "S1", "createdAt": recent(2_000)},
                {"uat": "A", "saidi": "S1", "createdAt": recent(1_000)}
            ]),
            2,
        );

        let report = dash.sessions(TimeWindow::Last24Hours, &[]).await.unwrap();
        assert!(report.info.paginated);
        assert_eq!(report.info.warnings, vec![PAGINATION_WARNING.to_string()]);
        assert_eq!(report.info.event_count, 2);
    }

    #[tokio::test]
    async fn test_old_events_fall_outside_window() {
        let dash = dashboard_with(
            json!([
                {"uat": "A", "saidi": "S1", "createdAt": recent(3_600_000 * 24 * 10), "country": "US"},
                {"uat": "B", "saidi": "S2", "createdAt": recent(1_000), "country": "US"}
            ]),
            100,
        );

        let week = dash.sessions(TimeWindow::Last7Days, &[]).await.unwrap();
        assert_eq!(week.sessions.len(), 1);
        let month = dash.sessions(TimeWindow::Last30Days, &[]).await.unwrap();
        assert_eq!(month.sessions.len(), 2);
    }

    #[tokio::test]
    async fn test_last_sessions_limit_is_capped() {
        let events: Vec<serde_json::Value> = (0..60)
            .map(|i| json!({"uat": "A", "saidi": format!("S{}", i), "createdAt": recent(1_000 + i)}))
            .collect();
        let dash = dashboard_with(json!(events), 1000);

        let report = dash
            .last_sessions(TimeWindow::Last24Hours, 500, &[])
            .await
            .unwrap();
        assert_eq!(report.sessions.len(), 50);
        assert_eq!(report.sessions[0].saidi, "S0");
    }

    #[tokio::test]
    async fn test_lookup_matches_token_exactly() {
        let dash = dashboard_with(
            json!([{"uat": "A", "saidi": "S1", "createdAt": recent(1_000), "country": "US"}]),
            100,
        );

        let exact = dash
            .lookup(TimeWindow::Last24Hours, "S1", LookupField::Session, &[])
            .await
            .unwrap();
        assert_eq!(exact.sessions.len(), 1);

        let padded = dash
            .lookup(TimeWindow::Last24Hours, " S1 ", LookupField::Session, &[])
            .await
            .unwrap();
        assert!(padded.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_excluded_city_hides_visitor_everywhere() {
        let dash = dashboard_with(
            json!([
                {"uat": "staff", "saidi": "S1", "createdAt": recent(2_000), "country": "BR", "city": "Recife"},
                {"uat": "staff", "saidi": "S9", "createdAt": recent(1_500), "country": "PT", "city": "Lisbon"},
                {"uat": "guest", "saidi": "S2", "createdAt": recent(1_000), "country": "PT", "city": "Lisbon"}
            ]),
            100,
        );

        let excluded = vec!["Recife".to_string()];
        let report = dash.dashboard(TimeWindow::Last24Hours, &excluded).await.unwrap();
        assert_eq!(report.totals.unique_visitors, 1);
        assert_eq!(report.sessions.len(), 1);
        assert_eq!(report.sessions[0].uat, "guest");

        let hidden = dash
            .lookup(TimeWindow::Last24Hours, "staff", LookupField::Visitor, &excluded)
            .await
            .unwrap();
        assert!(hidden.sessions.is_empty(), "excluded visitor must not be found");
        let visible = dash
            .lookup(TimeWindow::Last24Hours, "staff", LookupField::Visitor, &[])
            .await
            .unwrap();
        assert_eq!(visible.sessions.len(), 2);

        let cities = dash.cities(TimeWindow::Last24Hours).await.unwrap();
        // Newest first, as the store returns them
        assert_eq!(cities.cities, vec!["Lisbon".to_string(), "Recife".to_string()]);
    }
}
