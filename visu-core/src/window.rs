//! Dashboard time windows.
//!
//! Each window maps to a lower bound on `createdAt` (milliseconds, exclusive).
//! `Last 24 hours` reaches back 25 hours; dashboards built on it have always
//! shown that extra hour, so it is kept.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VisuError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeWindow {
    #[default]
    #[serde(rename = "today", alias = "Today")]
    Today,
    #[serde(rename = "last_24_hours", alias = "24h", alias = "Last 24 hours")]
    Last24Hours,
    #[serde(rename = "last_7_days", alias = "7d", alias = "Last 7 days")]
    Last7Days,
    #[serde(rename = "last_30_days", alias = "30d", alias = "Last 30 days")]
    Last30Days,
    #[serde(rename = "last_90_days", alias = "90d", alias = "Last 90 days")]
    Last90Days,
    #[serde(rename = "last_year", alias = "1y", alias = "Last year")]
    LastYear,
}

impl TimeWindow {
    pub const ALL: [TimeWindow; 6] = [
        TimeWindow::Today,
        TimeWindow::Last24Hours,
        TimeWindow::Last7Days,
        TimeWindow::Last30Days,
        TimeWindow::Last90Days,
        TimeWindow::LastYear,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TimeWindow::Today => "Today",
            TimeWindow::Last24Hours => "Last 24 hours",
            TimeWindow::Last7Days => "Last 7 days",
            TimeWindow::Last30Days => "Last 30 days",
            TimeWindow::Last90Days => "Last 90 days",
            TimeWindow::LastYear => "Last year",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            TimeWindow::Today => "today",
            TimeWindow::Last24Hours => "24h",
            TimeWindow::Last7Days => "7d",
            TimeWindow::Last30Days => "30d",
            TimeWindow::Last90Days => "90d",
            TimeWindow::LastYear => "1y",
        }
    }

    /// Short windows chart visitors per hour instead of per day.
    pub fn is_short(self) -> bool {
        matches!(
            self,
            TimeWindow::Today | TimeWindow::Last24Hours | TimeWindow::Last7Days
        )
    }

    /// Lower bound for the range query, truncated to whole seconds.
    pub fn start_millis(self, now: DateTime<Utc>, day_start_offset: FixedOffset) -> i64 {
        let start = match self {
            TimeWindow::Today => start_of_day(now, day_start_offset),
            TimeWindow::Last24Hours => now - Duration::hours(25),
            TimeWindow::Last7Days => now - Duration::days(7),
            TimeWindow::Last30Days => now - Duration::days(30),
            TimeWindow::Last90Days => now - Duration::days(90),
            TimeWindow::LastYear => now - Duration::days(365),
        };
        start.timestamp() * 1000
    }
}

fn start_of_day(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local_date = now.with_timezone(&offset).date_naive();
    let midnight = local_date.and_time(NaiveTime::MIN);
    // A fixed offset has exactly one mapping for every local time.
    offset
        .from_local_datetime(&midnight)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TimeWindow {
    type Err = VisuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        TimeWindow::ALL
            .into_iter()
            .find(|w| {
                w.label().to_ascii_lowercase() == wanted
                    || w.slug() == wanted
                    || serde_json::to_value(w)
                        .ok()
                        .and_then(|v| v.as_str().map(|s| s == wanted))
                        .unwrap_or(false)
            })
            .ok_or_else(|| VisuError::InvalidInput(format!("unknown time window: {:?}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn new_york() -> FixedOffset {
        FixedOffset::west_opt(5 * 3600).unwrap()
    }

    #[test]
    fn test_today_starts_at_local_midnight() {
        // 03:30 UTC is still the previous evening in UTC-5.
        let now = at("2024-03-10T03:30:00Z");
        let start = TimeWindow::Today.start_millis(now, new_york());
        assert_eq!(start, at("2024-03-09T05:00:00Z").timestamp_millis());
    }

    #[test]
    fn test_last_24_hours_reaches_back_25_hours() {
        let now = at("2024-03-10T12:00:00Z");
        let start = TimeWindow::Last24Hours.start_millis(now, new_york());
        assert_eq!(start, at("2024-03-09T11:00:00Z").timestamp_millis());
    }

    #[test]
    fn test_day_windows_subtract_whole_days() {
        let now = at("2024-03-10T12:00:00Z");
        let cases = [
            (TimeWindow::Last7Days, "2024-03-03T12:00:00Z"),
            (TimeWindow::Last30Days, "2024-02-09T12:00:00Z"),
            (TimeWindow::Last90Days, "2023-12-11T12:00:00Z"),
            (TimeWindow::LastYear, "2023-03-11T12:00:00Z"),
        ];
        for (window, expected) in cases {
            assert_eq!(
                window.start_millis(now, new_york()),
                at(expected).timestamp_millis(),
                "{}",
                window
            );
        }
    }

    #[test]
    fn test_start_is_truncated_to_whole_seconds() {
        let now = at("2024-03-10T12:00:00.789Z");
        let start = TimeWindow::Last7Days.start_millis(now, new_york());
        assert_eq!(start % 1000, 0);
    }

    #[test]
    fn test_parse_accepts_labels_slugs_and_snake_case() {
        assert_eq!("Last 24 hours".parse::<TimeWindow>().unwrap(), TimeWindow::Last24Hours);
        assert_eq!("7d".parse::<TimeWindow>().unwrap(), TimeWindow::Last7Days);
        assert_eq!("last_year".parse::<TimeWindow>().unwrap(), TimeWindow::LastYear);
        assert_eq!("last_90_days".parse::<TimeWindow>().unwrap(), TimeWindow::Last90Days);
        assert_eq!(" TODAY ".parse::<TimeWindow>().unwrap(), TimeWindow::Today);
        assert!("fortnight".parse::<TimeWindow>().is_err());
    }

    #[test]
    fn test_serde_names_and_aliases() {
        assert_eq!(serde_json::to_value(TimeWindow::Last24Hours).unwrap(), "last_24_hours");
        let w: TimeWindow = serde_json::from_str("\"Last 30 days\"").unwrap();
        assert_eq!(w, TimeWindow::Last30Days);
        let w: TimeWindow = serde_json::from_str("\"7d\"").unwrap();
        assert_eq!(w, TimeWindow::Last7Days);
    }

    #[test]
    fn test_short_windows() {
        assert!(TimeWindow::Last7Days.is_short());
        assert!(!TimeWindow::Last30Days.is_short());
    }
}
