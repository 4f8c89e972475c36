//! Aggregation views over the raw event collection.
//!
//! These never look at reconstructed sessions: a session dropped by the
//! reconstructor (no country) still counts here.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, FixedOffset, TimeZone};
use serde::{Deserialize, Serialize};

use crate::models::Event;

/// Interaction flags and their dashboard labels. Presence of the field on an
/// event means the interaction happened.
pub const INTERACTION_FLAGS: [(&str, &str); 6] = [
    ("readMoreClick", "Read More Clicks"),
    ("dashDropdownChange", "Dash Dropdown Change"),
    ("pingClick", "Ping Clicks"),
    ("miniChartClick", "Mini-Chart Clicks"),
    ("fundTab", "Fundamentals Scroll"),
    ("articleClick", "Article Clicks"),
];

/// Categorical fields whose values are counted.
pub const COUNTED_FIELDS: [&str; 5] = ["urlParams", "referrer", "dashLayout", "pageView", "newsType"];

const HOURLY_BUCKET: &str = "%b. %d, %-I%p";
const DAILY_BUCKET: &str = "%b. %d, %Y";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub unique_visitors: usize,
    pub events: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBucket {
    pub label: String,
    pub unique_visitors: usize,
    pub events: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryShare {
    pub country: String,
    pub count: usize,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionCount {
    pub field: String,
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationCount {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uat: Option<String>,
    pub country: String,
    pub region: String,
    pub city: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorInteractions {
    pub uat: String,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub device_type: Option<String>,
    pub count: usize,
}

// ============================================================================
// Views
// ============================================================================

pub fn totals(events: &[Event]) -> Totals {
    let visitors: HashSet<&str> = events.iter().filter_map(|e| e.uat.as_deref()).collect();
    Totals {
        unique_visitors: visitors.len(),
        events: events.len(),
    }
}

/// Distinct visitors and events per time bucket, oldest bucket first.
///
/// Short windows bucket by hour, longer ones by day, in the display offset.
pub fn visitors_over_time(events: &[Event], hourly: bool, offset: FixedOffset) -> Vec<TimeBucket> {
    let format = if hourly { HOURLY_BUCKET } else { DAILY_BUCKET };

    // Label plus the earliest timestamp seen in the bucket, for ordering.
    let mut buckets: HashMap<String, (i64, HashSet<&str>, usize)> = HashMap::new();
    for event in events {
        let Some(label) = bucket_label(event.created_at, offset, format) else {
            continue;
        };
        let entry = buckets
            .entry(label)
            .or_insert_with(|| (event.created_at, HashSet::new(), 0));
        entry.0 = entry.0.min(event.created_at);
        if let Some(uat) = event.uat.as_deref() {
            entry.1.insert(uat);
        }
        entry.2 += 1;
    }

    let mut out: Vec<(i64, TimeBucket)> = buckets
        .into_iter()
        .map(|(label, (earliest, visitors, events))| {
            (
                earliest,
                TimeBucket {
                    label,
                    unique_visitors: visitors.len(),
                    events,
                },
            )
        })
        .collect();
    out.sort_by_key(|(earliest, _)| *earliest);
    out.into_iter().map(|(_, bucket)| bucket).collect()
}

/// Count of each distinct present value of `field`, most frequent first.
/// Equal counts keep first-appearance order.
pub fn value_counts(events: &[Event], field: &str) -> Vec<ValueCount> {
    count_keys(events.iter().filter_map(|e| e.field_text(field)))
        .into_iter()
        .map(|(value, count)| ValueCount { value, count })
        .collect()
}

/// Events per country with their share of all country-bearing events.
pub fn country_breakdown(events: &[Event]) -> Vec<CountryShare> {
    let counts = count_keys(events.iter().filter_map(|e| e.country.clone()));
    let total: usize = counts.iter().map(|(_, c)| c).sum();

    counts
        .into_iter()
        .map(|(country, count)| CountryShare {
            country,
            count,
            percent: round2(count as f64 * 100.0 / total as f64),
        })
        .collect()
}

pub fn interaction_counters(events: &[Event]) -> Vec<InteractionCount> {
    INTERACTION_FLAGS
        .iter()
        .map(|(field, label)| InteractionCount {
            field: field.to_string(),
            label: label.to_string(),
            count: events.iter().filter(|e| e.has(field)).count(),
        })
        .collect()
}

/// Events per (country, region, city); events missing any of the three are
/// not counted.
pub fn location_breakdown(events: &[Event]) -> Vec<LocationCount> {
    let keys = events.iter().filter_map(|e| {
        Some((
            e.country.clone()?,
            e.region.clone()?,
            e.city.clone()?,
        ))
    });
    count_keys(keys)
        .into_iter()
        .map(|((country, region, city), count)| LocationCount {
            uat: None,
            country,
            region,
            city,
            count,
        })
        .collect()
}

/// Events per (uat, country, region, city).
pub fn visitor_locations(events: &[Event]) -> Vec<LocationCount> {
    let keys = events.iter().filter_map(|e| {
        Some((
            e.uat.clone()?,
            e.country.clone()?,
            e.region.clone()?,
            e.city.clone()?,
        ))
    });
    count_keys(keys)
        .into_iter()
        .map(|((uat, country, region, city), count)| LocationCount {
            uat: Some(uat),
            country,
            region,
            city,
            count,
        })
        .collect()
}

/// Events per visitor, with the visitor's first complete location/device record.
pub fn visitor_interactions(events: &[Event]) -> Vec<VisitorInteractions> {
    let counts = count_keys(events.iter().filter_map(|e| e.uat.clone()));

    let mut locations: HashMap<&str, &Event> = HashMap::new();
    for event in events {
        let complete = event.country.is_some()
            && event.region.is_some()
            && event.city.is_some()
            && event.device_type.is_some();
        if let (Some(uat), true) = (event.uat.as_deref(), complete) {
            locations.entry(uat).or_insert(event);
        }
    }

    counts
        .into_iter()
        .map(|(uat, count)| {
            let location = locations.get(uat.as_str());
            VisitorInteractions {
                country: location.and_then(|e| e.country.clone()),
                region: location.and_then(|e| e.region.clone()),
                city: location.and_then(|e| e.city.clone()),
                device_type: location.and_then(|e| e.device_type.clone()),
                uat,
                count,
            }
        })
        .collect()
}

/// Distinct present cities in first-appearance order.
pub fn cities(events: &[Event]) -> Vec<String> {
    let mut seen = HashSet::new();
    events
        .iter()
        .filter_map(|e| e.city.as_deref())
        .filter(|city| seen.insert(*city))
        .map(str::to_string)
        .collect()
}

/// Drop every event of every visitor seen in one of `excluded` cities.
///
/// Used to hide internal traffic: once a visitor token shows up in an excluded
/// city, all of that visitor's events go, wherever they came from.
pub fn exclude_cities(events: &[Event], excluded: &[String]) -> Vec<Event> {
    if excluded.is_empty() {
        return events.to_vec();
    }

    let hidden: HashSet<&str> = events
        .iter()
        .filter(|e| {
            e.city
                .as_deref()
                .map(|c| excluded.iter().any(|x| x == c))
                .unwrap_or(false)
        })
        .filter_map(|e| e.uat.as_deref())
        .collect();

    events
        .iter()
        .filter(|e| {
            e.uat
                .as_deref()
                .map(|u| !hidden.contains(u))
                .unwrap_or(true)
        })
        .cloned()
        .collect()
}

// ============================================================================
// Helpers
// ============================================================================

fn bucket_label(millis: i64, offset: FixedOffset, format: &str) -> Option<String> {
    let utc = DateTime::from_timestamp_millis(millis)?;
    Some(offset.from_utc_datetime(&utc.naive_utc()).format(format).to_string())
}

/// Count occurrences, most frequent first, ties in first-appearance order.
fn count_keys<K, I>(keys: I) -> Vec<(K, usize)>
where
    K: std::hash::Hash + Eq + Clone,
    I: IntoIterator<Item = K>,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut counts: Vec<(K, usize)> = Vec::new();
    for key in keys {
        match index.get(&key).copied() {
            Some(i) => counts[i].1 += 1,
            None => {
                index.insert(key.clone(), counts.len());
                counts.push((key, 1));
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
