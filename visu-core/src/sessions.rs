//! Session reconstruction
//!
//! Groups raw events by (visitor token, session id) and derives one summary per
//! session:
//!
//!   seconds    = round_half_even((max(createdAt) − min(createdAt)) / 1000)
//!   total_time = "H hours, M minutes, S seconds" with zero units omitted
//!
//! Location/device context and referrer context come from the first event of
//! the session that carries each field. Sessions whose events never carry a
//! country are dropped. Output is sorted by duration, longest first; sessions
//! with equal durations keep the order in which they first appear in the input.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::Event;

/// Derived record for one (uat, saidi) session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub uat: String,
    pub saidi: String,
    pub country: String,
    pub region: Option<String>,
    pub city: Option<String>,
    pub device_type: Option<String>,
    /// `"<referrer> <urlParams>"`, either side omitted when missing
    pub referrer: Option<String>,
    pub seconds: u64,
    pub total_time: String,
    pub first_seen: i64,
    pub last_seen: i64,
    pub event_count: usize,
}

// ============================================================================
// PUBLIC API
// ============================================================================

/// Reconstruct sessions from a flat event collection.
///
/// Pure function of its input: events missing `uat` or `saidi` are ignored,
/// missing optional fields are treated as absent, and an empty input yields an
/// empty result.
pub fn reconstruct(events: &[Event]) -> Vec<SessionSummary> {
    let groups = group_by_session(events);

    let mut summaries: Vec<SessionSummary> = groups
        .into_iter()
        .filter_map(|((uat, saidi), group)| summarize(uat, saidi, &group))
        .collect();

    // Stable: ties keep first-appearance order.
    summaries.sort_by(|a, b| b.seconds.cmp(&a.seconds));

    tracing::debug!(
        events = events.len(),
        sessions = summaries.len(),
        "Reconstructed sessions"
    );

    summaries
}

/// First value a field takes across a group, scanning in input order.
pub fn first_present<'a, T, F>(group: &[&'a Event], field: F) -> Option<&'a T>
where
    T: ?Sized,
    F: Fn(&'a Event) -> Option<&'a T>,
{
    group.iter().find_map(|&event| field(event))
}

/// Human-readable duration: `"1 hour, 1 minute, 1 second"`, `"2 hours, 5 seconds"`,
/// `"0 seconds"`.
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    let mut parts = Vec::with_capacity(3);
    if hours > 0 {
        parts.push(unit(hours, "hour"));
    }
    if minutes > 0 {
        parts.push(unit(minutes, "minute"));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(unit(seconds, "second"));
    }
    parts.join(", ")
}

/// Milliseconds to whole seconds, rounding half to even.
pub fn millis_to_seconds(millis: u64) -> u64 {
    let whole = millis / 1000;
    let rest = millis % 1000;
    if rest > 500 || (rest == 500 && whole % 2 == 1) {
        whole + 1
    } else {
        whole
    }
}

// ============================================================================
// INTERNALS
// ============================================================================

type SessionKey<'a> = (&'a str, &'a str);

/// Composite-key grouping that preserves first-appearance order of keys and
/// input order of events within each group.
fn group_by_session(events: &[Event]) -> Vec<(SessionKey<'_>, Vec<&Event>)> {
    let mut index: HashMap<SessionKey<'_>, usize> = HashMap::new();
    let mut groups: Vec<(SessionKey<'_>, Vec<&Event>)> = Vec::new();

    for event in events {
        let (Some(uat), Some(saidi)) = (event.uat.as_deref(), event.saidi.as_deref()) else {
            continue;
        };
        let key = (uat, saidi);
        match index.get(&key).copied() {
            Some(i) => groups[i].1.push(event),
            None => {
                index.insert(key, groups.len());
                groups.push((key, vec![event]));
            }
        }
    }

    groups
}

fn summarize(uat: &str, saidi: &str, group: &[&Event]) -> Option<SessionSummary> {
    let country = first_present(group, |e| e.country.as_deref())?;

    let first_seen = group.iter().map(|e| e.created_at).min()?;
    let last_seen = group.iter().map(|e| e.created_at).max()?;
    let seconds = millis_to_seconds(last_seen.abs_diff(first_seen));

    Some(SessionSummary {
        uat: uat.to_string(),
        saidi: saidi.to_string(),
        country: country.to_string(),
        region: first_present(group, |e| e.region.as_deref()).map(str::to_string),
        city: first_present(group, |e| e.city.as_deref()).map(str::to_string),
        device_type: first_present(group, |e| e.device_type.as_deref()).map(str::to_string),
        referrer: referrer_context(group),
        seconds,
        total_time: format_duration(seconds),
        first_seen,
        last_seen,
        event_count: group.len(),
    })
}

fn referrer_context(group: &[&Event]) -> Option<String> {
    let referrer = first_present(group, |e| e.referrer.as_deref());
    let params = first_present(group, |e| {
        e.url_params.as_deref().filter(|p| !p.trim().is_empty())
    });

    match (referrer, params) {
        (Some(r), Some(p)) => Some(format!("{} {}", r, p)),
        (Some(r), None) => Some(r.to_string()),
        (None, Some(p)) => Some(p.to_string()),
        (None, None) => None,
    }
}

fn unit(value: u64, name: &str) -> String {
    if value == 1 {
        format!("{} {}", value, name)
    } else {
        format!("{} {}s", value, name)
    }
}

// ============================================================================
// TESTS
// ============================================================================
