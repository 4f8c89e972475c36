//! Token lookup and per-session timelines.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, FixedOffset, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Event;
use crate::sessions::first_present;
use crate::views::INTERACTION_FLAGS;

const TIMELINE_DATE: &str = "%b. %d, %Y %H:%M:%S";

/// Fields left out of lookup timelines: identity, device and bookkeeping
/// columns, plus the ones summarized per session.
const HIDDEN_FIELDS: [&str; 15] = [
    "eventId",
    "uat",
    "saidi",
    "country",
    "region",
    "operatingSystem",
    "deviceType",
    "browser",
    "ttl",
    "createdAt",
    "dummy",
    "isMobile",
    "clientInfo",
    "referrer",
    "urlParams",
];

/// Columns shown for each event in the "last sessions" view.
const LAST_SESSION_FIELDS: [&str; 8] = [
    "pageView",
    "urlParams",
    "country",
    "city",
    "region",
    "deviceType",
    "referrer",
    "dashLayout",
];

/// Which token a lookup matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupField {
    /// Visitor token (`uat`)
    #[default]
    Visitor,
    /// Session id (`saidi`)
    Session,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub created_at: i64,
    pub date: String,
    pub fields: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTimeline {
    pub saidi: String,
    /// Visitor token of the session, from its first event that carries one
    pub uat: Option<String>,
    /// Distinct referrers joined with ", ", or "None"
    pub referrers: String,
    pub url_params: Vec<String>,
    pub entries: Vec<TimelineEntry>,
}

/// Events matching `token`, grouped by session, each session in chronological
/// order. Sessions are ordered by their first event.
pub fn lookup(
    events: &[Event],
    token: &str,
    by: LookupField,
    offset: FixedOffset,
) -> Vec<SessionTimeline> {
    let mut matching: Vec<&Event> = events
        .iter()
        .filter(|e| {
            let key = match by {
                LookupField::Visitor => e.uat.as_deref(),
                LookupField::Session => e.saidi.as_deref(),
            };
            key == Some(token)
        })
        .collect();
    matching.sort_by_key(|e| e.created_at);

    let timelines: Vec<SessionTimeline> = group_by_saidi(&matching)
        .into_iter()
        .map(|(saidi, group)| {
            session_timeline(saidi, &group, offset, |name| !HIDDEN_FIELDS.contains(&name))
        })
        .collect();

    tracing::debug!(token, ?by, sessions = timelines.len(), "Session lookup");
    timelines
}

/// The `n` most recently active sessions, newest first, each with its events
/// in chronological order restricted to the dashboard columns.
pub fn last_sessions(events: &[Event], n: usize, offset: FixedOffset) -> Vec<SessionTimeline> {
    if n == 0 {
        return Vec::new();
    }

    let mut by_recency: Vec<&Event> = events.iter().collect();
    by_recency.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut seen = HashSet::new();
    let recent: Vec<&str> = by_recency
        .iter()
        .filter_map(|e| e.saidi.as_deref())
        .filter(|saidi| seen.insert(*saidi))
        .take(n)
        .collect();

    let mut chronological = by_recency;
    chronological.reverse();
    let groups: HashMap<&str, Vec<&Event>> = group_by_saidi(&chronological).into_iter().collect();

    recent
        .into_iter()
        .filter_map(|saidi| groups.get(saidi).map(|group| (saidi, group)))
        .map(|(saidi, group)| session_timeline(saidi, group, offset, is_last_session_field))
        .collect()
}

fn is_last_session_field(name: &str) -> bool {
    LAST_SESSION_FIELDS.contains(&name)
        || INTERACTION_FLAGS.iter().any(|(flag, _)| *flag == name)
        || name == "filingClick"
}

/// Groups in order of first appearance, events kept in input order.
fn group_by_saidi<'a>(events: &[&'a Event]) -> Vec<(&'a str, Vec<&'a Event>)> {
    let mut index: HashMap<&'a str, usize> = HashMap::new();
    let mut groups: Vec<(&'a str, Vec<&'a Event>)> = Vec::new();
    for &event in events {
        let Some(saidi) = event.saidi.as_deref() else {
            continue;
        };
        match index.get(saidi).copied() {
            Some(i) => groups[i].1.push(event),
            None => {
                index.insert(saidi, groups.len());
                groups.push((saidi, vec![event]));
            }
        }
    }
    groups
}

fn session_timeline<F>(
    saidi: &str,
    group: &[&Event],
    offset: FixedOffset,
    keep: F,
) -> SessionTimeline
where
    F: Fn(&str) -> bool,
{
    SessionTimeline {
        saidi: saidi.to_string(),
        uat: first_present(group, |e| e.uat.as_deref()).map(str::to_string),
        referrers: joined_or_none(distinct(group.iter().filter_map(|e| e.referrer.as_deref()))),
        url_params: distinct(group.iter().filter_map(|e| e.url_params.as_deref())),
        entries: group
            .iter()
            .map(|e| timeline_entry(e, offset, &keep))
            .collect(),
    }
}

fn timeline_entry<F>(event: &Event, offset: FixedOffset, keep: F) -> TimelineEntry
where
    F: Fn(&str) -> bool,
{
    let fields = event
        .present_fields()
        .into_iter()
        .filter(|(name, _)| keep(name))
        .collect();

    TimelineEntry {
        created_at: event.created_at,
        date: format_date(event.created_at, offset),
        fields,
    }
}

fn format_date(millis: i64, offset: FixedOffset) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|utc| {
            offset
                .from_utc_datetime(&utc.naive_utc())
                .format(TIMELINE_DATE)
                .to_string()
        })
        .unwrap_or_default()
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .filter(|v| seen.insert(*v))
        .map(str::to_string)
        .collect()
}

fn joined_or_none(values: Vec<String>) -> String {
    if values.is_empty() {
        "None".to_string()
    } else {
        values.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn events(values: serde_json::Value) -> Vec<Event> {
        serde_json::from_value(values).expect("test events should decode")
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn sample() -> Vec<Event> {
        events(json!([
            {"uat": "A", "saidi": "S2", "createdAt": 9000, "pageView": "about", "referrer": "x.com"},
            {"uat": "A", "saidi": "S1", "createdAt": 3000, "pageView": "home", "country": "US"},
            {"uat": "B", "saidi": "S3", "createdAt": 5000, "pageView": "home"},
            {"uat": "A", "saidi": "S1", "createdAt": 1000, "referrer": "g.com", "urlParams": "utm=a"},
            {"uat": "A", "saidi": "S1", "createdAt": 2000, "referrer": "g.com", "pingClick": true}
        ]))
    }

    #[test]
    fn test_lookup_by_session_returns_only_that_session_ascending() {
        let timelines = lookup(&sample(), "S1", LookupField::Session, utc());
        assert_eq!(timelines.len(), 1);
        let times: Vec<i64> = timelines[0].entries.iter().map(|e| e.created_at).collect();
        assert_eq!(times, vec![1000, 2000, 3000]);
        assert_eq!(timelines[0].referrers, "g.com");
        assert_eq!(timelines[0].url_params, vec!["utm=a".to_string()]);
    }

    #[test]
    fn test_lookup_by_visitor_groups_sessions_by_first_event() {
        let timelines = lookup(&sample(), "A", LookupField::Visitor, utc());
        let ids: Vec<&str> = timelines.iter().map(|t| t.saidi.as_str()).collect();
        assert_eq!(ids, vec!["S1", "S2"]);
        assert_eq!(timelines[1].referrers, "x.com");
    }

    #[test]
    fn test_timeline_hides_identity_fields() {
        let timelines = lookup(&sample(), "S1", LookupField::Session, utc());
        let second = &timelines[0].entries[1];
        assert_eq!(second.date, "Jan. 01, 1970 00:00:02");
        assert_eq!(second.fields.get("pingClick"), Some(&json!(true)));
        assert!(!second.fields.contains_key("uat"));
        assert!(!second.fields.contains_key("referrer"));
        assert!(!second.fields.contains_key("createdAt"));
        assert!(!timelines[0].entries[2].fields.contains_key("country"));
    }

    #[test]
    fn test_lookup_unknown_token_is_empty() {
        assert!(lookup(&sample(), "nobody", LookupField::Visitor, utc()).is_empty());
        let t = lookup(&sample(), "S3", LookupField::Session, utc());
        assert_eq!(t[0].referrers, "None");
    }

    #[test]
    fn test_last_sessions_newest_first() {
        let sessions = last_sessions(&sample(), 2, utc());
        let ids: Vec<&str> = sessions.iter().map(|t| t.saidi.as_str()).collect();
        assert_eq!(ids, vec!["S2", "S3"]);
        assert_eq!(sessions[0].uat.as_deref(), Some("A"));
        assert_eq!(sessions[1].uat.as_deref(), Some("B"));

        let all = last_sessions(&sample(), 10, utc());
        assert_eq!(all.len(), 3);
        let s1 = &all[2];
        assert_eq!(s1.entries.len(), 3);
        assert_eq!(s1.entries[0].created_at, 1000);
        assert!(s1.entries[0].fields.contains_key("urlParams"));
        assert!(!s1.entries[0].fields.contains_key("uat"));
        assert!(s1.entries[1].fields.contains_key("pingClick"));
    }

    #[test]
    fn test_session_uat_comes_from_first_event_carrying_one() {
        let timelines = lookup(
            &events(json!([
                {"saidi": "S1", "createdAt": 1000},
                {"uat": "V", "saidi": "S1", "createdAt": 2000}
            ])),
            "S1",
            LookupField::Session,
            utc(),
        );
        assert_eq!(timelines[0].uat.as_deref(), Some("V"));
        assert_eq!(timelines[0].entries.len(), 2);
    }

    #[test]
    fn test_last_sessions_many_sessions_keep_recency_order() {
        let many: Vec<serde_json::Value> = (0..500)
            .map(|i| json!({"uat": "A", "saidi": format!("S{}", i % 250), "createdAt": i}))
            .collect();
        let sessions = last_sessions(&events(json!(many)), 3, utc());
        let ids: Vec<&str> = sessions.iter().map(|t| t.saidi.as_str()).collect();
        assert_eq!(ids, vec!["S249", "S248", "S247"]);
        assert_eq!(sessions[0].entries.len(), 2);
        assert_eq!(sessions[0].entries[0].created_at, 249);
    }

    #[test]
    fn test_last_sessions_zero_is_empty() {
        assert!(last_sessions(&sample(), 0, utc()).is_empty());
    }
}
