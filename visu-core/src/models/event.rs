//! Analytics event record.
//!
//! Stores hand events over as loosely typed JSON documents: `createdAt` may be a
//! number or a numeric string, `urlParams` may be a string or a list, and any
//! field may be `null`. Decoding is tolerant of all of these; only a missing or
//! unparseable `createdAt` rejects a record.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "text")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "text")]
    pub uat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "text")]
    pub saidi: Option<String>,
    #[serde(deserialize_with = "millis")]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "text")]
    pub referrer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "text")]
    pub url_params: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "text")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "text")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "text")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "text")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "text")]
    pub operating_system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "text")]
    pub browser: Option<String>,
    /// Interaction flags and any other fields the tracker attached.
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

impl Event {
    /// Build an event from a stored document, filling in the store-level key
    /// and timestamp columns.
    pub fn from_document(
        event_id: String,
        created_at: i64,
        document: Value,
    ) -> Result<Self, serde_json::Error> {
        let mut map = match document {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        map.insert("eventId".to_string(), Value::String(event_id));
        map.insert("createdAt".to_string(), Value::from(created_at));
        serde_json::from_value(Value::Object(map))
    }

    /// Look up a field by its wire (camelCase) name.
    ///
    /// Known columns are returned as strings; everything else comes from the
    /// attribute map. `null` attributes count as absent.
    pub fn field(&self, name: &str) -> Option<Value> {
        let known = match name {
            "eventId" => &self.event_id,
            "uat" => &self.uat,
            "saidi" => &self.saidi,
            "createdAt" => return Some(Value::from(self.created_at)),
            "referrer" => &self.referrer,
            "urlParams" => &self.url_params,
            "country" => &self.country,
            "region" => &self.region,
            "city" => &self.city,
            "deviceType" => &self.device_type,
            "operatingSystem" => &self.operating_system,
            "browser" => &self.browser,
            _ => {
                return self
                    .attributes
                    .get(name)
                    .filter(|v| !v.is_null())
                    .cloned();
            }
        };
        known.clone().map(Value::String)
    }

    /// Field value rendered as text, for counting distinct values.
    pub fn field_text(&self, name: &str) -> Option<String> {
        self.field(name).map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    /// Whether an interaction flag (or any other field) is present.
    pub fn has(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// All present fields in wire-name order, known columns included.
    pub fn present_fields(&self) -> BTreeMap<String, Value> {
        const KNOWN: [&str; 12] = [
            "eventId",
            "uat",
            "saidi",
            "createdAt",
            "referrer",
            "urlParams",
            "country",
            "region",
            "city",
            "deviceType",
            "operatingSystem",
            "browser",
        ];
        let mut out: BTreeMap<String, Value> = KNOWN
            .iter()
            .filter_map(|name| self.field(name).map(|v| (name.to_string(), v)))
            .collect();
        for (k, v) in &self.attributes {
            if !v.is_null() {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }
}

/// Optional text: strings pass through, numbers and booleans are rendered,
/// lists of strings are joined with ", " (empty list is absent), null is absent.
fn text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(value_text))
}

fn value_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Array(items) if items.is_empty() => None,
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(value_text)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        other => Some(other.to_string()),
    }
}

/// Millisecond timestamp from a JSON number (integer or float) or numeric string.
fn millis<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| D::Error::custom(format!("invalid createdAt: {}", n))),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .or_else(|_| trimmed.parse::<f64>().map(|f| f as i64))
                .map_err(|_| D::Error::custom(format!("invalid createdAt: {:?}", s)))
        }
        other => Err(D::Error::custom(format!("invalid createdAt: {}", other))),
    }
}
