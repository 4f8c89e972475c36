use serde::{Deserialize, Serialize};

use crate::lookup::LookupField;
use crate::window::TimeWindow;

pub const PROTOCOL_VERSION: &str = "0.1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum VisuRequest {
    Ping,
    Health,
    Dashboard {
        #[serde(default)]
        window: TimeWindow,
        #[serde(default)]
        exclude_cities: Vec<String>,
    },
    Sessions {
        #[serde(default)]
        window: TimeWindow,
        #[serde(default)]
        exclude_cities: Vec<String>,
    },
    Lookup {
        #[serde(default)]
        window: TimeWindow,
        token: String,
        #[serde(default)]
        by: LookupField,
        #[serde(default)]
        exclude_cities: Vec<String>,
    },
    LastSessions {
        #[serde(default)]
        window: TimeWindow,
        limit: Option<usize>,
        #[serde(default)]
        exclude_cities: Vec<String>,
    },
    Cities {
        #[serde(default)]
        window: TimeWindow,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VisuResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub version: String,
}

impl VisuResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}
