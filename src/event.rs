//! Login event types flowing through the pipeline
//!
//! `RawEvent` is what arrives on the input topic, `EnrichedEvent` is what goes
//! out on the processed topic and `CounterDelta` is what the window aggregator
//! consumes.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Placeholder for any categorical field missing from the wire record
pub const UNKNOWN: &str = "unknown";

fn unknown() -> String {
    UNKNOWN.to_string()
}

/// Null becomes `"unknown"`, other non-string values keep their JSON text
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => unknown(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

/// A user login as published on the input topic
///
/// Every field except `timestamp` falls back to `"unknown"`. The timestamp is
/// kept as the raw JSON value so the enricher decides whether it is usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(default = "unknown", deserialize_with = "lenient_string")]
    pub user_id: String,
    #[serde(default = "unknown", deserialize_with = "lenient_string")]
    pub app_version: String,
    #[serde(default = "unknown", deserialize_with = "lenient_string")]
    pub ip: String,
    #[serde(default = "unknown", deserialize_with = "lenient_string")]
    pub locale: String,
    #[serde(default = "unknown", deserialize_with = "lenient_string")]
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(default = "unknown", deserialize_with = "lenient_string")]
    pub device_type: String,
    /// Fields we do not model, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawEvent {
    /// Build an event with every categorical field set to `"unknown"`
    pub fn with_timestamp(timestamp: impl Into<Value>) -> Self {
        Self {
            user_id: unknown(),
            app_version: unknown(),
            ip: unknown(),
            locale: unknown(),
            device_id: unknown(),
            timestamp: Some(timestamp.into()),
            device_type: unknown(),
            extra: Map::new(),
        }
    }

    /// Decode a wire payload (JSON bytes)
    pub fn from_json_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// RawEvent plus the derived time fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedEvent {
    #[serde(flatten)]
    pub raw: RawEvent,
    pub processed_timestamp: String,
    pub readable_timestamp: String,
    pub hour_of_day: u32,
}

/// Categorical keys of one event, applied to the window counters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterDelta {
    pub device_type: String,
    pub app_version: String,
    pub locale: String,
}

impl CounterDelta {
    pub fn new(
        device_type: impl Into<String>,
        app_version: impl Into<String>,
        locale: impl Into<String>,
    ) -> Self {
        Self {
            device_type: device_type.into(),
            app_version: app_version.into(),
            locale: locale.into(),
        }
    }
}

impl From<&RawEvent> for CounterDelta {
    fn from(event: &RawEvent) -> Self {
        Self::new(
            event.device_type.clone(),
            event.app_version.clone(),
            event.locale.clone(),
        )
    }
}
