//! Login enrichment - derive time fields and the counter delta
//!
//! Pure transform: nothing outside the returned values is touched, so the
//! caller decides when (and whether) the delta reaches the window counters.

use crate::event::{CounterDelta, EnrichedEvent, RawEvent};
use chrono::{DateTime, Timelike, Utc};
use serde_json::Value;

const READABLE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const PROCESSED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

#[derive(Debug, Clone, PartialEq)]
pub enum EnrichError {
    /// `timestamp` missing, null, non-numeric or outside the representable range
    InvalidTimestamp(String),
}

impl std::fmt::Display for EnrichError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnrichError::InvalidTimestamp(msg) => write!(f, "Invalid timestamp: {}", msg),
        }
    }
}

impl std::error::Error for EnrichError {}

#[derive(Debug, Clone, Copy, Default)]
pub struct Enricher;

impl Enricher {
    pub fn new() -> Self {
        Self
    }

    /// Enrich one event, stamping `now` as the processing instant
    pub fn process(
        &self,
        raw: RawEvent,
        now: DateTime<Utc>,
    ) -> Result<(EnrichedEvent, CounterDelta), EnrichError> {
        let seconds = parse_timestamp(raw.timestamp.as_ref())?;
        let event_time = DateTime::from_timestamp(seconds, 0).ok_or_else(|| {
            EnrichError::InvalidTimestamp(format!("{} is out of range", seconds))
        })?;

        let delta = CounterDelta::from(&raw);
        let enriched = EnrichedEvent {
            raw,
            processed_timestamp: now.format(PROCESSED_FORMAT).to_string(),
            readable_timestamp: event_time.format(READABLE_FORMAT).to_string(),
            hour_of_day: event_time.hour(),
        };

        Ok((enriched, delta))
    }
}

/// Integer seconds from the wire value
///
/// Accepts integers, floats (truncated toward zero) and strings holding an
/// integer.
pub fn parse_timestamp(value: Option<&Value>) -> Result<i64, EnrichError> {
    match value {
        None | Some(Value::Null) => Err(EnrichError::InvalidTimestamp("missing".to_string())),
        Some(Value::Number(n)) => {
            if let Some(secs) = n.as_i64() {
                return Ok(secs);
            }
            match n.as_f64() {
                Some(f) if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                    Ok(f.trunc() as i64)
                }
                _ => Err(EnrichError::InvalidTimestamp(format!("{} is out of range", n))),
            }
        }
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| EnrichError::InvalidTimestamp(format!("{:?} is not an integer", s))),
        Some(other) => Err(EnrichError::InvalidTimestamp(format!(
            "{} is not an integer",
            other
        ))),
    }
}
