//! Tumbling wall-clock window of categorical login counts
//!
//! The aggregator owns a single `WindowCounters` value. `flush` swaps it out for
//! an empty one in one step, so a snapshot always contains either all or none
//! of any `update`.

use crate::event::CounterDelta;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const DEFAULT_WINDOW_INTERVAL: Duration = Duration::from_secs(10);

/// Counts accumulated during one window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowCounters {
    pub device_counts: HashMap<String, u64>,
    pub location_counts: HashMap<String, u64>,
    pub version_counts: HashMap<String, u64>,
    pub total: u64,
}

impl WindowCounters {
    pub fn apply(&mut self, delta: &CounterDelta) {
        bump(&mut self.device_counts, &delta.device_type);
        bump(&mut self.location_counts, &delta.locale);
        bump(&mut self.version_counts, &delta.app_version);
        self.total += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

fn bump(counts: &mut HashMap<String, u64>, key: &str) {
    match counts.get_mut(key) {
        Some(count) => *count += 1,
        None => {
            counts.insert(key.to_string(), 1);
        }
    }
}

/// Immutable summary of one closed window, as published downstream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSnapshot {
    /// Epoch seconds
    pub window_start: f64,
    pub window_duration_seconds: f64,
    pub message_count: u64,
    pub messages_per_second: f64,
    pub device_counts: BTreeMap<String, u64>,
    pub location_counts: BTreeMap<String, u64>,
    // Not part of the published record.
    #[serde(skip)]
    version_counts: BTreeMap<String, u64>,
}

impl WindowSnapshot {
    /// Per app-version counts captured with this window
    pub fn version_counts(&self) -> &BTreeMap<String, u64> {
        &self.version_counts
    }

    /// Highest counts first, ties broken by key
    pub fn top_devices(&self, limit: usize) -> Vec<(&str, u64)> {
        top_n(&self.device_counts, limit)
    }

    pub fn top_locations(&self, limit: usize) -> Vec<(&str, u64)> {
        top_n(&self.location_counts, limit)
    }

    pub fn top_versions(&self, limit: usize) -> Vec<(&str, u64)> {
        top_n(&self.version_counts, limit)
    }
}

fn top_n(counts: &BTreeMap<String, u64>, limit: usize) -> Vec<(&str, u64)> {
    let mut entries: Vec<(&str, u64)> = counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    entries.truncate(limit);
    entries
}

fn epoch_seconds(instant: DateTime<Utc>) -> f64 {
    instant.timestamp() as f64 + f64::from(instant.timestamp_subsec_micros()) / 1_000_000.0
}

/// Seconds from `start` to `end`, never negative
fn elapsed_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let micros = (end - start).num_microseconds().unwrap_or(i64::MAX);
    if micros <= 0 {
        0.0
    } else {
        micros as f64 / 1_000_000.0
    }
}

pub struct WindowAggregator {
    counters: WindowCounters,
    window_start: DateTime<Utc>,
    window_interval: Duration,
}

impl WindowAggregator {
    pub fn new(window_start: DateTime<Utc>, window_interval: Duration) -> Self {
        Self {
            counters: WindowCounters::default(),
            window_start,
            window_interval,
        }
    }

    pub fn update(&mut self, delta: &CounterDelta) {
        self.counters.apply(delta);
    }

    pub fn should_flush(&self, now: DateTime<Utc>) -> bool {
        elapsed_seconds(self.window_start, now) >= self.window_interval.as_secs_f64()
    }

    /// Close the current window at `now` and start the next one
    pub fn flush(&mut self, now: DateTime<Utc>) -> WindowSnapshot {
        let counters = std::mem::take(&mut self.counters);
        let elapsed = elapsed_seconds(self.window_start, now);
        let messages_per_second = if elapsed > 0.0 {
            counters.total as f64 / elapsed
        } else {
            0.0
        };

        let snapshot = WindowSnapshot {
            window_start: epoch_seconds(self.window_start),
            window_duration_seconds: elapsed,
            message_count: counters.total,
            messages_per_second,
            device_counts: counters.device_counts.into_iter().collect(),
            location_counts: counters.location_counts.into_iter().collect(),
            version_counts: counters.version_counts.into_iter().collect(),
        };

        self.window_start = now;
        snapshot
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    pub fn window_interval(&self) -> Duration {
        self.window_interval
    }

    pub fn message_count(&self) -> u64 {
        self.counters.total
    }

    pub fn counters(&self) -> &WindowCounters {
        &self.counters
    }

    /// Live per app-version counts of the open window
    pub fn version_counts(&self) -> &HashMap<String, u64> {
        &self.counters.version_counts
    }
}

/// Aggregator handle for callers that update and flush from different tasks
///
/// `update` and `flush` take the same lock, so they never interleave.
#[derive(Clone)]
pub struct SharedWindowAggregator {
    inner: Arc<Mutex<WindowAggregator>>,
}

impl SharedWindowAggregator {
    pub fn new(aggregator: WindowAggregator) -> Self {
        Self {
            inner: Arc::new(Mutex::new(aggregator)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowAggregator> {
        // A panic mid-update cannot leave the counters half-written, so the
        // poisoned state is still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn update(&self, delta: &CounterDelta) {
        self.lock().update(delta);
    }

    pub fn should_flush(&self, now: DateTime<Utc>) -> bool {
        self.lock().should_flush(now)
    }

    /// Flush only if the window has elapsed, checked under the same lock
    pub fn flush_if_due(&self, now: DateTime<Utc>) -> Option<WindowSnapshot> {
        let mut guard = self.lock();
        if guard.should_flush(now) {
            Some(guard.flush(now))
        } else {
            None
        }
    }

    pub fn flush(&self, now: DateTime<Utc>) -> WindowSnapshot {
        self.lock().flush(now)
    }

    pub fn message_count(&self) -> u64 {
        self.lock().message_count()
    }
}
