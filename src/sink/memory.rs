//! In-memory sink that keeps every published record
//!
//! Records are buffered on `publish` and only become visible through the
//! probe after a successful `flush`, the way a broker acknowledges them.

use super::{SinkAdapter, SinkError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct Shared {
    delivered: Mutex<Vec<(String, Value)>>,
    flushes: AtomicUsize,
    closed: AtomicBool,
}

/// Read side of a `MemorySink` once it has been moved into a pipeline
#[derive(Debug, Clone, Default)]
pub struct MemorySinkProbe {
    shared: Arc<Shared>,
}

impl MemorySinkProbe {
    /// Acknowledged records for `topic`, in publish order
    pub fn records(&self, topic: &str) -> Vec<Value> {
        self.delivered()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, record)| record)
            .collect()
    }

    pub fn delivered(&self) -> Vec<(String, Value)> {
        self.shared
            .delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn flushes(&self) -> usize {
        self.shared.flushes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct MemorySink {
    pending: Vec<(String, Value)>,
    shared: Arc<Shared>,
    rejected_topics: HashSet<String>,
    failing_flushes: usize,
    stalling_flushes: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publish to `topic` fails with `SinkError::Publish`
    pub fn reject_topic(mut self, topic: impl Into<String>) -> Self {
        self.rejected_topics.insert(topic.into());
        self
    }

    /// The next `count` flushes time out and drop what was pending
    pub fn fail_flushes(mut self, count: usize) -> Self {
        self.failing_flushes = count;
        self
    }

    /// The next `count` flushes never complete
    pub fn stall_flushes(mut self, count: usize) -> Self {
        self.stalling_flushes = count;
        self
    }

    pub fn probe(&self) -> MemorySinkProbe {
        MemorySinkProbe {
            shared: self.shared.clone(),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl SinkAdapter for MemorySink {
    async fn publish(&mut self, topic: &str, record: &Value) -> Result<(), SinkError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }
        if self.rejected_topics.contains(topic) {
            return Err(SinkError::Publish {
                topic: topic.to_string(),
                reason: "rejected by test sink".to_string(),
            });
        }

        self.pending.push((topic.to_string(), record.clone()));
        Ok(())
    }

    async fn flush(&mut self, timeout: Duration) -> Result<(), SinkError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }
        self.shared.flushes.fetch_add(1, Ordering::SeqCst);

        if self.stalling_flushes > 0 {
            self.stalling_flushes -= 1;
            std::future::pending::<()>().await;
        }

        if self.failing_flushes > 0 {
            self.failing_flushes -= 1;
            self.pending.clear();
            return Err(SinkError::FlushTimeout(timeout));
        }

        let mut delivered = self.shared.delivered.lock().unwrap_or_else(|e| e.into_inner());
        delivered.append(&mut self.pending);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.shared.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "memory"
    }
}
