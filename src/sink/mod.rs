//! Sink adapters - where enriched events and window snapshots go
//!
//! Retry and backoff against the transport are the adapter's business; the
//! orchestrator logs a failed publish and moves on.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

pub mod jsonl;
pub mod memory;
#[cfg(feature = "kafka")]
pub mod kafka;

pub use jsonl::JsonlSink;
pub use memory::MemorySink;
#[cfg(feature = "kafka")]
pub use kafka::KafkaSink;

#[derive(Debug)]
pub enum SinkError {
    /// Client could not be created or the connection is gone
    Transport(String),
    /// The transport refused a record
    Publish { topic: String, reason: String },
    /// Buffered records were not acknowledged in time
    FlushTimeout(Duration),
    Io(std::io::Error),
    Serialization(serde_json::Error),
    /// Use after `close`
    Closed,
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(err)
    }
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Transport(e) => write!(f, "Transport error: {}", e),
            SinkError::Publish { topic, reason } => {
                write!(f, "Publish to '{}' rejected: {}", topic, reason)
            }
            SinkError::FlushTimeout(timeout) => {
                write!(f, "Flush not acknowledged within {}ms", timeout.as_millis())
            }
            SinkError::Io(e) => write!(f, "IO error: {}", e),
            SinkError::Serialization(e) => write!(f, "Serialization error: {}", e),
            SinkError::Closed => write!(f, "Sink is closed"),
        }
    }
}

impl std::error::Error for SinkError {}

#[async_trait]
pub trait SinkAdapter: Send {
    /// Enqueue one record for `topic`; does not wait for acknowledgement
    async fn publish(&mut self, topic: &str, record: &Value) -> Result<(), SinkError>;

    /// Wait until everything enqueued so far is acknowledged
    async fn flush(&mut self, timeout: Duration) -> Result<(), SinkError>;

    /// Release the underlying connection
    async fn close(&mut self) -> Result<(), SinkError>;

    /// Get sink type for logging
    fn sink_type(&self) -> &'static str;
}
