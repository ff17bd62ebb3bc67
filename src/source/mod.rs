//! Source adapters - where raw login events come from
//!
//! Offset commits belong to the adapter. A record becomes committable only
//! once the caller comes back for the next `poll` (or closes the source), so
//! a crash mid-batch replays it: at-least-once.

use crate::event::RawEvent;
use async_trait::async_trait;
use std::time::Duration;

pub mod memory;
pub mod offsets;
#[cfg(feature = "kafka")]
pub mod kafka;

pub use memory::MemorySource;
pub use offsets::OffsetTracker;
#[cfg(feature = "kafka")]
pub use kafka::KafkaSource;

/// Events read from one partition during a poll, in offset order
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionBatch {
    pub partition: i32,
    pub events: Vec<RawEvent>,
}

impl PartitionBatch {
    pub fn new(partition: i32, events: Vec<RawEvent>) -> Self {
        Self { partition, events }
    }
}

#[derive(Debug)]
pub enum SourceError {
    /// Broker/client failure (construction or runtime)
    Transport(String),
    /// Poll after `close`
    Closed,
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Transport(e) => write!(f, "Transport error: {}", e),
            SourceError::Closed => write!(f, "Source is closed"),
        }
    }
}

impl std::error::Error for SourceError {}

#[cfg(feature = "kafka")]
impl From<rdkafka::error::KafkaError> for SourceError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        SourceError::Transport(err.to_string())
    }
}

#[async_trait]
pub trait SourceAdapter: Send {
    /// Wait up to `timeout` for events; an empty result is not an error
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<PartitionBatch>, SourceError>;

    /// Release the underlying connection
    async fn close(&mut self) -> Result<(), SourceError>;

    /// Get source type for logging
    fn source_type(&self) -> &'static str;
}
