//! Scripted in-memory source
//!
//! Each `poll` hands out the next scripted step. Once the script runs out the
//! source behaves like an idle topic and returns empty polls.

use super::{PartitionBatch, SourceAdapter, SourceError};
use crate::event::RawEvent;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
enum Step {
    Batches(Vec<PartitionBatch>),
    Fail(String),
}

/// Observable side of a `MemorySource` once it has been moved into a pipeline
#[derive(Debug, Clone, Default)]
pub struct MemorySourceProbe {
    polls: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl MemorySourceProbe {
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct MemorySource {
    script: VecDeque<Step>,
    probe: MemorySourceProbe,
    idle_delay: Option<Duration>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one poll result spread over several partitions
    pub fn push_batches(&mut self, batches: Vec<PartitionBatch>) -> &mut Self {
        self.script.push_back(Step::Batches(batches));
        self
    }

    /// Queue one poll result on partition 0
    pub fn push_events(&mut self, events: Vec<RawEvent>) -> &mut Self {
        self.push_batches(vec![PartitionBatch::new(0, events)])
    }

    /// Queue one failing poll
    pub fn push_error(&mut self, message: impl Into<String>) -> &mut Self {
        self.script.push_back(Step::Fail(message.into()));
        self
    }

    /// Sleep for the poll timeout (capped at `delay`) once the script is empty
    pub fn with_idle_delay(mut self, delay: Duration) -> Self {
        self.idle_delay = Some(delay);
        self
    }

    pub fn probe(&self) -> MemorySourceProbe {
        self.probe.clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

#[async_trait]
impl SourceAdapter for MemorySource {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<PartitionBatch>, SourceError> {
        if self.probe.is_closed() {
            return Err(SourceError::Closed);
        }
        self.probe.polls.fetch_add(1, Ordering::SeqCst);

        match self.script.pop_front() {
            Some(Step::Batches(batches)) => Ok(batches),
            Some(Step::Fail(message)) => Err(SourceError::Transport(message)),
            None => {
                if let Some(delay) = self.idle_delay {
                    tokio::time::sleep(delay.min(timeout)).await;
                }
                Ok(Vec::new())
            }
        }
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.probe.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn source_type(&self) -> &'static str {
        "memory"
    }
}
