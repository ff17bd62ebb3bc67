//! Kafka source built on rdkafka's `StreamConsumer`
//!
//! Offsets of every record read (including ones that fail to decode) are
//! stored only when the next poll starts or the source closes, after the
//! caller has processed the batch. librdkafka's auto-commit timer then
//! commits whatever has been stored.

use super::{OffsetTracker, PartitionBatch, SourceAdapter, SourceError};
use crate::config::PipelineConfig;
use crate::event::RawEvent;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

pub struct KafkaSource {
    consumer: StreamConsumer,
    topic: String,
    max_poll_records: usize,
    malformed: u64,
    offsets: OffsetTracker,
    closed: bool,
}

impl KafkaSource {
    /// Create the consumer and subscribe to the input topic
    pub fn new(config: &PipelineConfig) -> Result<Self, SourceError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set(
                "auto.commit.interval.ms",
                config.auto_commit_interval_ms.to_string(),
            )
            .set("enable.partition.eof", "false")
            .create()?;

        consumer.subscribe(&[config.input_topic.as_str()])?;

        log::info!(
            "📥 Kafka consumer subscribed to '{}' (group: {}, brokers: {})",
            config.input_topic,
            config.group_id,
            config.bootstrap_servers
        );

        Ok(Self {
            consumer,
            topic: config.input_topic.clone(),
            max_poll_records: config.max_poll_records,
            malformed: 0,
            offsets: OffsetTracker::new(),
            closed: false,
        })
    }

    /// Records dropped because their payload was not a login event
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }

    /// Hand the previous batch's offsets to librdkafka for the next commit
    fn store_processed_offsets(&mut self) {
        if self.offsets.is_empty() {
            return;
        }

        let mut tpl = TopicPartitionList::new();
        for (partition, next) in self.offsets.take() {
            if let Err(e) = tpl.add_partition_offset(&self.topic, partition, Offset::Offset(next)) {
                log::warn!("⚠️  Invalid offset {}[{}]@{}: {}", self.topic, partition, next, e);
            }
        }

        if let Err(e) = self.consumer.store_offsets(&tpl) {
            log::warn!("⚠️  Failed to store offsets for {}: {}", self.topic, e);
        }
    }
}

#[async_trait]
impl SourceAdapter for KafkaSource {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<PartitionBatch>, SourceError> {
        if self.closed {
            return Err(SourceError::Closed);
        }
        self.store_processed_offsets();

        let deadline = Instant::now() + timeout;
        let mut by_partition: BTreeMap<i32, Vec<RawEvent>> = BTreeMap::new();
        let mut received = 0usize;

        while received < self.max_poll_records {
            // Block for the first record only, then drain what is already buffered
            let wait = if received == 0 {
                deadline.saturating_duration_since(Instant::now())
            } else {
                Duration::ZERO
            };

            let message = match tokio::time::timeout(wait, self.consumer.recv()).await {
                Err(_) => break,
                Ok(Err(e)) if received == 0 => return Err(e.into()),
                Ok(Err(e)) => {
                    log::warn!("⚠️  Consumer error after {} records, returning partial batch: {}", received, e);
                    break;
                }
                Ok(Ok(message)) => message,
            };
            received += 1;

            match message.payload().map(RawEvent::from_json_slice) {
                Some(Ok(event)) => by_partition.entry(message.partition()).or_default().push(event),
                Some(Err(e)) => {
                    self.malformed += 1;
                    log::warn!(
                        "⚠️  Dropping undecodable record {}[{}]@{}: {}",
                        self.topic,
                        message.partition(),
                        message.offset(),
                        e
                    );
                }
                None => {
                    log::debug!(
                        "Skipping empty record {}[{}]@{}",
                        self.topic,
                        message.partition(),
                        message.offset()
                    );
                }
            }

            self.offsets.record(message.partition(), message.offset());
        }

        Ok(by_partition
            .into_iter()
            .map(|(partition, events)| PartitionBatch::new(partition, events))
            .collect())
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.store_processed_offsets();

        // Push stored offsets now instead of waiting for the next auto-commit
        if let Err(e) = self.consumer.commit_consumer_state(CommitMode::Sync) {
            log::debug!("Final offset commit skipped: {}", e);
        }
        self.consumer.unsubscribe();
        log::info!("🔌 Kafka consumer closed ({})", self.topic);
        Ok(())
    }

    fn source_type(&self) -> &'static str {
        "Kafka"
    }
}
