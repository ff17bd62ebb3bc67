//! Kafka sink built on rdkafka's `ThreadedProducer`
//!
//! `publish` only enqueues into librdkafka's local queue; the producer's
//! background thread delivers and retries. A full local queue is retried here
//! with exponential backoff before the record is reported as rejected.

use super::{SinkAdapter, SinkError};
use crate::config::PipelineConfig;
use crate::error_handler::ExponentialBackoff;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{BaseRecord, DefaultProducerContext, Producer, ThreadedProducer};
use rdkafka::util::Timeout;
use serde_json::Value;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};

const QUEUE_FULL_INITIAL_DELAY: Duration = Duration::from_millis(10);
const QUEUE_FULL_MAX_DELAY: Duration = Duration::from_millis(500);
const QUEUE_FULL_RETRIES: u32 = 6;

pub struct KafkaSink {
    producer: ThreadedProducer<DefaultProducerContext>,
    close_timeout: Duration,
    closed: bool,
}

impl KafkaSink {
    pub fn new(config: &PipelineConfig) -> Result<Self, SinkError> {
        let producer: ThreadedProducer<DefaultProducerContext> = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("message.timeout.ms", "30000")
            .set("linger.ms", "5")
            .create()
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        log::info!("📤 Kafka producer ready (brokers: {})", config.bootstrap_servers);

        Ok(Self {
            producer,
            close_timeout: config.drain_timeout(),
            closed: false,
        })
    }

    fn flush_blocking(&self, timeout: Duration) -> Result<(), SinkError> {
        let flush = || self.producer.flush(Timeout::After(timeout));

        // librdkafka's flush blocks the calling thread
        let result = match Handle::try_current().map(|h| h.runtime_flavor()) {
            Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(flush),
            _ => flush(),
        };

        match result {
            Ok(()) => Ok(()),
            Err(KafkaError::Flush(RDKafkaErrorCode::OperationTimedOut)) => {
                Err(SinkError::FlushTimeout(timeout))
            }
            Err(e) => Err(SinkError::Transport(e.to_string())),
        }
    }
}

#[async_trait]
impl SinkAdapter for KafkaSink {
    async fn publish(&mut self, topic: &str, record: &Value) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }

        let payload = serde_json::to_vec(record)?;
        let mut backoff =
            ExponentialBackoff::new(QUEUE_FULL_INITIAL_DELAY, QUEUE_FULL_MAX_DELAY, QUEUE_FULL_RETRIES);

        loop {
            let base = BaseRecord::<(), [u8]>::to(topic).payload(payload.as_slice());
            let rejection = match self.producer.send(base) {
                Ok(()) => return Ok(()),
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), _)) => None,
                Err((e, _)) => Some(e.to_string()),
            };

            if let Some(reason) = rejection {
                return Err(SinkError::Publish {
                    topic: topic.to_string(),
                    reason,
                });
            }

            if backoff.sleep().await.is_err() {
                return Err(SinkError::Publish {
                    topic: topic.to_string(),
                    reason: format!("local queue still full after {} retries", backoff.attempts()),
                });
            }
        }
    }

    async fn flush(&mut self, timeout: Duration) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        self.flush_blocking(timeout)
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self.flush_blocking(self.close_timeout);
        log::info!("🔌 Kafka producer closed");
        result
    }

    fn sink_type(&self) -> &'static str {
        "Kafka"
    }
}
