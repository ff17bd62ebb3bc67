//! # loginflow
//!
//! Consumes user-login events, enriches each one with derived time fields and
//! keeps a tumbling window of categorical counts (device type, locale, app
//! version). Enriched events and window summaries are published downstream
//! with at-least-once delivery.
//!
//! ```text
//! SourceAdapter::poll → Enricher::process ─┬→ SinkAdapter::publish (processed-logins)
//!                                           └→ WindowAggregator::update
//!                                                  ↓ (interval elapsed)
//!                                              WindowAggregator::flush → SinkAdapter::publish (aggregated-usage)
//! ```
//!
//! The Kafka adapters and the `login_processor` binary sit behind the `kafka`
//! feature; everything else runs without a broker.

pub mod config;
pub mod enricher;
pub mod error_handler;
pub mod event;
pub mod orchestrator;
pub mod sink;
pub mod source;
pub mod window;

pub use config::{ConfigError, PipelineConfig, SinkBackend};
pub use enricher::{EnrichError, Enricher};
pub use event::{CounterDelta, EnrichedEvent, RawEvent};
pub use orchestrator::{Orchestrator, OrchestratorSettings, OrchestratorState, PipelineStats, ShutdownHandle};
pub use sink::{SinkAdapter, SinkError};
pub use source::{PartitionBatch, SourceAdapter, SourceError};
pub use window::{SharedWindowAggregator, WindowAggregator, WindowSnapshot};
