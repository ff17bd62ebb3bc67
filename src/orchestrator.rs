//! Pipeline orchestrator - poll, enrich, aggregate, flush, publish
//!
//! One orchestrator is one logical worker. It owns its aggregator outright, so
//! running several orchestrators (one per consumer in the group) never shares
//! counter state between them.
//!
//! Iteration:
//! 1. Poll the source (bounded by the poll timeout)
//! 2. Enrich each event; publish it and apply its delta, or drop it
//! 3. Flush and publish the window snapshot if the interval has elapsed
//! 4. Flush the sink's outbound buffer
//!
//! On stop the orchestrator drains (one bounded final flush of the window and
//! the sink), then closes both adapters.

use crate::config::PipelineConfig;
use crate::enricher::Enricher;
use crate::error_handler::ExponentialBackoff;
use crate::event::RawEvent;
use crate::sink::SinkAdapter;
use crate::source::SourceAdapter;
use crate::window::{WindowAggregator, WindowSnapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const POLL_BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const POLL_BACKOFF_MAX: Duration = Duration::from_secs(5);
const POLL_BACKOFF_RETRIES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Running,
    Draining,
    Stopped,
}

/// Counters for everything the orchestrator has seen since start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub polls: u64,
    pub poll_errors: u64,
    pub events_received: u64,
    pub events_enriched: u64,
    pub events_dropped: u64,
    pub publish_failures: u64,
    pub snapshots_published: u64,
    pub flush_failures: u64,
}

/// Topics and timings the orchestrator runs with
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub processed_topic: String,
    pub aggregated_topic: String,
    pub window_interval: Duration,
    pub poll_timeout: Duration,
    pub sink_flush_timeout: Duration,
    pub drain_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for OrchestratorSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            processed_topic: config.processed_topic.clone(),
            aggregated_topic: config.aggregated_topic.clone(),
            window_interval: config.window_interval(),
            poll_timeout: config.poll_timeout(),
            sink_flush_timeout: config.sink_flush_timeout(),
            drain_timeout: config.drain_timeout(),
        }
    }
}

/// Cloneable trigger for a cooperative stop
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct Orchestrator {
    source: Box<dyn SourceAdapter>,
    sink: Box<dyn SinkAdapter>,
    enricher: Enricher,
    aggregator: WindowAggregator,
    settings: OrchestratorSettings,
    state: OrchestratorState,
    stats: PipelineStats,
    poll_backoff: ExponentialBackoff,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    clock: Clock,
}

impl Orchestrator {
    pub fn new(
        source: Box<dyn SourceAdapter>,
        sink: Box<dyn SinkAdapter>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let clock: Clock = Box::new(Utc::now);

        Self {
            source,
            sink,
            enricher: Enricher::new(),
            aggregator: WindowAggregator::new(clock(), settings.window_interval),
            settings,
            state: OrchestratorState::Running,
            stats: PipelineStats::default(),
            poll_backoff: ExponentialBackoff::new(
                POLL_BACKOFF_INITIAL,
                POLL_BACKOFF_MAX,
                POLL_BACKOFF_RETRIES,
            ),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            clock,
        }
    }

    /// Replace the wall clock; the current window restarts at the new clock's now
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Box::new(clock);
        self.aggregator = WindowAggregator::new((self.clock)(), self.settings.window_interval);
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn aggregator(&self) -> &WindowAggregator {
        &self.aggregator
    }

    fn stop_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Run until a stop is requested, then drain and release both adapters
    pub async fn run(mut self) -> PipelineStats {
        log::info!(
            "🚀 Starting login pipeline (source: {}, sink: {})",
            self.source.source_type(),
            self.sink.sink_type()
        );
        log::info!("   ├─ Window interval: {}ms", self.settings.window_interval.as_millis());
        log::info!("   ├─ Poll timeout: {}ms", self.settings.poll_timeout.as_millis());
        log::info!("   ├─ Processed topic: {}", self.settings.processed_topic);
        log::info!("   └─ Aggregated topic: {}", self.settings.aggregated_topic);

        while self.state == OrchestratorState::Running && !self.stop_requested() {
            self.run_once().await;
        }

        self.shutdown().await;
        self.stats
    }

    /// One poll → enrich → aggregate → flush cycle
    pub async fn run_once(&mut self) {
        if self.state != OrchestratorState::Running {
            log::warn!("⚠️  run_once called in state {:?}, ignoring", self.state);
            return;
        }

        self.stats.polls += 1;
        match self.source.poll(self.settings.poll_timeout).await {
            Ok(batches) => {
                self.poll_backoff.reset();
                for batch in batches {
                    log::debug!("Partition {}: {} events", batch.partition, batch.events.len());
                    for event in batch.events {
                        self.process_event(event).await;
                    }
                }
            }
            Err(e) => {
                self.stats.poll_errors += 1;
                log::error!("❌ Poll failed: {}", e);
                self.wait_after_poll_error().await;
            }
        }

        let now = (self.clock)();
        if self.aggregator.should_flush(now) {
            self.emit_snapshot(now).await;
        }

        if let Err(e) = self.sink.flush(self.settings.sink_flush_timeout).await {
            self.stats.flush_failures += 1;
            log::error!("❌ Sink flush failed: {}", e);
        }
    }

    async fn process_event(&mut self, event: RawEvent) {
        self.stats.events_received += 1;
        let user_id = event.user_id.clone();

        let (enriched, delta) = match self.enricher.process(event, (self.clock)()) {
            Ok(result) => result,
            Err(e) => {
                self.stats.events_dropped += 1;
                log::warn!("⚠️  Dropping login event (user_id: {}): {}", user_id, e);
                return;
            }
        };

        let processed_topic = self.settings.processed_topic.clone();
        self.publish(&processed_topic, &enriched).await;
        self.aggregator.update(&delta);
        self.stats.events_enriched += 1;
    }

    async fn publish<T: Serialize>(&mut self, topic: &str, record: &T) -> bool {
        let value = match serde_json::to_value(record) {
            Ok(value) => value,
            Err(e) => {
                self.stats.publish_failures += 1;
                log::error!("❌ Failed to serialize record for '{}': {}", topic, e);
                return false;
            }
        };

        match self.sink.publish(topic, &value).await {
            Ok(()) => true,
            Err(e) => {
                self.stats.publish_failures += 1;
                log::error!("❌ {}", e);
                false
            }
        }
    }

    async fn emit_snapshot(&mut self, now: DateTime<Utc>) {
        let snapshot = self.aggregator.flush(now);
        self.publish_snapshot(snapshot).await;
    }

    async fn publish_snapshot(&mut self, snapshot: WindowSnapshot) {
        log_snapshot(&snapshot, &self.stats);

        let aggregated_topic = self.settings.aggregated_topic.clone();
        if self.publish(&aggregated_topic, &snapshot).await {
            self.stats.snapshots_published += 1;
        }
    }

    async fn wait_after_poll_error(&mut self) {
        tokio::select! {
            result = self.poll_backoff.sleep() => {
                if result.is_err() {
                    log::error!(
                        "❌ Source still failing after {} retries, continuing to poll",
                        self.poll_backoff.attempts()
                    );
                    self.poll_backoff.reset();
                }
            }
            _ = self.shutdown_rx.changed() => {}
        }
    }

    /// Final flush of window and sink, bounded by the drain timeout
    async fn drain(&mut self) {
        self.state = OrchestratorState::Draining;
        log::info!("🔄 Draining ({} events in open window)...", self.aggregator.message_count());

        let drain_timeout = self.settings.drain_timeout;
        let final_flush = async {
            // Close the window even when empty, publish only a non-empty one
            let snapshot = self.aggregator.flush((self.clock)());
            if snapshot.message_count > 0 {
                self.publish_snapshot(snapshot).await;
            }
            self.sink.flush(drain_timeout).await
        };

        let outcome = tokio::time::timeout(drain_timeout, final_flush).await;
        match outcome {
            Ok(Ok(())) => log::info!("✅ Final flush complete"),
            Ok(Err(e)) => {
                self.stats.flush_failures += 1;
                log::error!("❌ Final sink flush failed: {}", e);
            }
            Err(_) => {
                self.stats.flush_failures += 1;
                log::error!("❌ Final flush exceeded {}ms", drain_timeout.as_millis());
            }
        }
    }

    /// Drain, then release both adapters whatever the drain outcome
    pub async fn shutdown(&mut self) {
        if self.state == OrchestratorState::Stopped {
            return;
        }

        self.drain().await;

        if let Err(e) = self.source.close().await {
            log::error!("❌ Failed to close {} source: {}", self.source.source_type(), e);
        }
        if let Err(e) = self.sink.close().await {
            log::error!("❌ Failed to close {} sink: {}", self.sink.sink_type(), e);
        }

        self.state = OrchestratorState::Stopped;
        log::info!(
            "✅ Pipeline stopped | received: {} enriched: {} dropped: {} publish failures: {} snapshots: {}",
            self.stats.events_received,
            self.stats.events_enriched,
            self.stats.events_dropped,
            self.stats.publish_failures,
            self.stats.snapshots_published
        );
    }
}

fn format_counts(entries: &[(&str, u64)]) -> String {
    if entries.is_empty() {
        return "-".to_string();
    }
    entries
        .iter()
        .map(|(key, count)| format!("{}={}", key, count))
        .collect::<Vec<_>>()
        .join(", ")
}

fn log_snapshot(snapshot: &WindowSnapshot, stats: &PipelineStats) {
    log::info!(
        "📊 Window closed: {} logins in {:.2}s ({:.2}/s) | devices: {} | top locales: {} | dropped so far: {}",
        snapshot.message_count,
        snapshot.window_duration_seconds,
        snapshot.messages_per_second,
        format_counts(&snapshot.top_devices(usize::MAX)),
        format_counts(&snapshot.top_locations(3)),
        stats.events_dropped
    );
    log::debug!("   └─ top versions: {}", format_counts(&snapshot.top_versions(5)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::source::MemorySource;
    use chrono::TimeDelta;
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Clock advanced by hand, in whole seconds
    #[derive(Clone, Default)]
    struct ManualClock(Arc<AtomicI64>);

    impl ManualClock {
        fn advance(&self, secs: i64) {
            self.0.fetch_add(secs, Ordering::SeqCst);
        }

        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp(1_730_575_000, 0).unwrap()
                + TimeDelta::seconds(self.0.load(Ordering::SeqCst))
        }
    }

    fn login(device: &str, timestamp: serde_json::Value) -> RawEvent {
        let mut event = RawEvent::with_timestamp(timestamp);
        event.device_type = device.to_string();
        event.locale = "IL".to_string();
        event.app_version = "2.3.0".to_string();
        event
    }

    fn orchestrator(source: MemorySource, sink: MemorySink, clock: &ManualClock) -> Orchestrator {
        let clock = clock.clone();
        Orchestrator::new(Box::new(source), Box::new(sink), OrchestratorSettings::default())
            .with_clock(move || clock.now())
    }

    #[tokio::test]
    async fn test_enriched_events_published_and_counted() {
        let mut source = MemorySource::new();
        source.push_events(vec![
            login("android", json!(1_730_575_000)),
            login("ios", json!("1730575000")),
        ]);
        let sink = MemorySink::new();
        let probe = sink.probe();
        let clock = ManualClock::default();
        let mut orch = orchestrator(source, sink, &clock);

        orch.run_once().await;

        let processed = probe.records("processed-logins");
        assert_eq!(processed.len(), 2);
        assert_eq!(processed[0]["hour_of_day"], json!(19));
        assert_eq!(processed[0]["readable_timestamp"], json!("2024-11-02T19:16:40"));
        assert_eq!(orch.aggregator().message_count(), 2);
        assert!(probe.records("aggregated-usage").is_empty());
        assert_eq!(orch.stats().events_enriched, 2);
    }

    #[tokio::test]
    async fn test_bad_timestamp_dropped_without_aborting_batch() {
        let mut source = MemorySource::new();
        source.push_events(vec![
            login("android", json!("not-a-time")),
            login("android", json!(1_730_575_000)),
            login("web", serde_json::Value::Null),
        ]);
        let sink = MemorySink::new();
        let probe = sink.probe();
        let clock = ManualClock::default();
        let mut orch = orchestrator(source, sink, &clock);

        orch.run_once().await;

        assert_eq!(probe.records("processed-logins").len(), 1);
        assert_eq!(orch.aggregator().message_count(), 1);
        assert_eq!(orch.aggregator().counters().device_counts.get("web"), None);
        assert_eq!(orch.stats().events_dropped, 2);
    }

    #[tokio::test]
    async fn test_snapshot_emitted_once_window_elapses() {
        let mut source = MemorySource::new();
        source.push_events(vec![login("android", json!(1_730_575_000))]);
        source.push_events(vec![login("ios", json!(1_730_575_005))]);
        let sink = MemorySink::new();
        let probe = sink.probe();
        let clock = ManualClock::default();
        let mut orch = orchestrator(source, sink, &clock);

        orch.run_once().await;
        assert!(probe.records("aggregated-usage").is_empty());

        clock.advance(10);
        orch.run_once().await;

        let snapshots = probe.records("aggregated-usage");
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0]["message_count"], json!(2));
        assert_eq!(snapshots[0]["device_counts"], json!({"android": 1, "ios": 1}));
        assert_eq!(snapshots[0]["window_duration_seconds"], json!(10.0));
        assert_eq!(snapshots[0]["messages_per_second"], json!(0.2));
        assert!(snapshots[0].get("version_counts").is_none());
        assert_eq!(orch.aggregator().message_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_halt_processing() {
        let mut source = MemorySource::new();
        source.push_events(vec![
            login("android", json!(1_730_575_000)),
            login("android", json!(1_730_575_001)),
        ]);
        let sink = MemorySink::new().reject_topic("processed-logins");
        let probe = sink.probe();
        let clock = ManualClock::default();
        let mut orch = orchestrator(source, sink, &clock);

        orch.run_once().await;
        clock.advance(10);
        orch.run_once().await;

        assert_eq!(orch.stats().publish_failures, 2);
        let snapshots = probe.records("aggregated-usage");
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0]["message_count"], json!(2));
    }

    #[tokio::test]
    async fn test_flush_timeout_loses_snapshot_and_resets_counters() {
        let mut source = MemorySource::new();
        source.push_events(vec![login("android", json!(1_730_575_000))]);
        let sink = MemorySink::new().fail_flushes(1);
        let probe = sink.probe();
        let clock = ManualClock::default();
        let mut orch = orchestrator(source, sink, &clock);

        clock.advance(10);
        orch.run_once().await;

        assert_eq!(orch.stats().flush_failures, 1);
        assert!(probe.records("aggregated-usage").is_empty());
        assert_eq!(orch.aggregator().message_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_error_is_not_fatal() {
        let mut source = MemorySource::new();
        source
            .push_error("broker unavailable")
            .push_events(vec![login("ios", json!(1_730_575_000))]);
        let sink = MemorySink::new();
        let probe = sink.probe();
        let clock = ManualClock::default();
        let mut orch = orchestrator(source, sink, &clock);

        orch.run_once().await;
        orch.run_once().await;

        assert_eq!(orch.stats().poll_errors, 1);
        assert_eq!(probe.records("processed-logins").len(), 1);
        assert_eq!(orch.state(), OrchestratorState::Running);
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_closes() {
        let mut source = MemorySource::new();
        source.push_events(vec![
            login("android", json!(1_730_575_000)),
            login("android", json!(1_730_575_001)),
            login("android", json!(1_730_575_002)),
            login("ios", json!(1_730_575_003)),
        ]);
        let source_probe = source.probe();
        let sink = MemorySink::new();
        let sink_probe = sink.probe();
        let clock = ManualClock::default();
        let mut orch = orchestrator(source, sink, &clock);

        orch.run_once().await;
        clock.advance(2);
        orch.shutdown().await;

        assert_eq!(orch.state(), OrchestratorState::Stopped);
        assert!(source_probe.is_closed());
        assert!(sink_probe.is_closed());

        let snapshots = sink_probe.records("aggregated-usage");
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0]["device_counts"], json!({"android": 3, "ios": 1}));
        assert_eq!(snapshots[0]["message_count"], json!(4));

        // Stopped is terminal
        orch.run_once().await;
        assert_eq!(orch.stats().polls, 1);
    }

    #[tokio::test]
    async fn test_empty_window_not_published_on_drain() {
        let sink = MemorySink::new();
        let probe = sink.probe();
        let clock = ManualClock::default();
        let mut orch = orchestrator(MemorySource::new(), sink, &clock);

        clock.advance(3);
        orch.shutdown().await;

        assert!(probe.records("aggregated-usage").is_empty());
        assert!(probe.is_closed());
        assert_eq!(orch.aggregator().window_start(), clock.now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_final_flush_is_bounded() {
        let source = MemorySource::new();
        let source_probe = source.probe();
        let sink = MemorySink::new().stall_flushes(1);
        let sink_probe = sink.probe();
        let clock = ManualClock::default();
        let mut orch = orchestrator(source, sink, &clock);
        let drain_timeout = OrchestratorSettings::default().drain_timeout;

        let started = tokio::time::Instant::now();
        orch.shutdown().await;
        let elapsed = started.elapsed();

        assert!(elapsed >= drain_timeout);
        assert!(elapsed < drain_timeout + Duration::from_secs(1));
        assert_eq!(sink_probe.flushes(), 1);
        assert_eq!(orch.stats().flush_failures, 1);
        assert_eq!(orch.state(), OrchestratorState::Stopped);
        assert!(source_probe.is_closed());
        assert!(sink_probe.is_closed());
    }

    #[tokio::test]
    async fn test_run_stops_when_triggered() {
        let mut source = MemorySource::new();
        source.push_events(vec![login("web", json!(1_730_575_000))]);
        let source = source.with_idle_delay(Duration::from_millis(5));
        let source_probe = source.probe();
        let sink = MemorySink::new();
        let sink_probe = sink.probe();
        let clock = ManualClock::default();
        let orch = orchestrator(source, sink, &clock);
        let handle = orch.shutdown_handle();

        let task = tokio::spawn(orch.run());
        while source_probe.polls() < 3 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        handle.trigger();

        let stats = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert!(handle.is_triggered());
        assert_eq!(stats.events_enriched, 1);
        assert_eq!(stats.snapshots_published, 1);
        assert!(source_probe.is_closed());
        assert_eq!(sink_probe.records("processed-logins").len(), 1);
    }
}
