//! Login Processor - production runtime
//!
//! Consumes `user-login` from Kafka, publishes enriched events to
//! `processed-logins` and window summaries to `aggregated-usage`.
//!
//! Usage:
//!   cargo run --release --features kafka --bin login_processor [-- --backend jsonl]
//!
//! Environment variables (see `PipelineConfig::from_env` for the full list):
//!   KAFKA_BOOTSTRAP_SERVERS - Broker list (default: localhost:29092)
//!   KAFKA_GROUP_ID - Consumer group (default: user_login_processor)
//!   WINDOW_INTERVAL_MS - Aggregation window (default: 10000)
//!   POLL_TIMEOUT_MS - Poll timeout (default: 1000)
//!   SINK_BACKEND - kafka | jsonl (default: kafka)

use dotenv::dotenv;
use log::{error, info};
use loginflow::config::{PipelineConfig, SinkBackend};
use loginflow::orchestrator::{Orchestrator, OrchestratorSettings};
use loginflow::sink::{JsonlSink, KafkaSink, SinkAdapter};
use loginflow::source::{KafkaSource, SourceAdapter};
use std::process::ExitCode;

#[cfg(unix)]
async fn stop_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!("❌ Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("⚠️  Received SIGTERM, shutting down..."),
        _ = tokio::signal::ctrl_c() => info!("⚠️  Received CTRL+C, shutting down..."),
    }
}

#[cfg(not(unix))]
async fn stop_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("❌ Failed to listen for CTRL+C: {}", e);
        return;
    }
    info!("⚠️  Received CTRL+C, shutting down...");
}

fn build_sink(config: &PipelineConfig) -> Result<Box<dyn SinkAdapter>, Box<dyn std::error::Error>> {
    let sink: Box<dyn SinkAdapter> = match config.sink_backend {
        SinkBackend::Kafka => Box::new(KafkaSink::new(config)?),
        SinkBackend::Jsonl => Box::new(JsonlSink::new(
            &config.output_dir,
            config.output_max_size_mb,
            config.output_max_rotations,
        )?),
    };
    Ok(sink)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    let mut config = PipelineConfig::from_env();
    if let Some(backend) = SinkBackend::from_args(std::env::args()) {
        config.sink_backend = backend;
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.rust_log))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Login Processor");
    info!("📊 Configuration:");
    info!("   ├─ Brokers: {}", config.bootstrap_servers);
    info!("   ├─ Group: {}", config.group_id);
    info!("   ├─ Input topic: {}", config.input_topic);
    info!("   ├─ Sink backend: {}", config.sink_backend.as_str());
    info!("   └─ Auto-commit interval: {}ms", config.auto_commit_interval_ms);

    if let Err(e) = config.validate() {
        error!("❌ {}", e);
        return ExitCode::FAILURE;
    }

    // Construction failures are fatal: nothing has been consumed yet
    let source: Box<dyn SourceAdapter> = match KafkaSource::new(&config) {
        Ok(source) => Box::new(source),
        Err(e) => {
            error!("❌ Failed to create consumer: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let sink = match build_sink(&config) {
        Ok(sink) => sink,
        Err(e) => {
            error!("❌ Failed to create {} sink: {}", config.sink_backend.as_str(), e);
            return ExitCode::FAILURE;
        }
    };
    info!("✅ Adapters ready ({} → {})", source.source_type(), sink.sink_type());

    let orchestrator = Orchestrator::new(source, sink, OrchestratorSettings::from(&config));
    let shutdown = orchestrator.shutdown_handle();

    tokio::spawn(async move {
        stop_signal().await;
        shutdown.trigger();
    });

    info!("🔄 Press CTRL+C to shutdown gracefully");
    let stats = orchestrator.run().await;

    info!(
        "✅ Login Processor stopped ({} polls, {} poll errors, {} flush failures)",
        stats.polls, stats.poll_errors, stats.flush_failures
    );
    ExitCode::SUCCESS
}
