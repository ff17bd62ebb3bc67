//! Pipeline configuration from environment variables
//!
//! Loaded after `dotenv`, so a local `.env` file works the same as exported
//! variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkBackend {
    Kafka,
    Jsonl,
}

impl SinkBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkBackend::Kafka => "kafka",
            SinkBackend::Jsonl => "jsonl",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "kafka" => Some(SinkBackend::Kafka),
            "jsonl" => Some(SinkBackend::Jsonl),
            _ => None,
        }
    }

    /// `--backend <kafka|jsonl>` from the command line, if given
    pub fn from_args<I>(args: I) -> Option<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let args: Vec<String> = args.into_iter().collect();
        let idx = args.iter().position(|x| x == "--backend")?;
        args.get(idx + 1).and_then(|s| SinkBackend::from_str(s))
    }
}

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration for the login pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: String,

    /// Consumer group id
    pub group_id: String,

    pub input_topic: String,
    pub processed_topic: String,
    pub aggregated_topic: String,

    /// Tumbling window length in milliseconds
    pub window_interval_ms: u64,

    /// Longest a single poll may block, in milliseconds
    pub poll_timeout_ms: u64,

    /// Upper bound on records returned by one poll
    pub max_poll_records: usize,

    pub auto_commit_interval_ms: u64,

    /// Where a new consumer group starts reading
    pub auto_offset_reset: String,

    /// Per-iteration sink flush timeout in milliseconds
    pub sink_flush_timeout_ms: u64,

    /// Budget for the final flush on shutdown, in milliseconds
    pub drain_timeout_ms: u64,

    pub sink_backend: SinkBackend,

    /// JSONL backend output directory
    pub output_dir: PathBuf,
    pub output_max_size_mb: u64,
    pub output_max_rotations: u32,

    pub rust_log: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:29092".to_string(),
            group_id: "user_login_processor".to_string(),
            input_topic: "user-login".to_string(),
            processed_topic: "processed-logins".to_string(),
            aggregated_topic: "aggregated-usage".to_string(),
            window_interval_ms: 10_000,
            poll_timeout_ms: 1_000,
            max_poll_records: 500,
            auto_commit_interval_ms: 5_000,
            auto_offset_reset: "earliest".to_string(),
            sink_flush_timeout_ms: 10_000,
            drain_timeout_ms: 5_000,
            sink_backend: SinkBackend::Kafka,
            output_dir: PathBuf::from("streams/loginflow"),
            output_max_size_mb: 100,
            output_max_rotations: 10,
            rust_log: "info".to_string(),
        }
    }
}

/// Parse `var`, falling back to `default` (with a warning) when unparseable
fn parse_or<T>(var: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("Invalid {} '{}', defaulting to {}", var, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}

fn string_or(var: &str, default: String) -> String {
    env::var(var).unwrap_or(default)
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `KAFKA_BOOTSTRAP_SERVERS` (default: localhost:29092)
    /// - `KAFKA_GROUP_ID` (default: user_login_processor)
    /// - `INPUT_TOPIC` / `PROCESSED_TOPIC` / `AGGREGATED_TOPIC`
    ///   (default: user-login / processed-logins / aggregated-usage)
    /// - `WINDOW_INTERVAL_MS` (default: 10000)
    /// - `POLL_TIMEOUT_MS` (default: 1000)
    /// - `MAX_POLL_RECORDS` (default: 500)
    /// - `AUTO_COMMIT_INTERVAL_MS` (default: 5000)
    /// - `AUTO_OFFSET_RESET` (default: earliest)
    /// - `SINK_FLUSH_TIMEOUT_MS` (default: 10000)
    /// - `DRAIN_TIMEOUT_MS` (default: 5000)
    /// - `SINK_BACKEND` (default: kafka)
    /// - `OUTPUT_DIR` (default: streams/loginflow)
    /// - `OUTPUT_MAX_SIZE_MB` / `OUTPUT_MAX_ROTATIONS` (default: 100 / 10)
    /// - `RUST_LOG` (default: info)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let sink_backend = match env::var("SINK_BACKEND") {
            Ok(raw) => SinkBackend::from_str(&raw).unwrap_or_else(|| {
                log::warn!("Invalid SINK_BACKEND '{}', defaulting to kafka", raw);
                SinkBackend::Kafka
            }),
            Err(_) => defaults.sink_backend,
        };

        Self {
            bootstrap_servers: string_or("KAFKA_BOOTSTRAP_SERVERS", defaults.bootstrap_servers),
            group_id: string_or("KAFKA_GROUP_ID", defaults.group_id),
            input_topic: string_or("INPUT_TOPIC", defaults.input_topic),
            processed_topic: string_or("PROCESSED_TOPIC", defaults.processed_topic),
            aggregated_topic: string_or("AGGREGATED_TOPIC", defaults.aggregated_topic),
            window_interval_ms: parse_or("WINDOW_INTERVAL_MS", defaults.window_interval_ms),
            poll_timeout_ms: parse_or("POLL_TIMEOUT_MS", defaults.poll_timeout_ms),
            max_poll_records: parse_or("MAX_POLL_RECORDS", defaults.max_poll_records),
            auto_commit_interval_ms: parse_or(
                "AUTO_COMMIT_INTERVAL_MS",
                defaults.auto_commit_interval_ms,
            ),
            auto_offset_reset: string_or("AUTO_OFFSET_RESET", defaults.auto_offset_reset),
            sink_flush_timeout_ms: parse_or("SINK_FLUSH_TIMEOUT_MS", defaults.sink_flush_timeout_ms),
            drain_timeout_ms: parse_or("DRAIN_TIMEOUT_MS", defaults.drain_timeout_ms),
            sink_backend,
            output_dir: env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            output_max_size_mb: parse_or("OUTPUT_MAX_SIZE_MB", defaults.output_max_size_mb),
            output_max_rotations: parse_or("OUTPUT_MAX_ROTATIONS", defaults.output_max_rotations),
            rust_log: string_or("RUST_LOG", defaults.rust_log),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("KAFKA_BOOTSTRAP_SERVERS", &self.bootstrap_servers),
            ("KAFKA_GROUP_ID", &self.group_id),
            ("INPUT_TOPIC", &self.input_topic),
            ("PROCESSED_TOPIC", &self.processed_topic),
            ("AGGREGATED_TOPIC", &self.aggregated_topic),
        ];
        for (var, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingVariable(var.to_string()));
            }
        }

        if self.processed_topic == self.aggregated_topic {
            return Err(ConfigError::InvalidValue(format!(
                "PROCESSED_TOPIC and AGGREGATED_TOPIC must differ (both '{}')",
                self.processed_topic
            )));
        }

        let positive = [
            ("WINDOW_INTERVAL_MS", self.window_interval_ms),
            ("POLL_TIMEOUT_MS", self.poll_timeout_ms),
            ("SINK_FLUSH_TIMEOUT_MS", self.sink_flush_timeout_ms),
            ("DRAIN_TIMEOUT_MS", self.drain_timeout_ms),
            ("AUTO_COMMIT_INTERVAL_MS", self.auto_commit_interval_ms),
            ("MAX_POLL_RECORDS", self.max_poll_records as u64),
        ];
        for (var, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!("{} must be greater than 0", var)));
            }
        }

        match self.auto_offset_reset.as_str() {
            "earliest" | "latest" => Ok(()),
            other => Err(ConfigError::InvalidValue(format!(
                "AUTO_OFFSET_RESET must be earliest or latest, got '{}'",
                other
            ))),
        }
    }

    pub fn window_interval(&self) -> Duration {
        Duration::from_millis(self.window_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn sink_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_flush_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests below mutate process-wide environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const VARS: [&str; 6] = [
        "KAFKA_BOOTSTRAP_SERVERS",
        "KAFKA_GROUP_ID",
        "WINDOW_INTERVAL_MS",
        "POLL_TIMEOUT_MS",
        "SINK_BACKEND",
        "OUTPUT_DIR",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();

        let config = PipelineConfig::from_env();

        assert_eq!(config.bootstrap_servers, "localhost:29092");
        assert_eq!(config.group_id, "user_login_processor");
        assert_eq!(config.window_interval(), Duration::from_secs(10));
        assert_eq!(config.poll_timeout(), Duration::from_secs(1));
        assert_eq!(config.sink_backend, SinkBackend::Kafka);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_custom_config() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env();
        env::set_var("KAFKA_BOOTSTRAP_SERVERS", "broker-1:9092,broker-2:9092");
        env::set_var("WINDOW_INTERVAL_MS", "2500");
        env::set_var("POLL_TIMEOUT_MS", "not-a-number");
        env::set_var("SINK_BACKEND", "JSONL");
        env::set_var("OUTPUT_DIR", "/tmp/loginflow");

        let config = PipelineConfig::from_env();

        assert_eq!(config.bootstrap_servers, "broker-1:9092,broker-2:9092");
        assert_eq!(config.window_interval_ms, 2_500);
        assert_eq!(config.poll_timeout_ms, 1_000);
        assert_eq!(config.sink_backend, SinkBackend::Jsonl);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/loginflow"));

        clear_env();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.window_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        let mut config = PipelineConfig::default();
        config.group_id = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::MissingVariable(_))));

        let mut config = PipelineConfig::default();
        config.aggregated_topic = config.processed_topic.clone();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.auto_offset_reset = "middle".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_drain_timeout() {
        let mut config = PipelineConfig::default();
        config.drain_timeout_ms = 0;

        match config.validate() {
            Err(ConfigError::InvalidValue(msg)) => assert!(msg.contains("DRAIN_TIMEOUT_MS")),
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_backend_from_args() {
        let args = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert_eq!(
            SinkBackend::from_args(args(&["login_processor", "--backend", "jsonl"])),
            Some(SinkBackend::Jsonl)
        );
        assert_eq!(SinkBackend::from_args(args(&["login_processor", "--backend"])), None);
        assert_eq!(SinkBackend::from_args(args(&["login_processor"])), None);
    }
}
