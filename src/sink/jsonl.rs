use super::{SinkAdapter, SinkError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Size-rotated JSONL file for a single topic
pub struct JsonlWriter {
    file: BufWriter<File>,
    current_size: u64,
    max_size: u64,
    base_path: PathBuf,
    rotation_count: u32,
    max_rotations: u32,
}

impl JsonlWriter {
    pub fn new(path: impl AsRef<Path>, max_size_mb: u64, max_rotations: u32) -> Result<Self, SinkError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        let current_size = file.metadata()?.len();
        let max_size = max_size_mb.saturating_mul(1024 * 1024);

        Ok(Self {
            file: BufWriter::new(file),
            current_size,
            max_size,
            base_path: path.to_path_buf(),
            rotation_count: 0,
            max_rotations,
        })
    }

    pub fn write_line(&mut self, json: &str) -> Result<(), SinkError> {
        writeln!(self.file, "{}", json)?;
        self.current_size += (json.len() + 1) as u64;

        if self.current_size >= self.max_size {
            self.rotate()?;
        }

        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), SinkError> {
        self.file.flush()?;
        Ok(())
    }

    pub fn rotations(&self) -> u32 {
        self.rotation_count
    }

    fn rotated_path(&self, index: u32) -> PathBuf {
        self.base_path.with_extension(format!("jsonl.{}", index))
    }

    fn rotate(&mut self) -> Result<(), SinkError> {
        self.file.flush()?;

        // Oldest file falls off the end, the rest shift up by one
        if self.max_rotations > 0 {
            let oldest = self.rotated_path(self.max_rotations);
            if oldest.exists() {
                std::fs::remove_file(&oldest)?;
            }
            for i in (1..self.max_rotations).rev() {
                let old_path = self.rotated_path(i);
                if old_path.exists() {
                    std::fs::rename(&old_path, self.rotated_path(i + 1))?;
                }
            }
            if self.base_path.exists() {
                std::fs::rename(&self.base_path, self.rotated_path(1))?;
            }
        } else if self.base_path.exists() {
            std::fs::remove_file(&self.base_path)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.base_path)?;

        self.file = BufWriter::new(file);
        self.current_size = 0;
        self.rotation_count += 1;

        log::info!(
            "📄 Rotated {} (rotation #{})",
            self.base_path.display(),
            self.rotation_count
        );

        Ok(())
    }
}

/// Sink writing each topic to `<dir>/<topic>.jsonl`
///
/// Useful for replaying a topic locally or running without a broker on the
/// output side. Writes are buffered until `flush`.
pub struct JsonlSink {
    dir: PathBuf,
    max_size_mb: u64,
    max_rotations: u32,
    writers: HashMap<String, JsonlWriter>,
    closed: bool,
}

impl JsonlSink {
    pub fn new(dir: impl AsRef<Path>, max_size_mb: u64, max_rotations: u32) -> Result<Self, SinkError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        log::info!("📝 Writing topics as JSONL under: {}", dir.display());

        Ok(Self {
            dir,
            max_size_mb,
            max_rotations,
            writers: HashMap::new(),
            closed: false,
        })
    }

    pub fn topic_path(&self, topic: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", topic))
    }

    fn writer(&mut self, topic: &str) -> Result<&mut JsonlWriter, SinkError> {
        if !self.writers.contains_key(topic) {
            let writer = JsonlWriter::new(self.topic_path(topic), self.max_size_mb, self.max_rotations)?;
            self.writers.insert(topic.to_string(), writer);
        }
        self.writers
            .get_mut(topic)
            .ok_or_else(|| SinkError::Transport(format!("no writer for topic '{}'", topic)))
    }

    fn flush_all(&mut self) -> Result<(), SinkError> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for JsonlSink {
    fn drop(&mut self) {
        let _ = self.flush_all();
    }
}

#[async_trait]
impl SinkAdapter for JsonlSink {
    async fn publish(&mut self, topic: &str, record: &Value) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        let json = serde_json::to_string(record)?;
        self.writer(topic)?.write_line(&json)
    }

    // Local file writes either complete or fail; the timeout never applies.
    async fn flush(&mut self, _timeout: Duration) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        self.flush_all()
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self.flush_all();
        self.writers.clear();
        result
    }

    fn sink_type(&self) -> &'static str {
        "JSONL"
    }
}
