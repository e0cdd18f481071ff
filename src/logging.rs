use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_core::{Event, Metadata, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::{BuilderError, Result};

const DEFAULT_MAX_LOG_FILES: usize = 5;
const MAX_LOG_MEMORY_BYTES: usize = 2 * 1024 * 1024; // 2MB
const LOG_FILE_PREFIX: &str = "snap_builder";

#[derive(Clone, Debug, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub source: LogSource,
    pub message: String,
}

impl LogEntry {
    fn size(&self) -> usize {
        std::mem::size_of::<LogEntry>() + self.level.len() + self.message.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    Webhook,
    Staging,
    Build,
    #[serde(rename = "github")]
    GitHub,
    System,
}

impl LogSource {
    fn from_target(target: &str) -> Self {
        match target {
            t if t.contains("::api") || t.contains("::router") || t.contains("::handlers") => {
                LogSource::Webhook
            }
            t if t.contains("::stage") => LogSource::Staging,
            t if t.contains("::builder") || t.contains("::runner") => LogSource::Build,
            t if t.contains("::github") => LogSource::GitHub,
            _ => LogSource::System,
        }
    }
}

pub struct FileLogger {
    log_directory: PathBuf,
    max_files: usize,
    rotation: Rotation,
}

impl FileLogger {
    pub fn new(log_directory: impl Into<PathBuf>) -> Self {
        Self {
            log_directory: log_directory.into(),
            max_files: DEFAULT_MAX_LOG_FILES,
            rotation: Rotation::DAILY,
        }
    }

    pub fn setup_file_logging(&self) -> Result<(NonBlocking, WorkerGuard)> {
        std::fs::create_dir_all(&self.log_directory).map_err(|e| {
            BuilderError::ConfigError(format!(
                "Failed to create log directory '{}': {}",
                self.log_directory.display(),
                e
            ))
        })?;

        let file_appender = RollingFileAppender::builder()
            .rotation(self.rotation.clone())
            .filename_prefix(LOG_FILE_PREFIX)
            .max_log_files(self.max_files)
            .build(&self.log_directory)
            .map_err(|e| BuilderError::ConfigError(format!("Failed to open log file: {}", e)))?;

        Ok(tracing_appender::non_blocking(file_appender))
    }
}

/// Recent log entries kept in memory, bounded by total size
#[derive(Clone)]
pub struct LogBuffer {
    inner: Arc<Mutex<BufferInner>>,
}

struct BufferInner {
    logs: VecDeque<LogEntry>,
    total_size: usize,
    max_total_size: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(MAX_LOG_MEMORY_BYTES)
    }
}

impl LogBuffer {
    pub fn new(max_total_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BufferInner {
                logs: VecDeque::new(),
                total_size: 0,
                max_total_size,
            })),
        }
    }

    pub fn push(&self, entry: LogEntry) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        let entry_size = entry.size();
        if entry_size > inner.max_total_size {
            return;
        }

        // Drop oldest entries until the new one fits
        while inner.total_size + entry_size > inner.max_total_size {
            match inner.logs.pop_front() {
                Some(old) => inner.total_size -= old.size(),
                None => break,
            }
        }
        inner.total_size += entry_size;
        inner.logs.push_back(entry);
    }

    /// Up to `limit` of the newest entries, oldest first
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        match self.inner.lock() {
            Ok(inner) => {
                let skip = inner.logs.len().saturating_sub(limit);
                inner.logs.iter().skip(skip).cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.logs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, event: &Event<'_>, metadata: &Metadata<'_>) {
        let mut visitor = LogEntryVisitor::default();
        event.record(&mut visitor);

        self.push(LogEntry {
            timestamp: Utc::now(),
            level: metadata.level().to_string(),
            source: LogSource::from_target(metadata.target()),
            message: visitor.finish(),
        });
    }
}

/// Collects the message and any extra fields of an event into one line
#[derive(Default)]
struct LogEntryVisitor {
    message: String,
    fields: Vec<String>,
}

impl LogEntryVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{} {}", self.message, self.fields.join(" "))
        }
    }
}

impl tracing::field::Visit for LogEntryVisitor {
    fn record_str(&mut self, field: &tracing_core::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &tracing_core::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

/// Tracing layer feeding a `LogBuffer`
#[derive(Clone, Default)]
pub struct LogBufferLayer {
    buffer: LogBuffer,
}

impl LogBufferLayer {
    pub fn new(buffer: LogBuffer) -> Self {
        Self { buffer }
    }

    pub fn buffer(&self) -> LogBuffer {
        self.buffer.clone()
    }
}

impl<S: Subscriber> Layer<S> for LogBufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        self.buffer.record(event, event.metadata());
    }
}

/// Install the global subscriber: console, optional rolling file, and the
/// in-memory buffer served on `GET /?logs=true`.
///
/// Keep the returned guard alive for as long as file logs should be flushed.
pub fn setup_logging(log_dir: Option<&Path>) -> Result<(LogBuffer, Option<WorkerGuard>)> {
    let buffer_layer = LogBufferLayer::default();
    let buffer = buffer_layer.buffer();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let (writer, guard) = FileLogger::new(dir).setup_file_logging()?;
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false); // Disable ANSI colors for file logs
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(buffer_layer)
        .with(tracing_subscriber::fmt::layer()) // Console output
        .with(file_layer)
        .try_init()
        .map_err(|e| BuilderError::ConfigError(format!("Failed to install logger: {}", e)))?;

    Ok((buffer, guard))
}
