//! Activity log
//!
//! User-facing, append-only record of what each cycle did. Lines are
//! timestamped by [`ActivityLog`] before they reach a [`LogSink`], and
//! every line is mirrored to `tracing`. Debug lines only reach the sink
//! when debugging is enabled in the settings.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Error,
    Debug,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Error => "error",
            LogLevel::Debug => "debug",
        }
    }
}

/// Destination for activity log lines
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn append(&self, line: &str, level: LogLevel) -> Result<()>;
}

/// Format a message the way it is stored: `[YYYY-MM-DD HH:MM:SS] message`
pub fn timestamped(at: DateTime<Local>, message: &str) -> String {
    format!("[{}] {}", at.format("%Y-%m-%d %H:%M:%S"), message)
}

/// Caller-side handle used by the engine to write the activity log
#[derive(Clone)]
pub struct ActivityLog {
    sink: Arc<dyn LogSink>,
    debug_enabled: bool,
}

impl ActivityLog {
    pub fn new(sink: Arc<dyn LogSink>, debug_enabled: bool) -> Self {
        Self {
            sink,
            debug_enabled,
        }
    }

    pub async fn info(&self, message: &str) {
        tracing::info!(target: "activity", "{}", message);
        self.emit(LogLevel::Info, message).await;
    }

    pub async fn error(&self, message: &str) {
        tracing::error!(target: "activity", "{}", message);
        self.emit(LogLevel::Error, message).await;
    }

    pub async fn debug(&self, message: &str) {
        tracing::debug!(target: "activity", "{}", message);
        if self.debug_enabled {
            self.emit(LogLevel::Debug, message).await;
        }
    }

    // A broken sink must never fail a cycle
    async fn emit(&self, level: LogLevel, message: &str) {
        let line = timestamped(Local::now(), message);
        if let Err(e) = self.sink.append(&line, level).await {
            tracing::warn!("Failed to append to activity log: {}", e);
        }
    }
}

/// Appends lines to a file, oldest first
pub struct FileLogSink {
    path: PathBuf,
    // Serializes appends from concurrent writers
    lock: Mutex<()>,
}

impl FileLogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LogSink for FileLogSink {
    async fn append(&self, line: &str, level: LogLevel) -> Result<()> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{:<5} {}\n", level.as_str(), line).as_bytes())
            .await?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps lines in memory
#[derive(Clone, Default)]
pub struct MemoryLogSink {
    lines: Arc<Mutex<Vec<(LogLevel, String)>>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines at `level` with the timestamp prefix removed
    pub async fn messages(&self, level: LogLevel) -> Vec<String> {
        self.lines
            .lock()
            .await
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| strip_timestamp(line).to_string())
            .collect()
    }
}

#[async_trait]
impl LogSink for MemoryLogSink {
    async fn append(&self, line: &str, level: LogLevel) -> Result<()> {
        self.lines.lock().await.push((level, line.to_string()));
        Ok(())
    }
}

fn strip_timestamp(line: &str) -> &str {
    match line.find("] ") {
        Some(idx) if line.starts_with('[') => &line[idx + 2..],
        _ => line,
    }
}
