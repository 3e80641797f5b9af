//! Request log: a bounded in-memory ring buffer mirrored to a JSONL file.
//!
//! The router holds a [`SharedLogger`] and reports through its
//! request-lifecycle hooks (`request_received`, `upstream_call`,
//! `upstream_completed`, `request_failed`). Every entry is also emitted as a
//! `tracing` event so it reaches the console subscriber.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::ProxyError;
use crate::translate::puter_types::TokenUsage;

const MAX_LOG_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.into(),
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, ctx: serde_json::Value) -> Self {
        self.context = Some(ctx);
        self
    }
}

pub struct Logger {
    entries: VecDeque<LogEntry>,
    writer: Option<BufWriter<File>>,
}

impl Logger {
    /// Open (or create) a JSONL log, replaying its tail into memory.
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref();

        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut entries = VecDeque::with_capacity(MAX_LOG_ENTRIES);

        if file_path.exists() {
            let reader = BufReader::new(File::open(file_path)?);
            for line in reader.lines().map_while(std::result::Result::ok) {
                if let Ok(entry) = serde_json::from_str::<LogEntry>(&line) {
                    if entries.len() >= MAX_LOG_ENTRIES {
                        entries.pop_front();
                    }
                    entries.push_back(entry);
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        Ok(Self {
            entries,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// A logger that keeps entries in memory only.
    pub fn in_memory() -> Self {
        Self {
            entries: VecDeque::new(),
            writer: None,
        }
    }

    pub fn log(&mut self, entry: LogEntry) {
        if let Some(ref mut writer) = self.writer {
            if let Ok(json) = serde_json::to_string(&entry) {
                let _ = writeln!(writer, "{}", json);
                let _ = writer.flush();
            }
        }
        if self.entries.len() >= MAX_LOG_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }
}

#[derive(Clone)]
pub struct SharedLogger(Arc<Mutex<Logger>>);

impl SharedLogger {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(Logger::new(file_path)?))))
    }

    pub fn in_memory() -> Self {
        Self(Arc::new(Mutex::new(Logger::in_memory())))
    }

    pub fn log(&self, entry: LogEntry) {
        match entry.level {
            LogLevel::Debug => tracing::debug!(component = %entry.component, "{}", entry.message),
            LogLevel::Info => tracing::info!(component = %entry.component, "{}", entry.message),
            LogLevel::Warn => tracing::warn!(component = %entry.component, "{}", entry.message),
            LogLevel::Error => tracing::error!(component = %entry.component, "{}", entry.message),
        }
        if let Ok(mut logger) = self.0.lock() {
            logger.log(entry);
        }
    }

    pub fn info(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Info, component, message));
    }

    pub fn warn(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Warn, component, message));
    }

    pub fn error(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Error, component, message));
    }

    pub fn debug(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Debug, component, message));
    }

    pub fn log_with_context(
        &self,
        level: LogLevel,
        component: impl Into<String>,
        message: impl Into<String>,
        context: serde_json::Value,
    ) {
        self.log(LogEntry::new(level, component, message).with_context(context));
    }

    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.0.lock().map(|l| l.recent(limit)).unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Request lifecycle hooks
    // -----------------------------------------------------------------------

    pub fn request_received(
        &self,
        route: &str,
        requested_model: Option<&str>,
        stream: bool,
        messages: usize,
    ) {
        self.log_with_context(
            LogLevel::Info,
            "server",
            format!("{route} requested_model={} stream={stream} messages={messages}", requested_model.unwrap_or("-")),
            json!({
                "route": route,
                "requested_model": requested_model,
                "stream": stream,
                "messages": messages,
            }),
        );
    }

    pub fn upstream_call(&self, model: &str, driver: &str, stream: bool) {
        self.log_with_context(
            LogLevel::Info,
            "proxy",
            format!("Calling upstream model={model} driver={driver} stream={stream}"),
            json!({ "model": model, "driver": driver, "stream": stream }),
        );
    }

    pub fn upstream_completed(&self, model: &str, usage: TokenUsage) {
        self.log_with_context(
            LogLevel::Info,
            "proxy",
            format!(
                "Completed model={model} in={} out={} tokens",
                usage.input_tokens, usage.output_tokens
            ),
            json!({
                "model": model,
                "input_tokens": usage.input_tokens,
                "output_tokens": usage.output_tokens,
            }),
        );
    }

    pub fn request_failed(&self, route: &str, err: &ProxyError) {
        let level = if err.status_code() < 500 {
            LogLevel::Warn
        } else {
            LogLevel::Error
        };
        self.log_with_context(
            level,
            "server",
            format!("{route} failed: {err}"),
            json!({
                "route": route,
                "status": err.status_code(),
                "type": err.error_type(),
            }),
        );
    }
}
