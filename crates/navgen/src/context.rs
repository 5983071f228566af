//! Diagnostics reported by the build entry points.
//!
//! Algorithms log recoverable anomalies through [`tracing`]. The entry points in
//! [`main_api`](crate::main_api) additionally report every failed stage to a caller-supplied
//! [`LogSink`].

use std::fmt;

/// The severity of a [`LogRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum LogCategory {
    /// A build stage finished.
    Progress,
    /// Something unexpected happened, but the build continues.
    Warning,
    /// A build stage failed.
    Error,
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogCategory::Progress => "progress",
            LogCategory::Warning => "warning",
            LogCategory::Error => "error",
        };
        f.write_str(name)
    }
}

/// Accepts log records from the build pipeline.
///
/// Implemented for any `FnMut(LogCategory, &str)`.
pub trait LogSink {
    /// Records a single message.
    fn log(&mut self, category: LogCategory, message: &str);
}

impl<F> LogSink for F
where
    F: FnMut(LogCategory, &str),
{
    fn log(&mut self, category: LogCategory, message: &str) {
        self(category, message)
    }
}

/// Forwards records to [`tracing`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl LogSink for TracingLog {
    fn log(&mut self, category: LogCategory, message: &str) {
        match category {
            LogCategory::Progress => tracing::debug!("{message}"),
            LogCategory::Warning => tracing::warn!("{message}"),
            LogCategory::Error => tracing::error!("{message}"),
        }
    }
}

/// A single message passed to a [`LogSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct LogRecord {
    /// The severity
    pub category: LogCategory,
    /// The message
    pub message: String,
}

/// Keeps every record in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferedLog {
    /// The records in the order they were logged.
    pub records: Vec<LogRecord>,
}

impl BufferedLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// The records of the given category.
    pub fn of(&self, category: LogCategory) -> impl Iterator<Item = &LogRecord> {
        self.records.iter().filter(move |r| r.category == category)
    }

    /// Removes all records.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl LogSink for BufferedLog {
    fn log(&mut self, category: LogCategory, message: &str) {
        self.records.push(LogRecord {
            category,
            message: message.to_owned(),
        });
    }
}
