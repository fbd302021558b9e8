// src/report/mod.rs

//! Metrics and the structured run report
//!
//! The transaction counts what happened to each resource, accumulates
//! wall-clock seconds per resource kind, and captures engine log messages
//! while its sink is open. `Report` is the caller-facing summary; how it is
//! serialized or shipped is the caller's business.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Severity of a captured log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Err,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Notice => "notice",
            LogLevel::Warning => "warning",
            LogLevel::Err => "err",
        };
        write!(f, "{name}")
    }
}

/// One log message captured while the report sink was open
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    /// Reference of the resource the message concerns, if any
    pub source: Option<String>,
    pub message: String,
    pub time: DateTime<Utc>,
}

/// A named group of numeric report values
#[derive(Debug, Clone, Serialize)]
pub struct Metric {
    pub name: String,
    pub values: BTreeMap<String, f64>,
}

impl Metric {
    /// Look up a single value
    pub fn value(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }
}

/// Per-resource outcome counters for one transaction run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceMetrics {
    /// Resources in the evaluation order
    pub total: u64,
    /// Resources that produced at least one change
    pub out_of_sync: u64,
    /// Changes that applied and produced an event
    pub applied: u64,
    /// Resources skipped because a dependency failed
    pub skipped: u64,
    /// Trigger callbacks that completed
    pub restarted: u64,
    /// Trigger callbacks that raised
    pub failed_restarts: u64,
    /// Resources that passed the tag and schedule filters
    pub scheduled: u64,
    /// Resources with a positive failure count
    pub failed: u64,
}

impl ResourceMetrics {
    /// Flatten into report values
    pub fn values(&self) -> BTreeMap<String, f64> {
        let mut values = BTreeMap::new();
        values.insert("total".to_string(), self.total as f64);
        values.insert("out_of_sync".to_string(), self.out_of_sync as f64);
        values.insert("applied".to_string(), self.applied as f64);
        values.insert("skipped".to_string(), self.skipped as f64);
        values.insert("restarted".to_string(), self.restarted as f64);
        values.insert("failed_restarts".to_string(), self.failed_restarts as f64);
        values.insert("scheduled".to_string(), self.scheduled as f64);
        values.insert("failed".to_string(), self.failed as f64);
        values
    }
}

/// Structured summary of one transaction run
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// Id of the transaction that produced this report
    pub transaction: Uuid,
    /// Wall-clock stamp set when the report is generated
    pub time: DateTime<Utc>,
    /// Metric groups keyed by name: `resources`, `time`, `changes`
    pub metrics: BTreeMap<String, Metric>,
    /// Log messages captured while the sink was open
    pub logs: Vec<LogEntry>,
    #[serde(skip)]
    sink_open: bool,
}

impl Report {
    pub(crate) fn new(transaction: Uuid) -> Self {
        Self {
            transaction,
            time: Utc::now(),
            metrics: BTreeMap::new(),
            logs: Vec::new(),
            sink_open: false,
        }
    }

    /// Record a metric group, replacing any previous one with the name
    pub fn new_metric(&mut self, name: &str, values: BTreeMap<String, f64>) {
        self.metrics.insert(
            name.to_string(),
            Metric {
                name: name.to_string(),
                values,
            },
        );
    }

    /// Look up a metric group
    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.get(name)
    }

    /// Stamp the report with a generation time
    pub fn set_time(&mut self, time: DateTime<Utc>) {
        self.time = time;
    }

    /// Start capturing log entries
    pub(crate) fn open_sink(&mut self) {
        self.sink_open = true;
    }

    /// Stop capturing log entries
    pub(crate) fn close_sink(&mut self) {
        self.sink_open = false;
    }

    /// Append a log entry; dropped while the sink is closed
    pub(crate) fn log(&mut self, entry: LogEntry) {
        if self.sink_open {
            self.logs.push(entry);
        }
    }

    /// Captured log entries
    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    /// Whether any resource failed
    pub fn failed(&self) -> bool {
        self.metric("resources")
            .and_then(|m| m.value("failed"))
            .is_some_and(|failed| failed > 0.0)
    }

    /// Whether the run recorded any change
    pub fn changed(&self) -> bool {
        self.metric("changes")
            .and_then(|m| m.value("total"))
            .is_some_and(|total| total > 0.0)
    }
}
