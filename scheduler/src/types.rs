use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crawlq_core::error::{Error, Result};

/// Default broker endpoint
pub const DEFAULT_BROKER_URL: &str = "redis://127.0.0.1/";

/// Queue backend strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// In-memory, insertion order
    MemoryFifo,
    /// In-memory, reverse insertion order
    MemoryLifo,
    /// Job directory, insertion order
    DiskFifo,
    /// Job directory, reverse insertion order
    DiskLifo,
    /// Named queue on a message broker
    Broker,
}

impl QueueKind {
    /// Setting value naming this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::MemoryFifo => "memory_fifo",
            QueueKind::MemoryLifo => "memory_lifo",
            QueueKind::DiskFifo => "disk_fifo",
            QueueKind::DiskLifo => "disk_lifo",
            QueueKind::Broker => "broker",
        }
    }

    /// Label used in stats keys
    pub fn backend_label(&self) -> &'static str {
        match self {
            QueueKind::MemoryFifo | QueueKind::MemoryLifo => "memory",
            QueueKind::DiskFifo | QueueKind::DiskLifo => "disk",
            QueueKind::Broker => "broker",
        }
    }

    /// Whether requests are stored as encoded records
    pub fn is_serialized(&self) -> bool {
        !matches!(self, QueueKind::MemoryFifo | QueueKind::MemoryLifo)
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory_fifo" | "fifo" => Ok(QueueKind::MemoryFifo),
            "memory_lifo" | "lifo" => Ok(QueueKind::MemoryLifo),
            "disk_fifo" => Ok(QueueKind::DiskFifo),
            "disk_lifo" => Ok(QueueKind::DiskLifo),
            "broker" | "redis" => Ok(QueueKind::Broker),
            other => Err(Error::config(format!("Unknown queue kind: {}", other))),
        }
    }
}

/// Configuration for schedulers
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// The queue backend to use
    pub queue: QueueKind,
    /// Job directory for disk queues and the persisted seen-set
    pub jobdir: Option<PathBuf>,
    /// Keep one sub-queue per request priority (memory and disk queues only)
    pub priority: bool,
    /// Broker endpoint
    pub broker_url: String,
    /// Queue name overriding the one derived from the crawl context
    pub queue_name: Option<String>,
    /// Route records to a queue named after their callback's module
    pub route_by_callback: bool,
    /// Log every filtered duplicate instead of the first one only
    pub dupefilter_debug: bool,
    /// Header names that take part in request fingerprints
    pub include_headers: Vec<String>,
    /// Log requests that cannot be encoded for a serialized queue
    pub log_unserializable: bool,
}

impl SchedulerConfig {
    /// Default configuration for a job directory: disk FIFO queue
    pub fn with_jobdir<P: Into<PathBuf>>(jobdir: P) -> Self {
        Self {
            queue: QueueKind::DiskFifo,
            jobdir: Some(jobdir.into()),
            ..Self::default()
        }
    }

    /// Check that the chosen backend has what it needs
    pub fn validate(&self) -> Result<()> {
        match self.queue {
            QueueKind::DiskFifo | QueueKind::DiskLifo if self.jobdir.is_none() => Err(
                Error::config(format!("Queue kind {} requires a job directory", self.queue)),
            ),
            QueueKind::Broker if self.broker_url.trim().is_empty() => {
                Err(Error::config("Queue kind broker requires a broker URL"))
            }
            _ => Ok(()),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue: QueueKind::MemoryFifo,
            jobdir: None,
            priority: true,
            broker_url: DEFAULT_BROKER_URL.to_string(),
            queue_name: None,
            route_by_callback: false,
            dupefilter_debug: false,
            include_headers: Vec::new(),
            log_unserializable: false,
        }
    }
}
