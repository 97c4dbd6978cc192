//! Durable persistence
//!
//! The durable log is the primary record of every movement KPI and fault
//! transition. It is append-only; nothing in the engine reads it back.

pub mod csv_log;
pub mod lockfile;
pub mod memory;

pub use csv_log::CsvEventLog;
pub use lockfile::ProcessLock;
pub use memory::MemorySink;

use crate::types::TelemetryRecord;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Sink write errors (durable log and time-series)
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Write rejected with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Sink rejected record: {0}")]
    Rejected(String),
}

impl SinkError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Append-only writer for movement and fault records.
#[async_trait]
pub trait DurableLogSink: Send + 'static {
    /// Append one record. An error means the record was not persisted.
    async fn append(&mut self, record: &TelemetryRecord) -> Result<(), SinkError>;

    /// Human-readable name for logging (e.g. "csv").
    fn sink_name(&self) -> &str;
}
