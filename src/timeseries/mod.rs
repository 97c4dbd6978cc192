//! Time-series export
//!
//! Secondary persistence for dashboards. Failures here never affect the
//! durable log.

pub mod influx;
pub mod line_protocol;

pub use influx::InfluxWriter;
pub use line_protocol::{FieldValue, Point};

use crate::storage::SinkError;
use crate::types::TelemetryRecord;
use async_trait::async_trait;

/// Writer for time-series points.
#[async_trait]
pub trait TimeSeriesSink: Send + 'static {
    async fn write(&mut self, record: &TelemetryRecord) -> Result<(), SinkError>;

    /// Human-readable name for logging (e.g. "influxdb").
    fn sink_name(&self) -> &str;
}
