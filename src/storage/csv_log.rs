//! CSV durable log
//!
//! Two files in the data directory: one row per movement event and one row per
//! fault transition. A header row is written whenever a file is created.

use super::{DurableLogSink, SinkError};
use crate::kinematics::metrics::round_to;
use crate::types::{FaultEvent, MovementRecord, TelemetryRecord};
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub const MOVEMENT_HEADER: [&str; 11] = [
    "timestamp",
    "crane_id",
    "event_duration_s",
    "peak_order",
    "peak_feedback",
    "max_error",
    "rms_error",
    "mean_stress",
    "reducer_damage",
    "avg_weight",
    "is_loaded",
];

pub const FAULT_HEADER: [&str; 6] = [
    "timestamp",
    "crane_id",
    "fault_name",
    "event_type",
    "downtime_s",
    "was_reset_pressed",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// CSV movement and fault logs.
#[derive(Debug, Clone)]
pub struct CsvEventLog {
    movement_path: PathBuf,
    fault_path: PathBuf,
}

impl CsvEventLog {
    /// Log into `dir`, creating it if needed. Existing files are appended to.
    pub fn open(dir: &Path, movement_file: &str, fault_file: &str) -> Result<Self, SinkError> {
        std::fs::create_dir_all(dir).map_err(|e| SinkError::io(dir, e))?;
        Ok(Self {
            movement_path: dir.join(movement_file),
            fault_path: dir.join(fault_file),
        })
    }

    pub fn movement_path(&self) -> &Path {
        &self.movement_path
    }

    pub fn fault_path(&self) -> &Path {
        &self.fault_path
    }
}

#[async_trait]
impl DurableLogSink for CsvEventLog {
    async fn append(&mut self, record: &TelemetryRecord) -> Result<(), SinkError> {
        match record {
            TelemetryRecord::Movement(m) => append_row(&self.movement_path, &MOVEMENT_HEADER, &movement_row(m)).await,
            TelemetryRecord::Fault(f) => append_row(&self.fault_path, &FAULT_HEADER, &fault_row(f)).await,
        }
    }

    fn sink_name(&self) -> &str {
        "csv"
    }
}

async fn append_row(path: &Path, header: &[&str], row: &[String]) -> Result<(), SinkError> {
    let exists = tokio::fs::try_exists(path).await.unwrap_or(false);

    let mut buf = String::with_capacity(128);
    if !exists {
        buf.push_str(&header.join(","));
        buf.push('\n');
    }
    let fields: Vec<String> = row.iter().map(|f| escape_field(f)).collect();
    buf.push_str(&fields.join(","));
    buf.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| SinkError::io(path, e))?;
    file.write_all(buf.as_bytes()).await.map_err(|e| SinkError::io(path, e))?;
    file.flush().await.map_err(|e| SinkError::io(path, e))?;
    Ok(())
}

/// Local wall-clock timestamp as written to the log.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string()
}

/// Shortest float representation, always with a decimal point (`3.0`, `70.71`).
pub fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

pub fn movement_row(record: &MovementRecord) -> Vec<String> {
    let k = &record.kpi;
    vec![
        format_timestamp(record.timestamp),
        record.device_id.clone(),
        format_float(k.duration_secs),
        k.peak_order.to_string(),
        k.peak_feedback.to_string(),
        k.max_error.to_string(),
        format_float(k.rms_error),
        format_float(k.mean_stress),
        format_float(k.reducer_damage),
        format_float(k.avg_weight),
        if k.is_loaded { "1" } else { "0" }.to_string(),
    ]
}

pub fn fault_row(event: &FaultEvent) -> Vec<String> {
    vec![
        format_timestamp(event.timestamp),
        event.device_id.clone(),
        event.fault_name.clone(),
        event.kind.to_string(),
        format_float(round_to(event.downtime_secs, 1)),
        event.reset_marker.to_string(),
    ]
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
