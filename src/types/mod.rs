//! Shared data structures for crane telemetry
//!
//! This module defines the records that flow through a device worker:
//! - `Sample` / `MovementEvent`: buffered readings while the crane moves
//! - `KpiRecord` / `MovementRecord`: kinematic health indices per movement
//! - `FaultDefinition` / `FaultEvent`: debounced fault transitions
//! - `TelemetryRecord`: what the sink layer persists

mod sample;
mod kpi;
mod fault;

pub use sample::*;
pub use kpi::*;
pub use fault::*;

use chrono::{DateTime, Utc};

/// A record handed to the sink layer for persistence.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryRecord {
    /// KPI summary of one completed movement event
    Movement(MovementRecord),
    /// Fault occurrence or resolution
    Fault(FaultEvent),
}

impl TelemetryRecord {
    pub fn device_id(&self) -> &str {
        match self {
            Self::Movement(m) => &m.device_id,
            Self::Fault(f) => &f.device_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Movement(m) => m.timestamp,
            Self::Fault(f) => f.timestamp,
        }
    }

    /// Short label for logs ("movement" / "fault").
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Movement(_) => "movement",
            Self::Fault(_) => "fault",
        }
    }
}

impl From<MovementRecord> for TelemetryRecord {
    fn from(record: MovementRecord) -> Self {
        Self::Movement(record)
    }
}

impl From<FaultEvent> for TelemetryRecord {
    fn from(event: FaultEvent) -> Self {
        Self::Fault(event)
    }
}
