//! gantry-edge: Gantry Crane Edge Telemetry
//!
//! Polls crane controllers, scores each movement with kinematic health indices
//! and records fault occurrences with downtime.
//!
//! ## Architecture
//!
//! - **Acquisition**: per-crane register sessions with bounded connects/reads
//! - **Detection**: movement state machine, poll cadence, fault bit tracking
//! - **Kinematics**: pure KPI calculation over a buffered movement
//! - **Storage / Time-series**: CSV durable log first, InfluxDB second
//! - **Pipeline**: one supervised worker per crane, shared sink dispatcher

pub mod acquisition;
pub mod config;
pub mod detection;
pub mod kinematics;
pub mod pipeline;
pub mod simulation;
pub mod storage;
pub mod timeseries;
pub mod types;

// Re-export configuration
pub use config::{ConfigError, DeviceConfig, EdgeConfig};

// Re-export commonly used types
pub use types::{
    FaultDefinition, FaultEvent, FaultKind, KpiRecord, LoadState, MovementEvent, MovementRecord,
    ResetMarker, Sample, SampleReading, TelemetryRecord,
};

// Re-export acquisition seams
pub use acquisition::{ClientFactory, DeviceSession, RegisterClient, RegisterError};

// Re-export the engine
pub use pipeline::{FleetOrchestrator, FleetReport, SinkDispatcher, WorkerSettings};

// Re-export sinks
pub use storage::{CsvEventLog, DurableLogSink, SinkError};
pub use timeseries::{InfluxWriter, TimeSeriesSink};
