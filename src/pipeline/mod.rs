//! Acquisition Pipeline Module
//!
//! ```text
//! FleetOrchestrator
//!   └─ supervise(device) ── respawn on panic
//!        └─ DeviceWorker
//!             ├─ DeviceSession.read ──> MovementEventDetector ──> KpiCalculator ─┐
//!             └─ FaultTracker (fault block + reset marker) ─────────────────────┤
//!                                                                               v
//!                 SinkDispatcher: durable log (awaited), then time-series queue
//!                                                   └─> writer task (single consumer)
//!
//! every worker ── EngineEvent ──> EventLog (single consumer, tracing output)
//! ```

pub mod clock;
pub mod dispatcher;
pub mod events;
pub mod orchestrator;
pub mod worker;

pub use clock::{Clock, SystemClock, TokioClock};
pub use dispatcher::{SinkDispatcher, TimeSeriesStats, TimeSeriesStatus};
pub use events::{event_channel, EngineEvent, EventLog, EventLogStats, EventPublisher};
pub use orchestrator::{DeviceSummary, FleetOrchestrator, FleetReport};
pub use worker::{reconnect_delay, DeviceWorker, WorkerReport, WorkerSettings};
