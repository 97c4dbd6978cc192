//! System-wide default constants.
//!
//! Field-proven values from the crane deployment. Config defaults, the
//! simulator and the runner all read from here.

// ============================================================================
// Polling
// ============================================================================

/// Commanded speed magnitude that starts and stops a movement event.
pub const SPEED_THRESHOLD: i16 = 50;

/// Poll period while the crane is idle (seconds).
pub const IDLE_POLL_PERIOD_SECS: f64 = 0.5;

/// Poll period while a movement is being recorded (seconds). 0.1 = 10 Hz.
pub const ACTIVE_POLL_PERIOD_SECS: f64 = 0.1;

/// Events this short or shorter are discarded (seconds).
pub const MIN_EVENT_DURATION_SECS: f64 = 1.0;

/// Sample cap per movement event: 30 minutes at the active poll rate.
pub const MAX_EVENT_SAMPLES: usize = 18_000;

// ============================================================================
// Connection
// ============================================================================

/// Deadline for establishing a controller session (seconds).
pub const CONNECT_TIMEOUT_SECS: f64 = 5.0;

/// Deadline for a single block read (seconds).
pub const READ_TIMEOUT_SECS: f64 = 2.0;

/// Delay before reconnecting after a connection or read failure (seconds).
pub const RECONNECT_DELAY_SECS: f64 = 5.0;

/// Upper bound for the reconnect delay when backoff grows (seconds).
///
/// Equal to `RECONNECT_DELAY_SECS` by default, i.e. a fixed delay.
pub const MAX_RECONNECT_DELAY_SECS: f64 = 5.0;

/// Settle time after a successful connect before the first read (seconds).
pub const POST_CONNECT_DELAY_SECS: f64 = 1.0;

// ============================================================================
// Register map
// ============================================================================

/// Data block holding the drive speeds and payload weight.
pub const DRIVE_DB: u16 = 57;

/// Commanded (order) speed, DB57.DBW8.
pub const ORDER_SPEED_BYTE: u32 = 8;

/// Feedback speed, DB57.DBW10.
pub const FEEDBACK_SPEED_BYTE: u32 = 10;

/// Payload weight, DB57.DBW48.
pub const WEIGHT_BYTE: u32 = 48;

/// Data block holding the spreader load-lock state.
pub const LOAD_LOCK_DB: u16 = 58;

/// Load-lock (twistlock locked) bit, DB58.DBX185.1.
pub const LOAD_LOCK_BYTE: u32 = 185;
pub const LOAD_LOCK_BIT: u8 = 1;

// ============================================================================
// Faults
// ============================================================================

/// Data block holding the fault bits.
pub const FAULT_DB: u16 = 59;

/// Operator reset push-button, M103.2.
pub const RESET_MARKER_BYTE: u32 = 103;
pub const RESET_MARKER_BIT: u8 = 2;

/// Largest fault block span the tracker will read in one request (bytes).
pub const MAX_FAULT_BLOCK_SPAN: u32 = 512;

// ============================================================================
// Sinks
// ============================================================================

pub const DATA_DIR: &str = "./data";
pub const MOVEMENT_LOG_FILE: &str = "crane_kpi_log.csv";
pub const FAULT_LOG_FILE: &str = "crane_fault_log.csv";

pub const INFLUX_URL: &str = "http://localhost:8086";
pub const INFLUX_ORG: &str = "myorg";
pub const INFLUX_BUCKET: &str = "cranepdm_kpis";

/// HTTP timeout for a single time-series write (seconds).
pub const INFLUX_TIMEOUT_SECS: f64 = 10.0;

/// Records queued for the time-series writer before new ones are dropped.
pub const TIMESERIES_QUEUE_CAPACITY: usize = 4_096;

/// How long shutdown waits for queued time-series writes (seconds).
pub const TIMESERIES_DRAIN_SECS: f64 = 5.0;

// ============================================================================
// Runtime
// ============================================================================

/// Engine event channel capacity. Events beyond this are dropped and counted.
pub const EVENT_CHANNEL_CAPACITY: usize = 1_024;

/// Tick of the built-in crane simulator (seconds).
pub const SIMULATOR_TICK_SECS: f64 = 0.05;

/// Number of simulated cranes when no devices are configured.
pub const SIMULATED_CRANE_COUNT: usize = 2;
