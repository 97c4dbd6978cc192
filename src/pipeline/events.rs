//! Engine event channel
//!
//! Workers never write log lines for connects, movements, KPIs, faults or sink
//! failures themselves. They publish [`EngineEvent`]s on a bounded channel and a
//! single [`EventLog`] task turns them into structured `tracing` output and
//! running totals. Publishing never blocks: when the channel is full the event
//! is dropped and counted.

use super::dispatcher::TimeSeriesStatus;
use super::worker::WorkerReport;
use crate::types::{FaultEvent, MovementRecord, TelemetryRecord};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Something a device worker or the supervisor wants reported.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    WorkerStarted {
        device: String,
        address: String,
        client: String,
    },
    Connecting {
        device: String,
        address: String,
        attempt: u32,
    },
    Connected {
        device: String,
        attempt: u32,
    },
    ConnectFailed {
        device: String,
        attempt: u32,
        error: String,
        retry_in: Duration,
    },
    /// A read failed on an established session; the worker reconnects
    SessionLost {
        device: String,
        error: String,
        retry_in: Duration,
    },
    MovementStarted {
        device: String,
        order_speed: i16,
    },
    MovementStopped {
        device: String,
        samples: usize,
        duration_secs: f64,
    },
    /// In-progress event dropped without a KPI (read failure or shutdown)
    MovementAborted {
        device: String,
        samples: usize,
        reason: String,
    },
    /// Completed event too short or too sparse to score
    EventDiscarded {
        device: String,
        samples: usize,
        duration_secs: f64,
    },
    KpiLogged {
        record: MovementRecord,
        timeseries: TimeSeriesStatus,
    },
    FaultLogged {
        event: FaultEvent,
        timeseries: TimeSeriesStatus,
    },
    MarkerUnavailable {
        device: String,
        error: String,
    },
    /// Durable log append failed; the record is lost
    DurableWriteFailed {
        record: TelemetryRecord,
        error: String,
    },
    WorkerPanicked {
        device: String,
        message: String,
        restart_in: Duration,
    },
    WorkerStopped {
        report: WorkerReport,
    },
}

/// Cloneable, non-blocking sender side of the event channel.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<EngineEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventPublisher {
    /// Queue an event. Drops (and counts) it if the channel is full.
    pub fn publish(&self, event: EngineEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            // Consumer gone during shutdown
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Running totals kept by the event consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventLogStats {
    pub events: u64,
    pub connect_failures: u64,
    pub sessions_lost: u64,
    pub movements_started: u64,
    pub movements_logged: u64,
    pub movements_discarded: u64,
    pub movements_aborted: u64,
    pub faults_logged: u64,
    pub durable_failures: u64,
    /// Records the time-series queue turned away
    pub timeseries_dropped: u64,
    pub worker_panics: u64,
    /// Events lost to a full channel
    pub dropped: u64,
}

/// Single consumer of the event channel.
#[derive(Debug)]
pub struct EventLog {
    rx: mpsc::Receiver<EngineEvent>,
    dropped: Arc<AtomicU64>,
    stats: EventLogStats,
}

/// Create a bounded event channel.
pub fn event_channel(capacity: usize) -> (EventPublisher, EventLog) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        EventPublisher {
            tx,
            dropped: Arc::clone(&dropped),
        },
        EventLog {
            rx,
            dropped,
            stats: EventLogStats::default(),
        },
    )
}

impl EventLog {
    /// Consume events until every publisher is dropped.
    pub async fn run(mut self) -> EventLogStats {
        while let Some(event) = self.rx.recv().await {
            self.handle(&event);
        }
        self.stats.dropped = self.dropped.load(Ordering::Relaxed);
        if self.stats.dropped > 0 {
            warn!(dropped = self.stats.dropped, "Engine events dropped (channel full)");
        }
        self.stats
    }

    fn handle(&mut self, event: &EngineEvent) {
        let s = &mut self.stats;
        s.events += 1;

        match event {
            EngineEvent::WorkerStarted { device, address, client } => {
                info!(device = %device, address = %address, client = %client, "Monitoring crane");
            }
            EngineEvent::Connecting { device, address, attempt } => {
                info!(device = %device, address = %address, attempt, "Connecting to controller");
            }
            EngineEvent::Connected { device, attempt } => {
                info!(device = %device, attempt, "Controller connected");
            }
            EngineEvent::ConnectFailed {
                device,
                attempt,
                error,
                retry_in,
            } => {
                s.connect_failures += 1;
                warn!(
                    device = %device,
                    attempt,
                    error = %error,
                    retry_in_secs = retry_in.as_secs_f64(),
                    "Connection failed"
                );
            }
            EngineEvent::SessionLost { device, error, retry_in } => {
                s.sessions_lost += 1;
                warn!(
                    device = %device,
                    error = %error,
                    retry_in_secs = retry_in.as_secs_f64(),
                    "Read failed, reconnecting"
                );
            }
            EngineEvent::MovementStarted { device, order_speed } => {
                s.movements_started += 1;
                info!(device = %device, order_speed, "Movement started, recording");
            }
            EngineEvent::MovementStopped {
                device,
                samples,
                duration_secs,
            } => {
                info!(device = %device, samples, duration_s = duration_secs, "Movement stopped, analyzing");
            }
            EngineEvent::MovementAborted { device, samples, reason } => {
                s.movements_aborted += 1;
                warn!(device = %device, samples, reason = %reason, "Movement event aborted, no KPI");
            }
            EngineEvent::EventDiscarded {
                device,
                samples,
                duration_secs,
            } => {
                s.movements_discarded += 1;
                info!(device = %device, samples, duration_s = duration_secs, "Event too short, ignored");
            }
            EngineEvent::KpiLogged { record, timeseries } => {
                s.movements_logged += 1;
                if timeseries.is_dropped() {
                    s.timeseries_dropped += 1;
                    warn!(device = %record.device_id, "Time-series queue full, durable row kept");
                }
                let k = &record.kpi;
                info!(
                    device = %record.device_id,
                    duration_s = k.duration_secs,
                    reducer_damage = k.reducer_damage,
                    mean_stress = k.mean_stress,
                    rms_error = k.rms_error,
                    load = %k.load_state(),
                    timeseries = %timeseries,
                    "Movement logged"
                );
            }
            EngineEvent::FaultLogged { event, timeseries } => {
                s.faults_logged += 1;
                if timeseries.is_dropped() {
                    s.timeseries_dropped += 1;
                    warn!(device = %event.device_id, "Time-series queue full, durable row kept");
                }
                info!(
                    device = %event.device_id,
                    fault = %event.fault_name,
                    kind = %event.kind,
                    downtime_s = event.downtime_secs,
                    reset = %event.reset_marker,
                    timeseries = %timeseries,
                    "Fault {}",
                    event.kind
                );
            }
            EngineEvent::MarkerUnavailable { device, error } => {
                warn!(device = %device, error = %error, "Reset marker unreadable, recording as Unknown");
            }
            EngineEvent::DurableWriteFailed { record, error } => {
                s.durable_failures += 1;
                error!(
                    device = %record.device_id(),
                    kind = record.kind(),
                    error = %error,
                    "DURABLE LOG WRITE FAILED, record lost"
                );
            }
            EngineEvent::WorkerPanicked {
                device,
                message,
                restart_in,
            } => {
                s.worker_panics += 1;
                error!(
                    device = %device,
                    panic = %message,
                    restart_in_secs = restart_in.as_secs_f64(),
                    "Worker panicked, restarting"
                );
            }
            EngineEvent::WorkerStopped { report } => {
                info!(
                    device = %report.device,
                    cycles = report.cycles,
                    movements = report.movements_logged,
                    faults = report.fault_events,
                    reconnects = report.session.connects.saturating_sub(1),
                    timeouts = report.session.timeouts,
                    "Worker stopped"
                );
            }
        }
    }
}
