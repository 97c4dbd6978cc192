//! Per-crane worker loop
//!
//! ```text
//!   ensure connected ──fail──> backoff ──┐
//!        │ ok                            │
//!        v                               │
//!   poll cycle (order | full sample) ────┤ read error: abort event,
//!        │                               │ disconnect, backoff
//!   fault poll (block + reset marker) ───┘
//!        │
//!   sleep(next_delay(mode, elapsed))
//! ```
//!
//! The worker owns its session, detector and fault state outright. The only
//! shared resource is the [`SinkDispatcher`], which never makes the worker
//! wait on the time-series endpoint. Cancellation is checked at every
//! cycle boundary and interrupts backoff and poll sleeps.

use super::clock::Clock;
use super::dispatcher::SinkDispatcher;
use super::events::{EngineEvent, EventPublisher};
use crate::acquisition::{DeviceSession, RegisterAddress, RegisterClient, RegisterError, SessionStats};
use crate::config::{defaults, EdgeConfig, RegisterMap};
use crate::detection::{DetectorStep, FaultState, FaultTracker, MovementEventDetector, PollScheduler};
use crate::kinematics::{evaluate_event, EventVerdict};
use crate::types::{FaultDefinition, MovementEvent, MovementRecord, ResetMarker, SampleReading, TelemetryRecord};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Settings
// ============================================================================

/// Runtime parameters shared by every worker, resolved once from config.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub speed_threshold: i16,
    pub scheduler: PollScheduler,
    pub min_event_duration_secs: f64,
    /// Samples after which a still-running event is aborted
    pub max_event_samples: usize,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub post_connect_delay: Duration,
    pub registers: RegisterMap,
    pub fault_db: u16,
    pub fault_definitions: Vec<FaultDefinition>,
    pub reset_marker: RegisterAddress,
    /// Minimum spacing of fault block reads; zero polls every cycle
    pub fault_interval: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &EdgeConfig) -> Self {
        let p = &config.polling;
        let c = &config.connection;
        let reconnect_delay = secs(c.reconnect_delay_secs, defaults::RECONNECT_DELAY_SECS);

        Self {
            speed_threshold: p.speed_threshold,
            scheduler: PollScheduler::new(
                secs(p.idle_period_secs, defaults::IDLE_POLL_PERIOD_SECS),
                secs(p.active_period_secs, defaults::ACTIVE_POLL_PERIOD_SECS),
            ),
            min_event_duration_secs: p.min_event_duration_secs,
            max_event_samples: p.max_event_samples,
            connect_timeout: secs(c.connect_timeout_secs, defaults::CONNECT_TIMEOUT_SECS),
            read_timeout: secs(c.read_timeout_secs, defaults::READ_TIMEOUT_SECS),
            reconnect_delay,
            max_reconnect_delay: secs(c.max_reconnect_delay_secs, defaults::MAX_RECONNECT_DELAY_SECS)
                .max(reconnect_delay),
            post_connect_delay: secs(c.post_connect_delay_secs, defaults::POST_CONNECT_DELAY_SECS),
            registers: config.registers.clone(),
            fault_db: config.faults.db,
            fault_definitions: config.faults.definitions.clone(),
            reset_marker: config.faults.reset_marker,
            fault_interval: secs(config.faults.min_interval_secs, 0.0),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&EdgeConfig::default())
    }
}

/// Seconds from config to a `Duration`, falling back on negative or
/// non-finite input.
fn secs(value: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(value)
        .or_else(|_| Duration::try_from_secs_f64(fallback))
        .unwrap_or_default()
}

/// Delay before connect attempt `attempt + 1`: doubles from `base` per
/// consecutive failure, capped at `max`.
pub fn reconnect_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent).min(max.max(base))
}

/// Sleep for `delay`. Returns `false` if `cancel` fired first.
pub async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

// ============================================================================
// Report
// ============================================================================

/// Final per-worker statistics, logged at shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub device: String,
    pub session: SessionStats,
    /// Completed poll cycles
    pub cycles: u64,
    pub movements_logged: u64,
    pub events_discarded: u64,
    pub events_aborted: u64,
    pub fault_events: u64,
    pub durable_failures: u64,
    /// Records the time-series queue turned away
    pub timeseries_dropped: u64,
    /// Established sessions that failed mid-read
    pub sessions_lost: u64,
}

// ============================================================================
// Worker
// ============================================================================

pub struct DeviceWorker<C: RegisterClient> {
    session: DeviceSession<C>,
    settings: Arc<WorkerSettings>,
    detector: MovementEventDetector,
    fault_tracker: FaultTracker,
    fault_state: FaultState,
    dispatcher: Arc<SinkDispatcher>,
    events: EventPublisher,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    report: WorkerReport,
    last_fault_poll: Option<Instant>,
}

impl<C: RegisterClient> DeviceWorker<C> {
    pub fn new(
        session: DeviceSession<C>,
        settings: Arc<WorkerSettings>,
        dispatcher: Arc<SinkDispatcher>,
        events: EventPublisher,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        let report = WorkerReport {
            device: session.device_id().to_string(),
            ..WorkerReport::default()
        };
        Self {
            detector: MovementEventDetector::new(settings.speed_threshold).with_max_samples(settings.max_event_samples),
            fault_tracker: FaultTracker::new(settings.fault_db, settings.fault_definitions.clone()),
            fault_state: FaultState::new(),
            session,
            settings,
            dispatcher,
            events,
            clock,
            cancel,
            report,
            last_fault_poll: None,
        }
    }

    fn device_id(&self) -> String {
        self.session.device_id().to_string()
    }

    /// Run until cancelled. Returns the final report.
    pub async fn run(mut self) -> WorkerReport {
        self.events.publish(EngineEvent::WorkerStarted {
            device: self.device_id(),
            address: self.session.device().address.clone(),
            client: self.session.client_name().to_string(),
        });

        let mut attempt: u32 = 0;

        while !self.cancel.is_cancelled() {
            if !self.session.is_connected() {
                attempt += 1;
                match self.connect(attempt).await {
                    Ok(()) => {
                        attempt = 0;
                        if !sleep_or_cancel(&self.cancel, self.settings.post_connect_delay).await {
                            break;
                        }
                    }
                    Err(delay) => {
                        if !sleep_or_cancel(&self.cancel, delay).await {
                            break;
                        }
                    }
                }
                continue;
            }

            let cycle_start = Instant::now();
            if let Err(e) = self.poll_cycle().await {
                let delay = self.handle_session_error(e).await;
                if !sleep_or_cancel(&self.cancel, delay).await {
                    break;
                }
                continue;
            }
            self.report.cycles += 1;

            let delay = self
                .settings
                .scheduler
                .next_delay(self.detector.mode(), cycle_start.elapsed());
            if !sleep_or_cancel(&self.cancel, delay).await {
                break;
            }
        }

        self.shutdown().await
    }

    /// One connect attempt. On failure returns the backoff before the next.
    async fn connect(&mut self, attempt: u32) -> Result<(), Duration> {
        self.events.publish(EngineEvent::Connecting {
            device: self.device_id(),
            address: self.session.device().address.clone(),
            attempt,
        });

        match self.session.connect().await {
            Ok(()) => {
                self.events.publish(EngineEvent::Connected {
                    device: self.device_id(),
                    attempt,
                });
                Ok(())
            }
            Err(e) => {
                let delay = reconnect_delay(
                    self.settings.reconnect_delay,
                    self.settings.max_reconnect_delay,
                    attempt,
                );
                self.events.publish(EngineEvent::ConnectFailed {
                    device: self.device_id(),
                    attempt,
                    error: e.to_string(),
                    retry_in: delay,
                });
                Err(delay)
            }
        }
    }

    /// Movement read for this cycle, then the fault poll if due.
    async fn poll_cycle(&mut self) -> Result<(), RegisterError> {
        if self.detector.is_recording() {
            self.record_sample().await?;
        } else {
            self.check_for_motion().await?;
        }
        self.poll_faults().await
    }

    async fn check_for_motion(&mut self) -> Result<(), RegisterError> {
        let order_speed = self.session.read_int(&self.settings.registers.order_speed).await?;
        let now = self.clock.now();

        if let DetectorStep::Started { order_speed } = self.detector.observe_order(order_speed, now) {
            self.events.publish(EngineEvent::MovementStarted {
                device: self.device_id(),
                order_speed,
            });
        }
        Ok(())
    }

    async fn record_sample(&mut self) -> Result<(), RegisterError> {
        let regs = &self.settings.registers;
        let order_speed = self.session.read_int(&regs.order_speed).await?;
        let feedback_speed = self.session.read_int(&regs.feedback_speed).await?;
        let is_loaded = self.session.read_bit(&regs.load_lock).await?;
        let weight = self.session.read_int(&regs.weight).await?;
        let now = self.clock.now();

        let reading = SampleReading {
            order_speed,
            feedback_speed,
            is_loaded,
            weight,
        };
        match self.detector.record(reading, now) {
            DetectorStep::Completed(event) => {
                self.events.publish(EngineEvent::MovementStopped {
                    device: self.device_id(),
                    samples: event.len(),
                    duration_secs: event.duration_secs(),
                });
                self.finish_event(event).await;
            }
            DetectorStep::Overflowed { samples } => {
                self.report.events_aborted += 1;
                self.events.publish(EngineEvent::MovementAborted {
                    device: self.device_id(),
                    samples,
                    reason: format!("sample limit ({}) reached", self.settings.max_event_samples),
                });
            }
            DetectorStep::Idle | DetectorStep::Started { .. } | DetectorStep::Recording { .. } => {}
        }
        Ok(())
    }

    async fn finish_event(&mut self, event: MovementEvent) {
        match evaluate_event(&event, self.settings.min_event_duration_secs) {
            EventVerdict::Accepted(kpi) => {
                let record = MovementRecord {
                    timestamp: event.ended_at(),
                    device_id: self.device_id(),
                    kpi,
                };
                if self.emit(record.into()).await {
                    self.report.movements_logged += 1;
                }
            }
            EventVerdict::TooFewSamples(samples) => {
                self.report.events_discarded += 1;
                self.events.publish(EngineEvent::EventDiscarded {
                    device: self.device_id(),
                    samples,
                    duration_secs: event.duration_secs(),
                });
            }
            EventVerdict::TooShort { duration_secs, samples } => {
                self.report.events_discarded += 1;
                self.events.publish(EngineEvent::EventDiscarded {
                    device: self.device_id(),
                    samples,
                    duration_secs,
                });
            }
        }
    }

    fn fault_poll_due(&self) -> bool {
        self.last_fault_poll
            .map_or(true, |last| last.elapsed() >= self.settings.fault_interval)
    }

    /// Read the fault block and reset marker, then emit any transitions.
    async fn poll_faults(&mut self) -> Result<(), RegisterError> {
        let Some((block, offset, length)) = self.fault_tracker.block_read() else {
            return Ok(());
        };
        if !self.fault_poll_due() {
            return Ok(());
        }
        self.last_fault_poll = Some(Instant::now());

        let data = self.session.read_block(block, offset, length).await?;

        let marker = match self.session.read_bit(&self.settings.reset_marker).await {
            Ok(true) => ResetMarker::Pressed,
            Ok(false) => ResetMarker::NotPressed,
            Err(e) => {
                self.events.publish(EngineEvent::MarkerUnavailable {
                    device: self.device_id(),
                    error: e.to_string(),
                });
                ResetMarker::Unknown
            }
        };

        let device_id = self.device_id();
        let now = self.clock.now();
        let transitions = self
            .fault_tracker
            .update(&mut self.fault_state, &data, marker, &device_id, now);

        for event in transitions {
            if self.emit(event.into()).await {
                self.report.fault_events += 1;
            }
        }
        Ok(())
    }

    /// Hand a record to the dispatcher. Returns whether the durable write
    /// succeeded.
    async fn emit(&mut self, record: TelemetryRecord) -> bool {
        match self.dispatcher.emit(&record).await {
            Ok(timeseries) => {
                if timeseries.is_dropped() {
                    self.report.timeseries_dropped += 1;
                }
                let event = match record {
                    TelemetryRecord::Movement(record) => EngineEvent::KpiLogged { record, timeseries },
                    TelemetryRecord::Fault(event) => EngineEvent::FaultLogged { event, timeseries },
                };
                self.events.publish(event);
                true
            }
            Err(e) => {
                self.report.durable_failures += 1;
                self.events.publish(EngineEvent::DurableWriteFailed {
                    record,
                    error: e.to_string(),
                });
                false
            }
        }
    }

    /// Drop the in-progress event and tear the session down. Returns the delay
    /// before reconnecting.
    async fn handle_session_error(&mut self, error: RegisterError) -> Duration {
        self.abort_event("read failure");
        self.session.disconnect().await;
        self.report.sessions_lost += 1;

        let delay = self.settings.reconnect_delay;
        self.events.publish(EngineEvent::SessionLost {
            device: self.device_id(),
            error: error.to_string(),
            retry_in: delay,
        });
        delay
    }

    fn abort_event(&mut self, reason: &str) {
        if let Some(samples) = self.detector.abort() {
            self.report.events_aborted += 1;
            self.events.publish(EngineEvent::MovementAborted {
                device: self.device_id(),
                samples,
                reason: reason.to_string(),
            });
        }
    }

    async fn shutdown(mut self) -> WorkerReport {
        self.abort_event("shutdown");
        self.session.disconnect().await;

        self.report.session = self.session.stats().clone();
        self.events.publish(EngineEvent::WorkerStopped {
            report: self.report.clone(),
        });
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delay_fixed_by_default() {
        let base = Duration::from_secs(5);
        for attempt in 1..6 {
            assert_eq!(reconnect_delay(base, base, attempt), base);
        }
    }

    #[test]
    fn test_reconnect_delay_doubles_to_cap() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(10);
        let delays: Vec<u64> = (1..=6).map(|a| reconnect_delay(base, max, a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_reconnect_delay_never_overflows() {
        let base = Duration::from_secs(5);
        let max = Duration::from_secs(60);
        assert_eq!(reconnect_delay(base, max, u32::MAX), max);
    }

    #[test]
    fn test_settings_from_default_config() {
        let s = WorkerSettings::default();
        assert_eq!(s.speed_threshold, 50);
        assert_eq!(s.scheduler.period(crate::detection::PollMode::Idle), Duration::from_millis(500));
        assert_eq!(s.scheduler.period(crate::detection::PollMode::Active), Duration::from_millis(100));
        assert_eq!(s.reconnect_delay, Duration::from_secs(5));
        assert_eq!(s.max_reconnect_delay, Duration::from_secs(5));
        assert_eq!(s.post_connect_delay, Duration::from_secs(1));
        assert_eq!(s.fault_interval, Duration::ZERO);
        assert_eq!(s.fault_definitions.len(), 4);
    }

    #[test]
    fn test_secs_falls_back_on_bad_input() {
        assert_eq!(secs(-1.0, 2.0), Duration::from_secs(2));
        assert_eq!(secs(f64::NAN, 0.5), Duration::from_millis(500));
        assert_eq!(secs(0.25, 9.0), Duration::from_millis(250));
    }
}
