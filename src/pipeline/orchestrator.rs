//! Fleet orchestrator
//!
//! Spawns one supervised worker per configured crane. Each supervisor runs its
//! worker on a separate task so a panic is caught at the join point, logged,
//! and the worker is rebuilt after the reconnect delay. Workers share nothing
//! but the [`SinkDispatcher`] and the event channel.

use super::clock::Clock;
use super::dispatcher::{SinkDispatcher, TimeSeriesStats};
use super::events::{event_channel, EngineEvent, EventLogStats, EventPublisher};
use super::worker::{sleep_or_cancel, DeviceWorker, WorkerReport, WorkerSettings};
use crate::acquisition::{ClientFactory, DeviceSession};
use crate::config::{defaults, DeviceConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Outcome for one crane after shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub device: String,
    /// Report of the last worker incarnation; `None` if it panicked at
    /// shutdown
    pub report: Option<WorkerReport>,
    /// Times the worker was respawned after a panic
    pub restarts: u32,
}

/// Final statistics for the whole fleet.
#[derive(Debug, Clone, Default)]
pub struct FleetReport {
    pub devices: Vec<DeviceSummary>,
    pub events: EventLogStats,
    pub timeseries: TimeSeriesStats,
}

impl FleetReport {
    pub fn device(&self, id: &str) -> Option<&DeviceSummary> {
        self.devices.iter().find(|d| d.device == id)
    }
}

pub struct FleetOrchestrator<F: ClientFactory> {
    factory: Arc<F>,
    devices: Vec<DeviceConfig>,
    settings: Arc<WorkerSettings>,
    dispatcher: Arc<SinkDispatcher>,
    clock: Arc<dyn Clock>,
    event_capacity: usize,
    drain_grace: Duration,
}

impl<F: ClientFactory> FleetOrchestrator<F> {
    pub fn new(
        factory: Arc<F>,
        devices: Vec<DeviceConfig>,
        settings: WorkerSettings,
        dispatcher: SinkDispatcher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            factory,
            devices,
            settings: Arc::new(settings),
            dispatcher: Arc::new(dispatcher),
            clock,
            event_capacity: defaults::EVENT_CHANNEL_CAPACITY,
            drain_grace: Duration::from_secs_f64(defaults::TIMESERIES_DRAIN_SECS),
        }
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// How long shutdown waits for queued time-series writes.
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Run every worker until `cancel` fires and all of them have stopped.
    pub async fn run(self, cancel: CancellationToken) -> FleetReport {
        let (publisher, event_log) = event_channel(self.event_capacity);
        let log_task = tokio::spawn(event_log.run());

        info!(
            devices = self.devices.len(),
            durable = self.dispatcher.durable_name(),
            timeseries = self.dispatcher.timeseries_name().unwrap_or("disabled"),
            "Starting crane workers"
        );

        let mut supervisors: JoinSet<DeviceSummary> = JoinSet::new();
        for device in self.devices.iter().cloned() {
            let ctx = WorkerContext {
                factory: Arc::clone(&self.factory),
                settings: Arc::clone(&self.settings),
                dispatcher: Arc::clone(&self.dispatcher),
                clock: Arc::clone(&self.clock),
                events: publisher.clone(),
                cancel: cancel.clone(),
            };
            supervisors.spawn(supervise(device, ctx));
        }
        drop(publisher);

        let mut devices = Vec::with_capacity(self.devices.len());
        while let Some(result) = supervisors.join_next().await {
            match result {
                Ok(summary) => devices.push(summary),
                Err(e) => error!(error = %e, "Device supervisor failed"),
            }
        }
        devices.sort_by(|a, b| a.device.cmp(&b.device));

        // All publishers are gone once the supervisors return.
        let events = match log_task.await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "Event log task failed");
                EventLogStats::default()
            }
        };

        // Worker tasks held the only other dispatcher handles.
        let timeseries = match Arc::try_unwrap(self.dispatcher) {
            Ok(dispatcher) => dispatcher.close(self.drain_grace).await,
            Err(shared) => {
                warn!("Sink dispatcher still shared at shutdown, time-series queue not drained");
                shared.timeseries_stats()
            }
        };

        FleetReport {
            devices,
            events,
            timeseries,
        }
    }
}

struct WorkerContext<F: ClientFactory> {
    factory: Arc<F>,
    settings: Arc<WorkerSettings>,
    dispatcher: Arc<SinkDispatcher>,
    clock: Arc<dyn Clock>,
    events: EventPublisher,
    cancel: CancellationToken,
}

impl<F: ClientFactory> WorkerContext<F> {
    fn build_worker(&self, device: &DeviceConfig) -> DeviceWorker<F::Client> {
        let session = DeviceSession::new(
            device.clone(),
            self.factory.create(device),
            self.settings.connect_timeout,
            self.settings.read_timeout,
        );
        DeviceWorker::new(
            session,
            Arc::clone(&self.settings),
            Arc::clone(&self.dispatcher),
            self.events.clone(),
            Arc::clone(&self.clock),
            self.cancel.clone(),
        )
    }
}

/// Keep one crane's worker alive until shutdown, respawning it after panics.
async fn supervise<F: ClientFactory>(device: DeviceConfig, ctx: WorkerContext<F>) -> DeviceSummary {
    let mut restarts = 0u32;

    loop {
        let worker = ctx.build_worker(&device);
        let handle = tokio::spawn(worker.run());

        match handle.await {
            Ok(report) => {
                return DeviceSummary {
                    device: device.id,
                    report: Some(report),
                    restarts,
                };
            }
            Err(e) => {
                let message = if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    e.to_string()
                };
                let restart_in = ctx.settings.reconnect_delay;
                ctx.events.publish(EngineEvent::WorkerPanicked {
                    device: device.id.clone(),
                    message,
                    restart_in,
                });

                if !sleep_or_cancel(&ctx.cancel, restart_in).await {
                    return DeviceSummary {
                        device: device.id,
                        report: None,
                        restarts,
                    };
                }
                restarts += 1;
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_downcasts() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(42u8)), "unknown panic payload");
    }
}
