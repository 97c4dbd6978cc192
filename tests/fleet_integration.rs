//! Fleet Orchestrator Integration Tests
//!
//! Several simulated cranes under one orchestrator on the paused clock:
//! device isolation, panic restart, shutdown summaries.

use chrono::{TimeZone, Utc};
use gantry_edge::acquisition::{BlockId, SimulatedFleet};
use gantry_edge::config::DeviceConfig;
use gantry_edge::pipeline::{FleetOrchestrator, FleetReport, SinkDispatcher, TokioClock, WorkerSettings};
use gantry_edge::storage::MemorySink;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const DRIVE_DB: BlockId = BlockId::DataBlock(57);
const FAULT_DB: BlockId = BlockId::DataBlock(59);

struct Fleet {
    sims: Arc<SimulatedFleet>,
    durable: MemorySink,
    cancel: CancellationToken,
    start: Instant,
    handle: JoinHandle<FleetReport>,
}

impl Fleet {
    /// Build the orchestrator; `prepare` runs before any worker is polled.
    fn spawn(ids: &[&str], prepare: impl FnOnce(&SimulatedFleet)) -> Self {
        let sims = Arc::new(SimulatedFleet::new());
        prepare(&sims);

        let devices = ids
            .iter()
            .enumerate()
            .map(|(i, id)| DeviceConfig::new(id, &format!("10.0.0.{}", i + 1)))
            .collect();
        let durable = MemorySink::new();
        let dispatcher = SinkDispatcher::new(Box::new(durable.clone()), None);
        let clock = TokioClock::starting_at(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());

        let orchestrator = FleetOrchestrator::new(
            Arc::clone(&sims),
            devices,
            WorkerSettings::default(),
            dispatcher,
            Arc::new(clock),
        );
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let handle = tokio::spawn(orchestrator.run(cancel.clone()));

        Self {
            sims,
            durable,
            cancel,
            start,
            handle,
        }
    }

    async fn at(&self, secs: f64) {
        tokio::time::sleep_until(self.start + Duration::from_secs_f64(secs)).await;
    }

    async fn stop(self) -> FleetReport {
        self.cancel.cancel();
        self.handle.await.unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn offline_crane_does_not_affect_others() {
    let fleet = Fleet::spawn(&["RMG_01", "RMG_02"], |sims| {
        sims.image("RMG_02").set_online(false);
    });

    fleet.at(1.2).await;
    let a = fleet.sims.image("RMG_01");
    a.set_int(DRIVE_DB, 8, 600);
    a.set_int(DRIVE_DB, 10, 590);
    fleet.at(3.25).await;
    a.set_int(DRIVE_DB, 8, 0);
    fleet.at(4.0).await;

    let movements = fleet.durable.movements();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].device_id, "RMG_01");

    let report = fleet.stop().await;
    assert_eq!(report.devices.len(), 2);

    let healthy = report.device("RMG_01").unwrap().report.as_ref().unwrap();
    assert_eq!(healthy.session.connects, 1);
    assert_eq!(healthy.sessions_lost, 0);
    assert_eq!(healthy.movements_logged, 1);

    let offline = report.device("RMG_02").unwrap().report.as_ref().unwrap();
    assert_eq!(offline.session.connects, 0);
    assert!(offline.session.connect_failures >= 1);
    assert_eq!(offline.cycles, 0);
}

#[tokio::test(start_paused = true)]
async fn faults_are_tracked_per_crane() {
    let fleet = Fleet::spawn(&["RMG_01", "RMG_02"], |_| {});

    fleet.at(1.25).await;
    fleet.sims.image("RMG_02").set_bit(FAULT_DB, 202, 3, true);
    fleet.at(2.0).await;

    let faults = fleet.durable.faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].device_id, "RMG_02");

    let report = fleet.stop().await;
    assert_eq!(report.events.faults_logged, 1);
    assert_eq!(report.device("RMG_01").unwrap().report.as_ref().unwrap().fault_events, 0);
}

#[tokio::test(start_paused = true)]
async fn panicking_worker_is_restarted() {
    let fleet = Fleet::spawn(&["RMG_01", "RMG_02"], |sims| {
        sims.image("RMG_01").panic_next_reads(1);
    });

    // Panic at the first read (t = 1), restart after 5 s, connect again at t = 6
    fleet.at(5.5).await;
    assert_eq!(fleet.sims.image("RMG_01").connect_attempts(), 1);
    fleet.at(8.0).await;
    assert_eq!(fleet.sims.image("RMG_01").connect_attempts(), 2);

    let report = fleet.stop().await;
    assert_eq!(report.events.worker_panics, 1);

    let restarted = report.device("RMG_01").unwrap();
    assert_eq!(restarted.restarts, 1);
    let worker = restarted.report.as_ref().unwrap();
    assert!(worker.cycles >= 2);

    let neighbour = report.device("RMG_02").unwrap();
    assert_eq!(neighbour.restarts, 0);
    assert!(neighbour.report.as_ref().unwrap().cycles >= 10);
}

#[tokio::test(start_paused = true)]
async fn shutdown_reports_every_crane_in_order() {
    let fleet = Fleet::spawn(&["RMG_03", "RMG_01", "RMG_02"], |_| {});
    fleet.at(2.0).await;

    let report = fleet.stop().await;
    let ids: Vec<&str> = report.devices.iter().map(|d| d.device.as_str()).collect();
    assert_eq!(ids, vec!["RMG_01", "RMG_02", "RMG_03"]);
    assert!(report.devices.iter().all(|d| d.report.is_some()));
    assert_eq!(report.events.dropped, 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_drains_time_series_queue() {
    let sims = Arc::new(SimulatedFleet::new());
    let durable = MemorySink::new();
    let timeseries = MemorySink::new();
    timeseries.set_delay(Duration::from_secs(10));
    let dispatcher = SinkDispatcher::new(Box::new(durable.clone()), Some(Box::new(timeseries.clone())));

    let orchestrator = FleetOrchestrator::new(
        Arc::clone(&sims),
        vec![DeviceConfig::new("RMG_01", "10.0.0.1"), DeviceConfig::new("RMG_02", "10.0.0.2")],
        WorkerSettings::default(),
        dispatcher,
        Arc::new(TokioClock::starting_at(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap())),
    )
    .with_drain_grace(Duration::from_secs(30));
    let cancel = CancellationToken::new();
    let start = Instant::now();
    let handle = tokio::spawn(orchestrator.run(cancel.clone()));

    tokio::time::sleep_until(start + Duration::from_secs_f64(1.25)).await;
    sims.image("RMG_01").set_bit(FAULT_DB, 202, 3, true);
    sims.image("RMG_02").set_bit(FAULT_DB, 202, 4, true);
    tokio::time::sleep_until(start + Duration::from_secs(2)).await;

    assert_eq!(durable.faults().len(), 2);
    assert!(timeseries.is_empty());

    cancel.cancel();
    let report = handle.await.unwrap();
    assert_eq!(report.timeseries.written, 2);
    assert_eq!(report.timeseries.dropped + report.timeseries.abandoned, 0);
    assert_eq!(timeseries.faults().len(), 2);
}
