//! gantry-edge - Gantry Crane Edge Telemetry
//!
//! Polls crane drive controllers, derives per-movement health KPIs and tracks
//! fault occurrences. Records go to a CSV durable log and, when enabled, to
//! InfluxDB.
//!
//! # Usage
//!
//! ```bash
//! # Run against simulated cranes
//! gantry-edge --simulate
//!
//! # Validate a config file and print the effective settings
//! gantry-edge --config gantry_edge.toml --check-config
//!
//! # JSON log lines, debug level
//! RUST_LOG=debug gantry-edge --simulate --log-json
//! ```
//!
//! # Environment Variables
//!
//! - `GANTRY_EDGE_CONFIG`: Path to the TOML config (default: ./gantry_edge.toml)
//! - `INFLUX_TOKEN`: InfluxDB API token, overrides the config file
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gantry_edge::acquisition::SimulatedFleet;
use gantry_edge::config::{defaults, ConfigSource, DeviceConfig, EdgeConfig};
use gantry_edge::pipeline::{FleetOrchestrator, FleetReport, SinkDispatcher, SystemClock, WorkerSettings};
use gantry_edge::simulation::CraneSimulator;
use gantry_edge::storage::{CsvEventLog, ProcessLock};
use gantry_edge::timeseries::{InfluxWriter, TimeSeriesSink};

/// Time allowed for workers to finish after Ctrl+C
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "gantry-edge")]
#[command(about = "Gantry crane movement KPI and fault telemetry")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML config file (overrides GANTRY_EDGE_CONFIG)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Drive the workers with built-in simulated cranes
    #[arg(long)]
    simulate: bool,

    /// Random seed for the simulator
    #[arg(long, default_value = "1")]
    sim_seed: u64,

    /// Number of simulated cranes when the config lists none
    #[arg(long, default_value_t = defaults::SIMULATED_CRANE_COUNT)]
    sim_cranes: usize,

    /// Emit log lines as JSON
    #[arg(long)]
    log_json: bool,

    /// Load and validate the config, print the effective TOML and exit
    #[arg(long)]
    check_config: bool,
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    Fleet,
    Simulator,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::Fleet => write!(f, "Fleet"),
            TaskName::Simulator => write!(f, "Simulator"),
        }
    }
}

// ============================================================================
// Setup
// ============================================================================

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<(EdgeConfig, ConfigSource)> {
    match path {
        Some(p) => {
            let config = EdgeConfig::load_from_file(p).with_context(|| format!("Failed to load config {}", p.display()))?;
            Ok((config, ConfigSource::File(p.clone())))
        }
        None => EdgeConfig::load().context("Failed to load config"),
    }
}

/// `SIM_01`, `SIM_02`, ... for a simulated run without configured cranes.
fn simulated_devices(count: usize) -> Vec<DeviceConfig> {
    (1..=count.max(1))
        .map(|i| {
            let id = format!("SIM_{i:02}");
            let address = format!("sim://{id}");
            DeviceConfig::new(&id, &address)
        })
        .collect()
}

fn build_timeseries(config: &EdgeConfig) -> Result<Option<Box<dyn TimeSeriesSink>>> {
    let influx = &config.sinks.influx;
    if !influx.enabled {
        info!("Time-series export: disabled");
        return Ok(None);
    }
    let writer = InfluxWriter::new(influx).context("Failed to initialise InfluxDB writer")?;
    info!(url = %writer.write_url(), "Time-series export: InfluxDB");
    Ok(Some(Box::new(writer)))
}

// ============================================================================
// Supervisor
// ============================================================================

/// Monitor tasks until shutdown, then give them a grace period to finish.
async fn run_supervisor(task_set: &mut JoinSet<Result<TaskName>>, cancel_token: CancellationToken) -> Result<()> {
    info!("Supervisor: all tasks spawned, monitoring...");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: task {} completed", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed: {:#}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        return Ok(());
                    }
                }
            }
        }
    }

    let drain = async {
        while let Some(result) = task_set.join_next().await {
            match result {
                Ok(Ok(task_name)) => info!("Supervisor: task {} stopped", task_name),
                Ok(Err(e)) => warn!("Supervisor: task failed during shutdown: {:#}", e),
                Err(e) => warn!("Supervisor: task panicked during shutdown: {}", e),
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!(grace_secs = SHUTDOWN_GRACE.as_secs(), "Supervisor: tasks still running after grace period, aborting");
        task_set.abort_all();
    }
    Ok(())
}

fn log_fleet_report(report: &FleetReport) {
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Final statistics");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for summary in &report.devices {
        match &summary.report {
            Some(r) => info!(
                device = %summary.device,
                cycles = r.cycles,
                movements = r.movements_logged,
                discarded = r.events_discarded,
                aborted = r.events_aborted,
                faults = r.fault_events,
                reads = r.session.reads,
                timeouts = r.session.timeouts,
                connects = r.session.connects,
                sessions_lost = r.sessions_lost,
                durable_failures = r.durable_failures,
                timeseries_dropped = r.timeseries_dropped,
                restarts = summary.restarts,
                "Crane summary"
            ),
            None => warn!(device = %summary.device, restarts = summary.restarts, "Crane worker did not report"),
        }
    }
    let e = &report.events;
    info!(
        movements = e.movements_logged,
        faults = e.faults_logged,
        durable_failures = e.durable_failures,
        worker_panics = e.worker_panics,
        dropped_events = e.dropped,
        "Fleet totals"
    );
    let t = &report.timeseries;
    info!(
        written = t.written,
        failed = t.failed,
        dropped = t.dropped,
        abandoned = t.abandoned,
        "Time-series totals"
    );
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.log_json);

    let (mut config, source) = load_config(args.config.as_ref())?;

    if args.check_config {
        info!(source = %source, "Configuration is valid");
        // Secrets are not serialized
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    if !args.simulate {
        bail!(
            "No register transport is built into this binary. Run with --simulate, \
             or embed the gantry_edge library with a RegisterClient for your controllers."
        );
    }

    if config.devices.is_empty() {
        config.devices = simulated_devices(args.sim_cranes);
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  gantry-edge - Gantry Crane Edge Telemetry");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(site = %config.site.name, source = %source, cranes = config.devices.len(), "Configuration loaded");

    let data_dir = config.sinks.data_dir.clone();
    let process_lock = ProcessLock::acquire(&data_dir).context("Failed to acquire process lock")?;
    info!(lock = %process_lock.path().display(), "Process lock acquired");

    let durable = CsvEventLog::open(
        &data_dir,
        &config.sinks.durable_log.movement_file,
        &config.sinks.durable_log.fault_file,
    )
    .context("Failed to open durable log")?;
    info!(
        movements = %durable.movement_path().display(),
        faults = %durable.fault_path().display(),
        "Durable log: CSV"
    );
    let dispatcher = SinkDispatcher::with_queue_capacity(
        Box::new(durable),
        build_timeseries(&config)?,
        config.sinks.influx.queue_capacity,
    );

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let fleet = Arc::new(SimulatedFleet::new());
    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    let tick = Duration::from_secs_f64(defaults::SIMULATOR_TICK_SECS);
    for (i, device) in config.devices.iter().enumerate() {
        let simulator = CraneSimulator::new(
            fleet.image(&device.id),
            config.registers.clone(),
            &config.faults,
            args.sim_seed.wrapping_add(i as u64),
        );
        let cancel = cancel_token.clone();
        task_set.spawn(async move {
            simulator.run(tick, cancel).await;
            Ok(TaskName::Simulator)
        });
    }
    info!(cranes = config.devices.len(), seed = args.sim_seed, "Simulated cranes running");

    let orchestrator = FleetOrchestrator::new(
        Arc::clone(&fleet),
        config.devices.clone(),
        WorkerSettings::from_config(&config),
        dispatcher,
        Arc::new(SystemClock),
    );
    let fleet_cancel = cancel_token.clone();
    task_set.spawn(async move {
        let report = orchestrator.run(fleet_cancel).await;
        log_fleet_report(&report);
        Ok(TaskName::Fleet)
    });

    run_supervisor(&mut task_set, cancel_token).await?;

    info!("gantry-edge shutdown complete");
    Ok(())
}
