//! Sink dispatcher
//!
//! Shared by all device workers. Every record goes to the durable log first,
//! inline in the caller. Once that append succeeds the record is queued for a
//! single time-series writer task and the caller moves on; a slow or hung
//! time-series endpoint only ever delays that task.
//!
//! ```text
//! worker ─┐                      ┌─> durable log (awaited)
//! worker ─┼─> SinkDispatcher ────┤
//! worker ─┘                      └─> bounded queue ──> writer task ──> time-series
//! ```
//!
//! A full queue drops the record from the time-series side only and counts it.

use crate::config::defaults;
use crate::storage::{DurableLogSink, SinkError};
use crate::timeseries::TimeSeriesSink;
use crate::types::TelemetryRecord;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What happened to the time-series side of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeSeriesStatus {
    /// Handed to the writer task
    Queued,
    /// Queue full or writer gone; the durable row stands alone
    Dropped,
    Disabled,
}

impl TimeSeriesStatus {
    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped)
    }
}

impl std::fmt::Display for TimeSeriesStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Dropped => write!(f, "dropped"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// Totals for the time-series side, across every crane.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeSeriesStats {
    pub written: u64,
    pub failed: u64,
    /// Never queued (queue full or writer gone)
    pub dropped: u64,
    /// Still queued when the writer was stopped
    pub abandoned: u64,
}

#[derive(Debug, Default)]
struct Counters {
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    abandoned: AtomicU64,
}

impl Counters {
    fn processed(&self) -> u64 {
        self.written.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> TimeSeriesStats {
        TimeSeriesStats {
            written: self.written.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

struct TimeSeriesQueue {
    tx: mpsc::Sender<TelemetryRecord>,
    writer: JoinHandle<()>,
}

pub struct SinkDispatcher {
    durable: Mutex<Box<dyn DurableLogSink>>,
    timeseries: Option<TimeSeriesQueue>,
    counters: Arc<Counters>,
    durable_name: String,
    timeseries_name: Option<String>,
}

impl std::fmt::Debug for SinkDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkDispatcher")
            .field("durable", &self.durable_name)
            .field("timeseries", &self.timeseries_name)
            .field("stats", &self.counters.snapshot())
            .finish()
    }
}

impl SinkDispatcher {
    /// Build a dispatcher with the default time-series queue capacity.
    ///
    /// Spawns the time-series writer task, so this must run inside a tokio
    /// runtime.
    pub fn new(durable: Box<dyn DurableLogSink>, timeseries: Option<Box<dyn TimeSeriesSink>>) -> Self {
        Self::with_queue_capacity(durable, timeseries, defaults::TIMESERIES_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(
        durable: Box<dyn DurableLogSink>,
        timeseries: Option<Box<dyn TimeSeriesSink>>,
        capacity: usize,
    ) -> Self {
        let durable_name = durable.sink_name().to_string();
        let timeseries_name = timeseries.as_ref().map(|t| t.sink_name().to_string());
        let counters = Arc::new(Counters::default());

        let timeseries = timeseries.map(|sink| {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            let writer = tokio::spawn(run_writer(sink, rx, Arc::clone(&counters)));
            TimeSeriesQueue { tx, writer }
        });

        Self {
            durable: Mutex::new(durable),
            timeseries,
            counters,
            durable_name,
            timeseries_name,
        }
    }

    pub fn durable_name(&self) -> &str {
        &self.durable_name
    }

    pub fn timeseries_name(&self) -> Option<&str> {
        self.timeseries_name.as_deref()
    }

    pub fn timeseries_stats(&self) -> TimeSeriesStats {
        self.counters.snapshot()
    }

    /// Persist one record.
    ///
    /// `Err` means the durable append failed and nothing was queued. `Ok`
    /// returns once the durable row is written; it never waits on the
    /// time-series endpoint.
    pub async fn emit(&self, record: &TelemetryRecord) -> Result<TimeSeriesStatus, SinkError> {
        {
            let mut durable = self.durable.lock().await;
            durable.append(record).await?;
        }

        let Some(queue) = &self.timeseries else {
            return Ok(TimeSeriesStatus::Disabled);
        };
        match queue.tx.try_send(record.clone()) {
            Ok(()) => Ok(TimeSeriesStatus::Queued),
            Err(_) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(TimeSeriesStatus::Dropped)
            }
        }
    }

    /// Stop accepting records and let the writer drain its queue for up to
    /// `grace`. Whatever is still queued after that is abandoned.
    pub async fn close(self, grace: Duration) -> TimeSeriesStats {
        let Self {
            timeseries, counters, ..
        } = self;

        if let Some(TimeSeriesQueue { tx, mut writer }) = timeseries {
            let pending = (tx.max_capacity() - tx.capacity()) as u64;
            let processed_before = counters.processed();
            drop(tx);
            match tokio::time::timeout(grace, &mut writer).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Time-series writer task failed"),
                Err(_) => {
                    writer.abort();
                    let abandoned = pending.saturating_sub(counters.processed() - processed_before);
                    counters.abandoned.store(abandoned, Ordering::Relaxed);
                    warn!(
                        grace_secs = grace.as_secs_f64(),
                        abandoned,
                        "Time-series writer did not drain in time, queued records abandoned"
                    );
                }
            }
        }
        counters.snapshot()
    }
}

/// Single consumer of the time-series queue. Writes are serialized; a failed
/// write is logged and counted, never retried.
async fn run_writer(mut sink: Box<dyn TimeSeriesSink>, mut rx: mpsc::Receiver<TelemetryRecord>, counters: Arc<Counters>) {
    while let Some(record) = rx.recv().await {
        match sink.write(&record).await {
            Ok(()) => {
                counters.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    sink = sink.sink_name(),
                    device = %record.device_id(),
                    kind = record.kind(),
                    error = %e,
                    "Time-series write failed, durable row kept"
                );
            }
        }
    }
    debug!(sink = sink.sink_name(), "Time-series writer drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySink;
    use crate::types::{FaultEvent, FaultKind, ResetMarker};
    use chrono::Utc;

    const GRACE: Duration = Duration::from_secs(5);

    fn fault_record() -> TelemetryRecord {
        TelemetryRecord::Fault(FaultEvent {
            timestamp: Utc::now(),
            device_id: "ARMGC_246".to_string(),
            fault_name: "Spreader Overload".to_string(),
            kind: FaultKind::Occurrence,
            downtime_secs: 0.0,
            reset_marker: ResetMarker::NotPressed,
        })
    }

    #[tokio::test]
    async fn test_durable_then_timeseries() {
        let durable = MemorySink::new();
        let ts = MemorySink::new();
        let dispatcher = SinkDispatcher::new(Box::new(durable.clone()), Some(Box::new(ts.clone())));

        let status = dispatcher.emit(&fault_record()).await.unwrap();
        assert_eq!(status, TimeSeriesStatus::Queued);
        assert_eq!(durable.len(), 1);

        let stats = dispatcher.close(GRACE).await;
        assert_eq!(ts.len(), 1);
        assert_eq!(stats.written, 1);
        assert_eq!(stats.failed + stats.dropped + stats.abandoned, 0);
    }

    #[tokio::test]
    async fn test_durable_failure_skips_timeseries() {
        let durable = MemorySink::new();
        let ts = MemorySink::new();
        durable.set_failing(true);
        let dispatcher = SinkDispatcher::new(Box::new(durable.clone()), Some(Box::new(ts.clone())));

        assert!(dispatcher.emit(&fault_record()).await.is_err());
        dispatcher.close(GRACE).await;
        assert_eq!(durable.attempts(), 1);
        assert_eq!(ts.attempts(), 0);
    }

    #[tokio::test]
    async fn test_timeseries_failure_keeps_durable_record() {
        let durable = MemorySink::new();
        let ts = MemorySink::new();
        ts.set_failing(true);
        let dispatcher = SinkDispatcher::new(Box::new(durable.clone()), Some(Box::new(ts.clone())));

        let status = dispatcher.emit(&fault_record()).await.unwrap();
        assert_eq!(status, TimeSeriesStatus::Queued);

        let stats = dispatcher.close(GRACE).await;
        assert_eq!(durable.len(), 1);
        assert!(ts.is_empty());
        assert_eq!(ts.attempts(), 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_timeseries_disabled() {
        let durable = MemorySink::new();
        let dispatcher = SinkDispatcher::new(Box::new(durable.clone()), None);
        assert_eq!(dispatcher.emit(&fault_record()).await.unwrap(), TimeSeriesStatus::Disabled);
        assert_eq!(dispatcher.timeseries_name(), None);
        assert_eq!(dispatcher.durable_name(), "memory");
        assert_eq!(dispatcher.close(GRACE).await, TimeSeriesStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_timeseries_does_not_hold_up_emit() {
        let durable = MemorySink::new();
        let ts = MemorySink::new();
        ts.set_delay(Duration::from_secs(10));
        let dispatcher = SinkDispatcher::new(Box::new(durable.clone()), Some(Box::new(ts.clone())));

        let start = tokio::time::Instant::now();
        for _ in 0..3 {
            assert_eq!(dispatcher.emit(&fault_record()).await.unwrap(), TimeSeriesStatus::Queued);
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(durable.len(), 3);
        assert!(ts.is_empty());

        // Writes are serialized behind the single writer
        let stats = dispatcher.close(Duration::from_secs(60)).await;
        assert_eq!(stats.written, 3);
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_drops_and_counts() {
        let durable = MemorySink::new();
        let ts = MemorySink::new();
        ts.set_delay(Duration::from_secs(10));
        let dispatcher = SinkDispatcher::with_queue_capacity(Box::new(durable.clone()), Some(Box::new(ts.clone())), 1);

        // First record is picked up by the writer, second fills the queue
        assert_eq!(dispatcher.emit(&fault_record()).await.unwrap(), TimeSeriesStatus::Queued);
        tokio::task::yield_now().await;
        assert_eq!(dispatcher.emit(&fault_record()).await.unwrap(), TimeSeriesStatus::Queued);
        let status = dispatcher.emit(&fault_record()).await.unwrap();
        assert!(status.is_dropped());
        assert_eq!(durable.len(), 3);
        assert_eq!(dispatcher.timeseries_stats().dropped, 1);

        let stats = dispatcher.close(GRACE).await;
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.abandoned, 1);
        assert_eq!(stats.written, 0);
    }
}
