//! In-memory sink for tests and dry runs
//!
//! Implements both sink traits over a shared vector. Clones share storage, so a
//! test keeps one handle while the dispatcher owns another.

use super::{DurableLogSink, SinkError};
use crate::timeseries::TimeSeriesSink;
use crate::types::{FaultEvent, MovementRecord, TelemetryRecord};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<TelemetryRecord>>>,
    failing: Arc<AtomicBool>,
    attempts: Arc<AtomicU64>,
    delay_ms: Arc<AtomicU64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TelemetryRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject every write while `failing` is set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Hold every write for `delay` before storing it, like a slow endpoint.
    pub fn set_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.delay_ms.store(ms, Ordering::SeqCst);
    }

    async fn wait(&self) {
        let ms = self.delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    /// Write attempts, including rejected ones.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.lock().clone()
    }

    pub fn movements(&self) -> Vec<MovementRecord> {
        self.lock()
            .iter()
            .filter_map(|r| match r {
                TelemetryRecord::Movement(m) => Some(m.clone()),
                TelemetryRecord::Fault(_) => None,
            })
            .collect()
    }

    pub fn faults(&self) -> Vec<FaultEvent> {
        self.lock()
            .iter()
            .filter_map(|r| match r {
                TelemetryRecord::Fault(f) => Some(f.clone()),
                TelemetryRecord::Movement(_) => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn store(&self, record: &TelemetryRecord) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected("memory sink set to fail".to_string()));
        }
        self.lock().push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl DurableLogSink for MemorySink {
    async fn append(&mut self, record: &TelemetryRecord) -> Result<(), SinkError> {
        self.wait().await;
        self.store(record)
    }

    fn sink_name(&self) -> &str {
        "memory"
    }
}

#[async_trait]
impl TimeSeriesSink for MemorySink {
    async fn write(&mut self, record: &TelemetryRecord) -> Result<(), SinkError> {
        self.wait().await;
        self.store(record)
    }

    fn sink_name(&self) -> &str {
        "memory"
    }
}
