//! Movement samples and the event buffer they accumulate in

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Register values read during one active poll cycle.
///
/// The detector stamps these with a timestamp and `dt` to produce a [`Sample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleReading {
    /// Commanded (order) speed
    pub order_speed: i16,
    /// Drive feedback speed
    pub feedback_speed: i16,
    /// Load-lock (twistlock) engaged
    pub is_loaded: bool,
    /// Payload weight (t)
    pub weight: i16,
}

/// One time-stamped reading inside a movement event. Never mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub order_speed: i16,
    pub feedback_speed: i16,
    pub is_loaded: bool,
    pub weight: i16,
}

impl Sample {
    pub fn from_reading(reading: SampleReading, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            order_speed: reading.order_speed,
            feedback_speed: reading.feedback_speed,
            is_loaded: reading.is_loaded,
            weight: reading.weight,
        }
    }
}

/// A contiguous interval of motion: ordered samples plus the delay that
/// preceded each one.
///
/// `dts[i]` is the wall time between sample `i` and the previous sample (or the
/// movement start for `i == 0`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementEvent {
    started_at: DateTime<Utc>,
    samples: Vec<Sample>,
    dts: Vec<f64>,
}

impl MovementEvent {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            samples: Vec::with_capacity(128),
            dts: Vec::with_capacity(128),
        }
    }

    /// Append a sample with the delay that preceded it.
    pub fn push(&mut self, sample: Sample, dt_secs: f64) {
        self.samples.push(sample);
        self.dts.push(dt_secs);
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Timestamp of the last sample, or the start time for an empty event.
    pub fn ended_at(&self) -> DateTime<Utc> {
        self.samples.last().map_or(self.started_at, |s| s.timestamp)
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn dts(&self) -> &[f64] {
        &self.dts
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sum of inter-sample delays (seconds).
    pub fn duration_secs(&self) -> f64 {
        self.dts.iter().sum()
    }
}
