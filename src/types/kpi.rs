//! Kinematic KPI records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dominant load state of a movement event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadState {
    Loaded,
    Empty,
}

impl LoadState {
    pub fn from_loaded(is_loaded: bool) -> Self {
        if is_loaded {
            Self::Loaded
        } else {
            Self::Empty
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loaded => "Loaded",
            Self::Empty => "Empty",
        }
    }
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health indices derived from one movement event.
///
/// Peaks and `max_error` are raw register magnitudes; the remaining scalars are
/// rounded for reporting (2 decimals, 1 for `avg_weight`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiRecord {
    /// Sum of inter-sample delays (s)
    pub duration_secs: f64,
    /// Peak |commanded speed|
    pub peak_order: i32,
    /// Peak |feedback speed|
    pub peak_feedback: i32,
    /// Largest |order - feedback|
    pub max_error: i32,
    /// Root-mean-square tracking error
    pub rms_error: f64,
    /// Mean cable-reel stress index
    pub mean_stress: f64,
    /// Cumulative reducer damage index (Miner's-rule style)
    pub reducer_damage: f64,
    /// Mean payload weight (t)
    pub avg_weight: f64,
    /// Majority vote over load-lock samples
    pub is_loaded: bool,
    /// Number of samples the record was computed from
    pub sample_count: usize,
}

impl KpiRecord {
    pub fn load_state(&self) -> LoadState {
        LoadState::from_loaded(self.is_loaded)
    }
}

/// A KPI record attributed to a device and completion time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub kpi: KpiRecord,
}
