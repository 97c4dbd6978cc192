//! Fault definitions and transition events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named fault bit inside the controller's fault data block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultDefinition {
    /// Fault name as it appears in logs and tags
    pub name: String,
    /// Byte offset within the fault data block
    pub byte: u32,
    /// Bit index (0-7) within that byte
    pub bit: u8,
}

impl FaultDefinition {
    pub fn new(name: &str, byte: u32, bit: u8) -> Self {
        Self {
            name: name.to_string(),
            byte,
            bit,
        }
    }
}

/// Kind of fault transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    /// Fault bit went 0 -> 1
    Occurrence,
    /// Fault bit went 1 -> 0
    Resolved,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Occurrence => "Occurrence",
            Self::Resolved => "Resolved",
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of the operator reset marker at the time of a fault transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResetMarker {
    Pressed,
    NotPressed,
    /// Marker read failed this cycle
    Unknown,
}

impl ResetMarker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pressed => "Pressed",
            Self::NotPressed => "Not Pressed",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for ResetMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A debounced fault transition for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultEvent {
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub fault_name: String,
    pub kind: FaultKind,
    /// Time the fault stayed active (s); 0 for occurrences
    pub downtime_secs: f64,
    pub reset_marker: ResetMarker,
}

impl FaultEvent {
    /// 1 for an occurrence, 0 for a resolution (time-series `count` field).
    pub fn count(&self) -> i64 {
        match self.kind {
            FaultKind::Occurrence => 1,
            FaultKind::Resolved => 0,
        }
    }
}
