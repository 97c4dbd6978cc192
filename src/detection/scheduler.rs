//! Dual-rate poll scheduling
//!
//! Idle cranes are polled slowly; a crane that is moving is polled at the
//! active rate. The delay is measured from cycle start so read latency does not
//! accumulate as drift.

use std::time::Duration;

/// Polling mode, driven by the movement detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollMode {
    Idle,
    Active,
}

impl std::fmt::Display for PollMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Active => f.write_str("active"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollScheduler {
    idle_period: Duration,
    active_period: Duration,
}

impl PollScheduler {
    pub fn new(idle_period: Duration, active_period: Duration) -> Self {
        Self {
            idle_period,
            active_period,
        }
    }

    pub fn period(&self, mode: PollMode) -> Duration {
        match mode {
            PollMode::Idle => self.idle_period,
            PollMode::Active => self.active_period,
        }
    }

    /// Sleep before the next cycle: `max(0, period - elapsed)`.
    pub fn next_delay(&self, mode: PollMode, elapsed: Duration) -> Duration {
        self.period(mode).saturating_sub(elapsed)
    }
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_millis(100))
    }
}
