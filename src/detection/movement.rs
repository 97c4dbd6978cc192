//! Movement event detection
//!
//! Two-state machine per crane:
//!
//! ```text
//!   Idle --|order| >= threshold--> Recording
//!   Recording --|order| < threshold--> Idle (event completed)
//!   Recording --read failure--> Idle (event aborted)
//!   Recording --sample cap reached--> Idle (event aborted)
//! ```
//!
//! Start and stop share one threshold. The sample that observes the stop is
//! still appended to the event.

use super::scheduler::PollMode;
use crate::kinematics::FALLBACK_DT_SECS;
use crate::types::{MovementEvent, Sample, SampleReading};
use chrono::{DateTime, Utc};

/// Result of feeding one cycle into the detector.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorStep {
    /// Still idle
    Idle,
    /// Threshold crossed, recording begins next cycle
    Started { order_speed: i16 },
    /// Sample appended, still moving
    Recording { samples: usize },
    /// Motion stopped; the buffered event is handed back
    Completed(MovementEvent),
    /// Still moving at the sample cap; the event was dropped
    Overflowed { samples: usize },
}

#[derive(Debug)]
enum DetectorState {
    Idle,
    Recording {
        event: MovementEvent,
        last_sample_at: DateTime<Utc>,
    },
}

#[derive(Debug)]
pub struct MovementEventDetector {
    threshold: i32,
    max_samples: usize,
    state: DetectorState,
}

impl MovementEventDetector {
    pub fn new(threshold: i16) -> Self {
        Self {
            threshold: i32::from(threshold).abs(),
            max_samples: usize::MAX,
            state: DetectorState::Idle,
        }
    }

    /// Abort any event that reaches `max_samples` without stopping.
    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples.max(2);
        self
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, DetectorState::Recording { .. })
    }

    /// Poll mode implied by the current state.
    pub fn mode(&self) -> PollMode {
        if self.is_recording() {
            PollMode::Active
        } else {
            PollMode::Idle
        }
    }

    /// Samples buffered so far (0 when idle).
    pub fn buffered(&self) -> usize {
        match &self.state {
            DetectorState::Idle => 0,
            DetectorState::Recording { event, .. } => event.len(),
        }
    }

    fn is_moving(&self, order_speed: i16) -> bool {
        i32::from(order_speed).abs() >= self.threshold
    }

    /// Idle-cycle input: only the commanded speed is known.
    ///
    /// Ignored while recording; use [`record`](Self::record) then.
    pub fn observe_order(&mut self, order_speed: i16, now: DateTime<Utc>) -> DetectorStep {
        if self.is_recording() {
            return DetectorStep::Recording {
                samples: self.buffered(),
            };
        }
        if !self.is_moving(order_speed) {
            return DetectorStep::Idle;
        }

        self.state = DetectorState::Recording {
            event: MovementEvent::new(now),
            last_sample_at: now,
        };
        DetectorStep::Started { order_speed }
    }

    /// Active-cycle input: a full sample.
    ///
    /// `dt` is the time since the previous sample (or the movement start); a
    /// non-positive `dt` is replaced by the fallback for this sample only.
    pub fn record(&mut self, reading: SampleReading, now: DateTime<Utc>) -> DetectorStep {
        let stopped = !self.is_moving(reading.order_speed);

        let DetectorState::Recording { event, last_sample_at } = &mut self.state else {
            return DetectorStep::Idle;
        };

        let dt = elapsed_secs(*last_sample_at, now);
        let dt = if dt > 0.0 { dt } else { FALLBACK_DT_SECS };
        event.push(Sample::from_reading(reading, now), dt);
        *last_sample_at = now;

        if stopped {
            match std::mem::replace(&mut self.state, DetectorState::Idle) {
                DetectorState::Recording { event, .. } => DetectorStep::Completed(event),
                DetectorState::Idle => DetectorStep::Idle,
            }
        } else if event.len() >= self.max_samples {
            let samples = event.len();
            self.state = DetectorState::Idle;
            DetectorStep::Overflowed { samples }
        } else {
            DetectorStep::Recording { samples: event.len() }
        }
    }

    /// Drop any in-progress event. Returns the number of samples discarded.
    pub fn abort(&mut self) -> Option<usize> {
        match std::mem::replace(&mut self.state, DetectorState::Idle) {
            DetectorState::Recording { event, .. } => Some(event.len()),
            DetectorState::Idle => None,
        }
    }
}

fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from)
        .num_microseconds()
        .map_or(0.0, |us| us as f64 / 1_000_000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + Duration::milliseconds(ms)
    }

    fn reading(order: i16, feedback: i16) -> SampleReading {
        SampleReading {
            order_speed: order,
            feedback_speed: feedback,
            is_loaded: false,
            weight: 0,
        }
    }

    #[test]
    fn test_below_threshold_stays_idle() {
        let mut d = MovementEventDetector::new(50);
        assert_eq!(d.observe_order(49, t(0)), DetectorStep::Idle);
        assert_eq!(d.observe_order(-49, t(500)), DetectorStep::Idle);
        assert_eq!(d.mode(), PollMode::Idle);
    }

    #[test]
    fn test_threshold_is_inclusive_and_symmetric() {
        let mut d = MovementEventDetector::new(50);
        assert_eq!(d.observe_order(-50, t(0)), DetectorStep::Started { order_speed: -50 });
        assert!(d.is_recording());
        assert_eq!(d.mode(), PollMode::Active);
    }

    #[test]
    fn test_full_event_lifecycle() {
        let mut d = MovementEventDetector::new(50);
        d.observe_order(120, t(0));

        assert_eq!(d.record(reading(300, 100), t(100)), DetectorStep::Recording { samples: 1 });
        assert_eq!(d.record(reading(600, 450), t(200)), DetectorStep::Recording { samples: 2 });

        let DetectorStep::Completed(event) = d.record(reading(10, 200), t(300)) else {
            panic!("expected completed event");
        };
        assert_eq!(event.len(), 3);
        assert_eq!(event.started_at(), t(0));
        assert_eq!(event.samples()[2].order_speed, 10);
        assert!((event.duration_secs() - 0.3).abs() < 1e-9);
        assert!(!d.is_recording());
    }

    #[test]
    fn test_non_positive_dt_uses_fallback() {
        let mut d = MovementEventDetector::new(50);
        d.observe_order(120, t(1000));
        d.record(reading(300, 100), t(1000));
        d.record(reading(300, 100), t(900));

        let DetectorStep::Completed(event) = d.record(reading(0, 0), t(1000)) else {
            panic!("expected completed event");
        };
        assert_eq!(event.dts()[0], FALLBACK_DT_SECS);
        assert_eq!(event.dts()[1], FALLBACK_DT_SECS);
        assert!((event.dts()[2] - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_abort_discards_event() {
        let mut d = MovementEventDetector::new(50);
        assert_eq!(d.abort(), None);

        d.observe_order(200, t(0));
        d.record(reading(200, 150), t(100));
        d.record(reading(200, 190), t(200));
        assert_eq!(d.abort(), Some(2));
        assert!(!d.is_recording());
        assert_eq!(d.buffered(), 0);
    }

    #[test]
    fn test_sample_cap_aborts_stuck_event() {
        let mut d = MovementEventDetector::new(50).with_max_samples(3);
        d.observe_order(400, t(0));
        assert_eq!(d.record(reading(400, 390), t(100)), DetectorStep::Recording { samples: 1 });
        assert_eq!(d.record(reading(400, 390), t(200)), DetectorStep::Recording { samples: 2 });
        assert_eq!(d.record(reading(400, 390), t(300)), DetectorStep::Overflowed { samples: 3 });
        assert!(!d.is_recording());
        assert_eq!(d.buffered(), 0);

        // A register still above threshold starts a fresh event
        assert_eq!(d.observe_order(400, t(400)), DetectorStep::Started { order_speed: 400 });
    }

    #[test]
    fn test_stop_at_cap_still_completes() {
        let mut d = MovementEventDetector::new(50).with_max_samples(2);
        d.observe_order(400, t(0));
        d.record(reading(400, 390), t(100));
        assert!(matches!(d.record(reading(0, 100), t(200)), DetectorStep::Completed(e) if e.len() == 2));
    }

    #[test]
    fn test_record_while_idle_is_ignored() {
        let mut d = MovementEventDetector::new(50);
        assert_eq!(d.record(reading(500, 500), t(0)), DetectorStep::Idle);
        assert!(!d.is_recording());
    }
}
