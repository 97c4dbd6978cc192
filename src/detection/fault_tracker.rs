//! Fault occurrence/resolution tracking
//!
//! Fault bits are sampled from one contiguous read of the fault data block and
//! compared against the per-crane [`FaultState`]. Only edges produce events:
//! a rising edge is an `Occurrence`, a falling edge a `Resolved` carrying the
//! time the fault stayed active.

use crate::acquisition::register_client::get_bool;
use crate::acquisition::BlockId;
use crate::types::{FaultDefinition, FaultEvent, FaultKind, ResetMarker};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Active faults of one crane, keyed by fault name.
///
/// Owned by the crane's worker and passed into [`FaultTracker::update`].
#[derive(Debug, Clone, Default)]
pub struct FaultState {
    active_since: HashMap<String, DateTime<Utc>>,
}

impl FaultState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, fault_name: &str) -> bool {
        self.active_since.contains_key(fault_name)
    }

    pub fn active_since(&self, fault_name: &str) -> Option<DateTime<Utc>> {
        self.active_since.get(fault_name).copied()
    }

    pub fn active_count(&self) -> usize {
        self.active_since.len()
    }
}

/// Decodes the configured fault bits of one data block.
#[derive(Debug, Clone)]
pub struct FaultTracker {
    block: BlockId,
    base: u32,
    length: usize,
    definitions: Vec<FaultDefinition>,
}

impl FaultTracker {
    /// Build a tracker whose block read spans exactly the bytes the
    /// definitions touch.
    pub fn new(db: u16, definitions: Vec<FaultDefinition>) -> Self {
        let base = definitions.iter().map(|d| d.byte).min().unwrap_or(0);
        let end = definitions.iter().map(|d| d.byte).max().unwrap_or(0);
        let length = if definitions.is_empty() {
            0
        } else {
            (end - base) as usize + 1
        };

        Self {
            block: BlockId::DataBlock(db),
            base,
            length,
            definitions,
        }
    }

    pub fn definitions(&self) -> &[FaultDefinition] {
        &self.definitions
    }

    /// `(block, offset, length)` of the single read that covers every
    /// definition, or `None` when no faults are configured.
    pub fn block_read(&self) -> Option<(BlockId, u32, usize)> {
        (!self.definitions.is_empty()).then_some((self.block, self.base, self.length))
    }

    /// Compare one block snapshot against `state` and emit the transitions.
    ///
    /// Bits that fall outside `block` are treated as unchanged.
    pub fn update(
        &self,
        state: &mut FaultState,
        block: &[u8],
        reset_marker: ResetMarker,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Vec<FaultEvent> {
        let mut events = Vec::new();

        for def in &self.definitions {
            let offset = (def.byte - self.base) as usize;
            let Some(active) = get_bool(block, offset, def.bit) else {
                continue;
            };

            match (active, state.active_since.get(&def.name).copied()) {
                (true, None) => {
                    state.active_since.insert(def.name.clone(), now);
                    events.push(FaultEvent {
                        timestamp: now,
                        device_id: device_id.to_string(),
                        fault_name: def.name.clone(),
                        kind: FaultKind::Occurrence,
                        downtime_secs: 0.0,
                        reset_marker,
                    });
                }
                (false, Some(since)) => {
                    state.active_since.remove(&def.name);
                    let downtime = (now - since)
                        .num_milliseconds()
                        .max(0) as f64
                        / 1000.0;
                    events.push(FaultEvent {
                        timestamp: now,
                        device_id: device_id.to_string(),
                        fault_name: def.name.clone(),
                        kind: FaultKind::Resolved,
                        downtime_secs: downtime,
                        reset_marker,
                    });
                }
                _ => {}
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::register_client::set_bool;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn tracker() -> FaultTracker {
        FaultTracker::new(
            59,
            vec![
                FaultDefinition::new("Spreader_Land_Fault_XT", 202, 3),
                FaultDefinition::new("Spreader_Land_Fault_YT", 202, 4),
                FaultDefinition::new("SPSS_Trolley_Dir_Not_Clear", 212, 6),
            ],
        )
    }

    fn block(bits: &[(u32, u8)]) -> Vec<u8> {
        let mut data = vec![0u8; 11];
        for (byte, bit) in bits {
            set_bool(&mut data, (*byte - 202) as usize, *bit, true);
        }
        data
    }

    #[test]
    fn test_block_read_spans_all_definitions() {
        assert_eq!(tracker().block_read(), Some((BlockId::DataBlock(59), 202, 11)));
        assert_eq!(FaultTracker::new(59, Vec::new()).block_read(), None);
    }

    #[test]
    fn test_active_active_inactive_emits_one_pair() {
        let tracker = tracker();
        let mut state = FaultState::new();
        let fault = [(202, 3)];

        let first = tracker.update(&mut state, &block(&fault), ResetMarker::NotPressed, "RMG_01", t(0));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, FaultKind::Occurrence);
        assert_eq!(first[0].downtime_secs, 0.0);
        assert_eq!(first[0].fault_name, "Spreader_Land_Fault_XT");

        let second = tracker.update(&mut state, &block(&fault), ResetMarker::NotPressed, "RMG_01", t(3));
        assert!(second.is_empty());
        assert!(state.is_active("Spreader_Land_Fault_XT"));

        let third = tracker.update(&mut state, &block(&[]), ResetMarker::Pressed, "RMG_01", t(6));
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].kind, FaultKind::Resolved);
        assert_eq!(third[0].downtime_secs, 6.0);
        assert_eq!(third[0].reset_marker, ResetMarker::Pressed);
        assert_eq!(state.active_count(), 0);
    }

    #[test]
    fn test_faults_are_independent() {
        let tracker = tracker();
        let mut state = FaultState::new();

        let events = tracker.update(&mut state, &block(&[(202, 3), (212, 6)]), ResetMarker::Unknown, "RMG_01", t(0));
        assert_eq!(events.len(), 2);

        let events = tracker.update(&mut state, &block(&[(212, 6)]), ResetMarker::Unknown, "RMG_01", t(2));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fault_name, "Spreader_Land_Fault_XT");
        assert_eq!(events[0].kind, FaultKind::Resolved);
        assert!(state.is_active("SPSS_Trolley_Dir_Not_Clear"));
        assert_eq!(state.active_since("SPSS_Trolley_Dir_Not_Clear"), Some(t(0)));
    }

    #[test]
    fn test_truncated_block_leaves_state_untouched() {
        let tracker = tracker();
        let mut state = FaultState::new();
        tracker.update(&mut state, &block(&[(212, 6)]), ResetMarker::Unknown, "RMG_01", t(0));

        let events = tracker.update(&mut state, &[0u8; 1], ResetMarker::Unknown, "RMG_01", t(1));
        assert!(events.is_empty());
        assert!(state.is_active("SPSS_Trolley_Dir_Not_Clear"));
    }

    #[test]
    fn test_states_are_per_crane() {
        let tracker = tracker();
        let mut a = FaultState::new();
        let mut b = FaultState::new();

        tracker.update(&mut a, &block(&[(202, 4)]), ResetMarker::NotPressed, "A", t(0));
        let events = tracker.update(&mut b, &block(&[]), ResetMarker::NotPressed, "B", t(1));
        assert!(events.is_empty());
        assert!(a.is_active("Spreader_Land_Fault_YT"));
        assert!(!b.is_active("Spreader_Land_Fault_YT"));
    }
}
