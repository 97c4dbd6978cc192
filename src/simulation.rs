//! Crane Simulator
//!
//! Drives a [`ControllerImage`] with plausible gantry-crane motion so the
//! full acquisition path can run without a controller on the network:
//! - trapezoidal move profiles (accelerate, cruise, decelerate, dwell)
//! - drive feedback following the command through a first-order lag
//! - load lock toggling between moves with a noisy spreader weight
//! - random fault bits with an operator reset press on clearance
//!
//! Seeded `StdRng` keeps runs reproducible; noise is drawn from
//! `rand_distr::StandardNormal`.

use crate::acquisition::{BlockId, ControllerImage};
use crate::config::{FaultConfig, RegisterMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Motion Constants
// ============================================================================

/// Cruise command magnitude range (drive units)
const CRUISE_SPEED_RANGE: (i16, i16) = (400, 1000);
/// Command ramp rate (drive units per second)
const RAMP_RATE: f64 = 800.0;
/// Cruise duration range (seconds)
const CRUISE_SECS_RANGE: (f64, f64) = (1.5, 8.0);
/// Dwell between moves (seconds)
const DWELL_SECS_RANGE: (f64, f64) = (1.0, 5.0);
/// Drive feedback time constant (seconds)
const FEEDBACK_TAU_SECS: f64 = 0.35;
/// Feedback noise standard deviation (drive units)
const FEEDBACK_NOISE: f64 = 4.0;

/// Loaded spreader weight, mean and standard deviation
const LOADED_WEIGHT: (f64, f64) = (1_800.0, 250.0);
/// Empty spreader weight, mean and standard deviation
const EMPTY_WEIGHT: (f64, f64) = (120.0, 8.0);
/// Chance the load state flips during a dwell
const LOAD_TOGGLE_PROBABILITY: f64 = 0.5;

/// Per-fault activation rate (per second)
const FAULT_RATE_PER_SEC: f64 = 0.002;
/// Active fault duration range (seconds)
const FAULT_SECS_RANGE: (f64, f64) = (3.0, 40.0);
/// Chance the operator presses reset when a fault clears
const RESET_PRESS_PROBABILITY: f64 = 0.6;
/// How long the reset marker stays set (seconds)
const RESET_HOLD_SECS: f64 = 1.0;

// ============================================================================
// Motion Profile
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Dwell { remaining: f64 },
    Accelerate { target: f64 },
    Cruise { target: f64, remaining: f64 },
    Decelerate,
}

#[derive(Debug, Clone)]
struct FaultBit {
    block: BlockId,
    byte: u32,
    bit: u8,
    /// Seconds until the fault clears; `None` while inactive
    remaining: Option<f64>,
}

/// Tunables for [`CraneSimulator`].
#[derive(Debug, Clone, Copy)]
pub struct SimulatorProfile {
    /// Per-fault activation rate (per second)
    pub fault_rate_per_sec: f64,
    /// Feedback time constant (seconds)
    pub feedback_tau_secs: f64,
}

impl Default for SimulatorProfile {
    fn default() -> Self {
        Self {
            fault_rate_per_sec: FAULT_RATE_PER_SEC,
            feedback_tau_secs: FEEDBACK_TAU_SECS,
        }
    }
}

/// One simulated crane writing into a controller image.
pub struct CraneSimulator {
    image: ControllerImage,
    registers: RegisterMap,
    reset_marker: crate::acquisition::RegisterAddress,
    profile: SimulatorProfile,
    rng: StdRng,
    phase: Phase,
    order: f64,
    feedback: f64,
    loaded: bool,
    weight: f64,
    faults: Vec<FaultBit>,
    reset_hold: f64,
}

impl CraneSimulator {
    pub fn new(image: ControllerImage, registers: RegisterMap, faults: &FaultConfig, seed: u64) -> Self {
        let fault_bits = faults
            .definitions
            .iter()
            .map(|def| FaultBit {
                block: BlockId::DataBlock(faults.db),
                byte: def.byte,
                bit: def.bit,
                remaining: None,
            })
            .collect();

        let mut sim = Self {
            image,
            registers,
            reset_marker: faults.reset_marker,
            profile: SimulatorProfile::default(),
            rng: StdRng::seed_from_u64(seed),
            phase: Phase::Dwell { remaining: 0.5 },
            order: 0.0,
            feedback: 0.0,
            loaded: false,
            weight: EMPTY_WEIGHT.0,
            faults: fault_bits,
            reset_hold: 0.0,
        };
        sim.write_image();
        sim
    }

    pub fn with_profile(mut self, profile: SimulatorProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn order_speed(&self) -> i16 {
        to_i16(self.order)
    }

    pub fn feedback_speed(&self) -> i16 {
        to_i16(self.feedback)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn active_faults(&self) -> usize {
        self.faults.iter().filter(|f| f.remaining.is_some()).count()
    }

    /// Advance the simulation by `dt` seconds and publish the new values.
    pub fn step(&mut self, dt: f64) {
        if !(dt.is_finite() && dt > 0.0) {
            return;
        }
        self.advance_motion(dt);
        self.advance_feedback(dt);
        self.advance_faults(dt);
        self.write_image();
    }

    fn advance_motion(&mut self, dt: f64) {
        let ramp = RAMP_RATE * dt;
        let phase = self.phase;
        self.phase = match phase {
            Phase::Dwell { remaining } if remaining > dt => Phase::Dwell {
                remaining: remaining - dt,
            },
            Phase::Dwell { .. } => {
                self.begin_move();
                let magnitude = f64::from(self.rng.gen_range(CRUISE_SPEED_RANGE.0..=CRUISE_SPEED_RANGE.1));
                let target = if self.rng.gen_bool(0.5) { magnitude } else { -magnitude };
                Phase::Accelerate { target }
            }
            Phase::Accelerate { target } => {
                self.order = approach(self.order, target, ramp);
                if self.order == target {
                    Phase::Cruise {
                        target,
                        remaining: self.rng.gen_range(CRUISE_SECS_RANGE.0..CRUISE_SECS_RANGE.1),
                    }
                } else {
                    Phase::Accelerate { target }
                }
            }
            Phase::Cruise { target, remaining } if remaining > dt => Phase::Cruise {
                target,
                remaining: remaining - dt,
            },
            Phase::Cruise { .. } => Phase::Decelerate,
            Phase::Decelerate => {
                self.order = approach(self.order, 0.0, ramp);
                if self.order == 0.0 {
                    Phase::Dwell {
                        remaining: self.rng.gen_range(DWELL_SECS_RANGE.0..DWELL_SECS_RANGE.1),
                    }
                } else {
                    Phase::Decelerate
                }
            }
        };
    }

    /// Pick up or set down a container before the next move.
    fn begin_move(&mut self) {
        if self.rng.gen_bool(LOAD_TOGGLE_PROBABILITY) {
            self.loaded = !self.loaded;
        }
        let (mean, sd) = if self.loaded { LOADED_WEIGHT } else { EMPTY_WEIGHT };
        self.weight = (mean + sd * self.gaussian()).max(0.0);
    }

    fn gaussian(&mut self) -> f64 {
        self.rng.sample(StandardNormal)
    }

    fn advance_feedback(&mut self, dt: f64) {
        let tau = self.profile.feedback_tau_secs.max(dt);
        self.feedback += (self.order - self.feedback) * (dt / tau);
        // Noise only while the drive is turning
        if self.order != 0.0 || self.feedback.abs() > 1.0 {
            self.feedback += FEEDBACK_NOISE * self.gaussian();
        } else {
            self.feedback = 0.0;
        }
    }

    fn advance_faults(&mut self, dt: f64) {
        self.reset_hold = (self.reset_hold - dt).max(0.0);
        let activation = (self.profile.fault_rate_per_sec * dt).clamp(0.0, 1.0);

        let mut cleared = false;
        for fault in &mut self.faults {
            match fault.remaining {
                Some(remaining) if remaining > dt => fault.remaining = Some(remaining - dt),
                Some(_) => {
                    fault.remaining = None;
                    cleared = true;
                }
                None if self.rng.gen_bool(activation) => {
                    fault.remaining = Some(self.rng.gen_range(FAULT_SECS_RANGE.0..FAULT_SECS_RANGE.1));
                }
                None => {}
            }
        }
        if cleared && self.rng.gen_bool(RESET_PRESS_PROBABILITY) {
            self.reset_hold = RESET_HOLD_SECS;
        }
    }

    fn write_image(&self) {
        let r = &self.registers;
        self.image.set_int(r.order_speed.block(), r.order_speed.byte, to_i16(self.order));
        self.image
            .set_int(r.feedback_speed.block(), r.feedback_speed.byte, to_i16(self.feedback));
        self.image
            .set_bit(r.load_lock.block(), r.load_lock.byte, r.load_lock.bit, self.loaded);
        self.image.set_int(r.weight.block(), r.weight.byte, to_i16(self.weight));

        for fault in &self.faults {
            self.image
                .set_bit(fault.block, fault.byte, fault.bit, fault.remaining.is_some());
        }
        let m = &self.reset_marker;
        self.image.set_bit(m.block(), m.byte, m.bit, self.reset_hold > 0.0);
    }

    /// Step every `tick` until cancelled.
    pub async fn run(mut self, tick: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last = tokio::time::Instant::now();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                now = interval.tick() => {
                    let dt = now.saturating_duration_since(last).as_secs_f64();
                    last = now;
                    self.step(dt);
                }
            }
        }
    }
}

fn approach(value: f64, target: f64, step: f64) -> f64 {
    if (target - value).abs() <= step {
        target
    } else if target > value {
        value + step
    } else {
        value - step
    }
}

fn to_i16(value: f64) -> i16 {
    value.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EdgeConfig;

    fn simulator(seed: u64) -> (CraneSimulator, ControllerImage) {
        let config = EdgeConfig::default();
        let image = ControllerImage::new();
        let sim = CraneSimulator::new(image.clone(), config.registers.clone(), &config.faults, seed);
        (sim, image)
    }

    #[test]
    fn test_moves_and_returns_to_rest() {
        let (mut sim, _) = simulator(7);
        let mut peak = 0i16;
        let mut stopped_after_move = false;
        for _ in 0..2_000 {
            sim.step(0.05);
            peak = peak.max(sim.order_speed().saturating_abs());
            if peak >= CRUISE_SPEED_RANGE.0 && sim.order_speed() == 0 {
                stopped_after_move = true;
            }
        }
        assert!(peak >= CRUISE_SPEED_RANGE.0, "peak {peak}");
        assert!(peak <= CRUISE_SPEED_RANGE.1);
        assert!(stopped_after_move);
    }

    #[test]
    fn test_feedback_lags_command_while_accelerating() {
        let (mut sim, _) = simulator(11);
        // Run until the command starts ramping
        for _ in 0..200 {
            sim.step(0.05);
            if sim.order_speed().saturating_abs() >= 200 {
                break;
            }
        }
        assert!(sim.order_speed().saturating_abs() >= 200);
        assert!(sim.feedback_speed().saturating_abs() < sim.order_speed().saturating_abs());
    }

    #[test]
    fn test_values_land_in_configured_registers() {
        let config = EdgeConfig::default();
        let (mut sim, image) = simulator(3);
        for _ in 0..100 {
            sim.step(0.05);
        }
        let r = &config.registers;
        assert_eq!(image.int(r.order_speed.block(), r.order_speed.byte), sim.order_speed());
        assert_eq!(image.int(r.feedback_speed.block(), r.feedback_speed.byte), sim.feedback_speed());
        assert_eq!(
            image.bit(r.load_lock.block(), r.load_lock.byte, r.load_lock.bit),
            sim.is_loaded()
        );
    }

    #[test]
    fn test_fault_bits_activate_and_clear() {
        let config = EdgeConfig::default();
        let (sim, image) = simulator(5);
        let mut sim = sim.with_profile(SimulatorProfile {
            fault_rate_per_sec: 5.0,
            ..SimulatorProfile::default()
        });

        sim.step(1.0);
        assert_eq!(sim.active_faults(), config.faults.definitions.len());
        let def = &config.faults.definitions[0];
        assert!(image.bit(BlockId::DataBlock(config.faults.db), def.byte, def.bit));

        sim = sim.with_profile(SimulatorProfile {
            fault_rate_per_sec: 0.0,
            ..SimulatorProfile::default()
        });
        sim.step(FAULT_SECS_RANGE.1 + 1.0);
        assert_eq!(sim.active_faults(), 0);
        assert!(!image.bit(BlockId::DataBlock(config.faults.db), def.byte, def.bit));
    }

    #[test]
    fn test_same_seed_same_trajectory() {
        let (mut a, _) = simulator(42);
        let (mut b, _) = simulator(42);
        for _ in 0..500 {
            a.step(0.05);
            b.step(0.05);
            assert_eq!(a.order_speed(), b.order_speed());
            assert_eq!(a.feedback_speed(), b.feedback_speed());
        }
    }

    #[test]
    fn test_non_positive_dt_is_ignored() {
        let (mut sim, _) = simulator(1);
        sim.step(0.0);
        sim.step(-1.0);
        sim.step(f64::NAN);
        assert_eq!(sim.order_speed(), 0);
    }
}
