//! Movement-event KPI computation
//!
//! Turns the buffered samples of one movement event into a [`KpiRecord`]:
//!
//! - **Tracking error**: `order - feedback` per sample; RMS and peak magnitude
//!   over the whole event.
//! - **Cable-reel stress**: `0.6·|error| + 1.5·|Δfeedback|` per step, averaged
//!   over the event length.
//! - **Reducer damage**: Miner's-rule style accumulator. Acceleration and jerk
//!   of the feedback speed are scaled by a payload-derived effective mass; the
//!   torque term is penalised quadratically and the backlash (jerk) term
//!   linearly.
//!
//! Everything here is pure: identical columns always produce an identical record.

use super::metrics::{majority, mean_i16, peak_abs, round_to};
use super::{
    BACKLASH_DAMAGE_COEFF, BASE_EFFECTIVE_MASS, FALLBACK_DT_SECS, PAYLOAD_MASS_DIVISOR, STRESS_ERROR_WEIGHT,
    STRESS_SPEED_DELTA_WEIGHT, TORQUE_DAMAGE_COEFF,
};
use crate::types::{KpiRecord, MovementEvent};

/// Column-oriented view of a movement event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleColumns {
    pub orders: Vec<i16>,
    pub feedbacks: Vec<i16>,
    pub loads: Vec<bool>,
    pub weights: Vec<i16>,
    pub dts: Vec<f64>,
}

impl SampleColumns {
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    fn is_consistent(&self) -> bool {
        let n = self.orders.len();
        self.feedbacks.len() == n && self.loads.len() == n && self.weights.len() == n && self.dts.len() == n
    }
}

impl From<&MovementEvent> for SampleColumns {
    fn from(event: &MovementEvent) -> Self {
        let samples = event.samples();
        Self {
            orders: samples.iter().map(|s| s.order_speed).collect(),
            feedbacks: samples.iter().map(|s| s.feedback_speed).collect(),
            loads: samples.iter().map(|s| s.is_loaded).collect(),
            weights: samples.iter().map(|s| s.weight).collect(),
            dts: event.dts().to_vec(),
        }
    }
}

/// Outcome of evaluating a completed movement event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventVerdict {
    /// Event produced a KPI record worth persisting
    Accepted(KpiRecord),
    /// Fewer than two samples
    TooFewSamples(usize),
    /// Duration at or below the minimum event duration
    TooShort { duration_secs: f64, samples: usize },
}

/// Compute the KPI record for one event.
///
/// Returns `None` when there are fewer than two samples or the columns have
/// mismatched lengths. Error statistics cover every sample; the kinematic terms
/// (acceleration, jerk, stress, damage) need a predecessor and start at index 1.
pub fn compute_kpis(columns: &SampleColumns) -> Option<KpiRecord> {
    let n = columns.len();
    if n < 2 || !columns.is_consistent() {
        return None;
    }

    let mut sum_sq_error = 0.0_f64;
    let mut max_abs_error = 0_i32;
    for (order, feedback) in columns.orders.iter().zip(&columns.feedbacks) {
        let error = i32::from(*order) - i32::from(*feedback);
        sum_sq_error += f64::from(error).powi(2);
        max_abs_error = max_abs_error.max(error.abs());
    }

    let mut total_stress = 0.0_f64;
    let mut total_damage = 0.0_f64;
    let mut prev_feedback = f64::from(columns.feedbacks[0]);
    let mut prev_accel = 0.0_f64;

    for i in 1..n {
        let dt = effective_dt(columns.dts[i]);
        let feedback = f64::from(columns.feedbacks[i]);
        let abs_error = (f64::from(columns.orders[i]) - feedback).abs();
        let speed_delta = feedback - prev_feedback;

        let accel = speed_delta / dt;
        let jerk = (accel - prev_accel) / dt;

        total_stress += STRESS_ERROR_WEIGHT * abs_error + STRESS_SPEED_DELTA_WEIGHT * speed_delta.abs();

        let effective_mass = BASE_EFFECTIVE_MASS + f64::from(columns.weights[i].max(0)) / PAYLOAD_MASS_DIVISOR;
        let torque_impact = accel.abs() * effective_mass;
        let backlash_shock = jerk.abs() * effective_mass;
        total_damage += torque_impact.powi(2) * TORQUE_DAMAGE_COEFF + backlash_shock * BACKLASH_DAMAGE_COEFF;

        prev_feedback = feedback;
        prev_accel = accel;
    }

    let count = n as f64;
    let duration: f64 = columns.dts.iter().sum();

    Some(KpiRecord {
        duration_secs: round_to(duration, 2),
        peak_order: peak_abs(&columns.orders),
        peak_feedback: peak_abs(&columns.feedbacks),
        max_error: max_abs_error,
        rms_error: round_to((sum_sq_error / count).sqrt(), 2),
        mean_stress: round_to(total_stress / count, 2),
        reducer_damage: round_to(total_damage, 2),
        avg_weight: round_to(mean_i16(&columns.weights), 1),
        is_loaded: majority(&columns.loads),
        sample_count: n,
    })
}

/// Evaluate a completed event against the minimum duration.
///
/// Events whose reported duration is `<= min_duration_secs` are discarded.
pub fn evaluate_event(event: &MovementEvent, min_duration_secs: f64) -> EventVerdict {
    let columns = SampleColumns::from(event);
    match compute_kpis(&columns) {
        None => EventVerdict::TooFewSamples(columns.len()),
        Some(kpi) if kpi.duration_secs <= min_duration_secs => EventVerdict::TooShort {
            duration_secs: kpi.duration_secs,
            samples: kpi.sample_count,
        },
        Some(kpi) => EventVerdict::Accepted(kpi),
    }
}

fn effective_dt(dt: f64) -> f64 {
    if dt.is_finite() && dt > 0.0 {
        dt
    } else {
        FALLBACK_DT_SECS
    }
}
