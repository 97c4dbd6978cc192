//! Kinematic health indices for crane movements
//!
//! Pure computation over buffered movement samples. See [`kpi_calculator`] for
//! the formulas.

pub mod kpi_calculator;
pub mod metrics;

pub use kpi_calculator::{compute_kpis, evaluate_event, EventVerdict, SampleColumns};

/// Weight of |tracking error| in the cable-reel stress index.
pub const STRESS_ERROR_WEIGHT: f64 = 0.6;

/// Weight of |Δfeedback| in the cable-reel stress index.
pub const STRESS_SPEED_DELTA_WEIGHT: f64 = 1.5;

/// Effective mass of the empty trolley/hoist.
pub const BASE_EFFECTIVE_MASS: f64 = 1.0;

/// Payload tonnage that adds one base mass (a ~50 t container doubles it).
pub const PAYLOAD_MASS_DIVISOR: f64 = 50.0;

/// Quadratic torque-impact coefficient of the reducer damage index.
pub const TORQUE_DAMAGE_COEFF: f64 = 0.0001;

/// Linear backlash-shock coefficient of the reducer damage index.
pub const BACKLASH_DAMAGE_COEFF: f64 = 0.005;

/// Substitute inter-sample delay when a clock anomaly yields `dt <= 0` (s).
pub const FALLBACK_DT_SECS: f64 = 0.1;
