//! Edge Configuration Module
//!
//! Crane list, polling cadence, register map, fault table and sink endpoints
//! loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `--config PATH` on the command line
//! 2. `GANTRY_EDGE_CONFIG` environment variable (path to TOML file)
//! 3. `gantry_edge.toml` in the current working directory
//! 4. Built-in defaults (field deployment values, no devices)
//!
//! `INFLUX_TOKEN` overrides `sinks.influx.token` in every case.

mod crane_config;
pub mod defaults;
pub mod validation;

pub use crane_config::*;
