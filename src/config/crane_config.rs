//! Edge configuration: cranes, polling cadence, register map, faults, sinks
//!
//! Every field has a serde default equal to the field deployment's values, so
//! an empty file (or no file) yields a working configuration apart from the
//! device list.

use super::defaults;
use crate::acquisition::RegisterAddress;
use crate::types::FaultDefinition;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "GANTRY_EDGE_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "gantry_edge.toml";

/// Environment variable overriding `sinks.influx.token`.
pub const INFLUX_TOKEN_ENV_VAR: &str = "INFLUX_TOKEN";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one edge node.
///
/// Load with `EdgeConfig::load()` which searches:
/// 1. `$GANTRY_EDGE_CONFIG`
/// 2. `./gantry_edge.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeConfig {
    #[serde(default)]
    pub site: SiteInfo,

    /// Cranes to monitor, one worker each
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Where the movement signals live in controller memory
    #[serde(default)]
    pub registers: RegisterMap,

    #[serde(default)]
    pub faults: FaultConfig,

    #[serde(default)]
    pub sinks: SinkConfig,
}

/// Where a configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(p) => write!(f, "{}", p.display()),
            Self::Defaults => f.write_str("built-in defaults"),
        }
    }
}

impl EdgeConfig {
    /// Load using the standard search order.
    ///
    /// A file that exists but fails to parse or validate is an error; only a
    /// missing file falls through to the next candidate.
    pub fn load() -> Result<(Self, ConfigSource), ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                let config = Self::load_from_file(&p)?;
                info!(path = %p.display(), site = %config.site.name, "Loaded config from {}", CONFIG_ENV_VAR);
                return Ok((config, ConfigSource::File(p)));
            }
            warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            let config = Self::load_from_file(&local)?;
            info!(site = %config.site.name, "Loaded config from ./{}", LOCAL_CONFIG_FILE);
            return Ok((config, ConfigSource::File(local)));
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok((config, ConfigSource::Defaults))
    }

    /// Load from a specific TOML file, apply environment overrides, validate.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let mut config = Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse and validate TOML text. Unknown keys are logged, not rejected.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        for w in super::validation::validate_ranges(&config) {
            warn!("{}", w);
        }
        Ok(config)
    }

    /// `INFLUX_TOKEN` replaces the configured token when set and non-empty.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var(INFLUX_TOKEN_ENV_VAR) {
            if !token.is_empty() {
                self.sinks.influx.token = Some(token);
            }
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        // Devices
        let mut ids = HashSet::new();
        for (i, d) in self.devices.iter().enumerate() {
            if d.id.trim().is_empty() {
                errors.push(format!("devices[{i}].id must not be empty"));
            } else if !ids.insert(d.id.as_str()) {
                errors.push(format!("devices[{i}].id '{}' is duplicated", d.id));
            }
            if d.address.trim().is_empty() {
                errors.push(format!("devices[{i}].address must not be empty"));
            }
        }

        // Polling
        let p = &self.polling;
        if p.speed_threshold <= 0 {
            errors.push(format!("polling.speed_threshold = {} must be > 0", p.speed_threshold));
        }
        Self::check_positive(p.idle_period_secs, "polling.idle_period_secs", &mut errors);
        Self::check_positive(p.active_period_secs, "polling.active_period_secs", &mut errors);
        if p.active_period_secs.is_finite() && p.idle_period_secs.is_finite() && p.active_period_secs > p.idle_period_secs {
            errors.push(format!(
                "polling.active_period_secs ({:.3}) must be <= idle_period_secs ({:.3})",
                p.active_period_secs, p.idle_period_secs
            ));
        }
        Self::check_non_negative(p.min_event_duration_secs, "polling.min_event_duration_secs", &mut errors);
        if p.max_event_samples < 2 {
            errors.push(format!("polling.max_event_samples = {} must be >= 2", p.max_event_samples));
        }

        // Connection
        let c = &self.connection;
        Self::check_positive(c.connect_timeout_secs, "connection.connect_timeout_secs", &mut errors);
        Self::check_positive(c.read_timeout_secs, "connection.read_timeout_secs", &mut errors);
        Self::check_positive(c.reconnect_delay_secs, "connection.reconnect_delay_secs", &mut errors);
        Self::check_positive(c.max_reconnect_delay_secs, "connection.max_reconnect_delay_secs", &mut errors);
        if c.max_reconnect_delay_secs < c.reconnect_delay_secs {
            errors.push(format!(
                "connection.max_reconnect_delay_secs ({:.1}) must be >= reconnect_delay_secs ({:.1})",
                c.max_reconnect_delay_secs, c.reconnect_delay_secs
            ));
        }
        Self::check_non_negative(c.post_connect_delay_secs, "connection.post_connect_delay_secs", &mut errors);

        // Register map
        for (name, addr) in self.registers.named() {
            Self::check_bit(addr.bit, &format!("registers.{name}.bit"), &mut errors);
        }

        // Faults
        let f = &self.faults;
        Self::check_non_negative(f.min_interval_secs, "faults.min_interval_secs", &mut errors);
        Self::check_bit(f.reset_marker.bit, "faults.reset_marker.bit", &mut errors);
        let mut names = HashSet::new();
        for (i, def) in f.definitions.iter().enumerate() {
            if def.name.trim().is_empty() {
                errors.push(format!("faults.definitions[{i}].name must not be empty"));
            } else if !names.insert(def.name.as_str()) {
                errors.push(format!("faults.definitions[{i}].name '{}' is duplicated", def.name));
            }
            Self::check_bit(def.bit, &format!("faults.definitions[{i}].bit"), &mut errors);
        }
        if let (Some(lo), Some(hi)) = (
            f.definitions.iter().map(|d| d.byte).min(),
            f.definitions.iter().map(|d| d.byte).max(),
        ) {
            if hi - lo >= defaults::MAX_FAULT_BLOCK_SPAN {
                errors.push(format!(
                    "faults.definitions span bytes {lo}..={hi}, more than {} bytes in one read",
                    defaults::MAX_FAULT_BLOCK_SPAN
                ));
            }
        }

        // Sinks
        let s = &self.sinks;
        if s.durable_log.movement_file.trim().is_empty() || s.durable_log.fault_file.trim().is_empty() {
            errors.push("sinks.durable_log file names must not be empty".to_string());
        } else if s.durable_log.movement_file == s.durable_log.fault_file {
            errors.push("sinks.durable_log.movement_file and fault_file must differ".to_string());
        }
        if s.influx.enabled {
            if s.influx.url.trim().is_empty() {
                errors.push("sinks.influx.url must not be empty when enabled".to_string());
            }
            if s.influx.bucket.trim().is_empty() {
                errors.push("sinks.influx.bucket must not be empty when enabled".to_string());
            }
            Self::check_positive(s.influx.timeout_secs, "sinks.influx.timeout_secs", &mut errors);
            if s.influx.queue_capacity == 0 {
                errors.push("sinks.influx.queue_capacity must be > 0".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_positive(value: f64, name: &str, errors: &mut Vec<String>) {
        // NaN comparisons silently pass
        if !value.is_finite() || value <= 0.0 {
            errors.push(format!("{name} = {value} must be a finite number > 0"));
        }
    }

    fn check_non_negative(value: f64, name: &str, errors: &mut Vec<String>) {
        if !value.is_finite() || value < 0.0 {
            errors.push(format!("{name} = {value} must be a finite number >= 0"));
        }
    }

    fn check_bit(bit: u8, name: &str, errors: &mut Vec<String>) {
        if bit > 7 {
            errors.push(format!("{name} = {bit} must be in 0..=7"));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Site / Devices
// ============================================================================

/// Identification metadata; appears in logs only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteInfo {
    #[serde(default = "default_site_name")]
    pub name: String,
}

fn default_site_name() -> String {
    "DEFAULT".to_string()
}

impl Default for SiteInfo {
    fn default() -> Self {
        Self {
            name: default_site_name(),
        }
    }
}

/// One crane controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Crane identifier used in logs and records (e.g. "ARMGC_246")
    pub id: String,
    /// Controller network address
    pub address: String,
    #[serde(default)]
    pub rack: u16,
    #[serde(default = "default_slot")]
    pub slot: u16,
}

fn default_slot() -> u16 {
    2
}

impl DeviceConfig {
    pub fn new(id: &str, address: &str) -> Self {
        Self {
            id: id.to_string(),
            address: address.to_string(),
            rack: 0,
            slot: default_slot(),
        }
    }
}

// ============================================================================
// Polling
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// |commanded speed| at or above this starts an event; below it stops one
    #[serde(default = "default_speed_threshold")]
    pub speed_threshold: i16,

    #[serde(default = "default_idle_period")]
    pub idle_period_secs: f64,

    #[serde(default = "default_active_period")]
    pub active_period_secs: f64,

    /// Events with duration <= this are discarded
    #[serde(default = "default_min_event_duration")]
    pub min_event_duration_secs: f64,

    /// An event reaching this many samples is aborted (stuck order register)
    #[serde(default = "default_max_event_samples")]
    pub max_event_samples: usize,
}

fn default_speed_threshold() -> i16 { defaults::SPEED_THRESHOLD }
fn default_idle_period() -> f64 { defaults::IDLE_POLL_PERIOD_SECS }
fn default_active_period() -> f64 { defaults::ACTIVE_POLL_PERIOD_SECS }
fn default_min_event_duration() -> f64 { defaults::MIN_EVENT_DURATION_SECS }
fn default_max_event_samples() -> usize { defaults::MAX_EVENT_SAMPLES }

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            speed_threshold: default_speed_threshold(),
            idle_period_secs: default_idle_period(),
            active_period_secs: default_active_period(),
            min_event_duration_secs: default_min_event_duration(),
            max_event_samples: default_max_event_samples(),
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: f64,

    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: f64,

    /// First reconnect delay after a failure
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: f64,

    /// Cap for the doubling reconnect delay; equal to the base delay means fixed
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_secs: f64,

    #[serde(default = "default_post_connect_delay")]
    pub post_connect_delay_secs: f64,
}

fn default_connect_timeout() -> f64 { defaults::CONNECT_TIMEOUT_SECS }
fn default_read_timeout() -> f64 { defaults::READ_TIMEOUT_SECS }
fn default_reconnect_delay() -> f64 { defaults::RECONNECT_DELAY_SECS }
fn default_max_reconnect_delay() -> f64 { defaults::MAX_RECONNECT_DELAY_SECS }
fn default_post_connect_delay() -> f64 { defaults::POST_CONNECT_DELAY_SECS }

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            reconnect_delay_secs: default_reconnect_delay(),
            max_reconnect_delay_secs: default_max_reconnect_delay(),
            post_connect_delay_secs: default_post_connect_delay(),
        }
    }
}

// ============================================================================
// Register Map
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMap {
    #[serde(default = "default_order_speed")]
    pub order_speed: RegisterAddress,

    #[serde(default = "default_feedback_speed")]
    pub feedback_speed: RegisterAddress,

    #[serde(default = "default_load_lock")]
    pub load_lock: RegisterAddress,

    #[serde(default = "default_weight")]
    pub weight: RegisterAddress,
}

fn default_order_speed() -> RegisterAddress {
    RegisterAddress::db_word(defaults::DRIVE_DB, defaults::ORDER_SPEED_BYTE)
}
fn default_feedback_speed() -> RegisterAddress {
    RegisterAddress::db_word(defaults::DRIVE_DB, defaults::FEEDBACK_SPEED_BYTE)
}
fn default_load_lock() -> RegisterAddress {
    RegisterAddress::db_bit(defaults::LOAD_LOCK_DB, defaults::LOAD_LOCK_BYTE, defaults::LOAD_LOCK_BIT)
}
fn default_weight() -> RegisterAddress {
    RegisterAddress::db_word(defaults::DRIVE_DB, defaults::WEIGHT_BYTE)
}

impl RegisterMap {
    pub fn named(&self) -> [(&'static str, &RegisterAddress); 4] {
        [
            ("order_speed", &self.order_speed),
            ("feedback_speed", &self.feedback_speed),
            ("load_lock", &self.load_lock),
            ("weight", &self.weight),
        ]
    }
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self {
            order_speed: default_order_speed(),
            feedback_speed: default_feedback_speed(),
            load_lock: default_load_lock(),
            weight: default_weight(),
        }
    }
}

// ============================================================================
// Faults
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultConfig {
    /// Data block holding every fault bit
    #[serde(default = "default_fault_db")]
    pub db: u16,

    /// Minimum time between fault block reads; 0 samples every poll cycle
    #[serde(default)]
    pub min_interval_secs: f64,

    #[serde(default = "default_reset_marker")]
    pub reset_marker: RegisterAddress,

    #[serde(default = "default_fault_definitions")]
    pub definitions: Vec<FaultDefinition>,
}

fn default_fault_db() -> u16 { defaults::FAULT_DB }

fn default_reset_marker() -> RegisterAddress {
    RegisterAddress::marker_bit(defaults::RESET_MARKER_BYTE, defaults::RESET_MARKER_BIT)
}

fn default_fault_definitions() -> Vec<FaultDefinition> {
    vec![
        FaultDefinition::new("Spreader_Land_Fault_XT", 202, 3),
        FaultDefinition::new("Spreader_Land_Fault_YT", 202, 4),
        FaultDefinition::new("Spreader_Land_Fault_YD", 202, 5),
        FaultDefinition::new("SPSS_Trolley_Dir_Not_Clear", 212, 6),
    ]
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            db: default_fault_db(),
            min_interval_secs: 0.0,
            reset_marker: default_reset_marker(),
            definitions: default_fault_definitions(),
        }
    }
}

// ============================================================================
// Sinks
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Directory for the durable logs and the process lock
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub durable_log: DurableLogConfig,

    #[serde(default)]
    pub influx: InfluxConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(defaults::DATA_DIR)
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            durable_log: DurableLogConfig::default(),
            influx: InfluxConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurableLogConfig {
    #[serde(default = "default_movement_file")]
    pub movement_file: String,

    #[serde(default = "default_fault_file")]
    pub fault_file: String,
}

fn default_movement_file() -> String { defaults::MOVEMENT_LOG_FILE.to_string() }
fn default_fault_file() -> String { defaults::FAULT_LOG_FILE.to_string() }

impl Default for DurableLogConfig {
    fn default() -> Self {
        Self {
            movement_file: default_movement_file(),
            fault_file: default_fault_file(),
        }
    }
}

/// InfluxDB v2 write target.
#[derive(Clone, Serialize, Deserialize)]
pub struct InfluxConfig {
    /// When false only the durable log is written
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_influx_url")]
    pub url: String,

    #[serde(default = "default_influx_org")]
    pub org: String,

    #[serde(default = "default_influx_bucket")]
    pub bucket: String,

    /// API token; `INFLUX_TOKEN` overrides. Never written back out.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    #[serde(default = "default_influx_timeout")]
    pub timeout_secs: f64,

    /// Records waiting for the time-series writer; beyond this they are
    /// dropped and counted
    #[serde(default = "default_influx_queue_capacity")]
    pub queue_capacity: usize,
}

impl std::fmt::Debug for InfluxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxConfig")
            .field("enabled", &self.enabled)
            .field("url", &self.url)
            .field("org", &self.org)
            .field("bucket", &self.bucket)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("timeout_secs", &self.timeout_secs)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

fn default_true() -> bool { true }
fn default_influx_url() -> String { defaults::INFLUX_URL.to_string() }
fn default_influx_org() -> String { defaults::INFLUX_ORG.to_string() }
fn default_influx_bucket() -> String { defaults::INFLUX_BUCKET.to_string() }
fn default_influx_timeout() -> f64 { defaults::INFLUX_TIMEOUT_SECS }
fn default_influx_queue_capacity() -> usize { defaults::TIMESERIES_QUEUE_CAPACITY }

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            url: default_influx_url(),
            org: default_influx_org(),
            bucket: default_influx_bucket(),
            token: None,
            timeout_secs: default_influx_timeout(),
            queue_capacity: default_influx_queue_capacity(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::RegisterArea;

    #[test]
    fn test_defaults_validate() {
        let config = EdgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.polling.speed_threshold, 50);
        assert_eq!(config.registers.order_speed.to_string(), "DB57.8.0");
        assert_eq!(config.registers.load_lock.to_string(), "DB58.185.1");
        assert_eq!(config.faults.reset_marker.to_string(), "M103.2");
        assert_eq!(config.faults.definitions.len(), 4);
        assert!(config.sinks.influx.enabled);
    }

    #[test]
    fn test_empty_toml_is_defaults() {
        let config = EdgeConfig::from_toml_str("").unwrap();
        assert!(config.devices.is_empty());
        assert_eq!(config.polling.idle_period_secs, 0.5);
        assert_eq!(config.connection.reconnect_delay_secs, 5.0);
    }

    #[test]
    fn test_parse_devices_and_overrides() {
        let toml = r#"
            [site]
            name = "Terminal B"

            [[devices]]
            id = "ARMGC_246"
            address = "10.200.72.34"

            [[devices]]
            id = "ARMGC_212"
            address = "10.200.71.12"
            rack = 0
            slot = 1

            [polling]
            speed_threshold = 80

            [registers.load_lock]
            db = 60
            byte = 4
            bit = 7

            [faults]
            min_interval_secs = 3.0
            reset_marker = { area = "marker", byte = 10, bit = 0 }

            [[faults.definitions]]
            name = "Hoist_Overload"
            byte = 300
            bit = 0

            [sinks.influx]
            enabled = false
        "#;
        let config = EdgeConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.site.name, "Terminal B");
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].slot, 2);
        assert_eq!(config.devices[1].slot, 1);
        assert_eq!(config.polling.speed_threshold, 80);
        assert_eq!(config.polling.active_period_secs, 0.1);
        assert_eq!(config.registers.load_lock, RegisterAddress::db_bit(60, 4, 7));
        assert_eq!(config.registers.order_speed, RegisterAddress::db_word(57, 8));
        assert_eq!(config.faults.reset_marker.area, RegisterArea::Marker);
        assert_eq!(config.faults.definitions, vec![FaultDefinition::new("Hoist_Overload", 300, 0)]);
        assert!(!config.sinks.influx.enabled);
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = EdgeConfig::default();
        config.devices = vec![DeviceConfig::new("A", "10.0.0.1"), DeviceConfig::new("A", "")];
        config.polling.active_period_secs = 1.0;
        config.polling.idle_period_secs = f64::NAN;
        config.faults.definitions.push(FaultDefinition::new("Spreader_Land_Fault_XT", 203, 9));

        let Err(ConfigError::Validation(errors)) = config.validate() else {
            panic!("expected validation errors");
        };
        let joined = errors.join("\n");
        assert!(joined.contains("devices[1].id 'A' is duplicated"));
        assert!(joined.contains("devices[1].address"));
        assert!(joined.contains("polling.idle_period_secs"));
        assert!(joined.contains("'Spreader_Land_Fault_XT' is duplicated"));
        assert!(joined.contains("bit = 9"));
    }

    #[test]
    fn test_active_slower_than_idle_rejected() {
        let mut config = EdgeConfig::default();
        config.polling.active_period_secs = 1.0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("active_period_secs"));
    }

    #[test]
    fn test_max_reconnect_below_base_rejected() {
        let mut config = EdgeConfig::default();
        config.connection.max_reconnect_delay_secs = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_preserves_devices() {
        let mut config = EdgeConfig::default();
        config.devices.push(DeviceConfig::new("RMG_07", "192.168.0.7"));
        let text = config.to_toml().unwrap();
        let back = EdgeConfig::from_toml_str(&text).unwrap();
        assert_eq!(back.devices, config.devices);
        assert_eq!(back.faults.definitions, config.faults.definitions);
    }

    #[test]
    fn test_token_never_serialized() {
        let mut config = EdgeConfig::default();
        config.sinks.influx.token = Some("s3cr3t-token".to_string());
        let text = config.to_toml().unwrap();
        assert!(!text.contains("s3cr3t-token"));
        assert!(!text.contains("token"));
        assert!(text.contains("bucket = \"cranepdm_kpis\""));
    }

    #[test]
    fn test_debug_masks_token() {
        let mut influx = InfluxConfig::default();
        influx.token = Some("s3cr3t-token".to_string());
        let debug = format!("{influx:?}");
        assert!(!debug.contains("s3cr3t-token"));
        assert!(debug.contains("token: Some(\"***\")"));
        assert!(format!("{:?}", InfluxConfig::default()).contains("token: None"));
    }

    #[test]
    fn test_event_sample_cap_must_allow_an_event() {
        let mut config = EdgeConfig::default();
        assert_eq!(config.polling.max_event_samples, 18_000);
        config.polling.max_event_samples = 1;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("polling.max_event_samples"));
    }

    #[test]
    fn test_load_from_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[polling\nspeed_threshold = ").unwrap();
        let err = EdgeConfig::load_from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(ref p, _) if p == &path));
    }
}
