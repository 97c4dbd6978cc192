//! Config validation: unknown-key detection with Levenshtein suggestions
//! and operating-range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::{BTreeSet, HashSet};

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Every valid dotted key path of `EdgeConfig`.
///
/// Array-of-table entries (`[[devices]]`, `[[faults.definitions]]`) share
/// their parent's prefix. Keep in sync with crane_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [site]
        "site",
        "site.name",
        // [[devices]]
        "devices",
        "devices.id",
        "devices.address",
        "devices.rack",
        "devices.slot",
        // [polling]
        "polling",
        "polling.speed_threshold",
        "polling.idle_period_secs",
        "polling.active_period_secs",
        "polling.min_event_duration_secs",
        "polling.max_event_samples",
        // [connection]
        "connection",
        "connection.connect_timeout_secs",
        "connection.read_timeout_secs",
        "connection.reconnect_delay_secs",
        "connection.max_reconnect_delay_secs",
        "connection.post_connect_delay_secs",
        // [registers]
        "registers",
        "registers.order_speed",
        "registers.order_speed.area",
        "registers.order_speed.db",
        "registers.order_speed.byte",
        "registers.order_speed.bit",
        "registers.feedback_speed",
        "registers.feedback_speed.area",
        "registers.feedback_speed.db",
        "registers.feedback_speed.byte",
        "registers.feedback_speed.bit",
        "registers.load_lock",
        "registers.load_lock.area",
        "registers.load_lock.db",
        "registers.load_lock.byte",
        "registers.load_lock.bit",
        "registers.weight",
        "registers.weight.area",
        "registers.weight.db",
        "registers.weight.byte",
        "registers.weight.bit",
        // [faults]
        "faults",
        "faults.db",
        "faults.min_interval_secs",
        "faults.reset_marker",
        "faults.reset_marker.area",
        "faults.reset_marker.db",
        "faults.reset_marker.byte",
        "faults.reset_marker.bit",
        "faults.definitions",
        "faults.definitions.name",
        "faults.definitions.byte",
        "faults.definitions.bit",
        // [sinks]
        "sinks",
        "sinks.data_dir",
        "sinks.durable_log",
        "sinks.durable_log.movement_file",
        "sinks.durable_log.fault_file",
        "sinks.influx",
        "sinks.influx.enabled",
        "sinks.influx.url",
        "sinks.influx.org",
        "sinks.influx.bucket",
        "sinks.influx.token",
        "sinks.influx.timeout_secs",
        "sinks.influx.queue_capacity",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// Tables inside arrays contribute keys under the array's own path, so
/// `[[devices]] id = "A"` yields `devices` and `devices.id`. Paths are
/// deduplicated and sorted.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = BTreeSet::new();
    collect_keys(value, prefix, &mut keys);
    keys.into_iter().collect()
}

fn collect_keys(value: &toml::Value, prefix: &str, keys: &mut BTreeSet<String>) {
    match value {
        toml::Value::Table(table) => {
            for (k, v) in table {
                let path = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                keys.insert(path.clone());
                collect_keys(v, &path, keys);
            }
        }
        toml::Value::Array(items) => {
            for item in items.iter().filter(|i| i.is_table()) {
                collect_keys(item, prefix, keys);
            }
        }
        _ => {}
    }
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let b_len = b_chars.len();
    if a.is_empty() {
        return b_len;
    }
    if b_len == 0 {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
///
/// Ties resolve alphabetically so the suggestion is stable.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (levenshtein(unknown, k), *k))
        .filter(|(dist, _)| *dist <= 3)
        .min()
        .map(|(_, k)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys; it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are reported by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Operating Range Checks
// ============================================================================

/// Values that are legal but unusual for a crane deployment.
pub fn validate_ranges(config: &super::EdgeConfig) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let mut warn = |field: &str, message: String| {
        warnings.push(ValidationWarning {
            field: field.to_string(),
            message,
            suggestion: None,
        });
    };

    if config.devices.is_empty() {
        warn("devices", "No devices configured; only --simulate can run".to_string());
    }

    let p = &config.polling;
    if p.speed_threshold < 10 {
        warn(
            "polling.speed_threshold",
            format!("speed_threshold = {} is very low; drive noise may start events", p.speed_threshold),
        );
    }
    if p.active_period_secs < 0.02 {
        warn(
            "polling.active_period_secs",
            format!("active_period_secs = {:.3} polls faster than 50 Hz", p.active_period_secs),
        );
    }

    let c = &config.connection;
    if !(1.0..=10.0).contains(&c.reconnect_delay_secs) {
        warn(
            "connection.reconnect_delay_secs",
            format!("reconnect_delay_secs = {:.1} is outside the usual 1-10 s", c.reconnect_delay_secs),
        );
    }
    if c.read_timeout_secs >= p.idle_period_secs * 20.0 {
        warn(
            "connection.read_timeout_secs",
            format!(
                "read_timeout_secs = {:.1} lets a stalled read block many idle cycles",
                c.read_timeout_secs
            ),
        );
    }

    if config.faults.definitions.is_empty() {
        warn("faults.definitions", "No fault definitions; fault tracking is off".to_string());
    }

    if config.sinks.influx.enabled && config.sinks.influx.token.is_none() {
        warn(
            "sinks.influx.token",
            "InfluxDB enabled without a token; writes are sent unauthenticated".to_string(),
        );
    }

    warnings
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("slot", "slot"), 0);
        assert_eq!(levenshtein("treshold", "threshold"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_keys_through_arrays_of_tables() {
        let toml: toml::Value = r#"
            [[devices]]
            id = "A"
            address = "1"

            [[devices]]
            id = "B"
            address = "2"
            slot = 1
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert_eq!(keys, vec!["devices", "devices.address", "devices.id", "devices.slot"]);
    }

    #[test]
    fn test_typo_gets_suggestion() {
        let warnings = validate_unknown_keys(
            r#"
            [polling]
            speed_treshold = 60
        "#,
        );
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "polling.speed_treshold");
        assert_eq!(warnings[0].suggestion.as_deref(), Some("polling.speed_threshold"));
    }

    #[test]
    fn test_typo_inside_array_entry() {
        let warnings = validate_unknown_keys(
            r#"
            [[faults.definitions]]
            name = "X"
            byte = 202
            bitt = 3
        "#,
        );
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].suggestion.as_deref(), Some("faults.definitions.bit"));
    }

    #[test]
    fn test_valid_keys_produce_no_warnings() {
        let warnings = validate_unknown_keys(
            r#"
            [[devices]]
            id = "ARMGC_246"
            address = "10.200.72.34"
            [registers.order_speed]
            db = 57
            byte = 8
            [sinks.influx]
            token = "secret"
        "#,
        );
        assert!(warnings.is_empty(), "{:?}", warnings);
    }

    #[test]
    fn test_far_off_key_has_no_suggestion() {
        let warnings = validate_unknown_keys("completely_unrelated_section = 1");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].suggestion.is_none());
    }

    #[test]
    fn test_default_ranges_only_flag_missing_devices_and_token() {
        let warnings = validate_ranges(&super::super::EdgeConfig::default());
        let fields: Vec<&str> = warnings.iter().map(|w| w.field.as_str()).collect();
        assert_eq!(fields, vec!["devices", "sinks.influx.token"]);
    }
}
