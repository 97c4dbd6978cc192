//! InfluxDB line protocol encoding
//!
//! `measurement,tag=value field=1.5,count=1i 1714552215000000000`
//!
//! Tags are sorted by key so identical series always serialise identically.
//! Non-finite float fields are dropped; a point without fields has no line.

use crate::kinematics::metrics::round_to;
use crate::types::{FaultEvent, MovementRecord, TelemetryRecord};

pub const MOVEMENT_MEASUREMENT: &str = "crane_movement";
pub const FAULT_MEASUREMENT: &str = "crane_faults";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

/// One time-series point.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, FieldValue)>,
    timestamp_ns: Option<i64>,
}

impl Point {
    pub fn new(measurement: &str) -> Self {
        Self {
            measurement: measurement.to_string(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp_ns: None,
        }
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push((key.to_string(), value.to_string()));
        self
    }

    pub fn float(mut self, key: &str, value: f64) -> Self {
        self.fields.push((key.to_string(), FieldValue::Float(value)));
        self
    }

    pub fn integer(mut self, key: &str, value: i64) -> Self {
        self.fields.push((key.to_string(), FieldValue::Integer(value)));
        self
    }

    pub fn timestamp_ns(mut self, ns: Option<i64>) -> Self {
        self.timestamp_ns = ns;
        self
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn field_value(&self, key: &str) -> Option<FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    /// Serialise to one line, or `None` if no finite field remains.
    pub fn to_line(&self) -> Option<String> {
        let fields: Vec<String> = self
            .fields
            .iter()
            .filter_map(|(key, value)| match value {
                FieldValue::Float(v) if v.is_finite() => Some(format!("{}={}", escape_key(key), v)),
                FieldValue::Float(_) => None,
                FieldValue::Integer(v) => Some(format!("{}={}i", escape_key(key), v)),
            })
            .collect();
        if fields.is_empty() {
            return None;
        }

        let mut tags: Vec<&(String, String)> = self.tags.iter().filter(|(_, v)| !v.is_empty()).collect();
        tags.sort_by(|a, b| a.0.cmp(&b.0));

        let mut line = escape_measurement(&self.measurement);
        for (key, value) in tags {
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&escape_key(value));
        }
        line.push(' ');
        line.push_str(&fields.join(","));
        if let Some(ns) = self.timestamp_ns {
            line.push(' ');
            line.push_str(&ns.to_string());
        }
        Some(line)
    }
}

impl From<&MovementRecord> for Point {
    fn from(record: &MovementRecord) -> Self {
        let k = &record.kpi;
        Point::new(MOVEMENT_MEASUREMENT)
            .tag("crane_id", &record.device_id)
            .tag("is_loaded", k.load_state().as_str())
            .float("duration_s", k.duration_secs)
            .float("peak_order", f64::from(k.peak_order))
            .float("peak_feedback", f64::from(k.peak_feedback))
            .float("max_error", f64::from(k.max_error))
            .float("rms_error", k.rms_error)
            .float("mean_stress", k.mean_stress)
            .float("reducer_damage", k.reducer_damage)
            .float("avg_weight", k.avg_weight)
            .timestamp_ns(record.timestamp.timestamp_nanos_opt())
    }
}

impl From<&FaultEvent> for Point {
    fn from(event: &FaultEvent) -> Self {
        Point::new(FAULT_MEASUREMENT)
            .tag("crane_id", &event.device_id)
            .tag("fault_name", &event.fault_name)
            .tag("event_type", event.kind.as_str())
            .float("downtime_s", round_to(event.downtime_secs, 2))
            .integer("count", event.count())
            .timestamp_ns(event.timestamp.timestamp_nanos_opt())
    }
}

impl From<&TelemetryRecord> for Point {
    fn from(record: &TelemetryRecord) -> Self {
        match record {
            TelemetryRecord::Movement(m) => Point::from(m),
            TelemetryRecord::Fault(f) => Point::from(f),
        }
    }
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_key(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}
