use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Names the controller a topic or log line belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub device_id: String,
    pub controller_type: String,
}

impl DeviceIdentity {
    pub fn new(device_id: impl Into<String>, controller_type: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            controller_type: controller_type.into(),
        }
    }

    /// `{deviceId}/{controllerType}/{metric}`
    pub fn topic(&self, metric: &str) -> String {
        format!("{}/{}/{}", self.device_id, self.controller_type, metric)
    }
}

/// One complete read of the controller's live registers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    /// Unix seconds when the read sequence started.
    pub timestamp: i64,
    /// Seconds spent reading.
    pub collection_time: f64,
    pub array_voltage: f32,
    pub array_current: f32,
    pub array_power: f32,
    pub charging_current: f32,
    pub charging_power: f32,
    pub battery_voltage: f32,
    pub battery_soc: u32,
    pub battery_temp: f32,
    pub battery_max_voltage: f32,
    pub battery_min_voltage: f32,
    pub device_temp: f32,
    pub energy_generated_daily: f32,
    pub charging_status: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Float(f32),
    Integer(u32),
    Seconds(f64),
}

impl MetricValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            MetricValue::Float(value) => f64::from(value),
            MetricValue::Integer(value) => f64::from(value),
            MetricValue::Seconds(value) => value,
        }
    }
}

/// A single named quantity derived from a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: &'static str,
    pub value: MetricValue,
    pub unit: &'static str,
    pub timestamp: i64,
}

/// Body published for each metric.
#[derive(Debug, Serialize)]
pub struct MetricPayload<'a> {
    pub value: MetricValue,
    pub unit: &'a str,
    pub timestamp: i64,
}

pub const COLLECTION_FAILURE_METRIC: &str = "collection-failure";

impl Metric {
    pub fn collection_failure(timestamp: i64) -> Self {
        Self {
            name: COLLECTION_FAILURE_METRIC,
            value: MetricValue::Integer(1),
            unit: "count",
            timestamp,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&MetricPayload {
            value: self.value,
            unit: self.unit,
            timestamp: self.timestamp,
        })
    }
}

impl TelemetrySnapshot {
    pub fn to_metrics(&self) -> Vec<Metric> {
        let timestamp = self.timestamp;
        let metric = |name, value, unit| Metric {
            name,
            value,
            unit,
            timestamp,
        };
        vec![
            metric("array-voltage", MetricValue::Float(self.array_voltage), "volts"),
            metric("array-current", MetricValue::Float(self.array_current), "amperes"),
            metric("array-power", MetricValue::Float(self.array_power), "watts"),
            metric("charging-current", MetricValue::Float(self.charging_current), "amperes"),
            metric("charging-power", MetricValue::Float(self.charging_power), "watts"),
            metric("battery-voltage", MetricValue::Float(self.battery_voltage), "volts"),
            metric("battery-soc", MetricValue::Integer(self.battery_soc), "percent"),
            metric("battery-temp", MetricValue::Float(self.battery_temp), "celsius"),
            metric(
                "battery-max-voltage",
                MetricValue::Float(self.battery_max_voltage),
                "volts",
            ),
            metric(
                "battery-min-voltage",
                MetricValue::Float(self.battery_min_voltage),
                "volts",
            ),
            metric("device-temp", MetricValue::Float(self.device_temp), "celsius"),
            metric(
                "energy-generated-daily",
                MetricValue::Float(self.energy_generated_daily),
                "kilowatt-hours",
            ),
            metric("charging-status", MetricValue::Integer(self.charging_status), "code"),
            metric("collection-time", MetricValue::Seconds(self.collection_time), "seconds"),
        ]
    }
}

/// Destination for serialized metrics, keyed by topic suffix.
pub trait MessagePublisher: Send + Sync {
    fn publish(&self, topic_suffix: &str, payload: &str);
}

/// Destination for failure counters and snapshot gauges.
pub trait MetricsSink: Send + Sync {
    fn increment_failures(&self);
    fn increment_write_failures(&self);
    fn record_snapshot(&self, snapshot: &TelemetrySnapshot);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment_failures(&self) {}
    fn increment_write_failures(&self) {}
    fn record_snapshot(&self, _snapshot: &TelemetrySnapshot) {}
}

pub fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
