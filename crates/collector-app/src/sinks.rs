use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use tracing::info;

use types::{MessagePublisher, MetricsSink, TelemetrySnapshot};

/// Publish sink that writes every message to the log.
#[derive(Debug, Clone, Default)]
pub struct TracingPublisher {
    prefix: String,
}

impl TracingPublisher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn topic(&self, topic_suffix: &str) -> String {
        if self.prefix.is_empty() {
            topic_suffix.to_string()
        } else {
            format!("{}/{}", self.prefix, topic_suffix)
        }
    }
}

impl MessagePublisher for TracingPublisher {
    fn publish(&self, topic_suffix: &str, payload: &str) {
        info!(topic = %self.topic(topic_suffix), payload, "publish");
    }
}

/// Metrics sink backed by a private Prometheus recorder.
///
/// Nothing is installed globally; [`render`](Self::render) exposes the
/// current text exposition for whoever serves it.
pub struct PrometheusMetricsSink {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl PrometheusMetricsSink {
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        Self { recorder, handle }
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl Default for PrometheusMetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for PrometheusMetricsSink {
    fn increment_failures(&self) {
        metrics::with_local_recorder(&self.recorder, || {
            metrics::counter!("solar_read_failures").increment(1);
        });
    }

    fn increment_write_failures(&self) {
        metrics::with_local_recorder(&self.recorder, || {
            metrics::counter!("solar_write_failures").increment(1);
        });
    }

    fn record_snapshot(&self, snapshot: &TelemetrySnapshot) {
        let gauges = [
            ("solar_panel_voltage", f64::from(snapshot.array_voltage)),
            ("solar_panel_current", f64::from(snapshot.array_current)),
            ("solar_panel_power", f64::from(snapshot.array_power)),
            ("solar_charging_power", f64::from(snapshot.charging_power)),
            ("solar_charging_current", f64::from(snapshot.charging_current)),
            ("solar_battery_voltage", f64::from(snapshot.battery_voltage)),
            ("solar_battery_soc", f64::from(snapshot.battery_soc)),
            ("solar_battery_temp", f64::from(snapshot.battery_temp)),
            ("solar_battery_min_voltage", f64::from(snapshot.battery_min_voltage)),
            ("solar_battery_max_voltage", f64::from(snapshot.battery_max_voltage)),
            ("solar_device_temp", f64::from(snapshot.device_temp)),
            ("solar_energy_generated_daily", f64::from(snapshot.energy_generated_daily)),
            ("solar_charging_status", f64::from(snapshot.charging_status)),
        ];

        metrics::with_local_recorder(&self.recorder, || {
            for (name, value) in gauges {
                metrics::gauge!(name).set(value);
            }
        });
    }
}
