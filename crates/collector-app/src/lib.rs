pub mod config;
mod controller;
mod sinks;

pub use config::AppConfig;
pub use controller::SolarController;
pub use sinks::{PrometheusMetricsSink, TracingPublisher};
