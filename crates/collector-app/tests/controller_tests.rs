use std::sync::{Arc, Mutex};

use collector::ReadStrategy;
use collector_app::{AppConfig, PrometheusMetricsSink, SolarController, TracingPublisher};
use configurer::{BatteryType, ChargingParametersPatch, ConfigError, WriteOutcome};
use modbus_client::{Request, ScriptedTransport};
use poller_actor::CollectionOutcome;
use types::{MessagePublisher, MetricsSink, TelemetrySnapshot};

#[derive(Default)]
struct RecordingPublisher {
    topics: Mutex<Vec<String>>,
}

impl MessagePublisher for RecordingPublisher {
    fn publish(&self, topic_suffix: &str, _payload: &str) {
        self.topics
            .lock()
            .expect("publisher lock")
            .push(topic_suffix.to_string());
    }
}

fn device() -> ScriptedTransport {
    ScriptedTransport::new()
        .with_input(0x3100, &[1850, 520])
        .with_input(0x3104, &[1280])
        .with_input(0x311A, &[85])
        .with_input(0x3302, &[1440, 1200])
        .with_input(0x3102, &[962, 0])
        .with_input(0x3105, &[480])
        .with_input(0x3106, &[614, 0])
        .with_input(0x330C, &[1550, 0])
        .with_input(0x3201, &[0x0004])
        .with_input(0x3110, &[2500, 3200])
        .with_holding(0x9000, &[4, 200, 300])
        .with_holding(
            0x9003,
            &[1600, 1500, 1500, 1460, 1440, 1380, 1320, 1260, 1220, 1200, 1110, 1060],
        )
        .with_holding(0x9013, &[0x1E0F, 0x090D, 0x1906])
        .with_holding(0x9016, &[30])
        .with_holding(0x906B, &[120, 180])
        .with_holding(0x9017, &[6500, (-4000i16) as u16, 8500, (-1000i16) as u16])
}

fn app_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.device.device_id = "controller-1".to_string();
    config.collector.strategy = ReadStrategy::Sequential;
    config.collector.read_recovery_ms = 0;
    config
}

fn controller(
    transport: &ScriptedTransport,
    metrics: Arc<dyn MetricsSink>,
) -> (SolarController, Arc<RecordingPublisher>) {
    let publisher = Arc::new(RecordingPublisher::default());
    let controller = SolarController::new(
        &app_config(),
        Arc::new(transport.clone()),
        publisher.clone(),
        metrics,
    );
    (controller, publisher)
}

#[tokio::test]
async fn live_telemetry_follows_the_scheduler() {
    let transport = device();
    let (controller, publisher) = controller(&transport, Arc::new(types::NoopMetrics));

    assert_eq!(controller.live_telemetry().await, None);

    let outcome = controller.scheduler().collect_and_publish().await;
    assert_eq!(outcome, CollectionOutcome::Published(14));

    let status: TelemetrySnapshot = controller.live_telemetry().await.expect("snapshot");
    assert_eq!(status.battery_soc, 85);
    assert!(publisher
        .topics
        .lock()
        .expect("publisher lock")
        .contains(&"controller-1/epever/battery-soc".to_string()));
}

#[tokio::test]
async fn telemetry_and_configuration_share_one_transport() {
    let transport = device();
    let (controller, _) = controller(&transport, Arc::new(types::NoopMetrics));

    controller.scheduler().collect_and_publish().await;
    let profile = controller.battery_profile().await.expect("profile");
    assert_eq!(profile.battery_type, BatteryType::UserDefined);
    assert_eq!(profile.battery_capacity, 200);

    let calls = transport.calls().await;
    assert!(calls
        .iter()
        .any(|call| matches!(call, Request::ReadInputRegisters { address: 0x3100, .. })));
    assert!(calls
        .iter()
        .any(|call| matches!(call, Request::ReadHoldingRegisters { address: 0x9000, .. })));
}

#[tokio::test]
async fn charging_parameters_round_trip_through_the_facade() {
    let transport = device();
    let (controller, _) = controller(&transport, Arc::new(types::NoopMetrics));

    let patch = ChargingParametersPatch {
        float_voltage: Some(13.7),
        ..ChargingParametersPatch::default()
    };
    let outcome = controller
        .update_charging_parameters(&patch)
        .await
        .expect("patch");

    match outcome {
        WriteOutcome::Confirmed(params) => assert!((params.float_voltage - 13.7).abs() < 0.001),
        WriteOutcome::Unconfirmed(message) => panic!("unexpected unconfirmed write: {message}"),
    }
    assert_eq!(transport.holding_value(0x9008).await, Some(1370));
}

#[tokio::test]
async fn register_query_validates_its_input() {
    let transport = device();
    let (controller, _) = controller(&transport, Arc::new(types::NoopMetrics));

    let query = controller.query_register(3, "0x9001").await.expect("query");
    assert_eq!(query.result, 200);

    let err = controller
        .query_register(9, "0x9001")
        .await
        .expect_err("unknown class");
    assert!(matches!(err, ConfigError::InvalidQuery(_)));
    assert!(err.is_client_error());
}

#[tokio::test]
async fn prometheus_sink_exposes_gauges_and_failures() {
    let transport = device();
    let metrics = Arc::new(PrometheusMetricsSink::new());
    let (controller, _) = controller(&transport, metrics.clone());

    controller.scheduler().collect_and_publish().await;
    transport.break_register(0x3100).await;
    let outcome = controller.scheduler().collect_and_publish().await;
    assert_eq!(outcome, CollectionOutcome::Failed);

    let exposition = metrics.render();
    assert!(exposition.contains("solar_battery_soc 85"));
    assert!(exposition.contains("solar_read_failures 1"));
}

#[test]
fn tracing_publisher_prefixes_topics() {
    assert_eq!(
        TracingPublisher::new("site-a").topic("controller-1/epever/battery-soc"),
        "site-a/controller-1/epever/battery-soc"
    );
    assert_eq!(
        TracingPublisher::default().topic("controller-1/epever/battery-soc"),
        "controller-1/epever/battery-soc"
    );
}
