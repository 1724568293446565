use std::env;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use collector::ReadStrategy;
use collector_app::AppConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn toml_config_validates() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    env::set_var("SOLAR_CONFIG", fixture_path("config-valid.toml"));

    let config = AppConfig::load().expect("load config");
    config.validate().expect("validate config");

    assert_eq!(config.device.device_id, "shed-controller");
    assert_eq!(config.serial.serial_port, "/dev/ttyACM0");
    // keys absent from the file keep their defaults
    assert_eq!(config.serial.retry_attempts, 2);
    assert_eq!(config.serial.retry_delay_ms, 5_000);
    assert_eq!(config.poller.poll_interval, Duration::from_secs(30));
    assert_eq!(config.collector.strategy, ReadStrategy::Batched);
    assert_eq!(config.collector.read_recovery_ms, 50);
    assert_eq!(config.cache_ttl, Duration::from_secs(300));
    assert_eq!(config.topic_prefix, "solar");

    env::remove_var("SOLAR_CONFIG");
}

#[test]
fn json_config_validates() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    env::set_var("SOLAR_CONFIG", fixture_path("config-valid.json"));

    let config = AppConfig::load().expect("load config");
    config.validate().expect("validate config");

    assert_eq!(config.device.device_id, "cabin-controller");
    assert_eq!(config.serial.timeout_ms, 2_000);
    assert_eq!(config.serial.retry_attempts, 3);
    assert_eq!(config.serial.baud_rate, 115_200);
    assert_eq!(config.collector.strategy, ReadStrategy::Sequential);
    assert_eq!(config.collector.read_recovery_ms, 100);

    env::remove_var("SOLAR_CONFIG");
}

#[test]
fn invalid_config_fails_validation() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    env::set_var("SOLAR_CONFIG", fixture_path("config-invalid.toml"));

    let config = AppConfig::load().expect("load config");
    assert!(config.validate().is_err());

    env::remove_var("SOLAR_CONFIG");
}

#[test]
fn defaults_validate_without_a_file() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    env::remove_var("SOLAR_CONFIG");

    let config = AppConfig::load().expect("load config");
    config.validate().expect("validate defaults");

    assert!(config.enabled);
    assert_eq!(config.device.controller_type, "epever");
    assert_eq!(config.poller.poll_interval, Duration::from_secs(60));
    assert_eq!(config.poller.collection_timeout, Duration::from_secs(30));
    assert_eq!(config.cache_ttl, Duration::from_secs(600));
}

#[test]
fn environment_overrides_file_values() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    env::set_var("SOLAR_CONFIG", fixture_path("config-valid.toml"));
    env::set_var("SOLAR_SERIAL_PORT", "/dev/ttyS3");
    env::set_var("SOLAR_POLL_INTERVAL_MS", "15000");
    env::set_var("SOLAR_BATCHED_READS", "false");

    let config = AppConfig::load().expect("load config");

    assert_eq!(config.serial.serial_port, "/dev/ttyS3");
    assert_eq!(config.poller.poll_interval, Duration::from_secs(15));
    assert_eq!(config.collector.strategy, ReadStrategy::Sequential);
    assert_eq!(config.device.device_id, "shed-controller");

    env::remove_var("SOLAR_CONFIG");
    env::remove_var("SOLAR_SERIAL_PORT");
    env::remove_var("SOLAR_POLL_INTERVAL_MS");
    env::remove_var("SOLAR_BATCHED_READS");
}

#[test]
fn missing_file_is_an_error() {
    let _guard = ENV_LOCK.lock().expect("env lock");
    env::remove_var("SOLAR_CONFIG");

    let result = AppConfig::load_with_path(Some(fixture_path("does-not-exist.toml")));
    assert!(result.is_err());
}

fn fixture_path(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    path.to_string_lossy().to_string()
}
