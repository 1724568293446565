use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use collector::{CollectorConfig, ReadStrategy};
use modbus_client::ClientConfig;
use poller_actor::ActorConfig;
use types::DeviceIdentity;

const DEFAULT_DEVICE_ID: &str = "solar-controller";
const DEFAULT_CONTROLLER_TYPE: &str = "epever";
const DEFAULT_CACHE_TTL_SECS: u64 = 600;
const MAX_SLAVE_ID: u8 = 247;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub enabled: bool,
    pub device: DeviceIdentity,
    pub serial: ClientConfig,
    pub poller: ActorConfig,
    pub collector: CollectorConfig,
    pub cache_ttl: Duration,
    /// Prepended to every published topic when non-empty.
    pub topic_prefix: String,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    pub fn load_with_path(config_path: Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = load_file_config(config_path.as_deref())? {
            apply_file_config(&mut config, file_config);
        }

        apply_env_overrides(&mut config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_topic_segment("device.device_id", &self.device.device_id)?;
        validate_topic_segment("device.controller_type", &self.device.controller_type)?;
        if self.serial.serial_port.trim().is_empty() {
            anyhow::bail!("serial.serial_port must be non-empty");
        }
        if self.serial.baud_rate == 0 {
            anyhow::bail!("serial.baud_rate must be >= 1");
        }
        if self.serial.slave_id == 0 || self.serial.slave_id > MAX_SLAVE_ID {
            anyhow::bail!("serial.slave_id must be between 1 and {MAX_SLAVE_ID}");
        }
        if self.serial.timeout_ms == 0 {
            anyhow::bail!("serial.timeout_ms must be >= 1");
        }
        if self.serial.retry_attempts == 0 {
            anyhow::bail!("serial.retry_attempts must be >= 1");
        }
        if self.poller.poll_interval.is_zero() {
            anyhow::bail!("poller.poll_interval_ms must be >= 1");
        }
        if self.poller.collection_timeout.is_zero() {
            anyhow::bail!("poller.collection_timeout_ms must be >= 1");
        }
        if self.cache_ttl.is_zero() {
            anyhow::bail!("configurer.cache_ttl_secs must be >= 1");
        }
        if self.topic_prefix.starts_with('/') || self.topic_prefix.ends_with('/') {
            anyhow::bail!("publisher.topic_prefix must not start or end with '/'");
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: DeviceIdentity::new(DEFAULT_DEVICE_ID, DEFAULT_CONTROLLER_TYPE),
            serial: ClientConfig::default(),
            poller: ActorConfig::default(),
            collector: CollectorConfig::default(),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            topic_prefix: String::new(),
        }
    }
}

fn apply_env_overrides(config: &mut AppConfig) {
    if let Some(enabled) = parse_env_bool("SOLAR_ENABLED") {
        config.enabled = enabled;
    }

    if let Ok(value) = env::var("SOLAR_DEVICE_ID") {
        config.device.device_id = value;
    }
    if let Ok(value) = env::var("SOLAR_CONTROLLER_TYPE") {
        config.device.controller_type = value;
    }

    if let Ok(value) = env::var("SOLAR_SERIAL_PORT") {
        config.serial.serial_port = value;
    }
    config.serial.baud_rate = parse_env_u32("SOLAR_BAUD_RATE").unwrap_or(config.serial.baud_rate);
    config.serial.slave_id = parse_env_u8("SOLAR_SLAVE_ID").unwrap_or(config.serial.slave_id);
    config.serial.timeout_ms =
        parse_env_u64("SOLAR_MODBUS_TIMEOUT_MS").unwrap_or(config.serial.timeout_ms);
    config.serial.retry_attempts =
        parse_env_usize("SOLAR_RETRY_ATTEMPTS").unwrap_or(config.serial.retry_attempts);
    config.serial.retry_delay_ms =
        parse_env_u64("SOLAR_RETRY_DELAY_MS").unwrap_or(config.serial.retry_delay_ms);

    if let Some(interval_ms) = parse_env_u64("SOLAR_POLL_INTERVAL_MS") {
        config.poller.poll_interval = Duration::from_millis(interval_ms);
    }
    if let Some(timeout_ms) = parse_env_u64("SOLAR_COLLECTION_TIMEOUT_MS") {
        config.poller.collection_timeout = Duration::from_millis(timeout_ms);
    }

    if let Some(batched) = parse_env_bool("SOLAR_BATCHED_READS") {
        config.collector.strategy = if batched {
            ReadStrategy::Batched
        } else {
            ReadStrategy::Sequential
        };
    }
    config.collector.read_recovery_ms =
        parse_env_u64("SOLAR_READ_RECOVERY_MS").unwrap_or(config.collector.read_recovery_ms);

    if let Some(ttl) = parse_env_u64("SOLAR_CACHE_TTL_SECS") {
        config.cache_ttl = Duration::from_secs(ttl);
    }

    if let Ok(value) = env::var("SOLAR_TOPIC_PREFIX") {
        config.topic_prefix = value;
    }
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    device: Option<FileDeviceConfig>,
    serial: Option<ClientConfig>,
    poller: Option<FilePollerConfig>,
    collector: Option<CollectorConfig>,
    configurer: Option<FileConfigurerConfig>,
    publisher: Option<FilePublisherConfig>,
}

#[derive(Debug, Deserialize)]
struct FileDeviceConfig {
    enabled: Option<bool>,
    device_id: Option<String>,
    controller_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FilePollerConfig {
    poll_interval_ms: Option<u64>,
    collection_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileConfigurerConfig {
    cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FilePublisherConfig {
    topic_prefix: Option<String>,
}

fn load_file_config(config_path: Option<&str>) -> Result<Option<FileConfig>> {
    let path = match config_path {
        Some(path) => path.to_string(),
        None => match env::var("SOLAR_CONFIG") {
            Ok(value) => value,
            Err(_) => return Ok(None),
        },
    };

    let content =
        fs::read_to_string(&path).with_context(|| format!("read config file {path}"))?;
    let ext = Path::new(&path).extension().and_then(|value| value.to_str());

    let config = match ext {
        Some("json") => serde_json::from_str(&content).context("parse json config")?,
        _ => toml::from_str(&content).context("parse toml config")?,
    };

    Ok(Some(config))
}

fn apply_file_config(config: &mut AppConfig, file: FileConfig) {
    if let Some(device) = file.device {
        if let Some(enabled) = device.enabled {
            config.enabled = enabled;
        }
        if let Some(device_id) = device.device_id {
            config.device.device_id = device_id;
        }
        if let Some(controller_type) = device.controller_type {
            config.device.controller_type = controller_type;
        }
    }

    // Missing keys in these sections fall back to the library defaults.
    if let Some(serial) = file.serial {
        config.serial = serial;
    }
    if let Some(collector) = file.collector {
        config.collector = collector;
    }

    if let Some(poller) = file.poller {
        if let Some(interval_ms) = poller.poll_interval_ms {
            config.poller.poll_interval = Duration::from_millis(interval_ms);
        }
        if let Some(timeout_ms) = poller.collection_timeout_ms {
            config.poller.collection_timeout = Duration::from_millis(timeout_ms);
        }
    }

    if let Some(ttl) = file.configurer.and_then(|configurer| configurer.cache_ttl_secs) {
        config.cache_ttl = Duration::from_secs(ttl);
    }

    if let Some(prefix) = file.publisher.and_then(|publisher| publisher.topic_prefix) {
        config.topic_prefix = prefix;
    }
}

fn parse_env_u8(key: &str) -> Option<u8> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_u32(key: &str) -> Option<u32> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn parse_env_bool(key: &str) -> Option<bool> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

fn validate_topic_segment(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{field} must be non-empty");
    }
    if value.contains('/') || value.contains('#') || value.contains('+') {
        anyhow::bail!("{field} must not contain '/', '#' or '+'");
    }
    Ok(())
}
