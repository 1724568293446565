use std::sync::Arc;

use chrono::NaiveDateTime;

use collector::Collector;
use configurer::{
    BatteryProfile, BatteryProfilePatch, ChargingParameters, ChargingParametersPatch, ConfigError,
    ConfigPatch, Configurer, DeviceConfig, RegisterQuery, WriteOutcome,
};
use modbus_client::RegisterTransport;
use poller_actor::CollectionScheduler;
use types::{DeviceIdentity, MessagePublisher, MetricsSink, TelemetrySnapshot};

use crate::config::AppConfig;

/// One charge controller: telemetry collection and configuration over a
/// single shared transport.
pub struct SolarController {
    scheduler: Arc<CollectionScheduler>,
    configurer: Configurer,
}

impl SolarController {
    pub fn new(
        config: &AppConfig,
        transport: Arc<dyn RegisterTransport>,
        publisher: Arc<dyn MessagePublisher>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let collector = Collector::new(Arc::clone(&transport), config.collector.clone());
        let scheduler = Arc::new(CollectionScheduler::new(
            config.device.clone(),
            collector,
            publisher,
            Arc::clone(&metrics),
            config.poller.clone(),
        ));
        let configurer = Configurer::new(transport, metrics).with_ttl(config.cache_ttl);

        Self {
            scheduler,
            configurer,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        self.scheduler.identity()
    }

    pub fn scheduler(&self) -> Arc<CollectionScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// `None` until the first successful collection.
    pub async fn live_telemetry(&self) -> Option<TelemetrySnapshot> {
        self.scheduler.latest_status().await
    }

    pub async fn battery_profile(&self) -> Result<BatteryProfile, ConfigError> {
        self.configurer.battery_profile().await
    }

    pub async fn update_battery_profile(
        &self,
        patch: &BatteryProfilePatch,
    ) -> Result<WriteOutcome<BatteryProfile>, ConfigError> {
        self.configurer.patch_battery_profile(patch).await
    }

    pub async fn charging_parameters(&self) -> Result<ChargingParameters, ConfigError> {
        self.configurer.charging_parameters().await
    }

    pub async fn update_charging_parameters(
        &self,
        patch: &ChargingParametersPatch,
    ) -> Result<WriteOutcome<ChargingParameters>, ConfigError> {
        self.configurer.patch_charging_parameters(patch).await
    }

    pub async fn device_time(&self) -> Result<NaiveDateTime, ConfigError> {
        self.configurer.device_time().await
    }

    pub async fn update_device_time(
        &self,
        time: &NaiveDateTime,
    ) -> Result<WriteOutcome<NaiveDateTime>, ConfigError> {
        self.configurer.set_device_time(time).await
    }

    /// Combined view of every configuration register, served from cache.
    pub async fn config(&self) -> Result<DeviceConfig, ConfigError> {
        self.configurer.get_cached_config().await
    }

    pub async fn update_config(
        &self,
        patch: &ConfigPatch,
    ) -> Result<WriteOutcome<DeviceConfig>, ConfigError> {
        self.configurer.apply_patch(patch).await
    }

    pub async fn query_register(
        &self,
        register: u8,
        address: &str,
    ) -> Result<RegisterQuery, ConfigError> {
        self.configurer.query_register(register, address).await
    }
}
