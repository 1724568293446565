//! Reads, validates, caches and writes the controller's holding-register
//! configuration.
//!
//! Every mutation goes through a validate-then-write sequence: the proposed
//! configuration (cached values with the requested overrides merged in) must
//! pass [`validate_voltage_parameters`] before the first register is touched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use modbus_client::{ClientError, RegisterTransport};
use register_codec::registers::{
    BATTERY_SETTINGS, BATTERY_TYPE, CHARGE_DURATIONS, DEVICE_CLOCK, EQUALIZATION_CYCLE,
    TEMPERATURE_LIMITS, VOLTAGE_THRESHOLDS,
};
use register_codec::{
    decode_clock, decode_int, decode_ints, decode_scaled_float, decode_scaled_floats,
    decode_signed_scaled_values, encode_clock, register_slice, CodecError, RegisterAddress,
};
use types::MetricsSink;

mod model;
mod validation;

pub use model::{
    BatteryProfile, BatteryProfilePatch, BatteryType, ChargingParameters, ChargingParametersPatch,
    ConfigPatch, DeviceConfig, RegisterClass, RegisterQuery,
};
pub use validation::{
    validate_ranges, validate_temp_comp_coefficient, validate_voltage_parameters, ValidationError,
};

use model::{capacity_write, temp_comp_write, FieldWrite};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {register} (0x{address:04X}): {source}")]
    Read {
        register: &'static str,
        address: u16,
        #[source]
        source: ClientError,
    },
    #[error("failed to write {register} of {value} (0x{address:04X}): {source}")]
    Write {
        register: &'static str,
        address: u16,
        value: u16,
        #[source]
        source: ClientError,
    },
    #[error("failed to decode {register} (0x{address:04X}): {source}")]
    Decode {
        register: &'static str,
        address: u16,
        #[source]
        source: CodecError,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("charging parameters can only be modified when battery type is 'userDefined' (current: {0:?})")]
    NotUserDefined(BatteryType),
    #[error("unknown battery type")]
    UnknownBatteryType,
    #[error("invalid register query: {0}")]
    InvalidQuery(String),
}

impl ConfigError {
    /// Errors caused by the request rather than by the device or the link.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ConfigError::Validation(_)
                | ConfigError::NotUserDefined(_)
                | ConfigError::UnknownBatteryType
                | ConfigError::InvalidQuery(_)
        )
    }
}

/// Result of a write whose registers were all written.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome<T> {
    /// The new state was read back from the device.
    Confirmed(T),
    /// The device accepted the writes but reading them back failed.
    Unconfirmed(String),
}

impl<T> WriteOutcome<T> {
    pub fn confirmed(self) -> Option<T> {
        match self {
            WriteOutcome::Confirmed(value) => Some(value),
            WriteOutcome::Unconfirmed(_) => None,
        }
    }

    fn map<U>(self, f: impl FnOnce(T) -> U) -> WriteOutcome<U> {
        match self {
            WriteOutcome::Confirmed(value) => WriteOutcome::Confirmed(f(value)),
            WriteOutcome::Unconfirmed(message) => WriteOutcome::Unconfirmed(message),
        }
    }
}

#[derive(Debug, Clone)]
enum CacheState {
    Empty,
    Fresh {
        config: DeviceConfig,
        fetched_at: Instant,
    },
}

fn decoded<T>(register: &RegisterAddress, result: Result<T, CodecError>) -> Result<T, ConfigError> {
    result.map_err(|source| ConfigError::Decode {
        register: register.name,
        address: register.address,
        source,
    })
}

pub struct Configurer {
    transport: Arc<dyn RegisterTransport>,
    metrics: Arc<dyn MetricsSink>,
    cache: RwLock<CacheState>,
    /// Bumped by every invalidation; a refresh started under an older
    /// generation is returned but not cached.
    generation: AtomicU64,
    ttl: Duration,
}

impl Configurer {
    pub fn new(transport: Arc<dyn RegisterTransport>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            transport,
            metrics,
            cache: RwLock::new(CacheState::Empty),
            generation: AtomicU64::new(0),
            ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn read_holding(&self, register: &RegisterAddress) -> Result<Vec<u8>, ConfigError> {
        self.transport
            .read_holding_registers(register.address, register.quantity)
            .await
            .map_err(|source| ConfigError::Read {
                register: register.name,
                address: register.address,
                source,
            })
    }

    /// Reads the full configuration from the device, bypassing the cache.
    pub async fn get_config(&self) -> Result<DeviceConfig, ConfigError> {
        let data = self.read_holding(&BATTERY_SETTINGS).await?;
        let identity = decoded(&BATTERY_SETTINGS, decode_ints(&data, 2))?;
        let temp_comp_coefficient = decoded(
            &BATTERY_SETTINGS,
            register_slice(&data, 2, 1).and_then(decode_scaled_float),
        )?;

        let data = self.read_holding(&DEVICE_CLOCK).await?;
        let time = match decode_clock(&data) {
            Ok(time) => Some(time),
            Err(CodecError::InvalidClock(raw)) => {
                warn!(clock = %raw, "device clock holds no valid date");
                None
            }
            Err(source) => {
                return Err(ConfigError::Decode {
                    register: DEVICE_CLOCK.name,
                    address: DEVICE_CLOCK.address,
                    source,
                })
            }
        };

        let data = self.read_holding(&VOLTAGE_THRESHOLDS).await?;
        let volts = decoded(&VOLTAGE_THRESHOLDS, decode_scaled_floats(&data, 12))?;

        let data = self.read_holding(&EQUALIZATION_CYCLE).await?;
        let equalization_cycle = decoded(&EQUALIZATION_CYCLE, decode_int(&data))?;

        let data = self.read_holding(&CHARGE_DURATIONS).await?;
        let durations = decoded(&CHARGE_DURATIONS, decode_ints(&data, 2))?;

        let data = self.read_holding(&TEMPERATURE_LIMITS).await?;
        let limits = decoded(&TEMPERATURE_LIMITS, decode_signed_scaled_values(&data, 4))?;

        Ok(DeviceConfig {
            time,
            battery_type: BatteryType::from_code(identity[0]),
            battery_capacity: identity[1] as u16,
            temp_comp_coefficient,
            charging: ChargingParameters {
                boost_duration: durations[1] as u16,
                equalization_cycle: equalization_cycle as u16,
                equalization_duration: durations[0] as u16,
                over_volt_disconnect_voltage: volts[0],
                charging_limit_voltage: volts[1],
                over_volt_reconnect_voltage: volts[2],
                equalization_voltage: volts[3],
                boost_voltage: volts[4],
                float_voltage: volts[5],
                boost_reconnect_charging_voltage: volts[6],
                low_volt_reconnect_voltage: volts[7],
                under_volt_reconnect_voltage: volts[8],
                under_volt_warning_voltage: volts[9],
                low_volt_disconnect_voltage: volts[10],
                discharging_limit_voltage: volts[11],
                battery_temp_upper_limit: limits[0],
                battery_temp_lower_limit: limits[1],
                controller_temp_upper_limit: limits[2],
                controller_temp_lower_limit: limits[3],
            },
        })
    }

    /// Returns a copy of the cached configuration, refreshing it from the
    /// device when it is missing or older than the TTL.
    pub async fn get_cached_config(&self) -> Result<DeviceConfig, ConfigError> {
        let generation = {
            let cache = self.cache.read().await;
            if let CacheState::Fresh { config, fetched_at } = &*cache {
                if fetched_at.elapsed() < self.ttl {
                    debug!("using cached config");
                    return Ok(config.clone());
                }
            }
            self.generation.load(Ordering::Acquire)
        };

        let config = self.get_config().await?;

        let mut cache = self.cache.write().await;
        if self.generation.load(Ordering::Acquire) == generation {
            *cache = CacheState::Fresh {
                config: config.clone(),
                fetched_at: Instant::now(),
            };
            debug!("fetched and cached config from device");
        } else {
            debug!("config changed during refresh, result not cached");
        }
        Ok(config)
    }

    pub async fn invalidate_cache(&self) {
        let mut cache = self.cache.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        *cache = CacheState::Empty;
        debug!("config cache invalidated");
    }

    /// Reads the battery type straight from the device.
    async fn read_battery_type(&self) -> Result<BatteryType, ConfigError> {
        let data = self.read_holding(&BATTERY_TYPE).await?;
        let code = decoded(&BATTERY_TYPE, decode_int(&data))?;
        Ok(BatteryType::from_code(code))
    }

    async fn write_field(&self, write: FieldWrite) -> Result<(), ConfigError> {
        let register = write.register;
        info!(register = register.name, address = register.address, value = write.value, "writing setting");
        self.transport
            .write_single_register(register.address, write.value)
            .await
            .map_err(|source| {
                warn!(register = register.name, value = write.value, error = %source, "setting write failed");
                self.metrics.increment_write_failures();
                ConfigError::Write {
                    register: register.name,
                    address: register.address,
                    value: write.value,
                    source,
                }
            })
    }

    /// Issues the writes in order, stopping at the first failure.
    async fn write_fields(&self, writes: &[FieldWrite]) -> Result<(), ConfigError> {
        for write in writes {
            self.write_field(*write).await?;
        }
        Ok(())
    }

    async fn write_battery_type(&self, battery_type: BatteryType) -> Result<(), ConfigError> {
        let code = battery_type.code().ok_or(ConfigError::UnknownBatteryType)?;
        self.write_field(FieldWrite {
            register: &BATTERY_TYPE,
            value: code,
        })
        .await
    }

    async fn write_clock(&self, time: &NaiveDateTime) -> Result<(), ConfigError> {
        let bytes = decoded(&DEVICE_CLOCK, encode_clock(time))?;
        info!(time = %time, "writing device clock");
        self.transport
            .write_multiple_registers(DEVICE_CLOCK.address, DEVICE_CLOCK.quantity, &bytes)
            .await
            .map_err(|source| {
                warn!(time = %time, error = %source, "device clock write failed");
                self.metrics.increment_write_failures();
                ConfigError::Write {
                    register: DEVICE_CLOCK.name,
                    address: DEVICE_CLOCK.address,
                    value: 0,
                    source,
                }
            })
    }

    /// Builds the proposed charging parameters and checks them before any write.
    async fn validated_proposal(&self, patch: &ChargingParametersPatch) -> Result<(), ConfigError> {
        let current = self.get_cached_config().await?;
        let proposed = patch.merged_into(&current.charging);
        validate_ranges(&proposed)?;
        if let Err(err) = validate_voltage_parameters(&proposed) {
            warn!(error = %err, "voltage parameter validation failed");
            return Err(err.into());
        }
        Ok(())
    }

    async fn read_back(&self, what: &str) -> WriteOutcome<DeviceConfig> {
        match self.get_cached_config().await {
            Ok(config) => WriteOutcome::Confirmed(config),
            Err(err) => {
                warn!(error = %err, "failed to read back {what} after write");
                WriteOutcome::Unconfirmed(format!("{what} updated but failed to read back"))
            }
        }
    }

    /// Combined update of the whole configuration.
    ///
    /// A battery type change is written first. Charging fields are only
    /// accepted when the resulting battery type is user-defined.
    pub async fn apply_patch(&self, patch: &ConfigPatch) -> Result<WriteOutcome<DeviceConfig>, ConfigError> {
        if let Some(coefficient) = patch.temp_comp_coefficient {
            validate_temp_comp_coefficient(coefficient)?;
        }

        if let Some(battery_type) = patch.battery_type {
            self.write_battery_type(battery_type).await?;
            self.invalidate_cache().await;
        }

        if patch.has_charging_fields() {
            let battery_type = match patch.battery_type {
                Some(battery_type) => battery_type,
                None => self.read_battery_type().await?,
            };
            if !battery_type.is_user_defined() {
                return Err(ConfigError::NotUserDefined(battery_type));
            }
            self.validated_proposal(&patch.charging).await?;
        }

        let mut writes = Vec::new();
        writes.extend(patch.battery_capacity.map(capacity_write));
        writes.extend(patch.temp_comp_coefficient.map(temp_comp_write));
        writes.extend(patch.charging.writes());
        self.write_fields(&writes).await?;
        if let Some(time) = &patch.time {
            self.write_clock(time).await?;
        }

        if !writes.is_empty() || patch.time.is_some() {
            self.invalidate_cache().await;
        }
        Ok(self.read_back("configuration").await)
    }

    pub async fn battery_profile(&self) -> Result<BatteryProfile, ConfigError> {
        Ok(self.get_cached_config().await?.battery_profile())
    }

    /// Writes battery type and capacity. Allowed for every battery type.
    pub async fn patch_battery_profile(
        &self,
        patch: &BatteryProfilePatch,
    ) -> Result<WriteOutcome<BatteryProfile>, ConfigError> {
        if patch.battery_type == Some(BatteryType::Unknown) {
            return Err(ConfigError::UnknownBatteryType);
        }

        let mut wrote = false;
        if let Some(battery_type) = patch.battery_type {
            self.write_battery_type(battery_type).await?;
            wrote = true;
        }
        if let Some(capacity) = patch.battery_capacity {
            self.write_field(capacity_write(capacity)).await?;
            wrote = true;
        }

        if wrote {
            self.invalidate_cache().await;
        }
        Ok(self
            .read_back("profile")
            .await
            .map(|config| config.battery_profile()))
    }

    pub async fn charging_parameters(&self) -> Result<ChargingParameters, ConfigError> {
        Ok(self.get_cached_config().await?.charging)
    }

    /// Writes the present charging fields after validating the merged result.
    ///
    /// The battery type is read from the device rather than the cache.
    pub async fn patch_charging_parameters(
        &self,
        patch: &ChargingParametersPatch,
    ) -> Result<WriteOutcome<ChargingParameters>, ConfigError> {
        let battery_type = self.read_battery_type().await?;
        if !battery_type.is_user_defined() {
            return Err(ConfigError::NotUserDefined(battery_type));
        }

        self.validated_proposal(patch).await?;

        let writes = patch.writes();
        self.write_fields(&writes).await?;
        if !writes.is_empty() {
            self.invalidate_cache().await;
        }
        Ok(self
            .read_back("parameters")
            .await
            .map(|config| config.charging))
    }

    /// Reads the device clock, bypassing the cache.
    pub async fn device_time(&self) -> Result<NaiveDateTime, ConfigError> {
        let data = self.read_holding(&DEVICE_CLOCK).await?;
        decoded(&DEVICE_CLOCK, decode_clock(&data))
    }

    pub async fn set_device_time(&self, time: &NaiveDateTime) -> Result<WriteOutcome<NaiveDateTime>, ConfigError> {
        self.write_clock(time).await?;
        self.invalidate_cache().await;

        match self.device_time().await {
            Ok(time) => Ok(WriteOutcome::Confirmed(time)),
            Err(err) => {
                warn!(error = %err, "failed to read back device clock after write");
                Ok(WriteOutcome::Unconfirmed(
                    "time updated but failed to read back".to_string(),
                ))
            }
        }
    }

    /// Reads a single register of any class for diagnostics.
    ///
    /// `address` is hexadecimal with an optional `0x` prefix.
    pub async fn query_register(&self, register: u8, address: &str) -> Result<RegisterQuery, ConfigError> {
        let class = RegisterClass::from_code(register)
            .ok_or_else(|| ConfigError::InvalidQuery(format!("unknown register class {register}")))?;
        let trimmed = address.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let parsed = u16::from_str_radix(digits, 16)
            .map_err(|err| ConfigError::InvalidQuery(format!("bad address {address:?}: {err}")))?;

        let read = match class {
            RegisterClass::Coil => self.transport.read_coils(parsed, 1).await,
            RegisterClass::DiscreteInput => self.transport.read_discrete_inputs(parsed, 1).await,
            RegisterClass::Holding => self.transport.read_holding_registers(parsed, 1).await,
            RegisterClass::Input => self.transport.read_input_registers(parsed, 1).await,
        };
        let data = read.map_err(|source| ConfigError::Read {
            register: "queried register",
            address: parsed,
            source,
        })?;

        let result = match class {
            RegisterClass::Coil | RegisterClass::DiscreteInput => {
                data.first().map(|bits| u16::from(bits & 0x01)).ok_or_else(|| ConfigError::Decode {
                    register: "queried register",
                    address: parsed,
                    source: CodecError::InsufficientData {
                        what: "bit",
                        expected: 1,
                        actual: 0,
                    },
                })?
            }
            RegisterClass::Holding | RegisterClass::Input => {
                let value = decode_int(&data).map_err(|source| ConfigError::Decode {
                    register: "queried register",
                    address: parsed,
                    source,
                })?;
                value as u16
            }
        };
        info!(register, address = parsed, result, "register query");

        Ok(RegisterQuery {
            register,
            address: address.to_string(),
            result,
        })
    }
}
