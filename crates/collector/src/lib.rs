use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::debug;

use modbus_client::{ClientError, RegisterTransport};
use register_codec::registers::{
    ARRAY_INPUT, ARRAY_POWER, BATTERY_MAX_MIN_VOLTAGE, BATTERY_SOC,
    BATTERY_VOLTAGE, CHARGING_CURRENT, CHARGING_POWER, CHARGING_STATUS_MASK,
    CHARGING_STATUS_SHIFT, CONTROLLER_STATUS, ENERGY_GENERATED_DAILY, TELEMETRY_BLOCK,
    TEMPERATURES,
};
use register_codec::{
    decode_int, decode_scaled_float, decode_scaled_floats, decode_swapped_float32,
    decode_temperature_pair, register_slice, CodecError, RegisterAddress,
};
use types::{unix_seconds, TelemetrySnapshot};

#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadStrategy {
    /// One request per register group.
    #[default]
    Sequential,
    /// One 18-register read of 0x3100..=0x3111, then the scattered registers.
    Batched,
}

#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub strategy: ReadStrategy,
    /// Settling time for the device transceiver between two reads.
    pub read_recovery_ms: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            strategy: ReadStrategy::Sequential,
            read_recovery_ms: 50,
        }
    }
}

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("failed to read {register} at 0x{address:04X}: {source}")]
    Read {
        register: &'static str,
        address: u16,
        #[source]
        source: ClientError,
    },
    #[error("failed to decode {register} at 0x{address:04X}: {source}")]
    Decode {
        register: &'static str,
        address: u16,
        #[source]
        source: CodecError,
    },
}

impl CollectorError {
    pub fn address(&self) -> u16 {
        match self {
            CollectorError::Read { address, .. } | CollectorError::Decode { address, .. } => *address,
        }
    }
}

fn decoded<T>(register: &RegisterAddress, result: Result<T, CodecError>) -> Result<T, CollectorError> {
    result.map_err(|source| CollectorError::Decode {
        register: register.name,
        address: register.address,
        source,
    })
}

fn block_field<'a>(block: &'a [u8], register: &RegisterAddress) -> Result<&'a [u8], CollectorError> {
    decoded(
        register,
        register_slice(
            block,
            TELEMETRY_BLOCK.offset_of(register),
            usize::from(register.quantity),
        ),
    )
}

/// Reads the live telemetry registers into a [`TelemetrySnapshot`].
pub struct Collector {
    transport: Arc<dyn RegisterTransport>,
    config: CollectorConfig,
}

/// Spaces consecutive reads of one collection by the recovery interval.
struct ReadSequence<'a> {
    collector: &'a Collector,
    reads: usize,
}

impl ReadSequence<'_> {
    async fn read(&mut self, register: &RegisterAddress) -> Result<Vec<u8>, CollectorError> {
        if self.reads > 0 && self.collector.config.read_recovery_ms > 0 {
            sleep(Duration::from_millis(self.collector.config.read_recovery_ms)).await;
        }
        self.reads += 1;

        self.collector
            .transport
            .read_input_registers(register.address, register.quantity)
            .await
            .map_err(|source| CollectorError::Read {
                register: register.name,
                address: register.address,
                source,
            })
    }
}

impl Collector {
    pub fn new(transport: Arc<dyn RegisterTransport>, config: CollectorConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Runs the full read sequence. Any failed read or decode aborts the
    /// collection; partial snapshots are never returned.
    pub async fn get_status(&self) -> Result<TelemetrySnapshot, CollectorError> {
        let started = Instant::now();
        let mut snapshot = TelemetrySnapshot {
            timestamp: unix_seconds(),
            ..TelemetrySnapshot::default()
        };
        let mut sequence = ReadSequence {
            collector: self,
            reads: 0,
        };

        match self.config.strategy {
            ReadStrategy::Sequential => Self::read_sequential(&mut sequence, &mut snapshot).await?,
            ReadStrategy::Batched => Self::read_batched(&mut sequence, &mut snapshot).await?,
        }

        snapshot.collection_time = started.elapsed().as_secs_f64();
        debug!(
            reads = sequence.reads,
            collection_time = snapshot.collection_time,
            "telemetry collected"
        );
        Ok(snapshot)
    }

    async fn read_sequential(
        sequence: &mut ReadSequence<'_>,
        snapshot: &mut TelemetrySnapshot,
    ) -> Result<(), CollectorError> {
        let data = sequence.read(&ARRAY_INPUT).await?;
        let array = decoded(&ARRAY_INPUT, decode_scaled_floats(&data, 2))?;
        snapshot.array_voltage = array[0];
        snapshot.array_current = array[1];

        let data = sequence.read(&BATTERY_VOLTAGE).await?;
        snapshot.battery_voltage = decoded(&BATTERY_VOLTAGE, decode_scaled_float(&data))?;

        Self::read_state_of_charge(sequence, snapshot).await?;

        let data = sequence.read(&ARRAY_POWER).await?;
        snapshot.array_power = decoded(&ARRAY_POWER, decode_swapped_float32(&data))?;

        let data = sequence.read(&CHARGING_CURRENT).await?;
        snapshot.charging_current = decoded(&CHARGING_CURRENT, decode_scaled_float(&data))?;

        let data = sequence.read(&CHARGING_POWER).await?;
        snapshot.charging_power = decoded(&CHARGING_POWER, decode_swapped_float32(&data))?;

        Self::read_daily_and_status(sequence, snapshot).await?;

        let data = sequence.read(&TEMPERATURES).await?;
        (snapshot.battery_temp, snapshot.device_temp) =
            decoded(&TEMPERATURES, decode_temperature_pair(&data))?;

        Ok(())
    }

    async fn read_batched(
        sequence: &mut ReadSequence<'_>,
        snapshot: &mut TelemetrySnapshot,
    ) -> Result<(), CollectorError> {
        let block = sequence.read(&TELEMETRY_BLOCK).await?;

        let array = block_field(&block, &ARRAY_INPUT)?;
        let array = decoded(&ARRAY_INPUT, decode_scaled_floats(array, 2))?;
        snapshot.array_voltage = array[0];
        snapshot.array_current = array[1];

        let power = block_field(&block, &ARRAY_POWER)?;
        snapshot.array_power = decoded(&ARRAY_POWER, decode_swapped_float32(power))?;

        let voltage = block_field(&block, &BATTERY_VOLTAGE)?;
        snapshot.battery_voltage = decoded(&BATTERY_VOLTAGE, decode_scaled_float(voltage))?;

        let current = block_field(&block, &CHARGING_CURRENT)?;
        snapshot.charging_current = decoded(&CHARGING_CURRENT, decode_scaled_float(current))?;

        let power = block_field(&block, &CHARGING_POWER)?;
        snapshot.charging_power = decoded(&CHARGING_POWER, decode_swapped_float32(power))?;

        let temperatures = block_field(&block, &TEMPERATURES)?;
        (snapshot.battery_temp, snapshot.device_temp) =
            decoded(&TEMPERATURES, decode_temperature_pair(temperatures))?;

        Self::read_state_of_charge(sequence, snapshot).await?;
        Self::read_daily_and_status(sequence, snapshot).await
    }

    async fn read_state_of_charge(
        sequence: &mut ReadSequence<'_>,
        snapshot: &mut TelemetrySnapshot,
    ) -> Result<(), CollectorError> {
        let data = sequence.read(&BATTERY_SOC).await?;
        snapshot.battery_soc = decoded(&BATTERY_SOC, decode_int(&data))?;

        let data = sequence.read(&BATTERY_MAX_MIN_VOLTAGE).await?;
        let extremes = decoded(&BATTERY_MAX_MIN_VOLTAGE, decode_scaled_floats(&data, 2))?;
        snapshot.battery_max_voltage = extremes[0];
        snapshot.battery_min_voltage = extremes[1];
        Ok(())
    }

    async fn read_daily_and_status(
        sequence: &mut ReadSequence<'_>,
        snapshot: &mut TelemetrySnapshot,
    ) -> Result<(), CollectorError> {
        let data = sequence.read(&ENERGY_GENERATED_DAILY).await?;
        snapshot.energy_generated_daily =
            decoded(&ENERGY_GENERATED_DAILY, decode_swapped_float32(&data))?;

        let data = sequence.read(&CONTROLLER_STATUS).await?;
        let status = decoded(&CONTROLLER_STATUS, decode_int(&data))?;
        snapshot.charging_status = (status & CHARGING_STATUS_MASK) >> CHARGING_STATUS_SHIFT;
        Ok(())
    }
}
