use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use register_codec::registers::{
    BATTERY_CAPACITY, BATTERY_TEMP_LOWER_LIMIT, BATTERY_TEMP_UPPER_LIMIT, BOOST_DURATION,
    BOOST_RECONNECT, BOOST_VOLTAGE, CHARGING_LIMIT, CONTROLLER_TEMP_LOWER_LIMIT,
    CONTROLLER_TEMP_UPPER_LIMIT, DISCHARGING_LIMIT, EQUALIZATION_CYCLE, EQUALIZATION_DURATION,
    EQUALIZATION_VOLTAGE, FLOAT_VOLTAGE, LOW_VOLT_DISCONNECT, LOW_VOLT_RECONNECT,
    OVER_VOLT_DISCONNECT, OVER_VOLT_RECONNECT, TEMP_COMP_COEFFICIENT, UNDER_VOLT_RECONNECT,
    UNDER_VOLT_WARNING,
};
use register_codec::{encode_temperature, encode_voltage, RegisterAddress};

/// Battery chemistry profile stored in holding register 0x9000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BatteryType {
    Sealed,
    Gel,
    Flooded,
    /// Only this profile accepts custom charging parameters.
    UserDefined,
    #[serde(other)]
    Unknown,
}

impl BatteryType {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => BatteryType::Sealed,
            2 => BatteryType::Gel,
            3 => BatteryType::Flooded,
            4 => BatteryType::UserDefined,
            _ => BatteryType::Unknown,
        }
    }

    pub fn code(self) -> Option<u16> {
        match self {
            BatteryType::Sealed => Some(1),
            BatteryType::Gel => Some(2),
            BatteryType::Flooded => Some(3),
            BatteryType::UserDefined => Some(4),
            BatteryType::Unknown => None,
        }
    }

    pub fn is_user_defined(self) -> bool {
        self == BatteryType::UserDefined
    }
}

/// Charging algorithm settings: thresholds, durations and temperature limits.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingParameters {
    pub boost_duration: u16,
    pub equalization_cycle: u16,
    pub equalization_duration: u16,
    pub over_volt_disconnect_voltage: f32,
    pub charging_limit_voltage: f32,
    pub over_volt_reconnect_voltage: f32,
    pub equalization_voltage: f32,
    pub boost_voltage: f32,
    pub float_voltage: f32,
    pub boost_reconnect_charging_voltage: f32,
    pub low_volt_reconnect_voltage: f32,
    #[serde(rename = "underVoltWarningReconnectVoltage")]
    pub under_volt_reconnect_voltage: f32,
    pub under_volt_warning_voltage: f32,
    pub low_volt_disconnect_voltage: f32,
    pub discharging_limit_voltage: f32,
    pub battery_temp_upper_limit: f32,
    pub battery_temp_lower_limit: f32,
    pub controller_temp_upper_limit: f32,
    pub controller_temp_lower_limit: f32,
}

/// Full persisted configuration of the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    /// `None` when the clock registers do not hold a valid date.
    pub time: Option<NaiveDateTime>,
    pub battery_type: BatteryType,
    pub battery_capacity: u16,
    pub temp_comp_coefficient: f32,
    #[serde(flatten)]
    pub charging: ChargingParameters,
}

impl DeviceConfig {
    pub fn battery_profile(&self) -> BatteryProfile {
        BatteryProfile {
            battery_type: self.battery_type,
            battery_capacity: self.battery_capacity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryProfile {
    pub battery_type: BatteryType,
    pub battery_capacity: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_type: Option<BatteryType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_capacity: Option<u16>,
}

/// Partial update of [`ChargingParameters`]; absent fields are left untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingParametersPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost_duration: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equalization_cycle: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equalization_duration: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub over_volt_disconnect_voltage: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charging_limit_voltage: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub over_volt_reconnect_voltage: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equalization_voltage: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost_voltage: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub float_voltage: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost_reconnect_charging_voltage: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_volt_reconnect_voltage: Option<f32>,
    #[serde(
        default,
        rename = "underVoltWarningReconnectVoltage",
        skip_serializing_if = "Option::is_none"
    )]
    pub under_volt_reconnect_voltage: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub under_volt_warning_voltage: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_volt_disconnect_voltage: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discharging_limit_voltage: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_temp_upper_limit: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_temp_lower_limit: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_temp_upper_limit: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_temp_lower_limit: Option<f32>,
}

/// Combined update of the whole configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_type: Option<BatteryType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_capacity: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_comp_coefficient: Option<f32>,
    #[serde(flatten)]
    pub charging: ChargingParametersPatch,
}

impl ConfigPatch {
    /// True when the patch touches settings reserved for the user-defined profile.
    pub fn has_charging_fields(&self) -> bool {
        self.temp_comp_coefficient.is_some() || !self.charging.is_empty()
    }
}

/// One holding-register write derived from a patch field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FieldWrite {
    pub register: &'static RegisterAddress,
    pub value: u16,
}

impl FieldWrite {
    fn voltage(register: &'static RegisterAddress, volts: f32) -> Self {
        Self {
            register,
            value: encode_voltage(volts),
        }
    }

    fn temperature(register: &'static RegisterAddress, celsius: f32) -> Self {
        Self {
            register,
            value: encode_temperature(celsius) as u16,
        }
    }

    fn raw(register: &'static RegisterAddress, value: u16) -> Self {
        Self { register, value }
    }
}

impl ChargingParametersPatch {
    pub fn is_empty(&self) -> bool {
        self == &ChargingParametersPatch::default()
    }

    /// Applies the present fields on top of `current`.
    pub fn merged_into(&self, current: &ChargingParameters) -> ChargingParameters {
        let mut proposed = current.clone();
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field {
                    proposed.$field = value;
                })*
            };
        }
        merge!(
            boost_duration,
            equalization_cycle,
            equalization_duration,
            over_volt_disconnect_voltage,
            charging_limit_voltage,
            over_volt_reconnect_voltage,
            equalization_voltage,
            boost_voltage,
            float_voltage,
            boost_reconnect_charging_voltage,
            low_volt_reconnect_voltage,
            under_volt_reconnect_voltage,
            under_volt_warning_voltage,
            low_volt_disconnect_voltage,
            discharging_limit_voltage,
            battery_temp_upper_limit,
            battery_temp_lower_limit,
            controller_temp_upper_limit,
            controller_temp_lower_limit,
        );
        proposed
    }

    /// Register writes for the present fields, in ascending address order.
    pub(crate) fn writes(&self) -> Vec<FieldWrite> {
        let voltages = [
            (&OVER_VOLT_DISCONNECT, self.over_volt_disconnect_voltage),
            (&CHARGING_LIMIT, self.charging_limit_voltage),
            (&OVER_VOLT_RECONNECT, self.over_volt_reconnect_voltage),
            (&EQUALIZATION_VOLTAGE, self.equalization_voltage),
            (&BOOST_VOLTAGE, self.boost_voltage),
            (&FLOAT_VOLTAGE, self.float_voltage),
            (&BOOST_RECONNECT, self.boost_reconnect_charging_voltage),
            (&LOW_VOLT_RECONNECT, self.low_volt_reconnect_voltage),
            (&UNDER_VOLT_RECONNECT, self.under_volt_reconnect_voltage),
            (&UNDER_VOLT_WARNING, self.under_volt_warning_voltage),
            (&LOW_VOLT_DISCONNECT, self.low_volt_disconnect_voltage),
            (&DISCHARGING_LIMIT, self.discharging_limit_voltage),
        ];
        let temperatures = [
            (&BATTERY_TEMP_UPPER_LIMIT, self.battery_temp_upper_limit),
            (&BATTERY_TEMP_LOWER_LIMIT, self.battery_temp_lower_limit),
            (&CONTROLLER_TEMP_UPPER_LIMIT, self.controller_temp_upper_limit),
            (&CONTROLLER_TEMP_LOWER_LIMIT, self.controller_temp_lower_limit),
        ];

        let mut writes: Vec<FieldWrite> = voltages
            .into_iter()
            .filter_map(|(register, value)| value.map(|volts| FieldWrite::voltage(register, volts)))
            .collect();
        if let Some(cycle) = self.equalization_cycle {
            writes.push(FieldWrite::raw(&EQUALIZATION_CYCLE, cycle));
        }
        writes.extend(temperatures.into_iter().filter_map(|(register, value)| {
            value.map(|celsius| FieldWrite::temperature(register, celsius))
        }));
        if let Some(duration) = self.equalization_duration {
            writes.push(FieldWrite::raw(&EQUALIZATION_DURATION, duration));
        }
        if let Some(duration) = self.boost_duration {
            writes.push(FieldWrite::raw(&BOOST_DURATION, duration));
        }
        writes
    }
}

pub(crate) fn capacity_write(capacity: u16) -> FieldWrite {
    FieldWrite::raw(&BATTERY_CAPACITY, capacity)
}

pub(crate) fn temp_comp_write(coefficient: f32) -> FieldWrite {
    FieldWrite::voltage(&TEMP_COMP_COEFFICIENT, coefficient)
}

/// Register table addressed by a diagnostic query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterClass {
    Coil,
    DiscreteInput,
    Holding,
    Input,
}

impl RegisterClass {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(RegisterClass::Coil),
            2 => Some(RegisterClass::DiscreteInput),
            3 => Some(RegisterClass::Holding),
            4 => Some(RegisterClass::Input),
            _ => None,
        }
    }
}

/// Result of a single-register diagnostic read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterQuery {
    pub register: u8,
    pub address: String,
    #[serde(default)]
    pub result: u16,
}
