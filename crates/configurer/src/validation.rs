use thiserror::Error;

use crate::model::ChargingParameters;

const MAX_ENCODED_VOLTAGE: f32 = u16::MAX as f32 / 100.0;
const MIN_ENCODED_TEMPERATURE: f32 = i16::MIN as f32 / 100.0;
const MAX_ENCODED_TEMPERATURE: f32 = i16::MAX as f32 / 100.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error(
        "charging voltage chain violated: overVoltDisconnect ({0:.2}) > chargingLimit ({1:.2}) > \
         equalization ({2:.2}) > boost ({3:.2}) > float ({4:.2}) > boostReconnect ({5:.2})"
    )]
    ChargingChain(f32, f32, f32, f32, f32, f32),
    #[error(
        "discharging voltage chain violated: underVoltReconnect ({0:.2}) > underVoltWarning ({1:.2}) > \
         lowVoltDisconnect ({2:.2}) > dischargingLimit ({3:.2})"
    )]
    DischargingChain(f32, f32, f32, f32),
    #[error("over voltage pair violated: overVoltDisconnect ({0:.2}) > overVoltReconnect ({1:.2})")]
    OverVoltagePair(f32, f32),
    #[error("low voltage pair violated: lowVoltReconnect ({0:.2}) > lowVoltDisconnect ({1:.2})")]
    LowVoltagePair(f32, f32),
    #[error("{field} value {value} cannot be stored in its register")]
    OutOfRange { field: &'static str, value: f32 },
}

fn strictly_descending(values: &[f32]) -> bool {
    values.windows(2).all(|pair| pair[0] > pair[1])
}

/// Checks the four ordering rules between the voltage thresholds.
pub fn validate_voltage_parameters(params: &ChargingParameters) -> Result<(), ValidationError> {
    let charging = [
        params.over_volt_disconnect_voltage,
        params.charging_limit_voltage,
        params.equalization_voltage,
        params.boost_voltage,
        params.float_voltage,
        params.boost_reconnect_charging_voltage,
    ];
    if !strictly_descending(&charging) {
        let [a, b, c, d, e, f] = charging;
        return Err(ValidationError::ChargingChain(a, b, c, d, e, f));
    }

    let discharging = [
        params.under_volt_reconnect_voltage,
        params.under_volt_warning_voltage,
        params.low_volt_disconnect_voltage,
        params.discharging_limit_voltage,
    ];
    if !strictly_descending(&discharging) {
        let [a, b, c, d] = discharging;
        return Err(ValidationError::DischargingChain(a, b, c, d));
    }

    if !(params.over_volt_disconnect_voltage > params.over_volt_reconnect_voltage) {
        return Err(ValidationError::OverVoltagePair(
            params.over_volt_disconnect_voltage,
            params.over_volt_reconnect_voltage,
        ));
    }

    if !(params.low_volt_reconnect_voltage > params.low_volt_disconnect_voltage) {
        return Err(ValidationError::LowVoltagePair(
            params.low_volt_reconnect_voltage,
            params.low_volt_disconnect_voltage,
        ));
    }

    Ok(())
}

/// Rejects values the register encoding would silently clamp.
pub fn validate_ranges(params: &ChargingParameters) -> Result<(), ValidationError> {
    let voltages = [
        ("overVoltDisconnectVoltage", params.over_volt_disconnect_voltage),
        ("chargingLimitVoltage", params.charging_limit_voltage),
        ("overVoltReconnectVoltage", params.over_volt_reconnect_voltage),
        ("equalizationVoltage", params.equalization_voltage),
        ("boostVoltage", params.boost_voltage),
        ("floatVoltage", params.float_voltage),
        ("boostReconnectChargingVoltage", params.boost_reconnect_charging_voltage),
        ("lowVoltReconnectVoltage", params.low_volt_reconnect_voltage),
        ("underVoltWarningReconnectVoltage", params.under_volt_reconnect_voltage),
        ("underVoltWarningVoltage", params.under_volt_warning_voltage),
        ("lowVoltDisconnectVoltage", params.low_volt_disconnect_voltage),
        ("dischargingLimitVoltage", params.discharging_limit_voltage),
    ];
    for (field, value) in voltages {
        if !(0.0..=MAX_ENCODED_VOLTAGE).contains(&value) {
            return Err(ValidationError::OutOfRange { field, value });
        }
    }

    let temperatures = [
        ("batteryTempUpperLimit", params.battery_temp_upper_limit),
        ("batteryTempLowerLimit", params.battery_temp_lower_limit),
        ("controllerTempUpperLimit", params.controller_temp_upper_limit),
        ("controllerTempLowerLimit", params.controller_temp_lower_limit),
    ];
    for (field, value) in temperatures {
        if !(MIN_ENCODED_TEMPERATURE..=MAX_ENCODED_TEMPERATURE).contains(&value) {
            return Err(ValidationError::OutOfRange { field, value });
        }
    }

    Ok(())
}

/// The coefficient shares the unsigned /100 encoding of the voltage registers.
pub fn validate_temp_comp_coefficient(value: f32) -> Result<(), ValidationError> {
    if (0.0..=MAX_ENCODED_VOLTAGE).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field: "tempCompCoefficient",
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ChargingParameters {
        ChargingParameters {
            over_volt_disconnect_voltage: 16.0,
            charging_limit_voltage: 15.0,
            over_volt_reconnect_voltage: 15.0,
            equalization_voltage: 14.6,
            boost_voltage: 14.4,
            float_voltage: 13.8,
            boost_reconnect_charging_voltage: 13.2,
            low_volt_reconnect_voltage: 12.6,
            under_volt_reconnect_voltage: 12.2,
            under_volt_warning_voltage: 12.0,
            low_volt_disconnect_voltage: 11.1,
            discharging_limit_voltage: 10.6,
            battery_temp_upper_limit: 65.0,
            battery_temp_lower_limit: -40.0,
            ..ChargingParameters::default()
        }
    }

    #[test]
    fn factory_like_thresholds_pass() {
        assert_eq!(validate_voltage_parameters(&valid()), Ok(()));
        assert_eq!(validate_ranges(&valid()), Ok(()));
    }

    #[test]
    fn equal_neighbours_break_the_chain() {
        let mut params = valid();
        params.boost_voltage = params.equalization_voltage;
        assert!(matches!(
            validate_voltage_parameters(&params),
            Err(ValidationError::ChargingChain(..))
        ));
    }

    #[test]
    fn each_rule_is_reported() {
        let mut params = valid();
        params.discharging_limit_voltage = 11.5;
        assert!(matches!(
            validate_voltage_parameters(&params),
            Err(ValidationError::DischargingChain(..))
        ));

        let mut params = valid();
        params.over_volt_reconnect_voltage = 16.5;
        assert!(matches!(
            validate_voltage_parameters(&params),
            Err(ValidationError::OverVoltagePair(..))
        ));

        let mut params = valid();
        params.low_volt_reconnect_voltage = 11.0;
        assert!(matches!(
            validate_voltage_parameters(&params),
            Err(ValidationError::LowVoltagePair(..))
        ));
    }

    #[test]
    fn unencodable_values_are_rejected() {
        let mut params = valid();
        params.float_voltage = -1.0;
        assert!(matches!(
            validate_ranges(&params),
            Err(ValidationError::OutOfRange { field: "floatVoltage", .. })
        ));

        let mut params = valid();
        params.battery_temp_upper_limit = 400.0;
        assert!(validate_ranges(&params).is_err());

        let mut params = valid();
        params.boost_voltage = f32::NAN;
        assert!(validate_ranges(&params).is_err());
    }

    #[test]
    fn temp_comp_coefficient_must_fit_its_register() {
        assert_eq!(validate_temp_comp_coefficient(3.0), Ok(()));
        assert_eq!(validate_temp_comp_coefficient(655.35), Ok(()));
        assert!(matches!(
            validate_temp_comp_coefficient(-3.0),
            Err(ValidationError::OutOfRange { field: "tempCompCoefficient", .. })
        ));
        assert!(validate_temp_comp_coefficient(700.0).is_err());
        assert!(validate_temp_comp_coefficient(f32::NAN).is_err());
    }
}
