use configurer::{
    BatteryType, ChargingParameters, ChargingParametersPatch, ConfigPatch, DeviceConfig,
};
use serde_json::json;

#[test]
fn config_serializes_with_device_field_names() {
    let config = DeviceConfig {
        time: None,
        battery_type: BatteryType::UserDefined,
        battery_capacity: 200,
        temp_comp_coefficient: 3.0,
        charging: ChargingParameters {
            under_volt_reconnect_voltage: 12.2,
            ..ChargingParameters::default()
        },
    };

    let value = serde_json::to_value(&config).expect("json");
    assert_eq!(value["batteryType"], "userDefined");
    assert_eq!(value["batteryCapacity"], 200);
    assert!(value.get("underVoltWarningReconnectVoltage").is_some());
    assert!(value.get("charging").is_none());
}

#[test]
fn patch_reads_only_present_fields() {
    let patch: ChargingParametersPatch = serde_json::from_value(json!({
        "floatVoltage": 13.7,
        "equalizationCycle": 28,
    }))
    .expect("patch");

    assert_eq!(patch.float_voltage, Some(13.7));
    assert_eq!(patch.equalization_cycle, Some(28));
    assert_eq!(patch.boost_voltage, None);
    assert!(!patch.is_empty());
    assert!(ChargingParametersPatch::default().is_empty());
}

#[test]
fn merge_keeps_untouched_fields() {
    let current = ChargingParameters {
        boost_voltage: 14.4,
        float_voltage: 13.8,
        ..ChargingParameters::default()
    };
    let patch = ChargingParametersPatch {
        float_voltage: Some(13.5),
        ..ChargingParametersPatch::default()
    };

    let merged = patch.merged_into(&current);
    assert_eq!(merged.boost_voltage, 14.4);
    assert_eq!(merged.float_voltage, 13.5);
}

#[test]
fn legacy_patch_accepts_unknown_battery_type_names() {
    let patch: ConfigPatch = serde_json::from_value(json!({
        "batteryType": "lithium",
        "boostVoltage": 14.5,
    }))
    .expect("patch");

    assert_eq!(patch.battery_type, Some(BatteryType::Unknown));
    assert_eq!(patch.charging.boost_voltage, Some(14.5));
    assert!(patch.has_charging_fields());
}

#[test]
fn battery_type_codes() {
    assert_eq!(BatteryType::from_code(4), BatteryType::UserDefined);
    assert_eq!(BatteryType::from_code(9), BatteryType::Unknown);
    assert_eq!(BatteryType::Gel.code(), Some(2));
    assert_eq!(BatteryType::Unknown.code(), None);
}
