//! Register map of the charge controller.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    /// Read-only telemetry (function code 0x04).
    Input,
    /// Read/write configuration (function codes 0x03, 0x06, 0x10).
    Holding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoding {
    ScaledFloat,
    Int,
    SwappedFloat32,
    SignedTemperaturePair,
    SignedScaled,
    Clock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterAddress {
    pub name: &'static str,
    pub address: u16,
    pub kind: RegisterKind,
    pub quantity: u16,
    pub decoding: Decoding,
}

impl RegisterAddress {
    const fn input(name: &'static str, address: u16, quantity: u16, decoding: Decoding) -> Self {
        Self {
            name,
            address,
            kind: RegisterKind::Input,
            quantity,
            decoding,
        }
    }

    const fn holding(name: &'static str, address: u16, quantity: u16, decoding: Decoding) -> Self {
        Self {
            name,
            address,
            kind: RegisterKind::Holding,
            quantity,
            decoding,
        }
    }

    pub const fn byte_len(&self) -> usize {
        self.quantity as usize * 2
    }

    /// Offset of `other` inside a block read starting at this register.
    pub const fn offset_of(&self, other: &RegisterAddress) -> usize {
        (other.address - self.address) as usize
    }
}

// Live telemetry (input registers).
pub const ARRAY_VOLTAGE: RegisterAddress =
    RegisterAddress::input("array voltage", 0x3100, 1, Decoding::ScaledFloat);
/// Array voltage and current in one read.
pub const ARRAY_INPUT: RegisterAddress =
    RegisterAddress::input("array voltage/current", 0x3100, 2, Decoding::ScaledFloat);
pub const ARRAY_CURRENT: RegisterAddress =
    RegisterAddress::input("array current", 0x3101, 1, Decoding::ScaledFloat);
pub const ARRAY_POWER: RegisterAddress =
    RegisterAddress::input("array power", 0x3102, 2, Decoding::SwappedFloat32);
pub const BATTERY_VOLTAGE: RegisterAddress =
    RegisterAddress::input("battery voltage", 0x3104, 1, Decoding::ScaledFloat);
pub const CHARGING_CURRENT: RegisterAddress =
    RegisterAddress::input("charging current", 0x3105, 1, Decoding::ScaledFloat);
pub const CHARGING_POWER: RegisterAddress =
    RegisterAddress::input("charging power", 0x3106, 2, Decoding::SwappedFloat32);
pub const TEMPERATURES: RegisterAddress = RegisterAddress::input(
    "battery/device temperature",
    0x3110,
    2,
    Decoding::SignedTemperaturePair,
);
pub const BATTERY_SOC: RegisterAddress =
    RegisterAddress::input("battery soc", 0x311A, 1, Decoding::Int);
pub const CONTROLLER_STATUS: RegisterAddress =
    RegisterAddress::input("controller status", 0x3201, 1, Decoding::Int);
pub const BATTERY_MAX_MIN_VOLTAGE: RegisterAddress =
    RegisterAddress::input("battery max/min voltage", 0x3302, 2, Decoding::ScaledFloat);
pub const ENERGY_GENERATED_DAILY: RegisterAddress =
    RegisterAddress::input("daily energy", 0x330C, 2, Decoding::SwappedFloat32);

/// Contiguous window 0x3100..=0x3111 read in one request by the batched collector.
pub const TELEMETRY_BLOCK: RegisterAddress =
    RegisterAddress::input("telemetry block", 0x3100, 18, Decoding::ScaledFloat);

/// Bits 2-3 of the controller status register carry the charging state.
pub const CHARGING_STATUS_MASK: u32 = 0x0C;
pub const CHARGING_STATUS_SHIFT: u32 = 2;

// Device configuration (holding registers).
pub const BATTERY_SETTINGS: RegisterAddress =
    RegisterAddress::holding("battery type/capacity/temp comp", 0x9000, 3, Decoding::Int);
pub const BATTERY_TYPE: RegisterAddress =
    RegisterAddress::holding("battery type", 0x9000, 1, Decoding::Int);
pub const BATTERY_CAPACITY: RegisterAddress =
    RegisterAddress::holding("battery capacity", 0x9001, 1, Decoding::Int);
pub const TEMP_COMP_COEFFICIENT: RegisterAddress = RegisterAddress::holding(
    "temperature compensation coefficient",
    0x9002,
    1,
    Decoding::ScaledFloat,
);
pub const VOLTAGE_THRESHOLDS: RegisterAddress =
    RegisterAddress::holding("voltage thresholds", 0x9003, 12, Decoding::ScaledFloat);
pub const OVER_VOLT_DISCONNECT: RegisterAddress =
    RegisterAddress::holding("over voltage disconnect", 0x9003, 1, Decoding::ScaledFloat);
pub const CHARGING_LIMIT: RegisterAddress =
    RegisterAddress::holding("charging limit voltage", 0x9004, 1, Decoding::ScaledFloat);
pub const OVER_VOLT_RECONNECT: RegisterAddress =
    RegisterAddress::holding("over voltage reconnect", 0x9005, 1, Decoding::ScaledFloat);
pub const EQUALIZATION_VOLTAGE: RegisterAddress =
    RegisterAddress::holding("equalization voltage", 0x9006, 1, Decoding::ScaledFloat);
pub const BOOST_VOLTAGE: RegisterAddress =
    RegisterAddress::holding("boost voltage", 0x9007, 1, Decoding::ScaledFloat);
pub const FLOAT_VOLTAGE: RegisterAddress =
    RegisterAddress::holding("float voltage", 0x9008, 1, Decoding::ScaledFloat);
pub const BOOST_RECONNECT: RegisterAddress =
    RegisterAddress::holding("boost reconnect voltage", 0x9009, 1, Decoding::ScaledFloat);
pub const LOW_VOLT_RECONNECT: RegisterAddress =
    RegisterAddress::holding("low voltage reconnect", 0x900A, 1, Decoding::ScaledFloat);
pub const UNDER_VOLT_RECONNECT: RegisterAddress =
    RegisterAddress::holding("under voltage warning reconnect", 0x900B, 1, Decoding::ScaledFloat);
pub const UNDER_VOLT_WARNING: RegisterAddress =
    RegisterAddress::holding("under voltage warning", 0x900C, 1, Decoding::ScaledFloat);
pub const LOW_VOLT_DISCONNECT: RegisterAddress =
    RegisterAddress::holding("low voltage disconnect", 0x900D, 1, Decoding::ScaledFloat);
pub const DISCHARGING_LIMIT: RegisterAddress =
    RegisterAddress::holding("discharging limit voltage", 0x900E, 1, Decoding::ScaledFloat);
pub const DEVICE_CLOCK: RegisterAddress =
    RegisterAddress::holding("device clock", 0x9013, 3, Decoding::Clock);
pub const EQUALIZATION_CYCLE: RegisterAddress =
    RegisterAddress::holding("equalization cycle", 0x9016, 1, Decoding::Int);
pub const TEMPERATURE_LIMITS: RegisterAddress =
    RegisterAddress::holding("temperature limits", 0x9017, 4, Decoding::SignedScaled);
pub const BATTERY_TEMP_UPPER_LIMIT: RegisterAddress =
    RegisterAddress::holding("battery temperature upper limit", 0x9017, 1, Decoding::SignedScaled);
pub const BATTERY_TEMP_LOWER_LIMIT: RegisterAddress =
    RegisterAddress::holding("battery temperature lower limit", 0x9018, 1, Decoding::SignedScaled);
pub const CONTROLLER_TEMP_UPPER_LIMIT: RegisterAddress = RegisterAddress::holding(
    "controller temperature upper limit",
    0x9019,
    1,
    Decoding::SignedScaled,
);
pub const CONTROLLER_TEMP_LOWER_LIMIT: RegisterAddress = RegisterAddress::holding(
    "controller temperature lower limit",
    0x901A,
    1,
    Decoding::SignedScaled,
);
pub const CHARGE_DURATIONS: RegisterAddress =
    RegisterAddress::holding("equalization/boost duration", 0x906B, 2, Decoding::Int);
pub const EQUALIZATION_DURATION: RegisterAddress =
    RegisterAddress::holding("equalization duration", 0x906B, 1, Decoding::Int);
pub const BOOST_DURATION: RegisterAddress =
    RegisterAddress::holding("boost duration", 0x906C, 1, Decoding::Int);
