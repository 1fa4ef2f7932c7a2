//! GATT layout of the controller and the value encoding of each characteristic.
//!
//! Pure data: nothing here performs I/O.

use strum::IntoEnumIterator;
use uuid::Uuid;

use crate::protocol::ProtocolError;
use crate::types::{InfoField, Input, InputMode, LedMode, Output};

pub const DEVICE_INFO_SERVICE: Uuid = Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);
pub const BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
pub const LED_SERVICE: Uuid = Uuid::from_u128(0x8ae87702_ad7d_11e6_80f5_76304dec7eb7);
pub const OUTPUT_SERVICE: Uuid = Uuid::from_u128(0x8ae883b4_ad7d_11e6_80f5_76304dec7eb7);
pub const INPUT_MODE_SERVICE: Uuid = Uuid::from_u128(0x8ae88d6e_ad7d_11e6_80f5_76304dec7eb7);
pub const INPUT_SERVICE: Uuid = Uuid::from_u128(0x8ae8952a_ad7d_11e6_80f5_76304dec7eb7);

const MANUFACTURER: Uuid = Uuid::from_u128(0x00002a29_0000_1000_8000_00805f9b34fb);
const MODEL: Uuid = Uuid::from_u128(0x00002a24_0000_1000_8000_00805f9b34fb);
const HARDWARE: Uuid = Uuid::from_u128(0x00002a27_0000_1000_8000_00805f9b34fb);
const FIRMWARE: Uuid = Uuid::from_u128(0x00002a26_0000_1000_8000_00805f9b34fb);
const SYSID: Uuid = Uuid::from_u128(0x00002a23_0000_1000_8000_00805f9b34fb);
const BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);
const LED_COLOR: Uuid = Uuid::from_u128(0x8ae87e32_ad7d_11e6_80f5_76304dec7eb7);
const OUTPUT_VALUES: [Uuid; 2] = [
    Uuid::from_u128(0x8ae8860c_ad7d_11e6_80f5_76304dec7eb7),
    Uuid::from_u128(0x8ae88b84_ad7d_11e6_80f5_76304dec7eb7),
];
const INPUT_MODES: [Uuid; 4] = [
    Uuid::from_u128(0x8ae88efe_ad7d_11e6_80f5_76304dec7eb7),
    Uuid::from_u128(0x8ae89084_ad7d_11e6_80f5_76304dec7eb7),
    Uuid::from_u128(0x8ae89200_ad7d_11e6_80f5_76304dec7eb7),
    Uuid::from_u128(0x8ae89386_ad7d_11e6_80f5_76304dec7eb7),
];
const INPUT_VALUES: [Uuid; 4] = [
    Uuid::from_u128(0x8ae89a2a_ad7d_11e6_80f5_76304dec7eb7),
    Uuid::from_u128(0x8ae89bec_ad7d_11e6_80f5_76304dec7eb7),
    Uuid::from_u128(0x8ae89dc2_ad7d_11e6_80f5_76304dec7eb7),
    Uuid::from_u128(0x8ae89f66_ad7d_11e6_80f5_76304dec7eb7),
];

/// A logical quantity exposed as one GATT characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    DeviceInfo(InfoField),
    BatteryLevel,
    Led,
    Output(Output),
    InputMode(Input),
    Input(Input),
}

impl Endpoint {
    pub fn service(self) -> Uuid {
        match self {
            Self::DeviceInfo(_) => DEVICE_INFO_SERVICE,
            Self::BatteryLevel => BATTERY_SERVICE,
            Self::Led => LED_SERVICE,
            Self::Output(_) => OUTPUT_SERVICE,
            Self::InputMode(_) => INPUT_MODE_SERVICE,
            Self::Input(_) => INPUT_SERVICE,
        }
    }

    pub fn characteristic(self) -> Uuid {
        match self {
            Self::DeviceInfo(InfoField::Manufacturer) => MANUFACTURER,
            Self::DeviceInfo(InfoField::Model) => MODEL,
            Self::DeviceInfo(InfoField::Hardware) => HARDWARE,
            Self::DeviceInfo(InfoField::Firmware) => FIRMWARE,
            Self::DeviceInfo(InfoField::Sysid) => SYSID,
            Self::BatteryLevel => BATTERY_LEVEL,
            Self::Led => LED_COLOR,
            Self::Output(output) => OUTPUT_VALUES[output.index()],
            Self::InputMode(input) => INPUT_MODES[input.index()],
            Self::Input(input) => INPUT_VALUES[input.index()],
        }
    }

    /// Every endpoint the controller exposes.
    pub fn all() -> impl Iterator<Item = Endpoint> {
        InfoField::iter()
            .map(Self::DeviceInfo)
            .chain([Self::BatteryLevel, Self::Led])
            .chain(Output::iter().map(Self::Output))
            .chain(Input::iter().map(Self::InputMode))
            .chain(Input::iter().map(Self::Input))
    }

    /// Reverse lookup, used to route notifications.
    pub fn from_characteristic(uuid: Uuid) -> Option<Endpoint> {
        Self::all().find(|endpoint| endpoint.characteristic() == uuid)
    }
}

fn single_byte(what: &'static str, bytes: &[u8]) -> Result<u8, ProtocolError> {
    match bytes {
        [b] => Ok(*b),
        _ => Err(ProtocolError::ValueWidth {
            what,
            expected: "1",
            actual: bytes.len(),
        }),
    }
}

pub fn encode_led(led: LedMode) -> [u8; 1] {
    [led.to_byte()]
}

/// `Ok(None)` for a well-formed but unrecognized color byte.
pub fn decode_led(bytes: &[u8]) -> Result<Option<LedMode>, ProtocolError> {
    single_byte("led color", bytes).map(LedMode::from_byte)
}

pub fn encode_input_mode(mode: InputMode) -> [u8; 1] {
    [mode.to_byte()]
}

/// `Ok(None)` for a well-formed but unrecognized mode byte.
pub fn decode_input_mode(bytes: &[u8]) -> Result<Option<InputMode>, ProtocolError> {
    single_byte("input mode", bytes).map(InputMode::from_byte)
}

pub fn encode_input_value(value: u16) -> [u8; 2] {
    value.to_le_bytes()
}

pub fn decode_input_value(bytes: &[u8]) -> Result<u16, ProtocolError> {
    match bytes {
        [lo, hi] => Ok(u16::from_le_bytes([*lo, *hi])),
        _ => Err(ProtocolError::ValueWidth {
            what: "input value",
            expected: "2",
            actual: bytes.len(),
        }),
    }
}

pub fn encode_output_value(value: i8) -> [u8; 1] {
    value.to_le_bytes()
}

pub fn decode_output_value(bytes: &[u8]) -> Result<i8, ProtocolError> {
    single_byte("output value", bytes).map(|b| i8::from_le_bytes([b]))
}

/// Battery level as a little-endian unsigned integer of whatever width the device sends.
pub fn decode_battery_level(bytes: &[u8]) -> Result<u64, ProtocolError> {
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(ProtocolError::ValueWidth {
            what: "battery level",
            expected: "1..=8",
            actual: bytes.len(),
        });
    }

    let mut buf = [0_u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn characteristics_are_unique_and_reversible() {
        let endpoints: Vec<_> = Endpoint::all().collect();
        assert_eq!(endpoints.len(), 5 + 2 + 2 + 4 + 4);

        let uuids: HashSet<_> = endpoints.iter().map(|e| e.characteristic()).collect();
        assert_eq!(uuids.len(), endpoints.len());

        for endpoint in endpoints {
            assert_eq!(Endpoint::from_characteristic(endpoint.characteristic()), Some(endpoint));
        }
        assert_eq!(Endpoint::from_characteristic(INPUT_SERVICE), None);
    }

    #[test]
    fn services_group_characteristics() {
        assert_eq!(Endpoint::Input(Input::I3).service(), INPUT_SERVICE);
        assert_eq!(Endpoint::InputMode(Input::I1).service(), INPUT_MODE_SERVICE);
        assert_eq!(Endpoint::Output(Output::O2).service(), OUTPUT_SERVICE);
        assert_eq!(Endpoint::DeviceInfo(InfoField::Firmware).service(), DEVICE_INFO_SERVICE);
        assert_eq!(
            Endpoint::Input(Input::I1).characteristic().to_string(),
            "8ae89a2a-ad7d-11e6-80f5-76304dec7eb7"
        );
    }

    #[test]
    fn enum_values_round_trip() {
        for led in LedMode::iter() {
            assert_eq!(decode_led(&encode_led(led)), Ok(Some(led)));
        }
        for mode in InputMode::iter() {
            assert_eq!(decode_input_mode(&encode_input_mode(mode)), Ok(Some(mode)));
        }
    }

    #[test]
    fn numeric_values_round_trip() {
        for value in [0_u16, 1, 200, 0x0102, u16::MAX] {
            assert_eq!(decode_input_value(&encode_input_value(value)), Ok(value));
        }
        for value in [-100_i8, -50, -1, 0, 1, 100] {
            assert_eq!(decode_output_value(&encode_output_value(value)), Ok(value));
        }
        assert_eq!(encode_output_value(-50), [0xCE]);
    }

    #[test]
    fn unknown_enum_bytes_decode_to_none() {
        assert_eq!(decode_led(&[0x07]), Ok(None));
        assert_eq!(decode_input_mode(&[0x00]), Ok(None));
        assert!(decode_led(&[]).is_err());
        assert!(decode_input_mode(&[0x0A, 0x0B]).is_err());
    }

    #[test]
    fn battery_level_is_variable_width() {
        assert_eq!(decode_battery_level(b"d"), Ok(100));
        assert_eq!(decode_battery_level(&[0x10, 0x27]), Ok(10_000));
        assert!(decode_battery_level(&[]).is_err());
        assert!(decode_battery_level(&[0; 9]).is_err());
    }

    #[test]
    fn input_value_width_is_checked() {
        assert!(matches!(
            decode_input_value(&[0xFF]),
            Err(ProtocolError::ValueWidth { actual: 1, .. })
        ));
    }
}
