//! Identities and values exchanged with the controller.

use std::collections::BTreeMap;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::{Display, EnumIter, IntoStaticStr};

use crate::error::ValidationError;

/// One of the four analog inputs.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumIter,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u8)]
pub enum Input {
    I1 = 0,
    I2 = 1,
    I3 = 2,
    I4 = 3,
}

impl Input {
    pub const ALL: [Input; 4] = [Input::I1, Input::I2, Input::I3, Input::I4];

    /// Looks up an input by its printed number (1..=4).
    pub fn from_number(number: u8) -> Result<Self, ValidationError> {
        number
            .checked_sub(1)
            .and_then(|index| Self::try_from(index).ok())
            .ok_or(ValidationError::InputOutOfRange(number))
    }

    /// Zero-based slot, as used on the wire.
    pub fn index(self) -> usize {
        usize::from(u8::from(self))
    }
}

/// One of the two PWM outputs.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumIter,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u8)]
pub enum Output {
    O1 = 0,
    O2 = 1,
}

impl Output {
    pub const ALL: [Output; 2] = [Output::O1, Output::O2];

    /// Looks up an output by its printed number (1..=2).
    pub fn from_number(number: u8) -> Result<Self, ValidationError> {
        number
            .checked_sub(1)
            .and_then(|index| Self::try_from(index).ok())
            .ok_or(ValidationError::OutputOutOfRange(number))
    }

    pub fn index(self) -> usize {
        usize::from(u8::from(self))
    }
}

/// How an input is measured.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    IntoStaticStr,
    EnumIter,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u8)]
pub enum InputMode {
    Voltage = 0x0A,
    Resistance = 0x0B,
}

impl InputMode {
    /// Decodes the wire byte; unknown bytes yield `None`.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::try_from(byte).ok()
    }

    pub fn to_byte(self) -> u8 {
        self.into()
    }

    pub fn unit(self) -> &'static str {
        match self {
            Self::Voltage => "mV",
            Self::Resistance => "\u{2126}",
        }
    }

    pub fn label(self) -> &'static str {
        self.into()
    }
}

/// Color of the controller's status LED.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    IntoStaticStr,
    EnumIter,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u8)]
pub enum LedMode {
    Blue = 0x00,
    Yellow = 0x01,
    Green = 0x02,
}

impl LedMode {
    /// Decodes the wire byte; unknown bytes yield `None`.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::try_from(byte).ok()
    }

    pub fn to_byte(self) -> u8 {
        self.into()
    }

    pub fn label(self) -> &'static str {
        self.into()
    }
}

/// A raw reading paired with the mode it was taken in.
///
/// `mode` is `None` when the device reported a mode byte this crate does not know, in
/// which case `value` cannot be labeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputMeasurement {
    pub value: u16,
    pub mode: Option<InputMode>,
}

impl InputMeasurement {
    pub fn new(value: u16, mode: Option<InputMode>) -> Self {
        Self { value, mode }
    }

    pub fn unit(&self) -> Option<&'static str> {
        self.mode.map(InputMode::unit)
    }
}

impl std::fmt::Display for InputMeasurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.mode {
            Some(mode) => write!(f, "{} {}", self.value, mode.unit()),
            None => write!(f, "{} (unknown mode)", self.value),
        }
    }
}

/// Device information fields.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum InfoField {
    Manufacturer,
    Model,
    Hardware,
    Firmware,
    Sysid,
}

/// Device information as opaque byte strings keyed by field.
///
/// Fields the transport could not provide are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInformation {
    fields: BTreeMap<InfoField, Vec<u8>>,
}

impl DeviceInformation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: InfoField, value: impl Into<Vec<u8>>) {
        self.fields.insert(field, value.into());
    }

    pub fn get(&self, field: InfoField) -> Option<&[u8]> {
        self.fields.get(&field).map(Vec::as_slice)
    }

    /// Field as text, with trailing NUL padding stripped.
    pub fn text(&self, field: InfoField) -> Option<String> {
        let raw = self.get(field)?;
        let end = raw.iter().rposition(|&b| b != 0).map_or(0, |pos| pos + 1);
        Some(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    pub fn iter(&self) -> impl Iterator<Item = (InfoField, &[u8])> {
        self.fields.iter().map(|(field, value)| (*field, value.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn input_numbers_are_one_based() {
        assert_eq!(Input::from_number(1).expect("valid"), Input::I1);
        assert_eq!(Input::from_number(4).expect("valid"), Input::I4);
        assert_eq!(Input::from_number(0), Err(ValidationError::InputOutOfRange(0)));
        assert_eq!(Input::from_number(5), Err(ValidationError::InputOutOfRange(5)));
        assert_eq!(Output::from_number(2).expect("valid"), Output::O2);
        assert_eq!(Output::from_number(3), Err(ValidationError::OutputOutOfRange(3)));
    }

    #[test]
    fn enum_bytes_round_trip() {
        for mode in InputMode::iter() {
            assert_eq!(InputMode::from_byte(mode.to_byte()), Some(mode));
        }
        for led in LedMode::iter() {
            assert_eq!(LedMode::from_byte(led.to_byte()), Some(led));
        }
        assert_eq!(InputMode::from_byte(0x0C), None);
        assert_eq!(LedMode::from_byte(0x03), None);
    }

    #[test]
    fn measurement_display_uses_unit() {
        let m = InputMeasurement::new(200, Some(InputMode::Resistance));
        assert_eq!(m.to_string(), "200 \u{2126}");
        let m = InputMeasurement::new(4200, Some(InputMode::Voltage));
        assert_eq!(m.to_string(), "4200 mV");
        let m = InputMeasurement::new(1, None);
        assert_eq!(m.to_string(), "1 (unknown mode)");
    }

    #[test]
    fn device_information_text_strips_padding() {
        let mut info = DeviceInformation::new();
        info.insert(InfoField::Firmware, b"1.63\0\0\0\0".to_vec());
        info.insert(InfoField::Manufacturer, b"fischertechnik".to_vec());
        assert_eq!(info.text(InfoField::Firmware).as_deref(), Some("1.63"));
        assert_eq!(info.text(InfoField::Manufacturer).as_deref(), Some("fischertechnik"));
        assert_eq!(info.text(InfoField::Model), None);
        assert_eq!(InfoField::Sysid.to_string(), "sysid");
    }
}
