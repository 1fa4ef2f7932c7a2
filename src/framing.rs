//! Byte framing for the controller's USB serial link.
//!
//! Requests are `[SOF:2][opcode:4][payload length:2, big-endian][payload]`. Replies have a
//! fixed length per command; they start with an 8-byte header and end with a 1-byte
//! status code, with the command's payload in between.

use num_enum::TryFromPrimitive;
use strum_macros::EnumIter;
use thiserror::Error;

pub const FRAMING_SOF: [u8; 2] = [0x5A, 0xA5];
pub const HEADER_LEN: usize = 8;

const STATUS_OK: u8 = 0x00;

/// Requests understood by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum Command {
    GetInfo,
    GetInputs,
    ConfigInput,
    SetOutput,
    SetTestMode,
    SetLed,
}

impl Command {
    pub const fn opcode(self) -> [u8; 4] {
        match self {
            Self::GetInfo => [0x03, 0x41, 0x5A, 0x41],
            Self::GetInputs => [0xF4, 0x8A, 0x16, 0x32],
            Self::ConfigInput => [0x14, 0x34, 0xFF, 0x93],
            Self::SetOutput => [0x68, 0xCE, 0x2A, 0x04],
            Self::SetTestMode => [0x4E, 0xC5, 0x4E, 0xF7],
            Self::SetLed => [0x90, 0x4C, 0xC3, 0xD8],
        }
    }

    /// Exact length of the device's reply, header and status included.
    pub const fn response_len(self) -> usize {
        match self {
            // 4 records of 4 bytes, 3 reserved bytes, status.
            Self::GetInputs => HEADER_LEN + 4 * 4 + 3 + 1,
            Self::GetInfo => 15,
            Self::ConfigInput | Self::SetOutput | Self::SetTestMode | Self::SetLed => {
                HEADER_LEN + 1
            }
        }
    }
}

/// Non-zero status codes reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    UnknownCommand,
    BadChecksum,
    BadFrame,
    InvalidOutputConfig,
    InvalidValue,
    Other(u8),
}

#[derive(TryFromPrimitive)]
#[repr(u8)]
enum KnownStatus {
    UnknownCommand = 1,
    BadChecksum = 2,
    BadFrame = 3,
    InvalidOutputConfig = 4,
    InvalidValue = 5,
}

impl DeviceStatus {
    /// Maps a status byte; `None` for success.
    pub fn from_code(code: u8) -> Option<Self> {
        if code == STATUS_OK {
            return None;
        }

        Some(match KnownStatus::try_from(code) {
            Ok(KnownStatus::UnknownCommand) => Self::UnknownCommand,
            Ok(KnownStatus::BadChecksum) => Self::BadChecksum,
            Ok(KnownStatus::BadFrame) => Self::BadFrame,
            Ok(KnownStatus::InvalidOutputConfig) => Self::InvalidOutputConfig,
            Ok(KnownStatus::InvalidValue) => Self::InvalidValue,
            Err(_) => Self::Other(code),
        })
    }

    pub fn code(self) -> u8 {
        match self {
            Self::UnknownCommand => 1,
            Self::BadChecksum => 2,
            Self::BadFrame => 3,
            Self::InvalidOutputConfig => 4,
            Self::InvalidValue => 5,
            Self::Other(code) => code,
        }
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownCommand => write!(f, "unknown command"),
            Self::BadChecksum => write!(f, "bad checksum"),
            Self::BadFrame => write!(f, "bad frame"),
            Self::InvalidOutputConfig => write!(f, "invalid output configuration"),
            Self::InvalidValue => write!(f, "invalid value"),
            Self::Other(code) => write!(f, "status {code:#04x}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("expected a {expected}-byte response, got {actual} bytes")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("payload of {0} bytes does not fit a frame")]
    PayloadTooLong(usize),
    #[error("device reported {0}")]
    Device(DeviceStatus),
}

/// Builds a request frame for `command`.
pub fn encode_frame(command: Command, payload: &[u8]) -> Result<Vec<u8>, FramingError> {
    let len = u16::try_from(payload.len())
        .map_err(|_| FramingError::PayloadTooLong(payload.len()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&FRAMING_SOF);
    out.extend_from_slice(&command.opcode());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Splits a reply into its payload and trailing status byte after checking its length.
pub fn split_response(
    response: &[u8],
    expected_len: usize,
) -> Result<(&[u8], u8), FramingError> {
    if response.len() != expected_len || expected_len <= HEADER_LEN {
        return Err(FramingError::LengthMismatch {
            expected: expected_len,
            actual: response.len(),
        });
    }

    let (body, status) = response.split_at(expected_len - 1);
    Ok((&body[HEADER_LEN..], status[0]))
}

/// Validates a reply to `command` and returns its payload.
pub fn decode_frame(command: Command, response: &[u8]) -> Result<&[u8], FramingError> {
    let (payload, status) = split_response(response, command.response_len())?;
    match DeviceStatus::from_code(status) {
        None => Ok(payload),
        Some(status) => Err(FramingError::Device(status)),
    }
}
