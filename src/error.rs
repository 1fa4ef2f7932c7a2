use thiserror::Error;
use uuid::Uuid;

use crate::protocol::ProtocolError;
use crate::transport::TransportKind;

/// Caller-supplied value rejected before any I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("input number must be in 1..=4, got {0}")]
    InputOutOfRange(u8),
    #[error("output number must be in 1..=2, got {0}")]
    OutputOutOfRange(u8),
    #[error("output value must be in -100..=100, got {0}")]
    OutputValueOutOfRange(i32),
}

/// Failure of the underlying link.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "serial")]
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[cfg(feature = "ble")]
    #[error("ble error: {0}")]
    Ble(#[from] btleplug::Error),
    #[error("no bluetooth adapter available")]
    NoAdapter,
    #[error("characteristic {0} not found on device")]
    MissingCharacteristic(Uuid),
    #[error("transport worker is not running")]
    WorkerStopped,
    #[error("link is closed")]
    LinkClosed,
}

/// Error returned by controller operations.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("controller is not connected")]
    NotConnected,
    #[error("failed to connect over {transport}")]
    Connection {
        transport: TransportKind,
        #[source]
        source: Box<ControllerError>,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{operation} is not supported over {transport}")]
    Unsupported {
        operation: &'static str,
        transport: TransportKind,
    },
}

impl From<crate::framing::FramingError> for ControllerError {
    fn from(value: crate::framing::FramingError) -> Self {
        Self::Protocol(value.into())
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;
