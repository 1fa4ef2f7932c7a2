//! Async Rust client for the fischertechnik BT Smart Controller.
//!
//! The controller is reachable over USB serial (framed request/reply, polled) or
//! over BLE (GATT characteristics with notifications). Both sit behind one
//! [`Controller`] handle:
//! - [`discover`] / [`Discovery`] to find and connect a controller, USB first
//! - [`Controller`] for inputs, outputs, the LED and device information
//! - [`InputCallback`] / [`DisconnectCallback`] for change and link-loss handlers
//! - [`transport`] for the raw serial and BLE links
//!
//! Everything is `async` and expects a tokio runtime.

pub mod backend;
mod callback;
pub mod config;
mod controller;
mod discovery;
mod error;
mod framing;
/// GATT services, characteristics and value encodings of the controller.
pub mod gatt;
mod protocol;
/// Link adapters for the serial and BLE transports.
pub mod transport;
mod types;

pub use callback::{
    CallbackResult, ConnectionState, DisconnectCallback, Dispatcher, InputCallback,
};
pub use config::{BleOptions, ControllerOptions, DiscoveryOptions, UsbOptions};
pub use controller::{Controller, OUTPUT_MAX, OUTPUT_MIN, WeakController};
#[cfg(feature = "ble")]
pub use discovery::BleProbe;
#[cfg(feature = "serial")]
pub use discovery::UsbProbe;
pub use discovery::{Discovery, Probe, discover};
pub use error::{ControllerError, Result, TransportError, ValidationError};
pub use framing::{DeviceStatus, FramingError};
pub use protocol::ProtocolError;
pub use transport::TransportKind;
pub use types::{
    DeviceInformation, InfoField, Input, InputMeasurement, InputMode, LedMode, Output,
};
