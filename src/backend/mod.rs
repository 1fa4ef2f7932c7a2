//! The two ways of talking to a controller behind one contract.
//!
//! [`UsbBackend`] polls the framed serial protocol and diffs snapshots;
//! [`BleBackend`] maps each quantity onto a GATT characteristic and relies on
//! notifications. Both report what they observe to a [`Dispatcher`].

use async_trait::async_trait;

use crate::callback::Dispatcher;
use crate::error::Result;
use crate::transport::TransportKind;
use crate::types::{DeviceInformation, Input, InputMeasurement, InputMode, LedMode, Output};

mod ble;
mod usb;

pub use ble::BleBackend;
pub use usb::UsbBackend;

/// Transport-specific half of a controller.
///
/// Connection state and callbacks live in the [`Dispatcher`]; a backend only performs
/// I/O and forwards observed input changes.
#[async_trait]
pub trait Backend: Send + Sync {
    fn transport(&self) -> TransportKind;

    /// Whether the underlying link is up.
    fn is_connected(&self) -> bool;

    /// Opens the session. Input changes are not reported until
    /// [`start_notifications`](Backend::start_notifications).
    async fn connect(&self, dispatcher: &Dispatcher) -> Result<()>;

    /// Starts forwarding input changes to `dispatcher`.
    async fn start_notifications(&self, dispatcher: &Dispatcher) -> Result<()>;

    /// Stops background work and closes the session. Idempotent.
    async fn disconnect(&self) -> Result<()>;

    async fn get_device_information(&self) -> Result<DeviceInformation>;

    async fn get_battery_level(&self) -> Result<u64>;

    async fn set_led(&self, led: LedMode) -> Result<()>;

    /// `None` when the device reports a color this crate does not know.
    async fn get_led(&self) -> Result<Option<LedMode>>;

    async fn set_input_mode(&self, input: Input, mode: InputMode) -> Result<()>;

    async fn get_input_mode(&self, input: Input) -> Result<Option<InputMode>>;

    async fn get_input_value(
        &self,
        input: Input,
        mode: Option<InputMode>,
    ) -> Result<InputMeasurement>;

    async fn set_output_value(&self, output: Output, value: i8) -> Result<()>;

    async fn get_output_value(&self, output: Output) -> Result<i8>;
}
