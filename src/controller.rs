//! The transport-independent controller handle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::backend::Backend;
use crate::callback::{ConnectionState, DisconnectCallback, Dispatcher, InputCallback};
use crate::config::ControllerOptions;
use crate::error::{ControllerError, Result, ValidationError};
use crate::transport::TransportKind;
use crate::types::{DeviceInformation, Input, InputMeasurement, InputMode, LedMode, Output};

pub const OUTPUT_MIN: i32 = -100;
pub const OUTPUT_MAX: i32 = 100;

const RESET_LED_SEQUENCE: [LedMode; 3] = [LedMode::Yellow, LedMode::Blue, LedMode::Green];

struct Inner {
    backend: Box<dyn Backend>,
    dispatcher: Dispatcher,
    options: ControllerOptions,
    lifecycle: Mutex<()>,
    /// Disconnects in progress. Autoconnect is off while non-zero.
    closing: AtomicUsize,
}

struct Closing<'a>(&'a AtomicUsize);

impl<'a> Closing<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for Closing<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A BT-Smart controller reachable over one transport.
///
/// Cheap to clone; clones share the connection and callbacks. Parts that keep a
/// reference back to the controller should hold a [`WeakController`].
///
/// Input callbacks must not await [`disconnect`](Controller::disconnect) or
/// [`connect`](Controller::connect): disconnect waits for in-flight deliveries,
/// including the callback itself. Spawn them instead. Other calls made by a callback
/// while a disconnect drains fail with [`ControllerError::NotConnected`] rather than
/// reconnecting.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

/// Non-owning handle to a [`Controller`].
#[derive(Clone)]
pub struct WeakController {
    inner: Weak<Inner>,
}

impl WeakController {
    pub fn upgrade(&self) -> Option<Controller> {
        self.inner.upgrade().map(|inner| Controller { inner })
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("transport", &self.transport())
            .field("state", &self.state())
            .finish()
    }
}

impl Controller {
    pub fn new(backend: Box<dyn Backend>, options: ControllerOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                dispatcher: Dispatcher::new(),
                options,
                lifecycle: Mutex::new(()),
                closing: AtomicUsize::new(0),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakController {
        WeakController {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn transport(&self) -> TransportKind {
        self.inner.backend.transport()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.dispatcher.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && self.inner.backend.is_connected()
    }

    /// Opens the session, resets the device and starts input change delivery.
    ///
    /// The reset cycles the LED yellow, blue, green and puts every input in
    /// resistance mode. Does nothing when already connected.
    pub async fn connect(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let dispatcher = &self.inner.dispatcher;
        let transport = self.transport();
        let session = dispatcher.begin_session();
        info!(%transport, session, "connecting");

        match self.establish().await {
            Ok(()) => {
                dispatcher.transition(ConnectionState::Connected);
                info!(%transport, "connected");
                Ok(())
            }
            Err(err) => {
                dispatcher.transition(ConnectionState::Disconnected);
                if let Err(cleanup) = self.inner.backend.disconnect().await {
                    warn!(%transport, error = %cleanup, "cleanup after failed connect failed");
                }
                Err(ControllerError::Connection {
                    transport,
                    source: Box::new(err),
                })
            }
        }
    }

    async fn establish(&self) -> Result<()> {
        let backend = &self.inner.backend;
        backend.connect(&self.inner.dispatcher).await?;
        self.reset().await?;
        backend.start_notifications(&self.inner.dispatcher).await
    }

    async fn reset(&self) -> Result<()> {
        let backend = &self.inner.backend;
        for (step, led) in RESET_LED_SEQUENCE.into_iter().enumerate() {
            if step > 0 {
                tokio::time::sleep(self.inner.options.led_step_delay).await;
            }
            backend.set_led(led).await?;
        }
        for input in Input::ALL {
            backend.set_input_mode(input, InputMode::Resistance).await?;
        }
        Ok(())
    }

    /// Closes the session. Callbacks stay registered for the next connect.
    ///
    /// Idempotent. The disconnect callback is not invoked.
    pub async fn disconnect(&self) -> Result<()> {
        let _closing = Closing::enter(&self.inner.closing);
        let _lifecycle = self.inner.lifecycle.lock().await;
        let previous = self.inner.dispatcher.transition(ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            info!(transport = %self.transport(), "disconnecting");
        }
        self.inner.backend.disconnect().await
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        if !self.inner.options.autoconnect || self.inner.closing.load(Ordering::SeqCst) > 0 {
            return Err(ControllerError::NotConnected);
        }
        self.connect().await
    }

    /// Replaces the callback for `input`.
    pub fn on_input_change(&self, input: Input, callback: InputCallback) {
        self.inner
            .dispatcher
            .set_input_callback(input, Some(callback));
    }

    pub fn clear_input_change(&self, input: Input) {
        self.inner.dispatcher.set_input_callback(input, None);
    }

    /// Called once when the link drops while connected.
    pub fn on_disconnect(&self, callback: DisconnectCallback) {
        self.inner.dispatcher.set_disconnect_callback(Some(callback));
    }

    pub fn clear_disconnect(&self) {
        self.inner.dispatcher.set_disconnect_callback(None);
    }

    pub async fn get_device_information(&self) -> Result<DeviceInformation> {
        self.ensure_connected().await?;
        self.inner.backend.get_device_information().await
    }

    pub async fn get_battery_level(&self) -> Result<u64> {
        self.ensure_connected().await?;
        self.inner.backend.get_battery_level().await
    }

    pub async fn set_led(&self, led: LedMode) -> Result<()> {
        self.ensure_connected().await?;
        self.inner.backend.set_led(led).await
    }

    pub async fn get_led(&self) -> Result<Option<LedMode>> {
        self.ensure_connected().await?;
        self.inner.backend.get_led().await
    }

    pub async fn set_input_mode(&self, input: Input, mode: InputMode) -> Result<()> {
        self.ensure_connected().await?;
        self.inner.backend.set_input_mode(input, mode).await
    }

    pub async fn get_input_mode(&self, input: Input) -> Result<Option<InputMode>> {
        self.ensure_connected().await?;
        self.inner.backend.get_input_mode(input).await
    }

    /// Reads `input`, switching it to `mode` first when given.
    ///
    /// The returned measurement is tagged with the mode the value was taken in. Over
    /// USB a switch only takes effect on a later poll.
    pub async fn get_input_value(
        &self,
        input: Input,
        mode: Option<InputMode>,
    ) -> Result<InputMeasurement> {
        self.ensure_connected().await?;
        self.inner.backend.get_input_value(input, mode).await
    }

    /// Drives `output` at `value` percent, -100..=100.
    pub async fn set_output_value(&self, output: Output, value: i32) -> Result<()> {
        let value = checked_output_value(value)?;
        self.ensure_connected().await?;
        self.inner.backend.set_output_value(output, value).await
    }

    pub async fn get_output_value(&self, output: Output) -> Result<i8> {
        self.ensure_connected().await?;
        self.inner.backend.get_output_value(output).await
    }
}

fn checked_output_value(value: i32) -> std::result::Result<i8, ValidationError> {
    if !(OUTPUT_MIN..=OUTPUT_MAX).contains(&value) {
        return Err(ValidationError::OutputValueOutOfRange(value));
    }
    i8::try_from(value).map_err(|_| ValidationError::OutputValueOutOfRange(value))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use super::*;
    use crate::backend::{BleBackend, UsbBackend};
    use crate::callback::CallbackResult;
    use crate::config::UsbOptions;
    use crate::framing::Command;
    use crate::gatt::Endpoint;
    use crate::transport::mock::{FakeFrameLink, FakeGattLink, records};

    fn options(autoconnect: bool) -> ControllerOptions {
        ControllerOptions {
            autoconnect,
            led_step_delay: Duration::ZERO,
        }
    }

    fn usb(link: &FakeFrameLink, autoconnect: bool) -> Controller {
        let usb_options = UsbOptions {
            poll_interval: Duration::from_millis(5),
            ..UsbOptions::default()
        };
        let backend = UsbBackend::new(link.clone(), DeviceInformation::new(), &usb_options);
        Controller::new(Box::new(backend), options(autoconnect))
    }

    fn ble(link: &FakeGattLink) -> Controller {
        Controller::new(Box::new(BleBackend::new(link.clone())), options(true))
    }

    #[tokio::test]
    async fn disconnect_twice_is_a_no_op() {
        let link = FakeFrameLink::default();
        let controller = usb(&link, true);
        controller.connect().await.expect("connect");
        assert!(controller.is_connected());

        controller.disconnect().await.expect("first disconnect");
        controller.disconnect().await.expect("second disconnect");
        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert!(!controller.is_connected());
    }

    #[tokio::test]
    async fn callback_running_during_disconnect_does_not_reconnect() {
        let link = FakeFrameLink::default();
        let controller = usb(&link, true);
        let started = Arc::new(tokio::sync::Notify::new());
        let outcome = Arc::new(StdMutex::new(None));

        let weak = controller.downgrade();
        let (signal, sink) = (Arc::clone(&started), Arc::clone(&outcome));
        controller.on_input_change(
            Input::I1,
            InputCallback::from_async(move |_, _| {
                let (weak, signal, sink) = (weak.clone(), Arc::clone(&signal), Arc::clone(&sink));
                async move {
                    signal.notify_one();
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    if let Some(controller) = weak.upgrade() {
                        let result = controller.set_output_value(Output::O1, 10).await;
                        *sink.lock().expect("lock") = Some(result);
                    }
                    CallbackResult::Ok(())
                }
            }),
        );

        controller.connect().await.expect("connect");
        link.push_inputs(records([7, 0, 0, 0], InputMode::Resistance));
        started.notified().await;

        tokio::time::timeout(Duration::from_secs(3), controller.disconnect())
            .await
            .expect("disconnect finishes while the callback drains")
            .expect("disconnect");

        let result = outcome.lock().expect("lock").take().expect("callback finished");
        assert!(matches!(result, Err(ControllerError::NotConnected)));
        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert!(link.requests_for(Command::SetOutput).is_empty());

        controller.get_led().await.expect("autoconnect after disconnect");
        assert!(controller.is_connected());
        controller.disconnect().await.expect("disconnect");
    }

    #[tokio::test]
    async fn without_autoconnect_calls_fail_while_disconnected() {
        let link = FakeFrameLink::default();
        let controller = usb(&link, false);

        let err = controller.get_led().await.expect_err("not connected");
        assert!(matches!(err, ControllerError::NotConnected));
        assert!(link.requests().is_empty());
    }

    #[tokio::test]
    async fn autoconnect_connects_on_demand() {
        let link = FakeGattLink::new();
        link.set_value(Endpoint::BatteryLevel.characteristic(), &[80]);
        let controller = ble(&link);

        assert_eq!(controller.get_battery_level().await.expect("battery"), 80);
        assert_eq!(controller.state(), ConnectionState::Connected);
        assert_eq!(link.connects(), 1);

        controller.get_battery_level().await.expect("battery");
        assert_eq!(link.connects(), 1);
    }

    #[tokio::test]
    async fn out_of_range_output_is_rejected_before_any_io() {
        let link = FakeFrameLink::default();
        let controller = usb(&link, true);

        for value in [101, -101, 1000] {
            let err = controller
                .set_output_value(Output::O1, value)
                .await
                .expect_err("out of range");
            assert!(matches!(
                err,
                ControllerError::Validation(ValidationError::OutputValueOutOfRange(v)) if v == value
            ));
        }
        assert!(link.requests().is_empty());
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn back_to_back_writes_arrive_in_call_order() {
        let link = FakeFrameLink::default();
        let controller = usb(&link, true);
        controller.connect().await.expect("connect");
        link.clear_requests();

        controller.set_output_value(Output::O1, 100).await.expect("first");
        controller.set_output_value(Output::O1, -50).await.expect("second");

        let payloads: Vec<Vec<u8>> = link
            .requests_for(Command::SetOutput)
            .into_iter()
            .map(|request| request[8..].to_vec())
            .collect();
        assert_eq!(
            payloads,
            vec![vec![0x00, 0x03, 0x00, 0x64], vec![0x00, 0x03, 0x00, 0xCE]]
        );
        assert_eq!(controller.get_output_value(Output::O1).await.expect("read"), -50);
        controller.disconnect().await.expect("disconnect");
    }

    #[tokio::test]
    async fn connect_runs_reset_before_subscribing() {
        let link = FakeGattLink::new();
        let controller = ble(&link);
        controller.connect().await.expect("connect");

        let mut expected = vec![
            (Endpoint::Led.characteristic(), vec![0x01]),
            (Endpoint::Led.characteristic(), vec![0x00]),
            (Endpoint::Led.characteristic(), vec![0x02]),
        ];
        for input in Input::ALL {
            expected.push((Endpoint::InputMode(input).characteristic(), vec![0x0B]));
        }
        assert_eq!(link.writes(), expected);
        assert_eq!(link.subscriptions().len(), 4);
    }

    #[tokio::test]
    async fn callbacks_survive_a_reconnect() {
        let link = FakeGattLink::new();
        let controller = ble(&link);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        controller.on_input_change(
            Input::I2,
            InputCallback::new(move |_, value| sink.lock().expect("lock").push(value)),
        );
        let characteristic = Endpoint::Input(Input::I2).characteristic();

        controller.connect().await.expect("connect");
        link.notify(characteristic, &[1, 0]).await;
        controller.disconnect().await.expect("disconnect");
        link.notify(characteristic, &[2, 0]).await;
        controller.connect().await.expect("reconnect");
        link.notify(characteristic, &[3, 0]).await;

        assert_eq!(*seen.lock().expect("lock"), vec![1, 3]);
    }

    #[tokio::test]
    async fn cleared_callback_is_not_called() {
        let link = FakeGattLink::new();
        let controller = ble(&link);
        let seen = Arc::new(StdMutex::new(0));
        let sink = Arc::clone(&seen);
        controller.on_input_change(
            Input::I1,
            InputCallback::new(move |_, _| *sink.lock().expect("lock") += 1),
        );
        controller.connect().await.expect("connect");

        controller.clear_input_change(Input::I1);
        link.notify(Endpoint::Input(Input::I1).characteristic(), &[9, 0])
            .await;
        assert_eq!(*seen.lock().expect("lock"), 0);
    }

    #[tokio::test]
    async fn failed_handshake_is_a_connection_error() {
        let link = FakeFrameLink::default();
        link.break_link();
        let controller = usb(&link, true);

        let err = controller.connect().await.expect_err("broken link");
        assert!(matches!(
            err,
            ControllerError::Connection {
                transport: TransportKind::Usb,
                ..
            }
        ));
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn weak_handle_does_not_keep_controller_alive() {
        let controller = ble(&FakeGattLink::new());
        let weak = controller.downgrade();
        assert!(weak.upgrade().is_some());
        drop(controller);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn output_range_is_inclusive() {
        assert_eq!(checked_output_value(-100), Ok(-100));
        assert_eq!(checked_output_value(100), Ok(100));
        assert_eq!(
            checked_output_value(-101),
            Err(ValidationError::OutputValueOutOfRange(-101))
        );
    }
}
