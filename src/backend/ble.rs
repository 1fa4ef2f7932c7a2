use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use strum::IntoEnumIterator;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::callback::Dispatcher;
#[cfg(feature = "ble")]
use crate::config::BleOptions;
use crate::error::Result;
use crate::gatt::{self, Endpoint};
#[cfg(feature = "ble")]
use crate::transport::ble::BleTransport;
use crate::transport::{GattLink, LinkHandlers, LinkLostHandler, NotifyHandler, TransportKind};
use crate::types::{
    DeviceInformation, InfoField, Input, InputMeasurement, InputMode, LedMode, Output,
};

/// Backend for the GATT interface.
///
/// Every quantity is its own characteristic; input changes arrive as notifications.
/// Requests are serialized per instance, so writes land in call order.
///
/// Input callbacks run on the link's notification task. A callback that awaits
/// `disconnect` on the same controller never completes.
pub struct BleBackend<L> {
    link: L,
    gate: Mutex<()>,
}

impl<L: GattLink> BleBackend<L> {
    pub fn new(link: L) -> Self {
        Self {
            link,
            gate: Mutex::new(()),
        }
    }

    async fn read(&self, endpoint: Endpoint) -> Result<Vec<u8>> {
        Ok(self.link.read(endpoint.characteristic()).await?)
    }

    async fn write(&self, endpoint: Endpoint, value: &[u8]) -> Result<()> {
        Ok(self.link.write(endpoint.characteristic(), value).await?)
    }
}

#[cfg(feature = "ble")]
impl BleBackend<BleTransport> {
    /// Scans for the controller; `Ok(None)` when it is not advertising.
    pub async fn find(options: &BleOptions) -> Result<Option<Self>> {
        Ok(BleTransport::find(options).await?.map(Self::new))
    }
}

fn link_handlers(dispatcher: &Dispatcher) -> LinkHandlers {
    let on_notify = dispatcher.clone();
    let notify: NotifyHandler = Arc::new(move |characteristic: Uuid, value: Vec<u8>| {
        let dispatcher = on_notify.clone();
        async move {
            let Some(Endpoint::Input(input)) = Endpoint::from_characteristic(characteristic) else {
                debug!(%characteristic, "ignoring notification");
                return;
            };
            match gatt::decode_input_value(&value) {
                Ok(raw) => dispatcher.input_changed(input, raw).await,
                Err(err) => warn!(%input, error = %err, "undecodable input notification"),
            }
        }
        .boxed()
    });

    let on_lost = dispatcher.clone();
    let session = dispatcher.session_id();
    let lost: LinkLostHandler = Arc::new(move || {
        let dispatcher = on_lost.clone();
        async move {
            info!(session, "ble link lost");
            dispatcher.link_lost(session).await;
        }
        .boxed()
    });

    LinkHandlers { notify, lost }
}

#[async_trait]
impl<L: GattLink> Backend for BleBackend<L> {
    fn transport(&self) -> TransportKind {
        TransportKind::Ble
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    // Not gated: tearing down the link joins the notification task, which may be
    // running a callback that is waiting for the gate.
    async fn connect(&self, dispatcher: &Dispatcher) -> Result<()> {
        self.link.connect(link_handlers(dispatcher)).await?;
        Ok(())
    }

    async fn start_notifications(&self, _dispatcher: &Dispatcher) -> Result<()> {
        let _gate = self.gate.lock().await;
        for input in Input::ALL {
            let characteristic = Endpoint::Input(input).characteristic();
            if let Err(err) = self.link.subscribe(characteristic).await {
                warn!(%input, error = %err, "failed to subscribe to input notifications");
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.link.disconnect().await?;
        Ok(())
    }

    async fn get_device_information(&self) -> Result<DeviceInformation> {
        let _gate = self.gate.lock().await;
        let mut info = DeviceInformation::new();
        for field in InfoField::iter() {
            match self.read(Endpoint::DeviceInfo(field)).await {
                Ok(value) => info.insert(field, value),
                Err(err) => debug!(%field, error = %err, "device information field unavailable"),
            }
        }
        Ok(info)
    }

    async fn get_battery_level(&self) -> Result<u64> {
        let _gate = self.gate.lock().await;
        let raw = self.read(Endpoint::BatteryLevel).await?;
        Ok(gatt::decode_battery_level(&raw)?)
    }

    async fn set_led(&self, led: LedMode) -> Result<()> {
        let _gate = self.gate.lock().await;
        self.write(Endpoint::Led, &gatt::encode_led(led)).await
    }

    async fn get_led(&self) -> Result<Option<LedMode>> {
        let _gate = self.gate.lock().await;
        let raw = self.read(Endpoint::Led).await?;
        Ok(gatt::decode_led(&raw)?)
    }

    async fn set_input_mode(&self, input: Input, mode: InputMode) -> Result<()> {
        let _gate = self.gate.lock().await;
        self.write(Endpoint::InputMode(input), &gatt::encode_input_mode(mode))
            .await
    }

    async fn get_input_mode(&self, input: Input) -> Result<Option<InputMode>> {
        let _gate = self.gate.lock().await;
        let raw = self.read(Endpoint::InputMode(input)).await?;
        Ok(gatt::decode_input_mode(&raw)?)
    }

    async fn get_input_value(
        &self,
        input: Input,
        mode: Option<InputMode>,
    ) -> Result<InputMeasurement> {
        let _gate = self.gate.lock().await;
        if let Some(mode) = mode {
            self.write(Endpoint::InputMode(input), &gatt::encode_input_mode(mode))
                .await?;
        }
        let mode = gatt::decode_input_mode(&self.read(Endpoint::InputMode(input)).await?)?;
        let value = gatt::decode_input_value(&self.read(Endpoint::Input(input)).await?)?;
        Ok(InputMeasurement::new(value, mode))
    }

    async fn set_output_value(&self, output: Output, value: i8) -> Result<()> {
        let _gate = self.gate.lock().await;
        self.write(Endpoint::Output(output), &gatt::encode_output_value(value))
            .await
    }

    async fn get_output_value(&self, output: Output) -> Result<i8> {
        let _gate = self.gate.lock().await;
        let raw = self.read(Endpoint::Output(output)).await?;
        Ok(gatt::decode_output_value(&raw)?)
    }
}
