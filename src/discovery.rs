//! Finding a controller on whichever transport has one.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::backend::Backend;
#[cfg(feature = "ble")]
use crate::backend::BleBackend;
#[cfg(feature = "serial")]
use crate::backend::UsbBackend;
#[cfg(feature = "ble")]
use crate::config::BleOptions;
#[cfg(feature = "serial")]
use crate::config::UsbOptions;
use crate::config::{ControllerOptions, DiscoveryOptions};
use crate::controller::Controller;
use crate::error::Result;
#[cfg(feature = "serial")]
use crate::error::TransportError;
use crate::transport::TransportKind;

/// Looks for a controller on one transport.
#[async_trait]
pub trait Probe: Send + Sync {
    fn transport(&self) -> TransportKind;

    /// `Ok(None)` when no device is present. Errors mean the transport itself failed.
    async fn probe(&self) -> Result<Option<Box<dyn Backend>>>;
}

#[cfg(feature = "serial")]
pub struct UsbProbe {
    options: UsbOptions,
}

#[cfg(feature = "serial")]
impl UsbProbe {
    pub fn new(options: UsbOptions) -> Self {
        Self { options }
    }
}

#[cfg(feature = "serial")]
#[async_trait]
impl Probe for UsbProbe {
    fn transport(&self) -> TransportKind {
        TransportKind::Usb
    }

    async fn probe(&self) -> Result<Option<Box<dyn Backend>>> {
        let options = self.options.clone();
        let found =
            tokio::task::spawn_blocking(move || crate::transport::serial::find_port(&options))
                .await
                .map_err(|err| TransportError::Io(std::io::Error::other(err)))??;

        let Some(port) = found else {
            return Ok(None);
        };
        let backend = UsbBackend::open(port, &self.options)?;
        Ok(Some(Box::new(backend)))
    }
}

#[cfg(feature = "ble")]
pub struct BleProbe {
    options: BleOptions,
}

#[cfg(feature = "ble")]
impl BleProbe {
    pub fn new(options: BleOptions) -> Self {
        Self { options }
    }
}

#[cfg(feature = "ble")]
#[async_trait]
impl Probe for BleProbe {
    fn transport(&self) -> TransportKind {
        TransportKind::Ble
    }

    async fn probe(&self) -> Result<Option<Box<dyn Backend>>> {
        let backend = BleBackend::find(&self.options).await?;
        Ok(backend.map(|backend| Box::new(backend) as Box<dyn Backend>))
    }
}

/// USB-first search over the compiled-in transports.
pub struct Discovery {
    usb: Option<Box<dyn Probe>>,
    ble: Option<Box<dyn Probe>>,
    options: ControllerOptions,
}

impl Discovery {
    /// Probes for every transport enabled at build time.
    pub fn new(options: DiscoveryOptions) -> Self {
        #[cfg(feature = "serial")]
        let usb = Some(Box::new(UsbProbe::new(options.usb)) as Box<dyn Probe>);
        #[cfg(not(feature = "serial"))]
        let usb = None;

        #[cfg(feature = "ble")]
        let ble = Some(Box::new(BleProbe::new(options.ble)) as Box<dyn Probe>);
        #[cfg(not(feature = "ble"))]
        let ble = None;

        Self::with_probes(usb, ble, options.controller)
    }

    pub fn with_probes(
        usb: Option<Box<dyn Probe>>,
        ble: Option<Box<dyn Probe>>,
        options: ControllerOptions,
    ) -> Self {
        Self { usb, ble, options }
    }

    /// Returns the first controller found, already connected.
    ///
    /// USB is tried before BLE. `Ok(None)` when neither enabled transport has a device.
    pub async fn discover(&self, try_usb: bool, try_ble: bool) -> Result<Option<Controller>> {
        let candidates = [(try_usb, &self.usb), (try_ble, &self.ble)];
        for (enabled, probe) in candidates {
            let Some(probe) = probe.as_deref().filter(|_| enabled) else {
                continue;
            };
            let transport = probe.transport();

            let Some(backend) = probe.probe().await? else {
                info!(%transport, "no controller found");
                continue;
            };
            info!(%transport, "controller found");

            let controller = Controller::new(backend, self.options.clone());
            controller.connect().await?;
            return Ok(Some(controller));
        }

        debug!(try_usb, try_ble, "discovery finished without a controller");
        Ok(None)
    }
}

/// [`Discovery::discover`] with default options.
pub async fn discover(try_usb: bool, try_ble: bool) -> Result<Option<Controller>> {
    Discovery::new(DiscoveryOptions::default())
        .discover(try_usb, try_ble)
        .await
}
