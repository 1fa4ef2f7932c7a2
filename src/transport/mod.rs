//! Link seams between the backends and real devices.
//!
//! [`FrameLink`] carries framed request/reply exchanges for the USB backend and
//! [`GattLink`] carries characteristic reads, writes and notifications for the BLE
//! backend. The concrete adapters are behind the `serial` and `ble` features.

use async_trait::async_trait;
use futures::future::BoxFuture;
use strum_macros::Display;
use uuid::Uuid;

use crate::error::TransportError;

#[cfg(feature = "ble")]
pub mod ble;
#[cfg(feature = "serial")]
pub mod serial;

#[cfg(test)]
pub(crate) mod mock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum TransportKind {
    Usb,
    Ble,
}

/// Request/reply link for the framed USB protocol.
#[async_trait]
pub trait FrameLink: Send {
    /// Writes `request` and reads up to `response_len` bytes of reply.
    ///
    /// A short reply is returned as-is; length validation belongs to the codec.
    async fn exchange(
        &mut self,
        request: &[u8],
        response_len: usize,
    ) -> Result<Vec<u8>, TransportError>;
}

pub type NotifyHandler =
    std::sync::Arc<dyn Fn(Uuid, Vec<u8>) -> BoxFuture<'static, ()> + Send + Sync>;
pub type LinkLostHandler = std::sync::Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Where a GATT link delivers pushed values and link loss.
#[derive(Clone)]
pub struct LinkHandlers {
    pub notify: NotifyHandler,
    pub lost: LinkLostHandler,
}

/// Characteristic-level access to a BLE peripheral.
#[async_trait]
pub trait GattLink: Send + Sync {
    async fn connect(&self, handlers: LinkHandlers) -> Result<(), TransportError>;

    /// Idempotent.
    async fn disconnect(&self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, TransportError>;

    /// Acknowledged write.
    async fn write(&self, characteristic: Uuid, value: &[u8]) -> Result<(), TransportError>;

    async fn subscribe(&self, characteristic: Uuid) -> Result<(), TransportError>;
}
