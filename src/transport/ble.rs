use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BleOptions;
use crate::error::TransportError;
use crate::transport::{GattLink, LinkHandlers};

struct Pump {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// [`GattLink`] over a `btleplug` peripheral.
pub struct BleTransport {
    adapter: Adapter,
    peripheral: Peripheral,
    characteristics: Mutex<HashMap<Uuid, Characteristic>>,
    connected: Arc<AtomicBool>,
    pump: Mutex<Option<Pump>>,
}

impl BleTransport {
    /// Scans for a peripheral advertising `options.device_name`.
    ///
    /// `Ok(None)` when nothing matched within the scan window.
    pub async fn find(options: &BleOptions) -> Result<Option<Self>, TransportError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        adapter.start_scan(ScanFilter::default()).await?;
        let mut found = None;
        for _ in 0..options.scan_attempts {
            found = select_peripheral(&adapter, &options.device_name).await?;
            if found.is_some() {
                break;
            }
            tokio::time::sleep(options.scan_interval).await;
        }
        adapter.stop_scan().await?;

        let Some(peripheral) = found else {
            info!(name = %options.device_name, "no matching ble peripheral found");
            return Ok(None);
        };
        info!(name = %options.device_name, address = %peripheral.address(), "found ble peripheral");

        Ok(Some(Self {
            adapter,
            peripheral,
            characteristics: Mutex::new(HashMap::new()),
            connected: Arc::new(AtomicBool::new(false)),
            pump: Mutex::new(None),
        }))
    }

    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, TransportError> {
        self.characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&uuid)
            .cloned()
            .ok_or(TransportError::MissingCharacteristic(uuid))
    }

    async fn stop_pump(&self) {
        let pump = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(pump) = pump else {
            return;
        };
        let _ = pump.shutdown.send(true);
        if let Err(err) = pump.task.await {
            warn!(error = %err, "ble notification pump ended abnormally");
        }
    }
}

async fn select_peripheral(
    adapter: &Adapter,
    device_name: &str,
) -> Result<Option<Peripheral>, TransportError> {
    for peripheral in adapter.peripherals().await? {
        let Some(props) = peripheral.properties().await? else {
            continue;
        };
        if props.local_name.as_deref() == Some(device_name) {
            return Ok(Some(peripheral));
        }
    }
    Ok(None)
}

#[async_trait]
impl GattLink for BleTransport {
    async fn connect(&self, handlers: LinkHandlers) -> Result<(), TransportError> {
        if !self.peripheral.is_connected().await? {
            self.peripheral.connect().await?;
        }
        self.peripheral.discover_services().await?;

        let characteristics = self
            .peripheral
            .characteristics()
            .into_iter()
            .map(|ch| (ch.uuid, ch))
            .collect();
        *self.characteristics.lock().unwrap_or_else(PoisonError::into_inner) = characteristics;

        // A previous session's pump may still be parked on a dead stream.
        self.stop_pump().await;

        let mut notifications = self.peripheral.notifications().await?;
        let mut events = self.adapter.events().await?;
        let id = self.peripheral.id();
        let connected = Arc::clone(&self.connected);
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        connected.store(true, Ordering::SeqCst);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    notification = notifications.next() => {
                        let Some(notification) = notification else {
                            break;
                        };
                        (handlers.notify)(notification.uuid, notification.value).await;
                    }
                    event = events.next() => {
                        match event {
                            Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => {
                                connected.store(false, Ordering::SeqCst);
                                // Detached so the handler may disconnect, which joins this task.
                                tokio::spawn((handlers.lost)());
                                break;
                            }
                            Some(_) => {}
                            None => break,
                        }
                    }
                }
            }
            debug!("ble notification pump stopped");
        });

        *self.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(Pump { shutdown, task });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        self.stop_pump().await;
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, TransportError> {
        let ch = self.characteristic(characteristic)?;
        let value = self.peripheral.read(&ch).await?;
        debug!(%characteristic, ?value, "gatt read");
        Ok(value)
    }

    async fn write(&self, characteristic: Uuid, value: &[u8]) -> Result<(), TransportError> {
        let ch = self.characteristic(characteristic)?;
        debug!(%characteristic, ?value, "gatt write");
        self.peripheral.write(&ch, value, WriteType::WithResponse).await?;
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<(), TransportError> {
        let ch = self.characteristic(characteristic)?;
        self.peripheral.subscribe(&ch).await?;
        Ok(())
    }
}
