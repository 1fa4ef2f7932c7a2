use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::callback::Dispatcher;
use crate::config::UsbOptions;
use crate::error::{ControllerError, Result};
use crate::framing::decode_frame;
use crate::protocol::{InputSnapshot, Request};
#[cfg(feature = "serial")]
use crate::transport::serial::{SerialLink, SerialPortMatch};
use crate::transport::{FrameLink, TransportKind};
use crate::types::{DeviceInformation, Input, InputMeasurement, InputMode, LedMode, Output};

type Changes = Vec<(Input, u16)>;

/// Everything that must change together with a device exchange.
struct UsbDevice<L> {
    link: L,
    snapshot: InputSnapshot,
    led: LedMode,
    outputs: [i8; 2],
}

impl<L: FrameLink> UsbDevice<L> {
    async fn exchange(&mut self, request: Request) -> Result<Vec<u8>> {
        let frame = request.encode()?;
        debug!(command = ?request.command, frame = %hex::encode_upper(&frame), "usb request");
        let response = self
            .link
            .exchange(&frame, request.command.response_len())
            .await?;
        debug!(
            command = ?request.command,
            response = %hex::encode_upper(&response),
            "usb response"
        );
        Ok(decode_frame(request.command, &response)?.to_vec())
    }

    /// Replaces the snapshot and returns the inputs whose value moved.
    async fn refresh(&mut self) -> Result<Changes> {
        let payload = self.exchange(Request::get_inputs()).await?;
        let next = InputSnapshot::parse(&payload)?;
        let changes = next.changes_since(&self.snapshot);
        self.snapshot = next;
        Ok(changes)
    }

    async fn handshake(&mut self) -> Result<()> {
        self.exchange(Request::set_test_mode(true)).await?;
        self.exchange(Request::get_info()).await?;
        self.exchange(Request::set_led(LedMode::Blue)).await?;
        self.led = LedMode::Blue;
        // The first reply after entering test mode can be stale.
        self.refresh().await?;
        self.refresh().await?;
        Ok(())
    }
}

struct Poller {
    shutdown: watch::Sender<bool>,
    changes: mpsc::UnboundedSender<Changes>,
    task: JoinHandle<()>,
}

/// Backend for the framed serial protocol.
///
/// The protocol has no push, so a poll task reads all inputs every
/// `poll_interval` and hands changed values to the dispatcher. Outputs and the LED
/// cannot be read back; their last commanded values are cached.
///
/// A mode change requested through [`get_input_value`](Backend::get_input_value)
/// is sent immediately but only shows up in readings from a later poll.
pub struct UsbBackend<L> {
    device: Arc<Mutex<UsbDevice<L>>>,
    info: DeviceInformation,
    poll_interval: Duration,
    active: Arc<AtomicBool>,
    poller: StdMutex<Option<Poller>>,
}

impl<L: FrameLink + 'static> UsbBackend<L> {
    /// `info` is reported as-is by `get_device_information`.
    pub fn new(link: L, info: DeviceInformation, options: &UsbOptions) -> Self {
        Self {
            device: Arc::new(Mutex::new(UsbDevice {
                link,
                snapshot: InputSnapshot::default(),
                led: LedMode::Blue,
                outputs: [0; 2],
            })),
            info,
            poll_interval: options.poll_interval,
            active: Arc::new(AtomicBool::new(false)),
            poller: StdMutex::new(None),
        }
    }

    fn poller(&self) -> MutexGuard<'_, Option<Poller>> {
        self.poller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn polling(&self) -> bool {
        self.poller()
            .as_ref()
            .is_some_and(|poller| !poller.task.is_finished())
    }

    /// Hands changes seen outside the poll loop to the poller for delivery.
    fn forward(&self, changes: Changes) {
        if changes.is_empty() {
            return;
        }
        match self.poller().as_ref() {
            Some(poller) => {
                let _ = poller.changes.send(changes);
            }
            None => debug!(?changes, "input changes before polling started"),
        }
    }

    async fn refresh(&self) -> Result<Changes> {
        let changes = self.device.lock().await.refresh().await?;
        self.forward(changes.clone());
        Ok(changes)
    }

    /// The cached snapshot, re-read first unless the poller keeps it current.
    async fn snapshot(&self) -> Result<InputSnapshot> {
        if !self.polling() {
            self.refresh().await?;
        }
        Ok(self.device.lock().await.snapshot)
    }

    async fn stop_poller(&self) {
        let poller = self.poller().take();
        let Some(poller) = poller else {
            return;
        };
        let _ = poller.shutdown.send(true);
        if let Err(err) = poller.task.await {
            warn!(error = %err, "usb poller ended abnormally");
        }
    }
}

#[cfg(feature = "serial")]
impl UsbBackend<SerialLink> {
    /// Opens the port returned by [`find_port`](crate::transport::serial::find_port).
    pub fn open(port: SerialPortMatch, options: &UsbOptions) -> Result<Self> {
        let link = SerialLink::open(&port.path, options)?;
        info!(path = %port.path, baud = options.baud_rate, "opened usb serial link");
        Ok(Self::new(link, port.info, options))
    }
}

impl<L> Drop for UsbBackend<L> {
    fn drop(&mut self) {
        let poller = self.poller.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(poller) = poller.take() {
            let _ = poller.shutdown.send(true);
        }
    }
}

fn deliver(deliveries: &mut JoinSet<()>, dispatcher: &Dispatcher, changes: Changes) {
    for (input, value) in changes {
        let dispatcher = dispatcher.clone();
        deliveries.spawn(async move { dispatcher.input_changed(input, value).await });
    }
}

async fn poll_loop<L: FrameLink>(
    device: Arc<Mutex<UsbDevice<L>>>,
    dispatcher: Dispatcher,
    session: u64,
    interval: Duration,
    active: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
    mut changes: mpsc::UnboundedReceiver<Changes>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut deliveries = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            Some(seen) = changes.recv() => deliver(&mut deliveries, &dispatcher, seen),
            Some(joined) = deliveries.join_next() => {
                if let Err(err) = joined {
                    warn!(error = %err, "input delivery task failed");
                }
            }
            _ = ticker.tick() => {
                let polled = device.lock().await.refresh().await;
                match polled {
                    Ok(seen) => deliver(&mut deliveries, &dispatcher, seen),
                    Err(err) => {
                        warn!(error = %err, "usb poll failed, ending session");
                        active.store(false, Ordering::SeqCst);
                        let dispatcher = dispatcher.clone();
                        // Detached: the disconnect callback may call disconnect, which
                        // joins this task.
                        tokio::spawn(async move { dispatcher.link_lost(session).await });
                        break;
                    }
                }
            }
        }
    }

    while let Some(joined) = deliveries.join_next().await {
        if let Err(err) = joined {
            warn!(error = %err, "input delivery task failed");
        }
    }
    debug!("usb poller stopped");
}

#[async_trait]
impl<L: FrameLink + 'static> Backend for UsbBackend<L> {
    fn transport(&self) -> TransportKind {
        TransportKind::Usb
    }

    fn is_connected(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn connect(&self, _dispatcher: &Dispatcher) -> Result<()> {
        self.stop_poller().await;
        self.device.lock().await.handshake().await?;
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn start_notifications(&self, dispatcher: &Dispatcher) -> Result<()> {
        self.device
            .lock()
            .await
            .exchange(Request::set_test_mode(false))
            .await?;
        self.stop_poller().await;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (changes, changes_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(poll_loop(
            Arc::clone(&self.device),
            dispatcher.clone(),
            dispatcher.session_id(),
            self.poll_interval,
            Arc::clone(&self.active),
            shutdown_rx,
            changes_rx,
        ));
        *self.poller() = Some(Poller {
            shutdown,
            changes,
            task,
        });
        info!(interval = ?self.poll_interval, "usb polling started");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let was_active = self.active.swap(false, Ordering::SeqCst);
        self.stop_poller().await;
        if was_active {
            info!("usb session closed");
        }
        Ok(())
    }

    async fn get_device_information(&self) -> Result<DeviceInformation> {
        Ok(self.info.clone())
    }

    async fn get_battery_level(&self) -> Result<u64> {
        Err(ControllerError::Unsupported {
            operation: "battery level",
            transport: TransportKind::Usb,
        })
    }

    async fn set_led(&self, led: LedMode) -> Result<()> {
        let mut device = self.device.lock().await;
        device.exchange(Request::set_led(led)).await?;
        device.led = led;
        Ok(())
    }

    async fn get_led(&self) -> Result<Option<LedMode>> {
        Ok(Some(self.device.lock().await.led))
    }

    async fn set_input_mode(&self, input: Input, mode: InputMode) -> Result<()> {
        let changes = {
            let mut device = self.device.lock().await;
            device.exchange(Request::config_input(input, mode)).await?;
            device.refresh().await?
        };
        self.forward(changes);
        Ok(())
    }

    async fn get_input_mode(&self, input: Input) -> Result<Option<InputMode>> {
        Ok(self.snapshot().await?.mode(input))
    }

    async fn get_input_value(
        &self,
        input: Input,
        mode: Option<InputMode>,
    ) -> Result<InputMeasurement> {
        {
            let mut device = self.device.lock().await;
            let reading = device.snapshot.reading(input);
            if let Some(requested) = mode.filter(|&m| Some(m) != reading.mode()) {
                info!(
                    %input,
                    mode = %requested,
                    "switching input mode, effective from a later poll"
                );
                device
                    .exchange(Request::config_input(input, requested))
                    .await?;
                return Ok(InputMeasurement::new(reading.value, reading.mode()));
            }
        }

        let reading = self.snapshot().await?.reading(input);
        Ok(InputMeasurement::new(reading.value, reading.mode()))
    }

    async fn set_output_value(&self, output: Output, value: i8) -> Result<()> {
        let mut device = self.device.lock().await;
        device.exchange(Request::set_output(output, value)).await?;
        device.outputs[output.index()] = value;
        Ok(())
    }

    async fn get_output_value(&self, output: Output) -> Result<i8> {
        Ok(self.device.lock().await.outputs[output.index()])
    }
}
