use std::io::{Read, Write};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use serialport::{SerialPortType, UsbPortInfo};
use tokio::sync::oneshot;
use tracing::debug;

use crate::config::UsbOptions;
use crate::error::TransportError;
use crate::transport::FrameLink;
use crate::types::{DeviceInformation, InfoField};

/// A serial port whose USB descriptor matched the configured vendor/product pair.
#[derive(Debug, Clone)]
pub struct SerialPortMatch {
    pub path: String,
    pub info: DeviceInformation,
}

/// Looks for the controller's serial adapter.
///
/// `Ok(None)` when no port matches; enumeration failures are errors.
pub fn find_port(options: &UsbOptions) -> Result<Option<SerialPortMatch>, TransportError> {
    let ports = serialport::available_ports()?;
    for port in ports {
        let SerialPortType::UsbPort(usb) = &port.port_type else {
            continue;
        };
        if usb.vid != options.vendor_id || usb.pid != options.product_id {
            continue;
        }

        return Ok(Some(SerialPortMatch {
            info: descriptor_info(usb),
            path: port.port_name,
        }));
    }

    Ok(None)
}

fn descriptor_info(usb: &UsbPortInfo) -> DeviceInformation {
    let mut info = DeviceInformation::new();
    if let Some(manufacturer) = &usb.manufacturer {
        info.insert(InfoField::Manufacturer, manufacturer.as_bytes());
    }
    if let Some(product) = &usb.product {
        info.insert(InfoField::Model, product.as_bytes());
    }
    if let Some(serial) = &usb.serial_number {
        info.insert(InfoField::Sysid, serial.as_bytes());
    }
    info
}

/// Blocking serial port speaking whole request/reply exchanges.
pub struct SerialTransport {
    inner: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    pub fn open(path: &str, options: &UsbOptions) -> Result<Self, TransportError> {
        Self::open_with(path, options.baud_rate, options.read_timeout)
    }

    fn open_with(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud_rate).timeout(timeout).open()?;
        Ok(Self { inner: port })
    }

    /// Writes `request`, then reads until `response_len` bytes arrived or the port times out.
    pub fn exchange(
        &mut self,
        request: &[u8],
        response_len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        self.inner.write_all(request)?;
        self.inner.flush()?;

        let mut response = vec![0_u8; response_len];
        let mut filled = 0;
        while filled < response_len {
            match self.inner.read(&mut response[filled..]) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(err) if err.kind() == std::io::ErrorKind::TimedOut => break,
                Err(err) => return Err(err.into()),
            }
        }
        response.truncate(filled);
        Ok(response)
    }
}

struct Job {
    request: Vec<u8>,
    response_len: usize,
    reply: oneshot::Sender<Result<Vec<u8>, TransportError>>,
}

/// [`FrameLink`] over a [`SerialTransport`] owned by a dedicated worker thread.
///
/// The worker exits when the link is dropped.
pub struct SerialLink {
    jobs: mpsc::Sender<Job>,
}

impl SerialLink {
    pub fn open(path: &str, options: &UsbOptions) -> Result<Self, TransportError> {
        let transport = SerialTransport::open(path, options)?;
        Ok(Self::spawn(transport))
    }

    pub fn spawn(mut transport: SerialTransport) -> Self {
        let (jobs, job_rx) = mpsc::channel::<Job>();

        thread::spawn(move || {
            while let Ok(job) = job_rx.recv() {
                let result = transport.exchange(&job.request, job.response_len);
                let _ = job.reply.send(result);
            }
            debug!("serial worker stopped");
        });

        Self { jobs }
    }
}

#[async_trait]
impl FrameLink for SerialLink {
    async fn exchange(
        &mut self,
        request: &[u8],
        response_len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let (reply, reply_rx) = oneshot::channel();
        self.jobs
            .send(Job {
                request: request.to_vec(),
                response_len,
                reply,
            })
            .map_err(|_| TransportError::WorkerStopped)?;

        reply_rx.await.map_err(|_| TransportError::WorkerStopped)?
    }
}
