use std::time::Duration;

pub const DEFAULT_USB_VENDOR_ID: u16 = 0x221D;
pub const DEFAULT_USB_PRODUCT_ID: u16 = 0x0005;
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub const DEFAULT_DEVICE_NAME: &str = "BT Smart Controller";
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_SCAN_ATTEMPTS: u32 = 50;

pub const DEFAULT_LED_STEP_DELAY: Duration = Duration::from_millis(200);

/// Behaviour of the transport-independent controller.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Connect implicitly when an operation is invoked while disconnected.
    pub autoconnect: bool,
    /// Pause between LED colors in the post-connect reset sequence.
    pub led_step_delay: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            autoconnect: true,
            led_step_delay: DEFAULT_LED_STEP_DELAY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UsbOptions {
    pub vendor_id: u16,
    pub product_id: u16,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for UsbOptions {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_USB_VENDOR_ID,
            product_id: DEFAULT_USB_PRODUCT_ID,
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BleOptions {
    /// Advertised local name to match exactly.
    pub device_name: String,
    pub scan_interval: Duration,
    pub scan_attempts: u32,
}

impl Default for BleOptions {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            scan_interval: DEFAULT_SCAN_INTERVAL,
            scan_attempts: DEFAULT_SCAN_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    pub controller: ControllerOptions,
    pub usb: UsbOptions,
    pub ble: BleOptions,
}
