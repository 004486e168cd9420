//! Serial-port links for AMS devices on USB (CDC) and Bluetooth (SPP).

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::io::{Read, Write};
use std::time::Duration;

use crate::config::SdkConfig;
use crate::registry::Enumerator;
use crate::transport::{Connection, TransportError, TransportFault};
use crate::types::{DeviceDescriptor, DeviceInterface, NameField};

/// Product name used when the USB descriptor carries none.
const DEFAULT_PRODUCT_NAME: &str = "AMS";

/// Serial link with macOS workarounds.
///
/// On macOS:
/// - Minimum 500ms read timeout (USB serial drivers need it)
/// - Flush + 50ms delay after every write
///
/// On Linux:
/// - Standard serial behavior
pub struct SerialConnection {
    port: Option<Box<dyn SerialPort>>,
    name: String,
    is_macos: bool,
}

const MIN_TIMEOUT_MACOS: Duration = Duration::from_millis(500);

fn open_error(port_name: &str, err: serialport::Error) -> TransportError {
    let fault = match err.kind() {
        serialport::ErrorKind::NoDevice => TransportFault::NotFound,
        serialport::ErrorKind::Io(kind) => match kind {
            std::io::ErrorKind::NotFound => TransportFault::NotFound,
            std::io::ErrorKind::PermissionDenied => TransportFault::PermissionDenied,
            std::io::ErrorKind::AddrInUse | std::io::ErrorKind::WouldBlock => {
                TransportFault::InterfaceClaimed
            }
            std::io::ErrorKind::TimedOut => TransportFault::Timeout,
            _ => TransportFault::ConnectionFailed,
        },
        _ => TransportFault::ConnectionFailed,
    };
    TransportError::new(fault, format!("Failed to open {port_name}: {err}"))
}

impl SerialConnection {
    /// Open a serial connection to the given port and discard stale input.
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Self, TransportError> {
        let is_macos = cfg!(target_os = "macos");
        let timeout = if is_macos {
            timeout.max(MIN_TIMEOUT_MACOS)
        } else {
            timeout
        };

        let port = serialport::new(port_name, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|e| open_error(port_name, e))?;

        port.clear(serialport::ClearBuffer::All).map_err(|e| {
            TransportError::new(
                TransportFault::ConnectionFailed,
                format!("Clear buffer failed on {port_name}: {e}"),
            )
        })?;

        log::debug!("opened serial port {port_name} at {baud_rate} baud");
        Ok(Self {
            port: Some(port),
            name: port_name.to_string(),
            is_macos,
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or_else(|| {
            TransportError::new(TransportFault::ConnectionLost, "Serial port closed")
        })
    }

    fn lost(&mut self, context: &str, err: &std::io::Error) -> TransportError {
        let err = TransportError::from_io(context, err);
        if err.fault == TransportFault::ConnectionLost || err.fault == TransportFault::NotFound {
            log::warn!("serial port {} went away: {}", self.name, err.message);
            self.port = None;
        }
        err
    }
}

impl Connection for SerialConnection {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let is_macos = self.is_macos;
        let port = self.port()?;
        let mut result = port.write_all(data);
        if result.is_ok() && is_macos {
            // Push the bytes out before the driver batches them.
            result = port.flush();
            std::thread::sleep(Duration::from_millis(50));
        }
        result.map_err(|e| self.lost("Write failed", &e))
    }

    /// Read up to `len` bytes (returns fewer on timeout).
    fn read(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; len];
        let mut total = 0;
        while total < len {
            match self.port()?.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(self.lost("Read failed", &e)),
            }
        }
        buf.truncate(total);
        Ok(buf)
    }

    /// Set read timeout, enforcing macOS minimum.
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let timeout = if self.is_macos {
            timeout.max(MIN_TIMEOUT_MACOS)
        } else {
            timeout
        };
        self.port()?.set_timeout(timeout).map_err(|e| {
            TransportError::new(TransportFault::Other, format!("Set timeout failed: {e}"))
        })
    }

    fn is_alive(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            log::debug!("closed serial port {}", self.name);
        }
    }
}

/// Discovers AMS devices among the host's serial ports.
///
/// USB ports qualify when their vendor id is one of the configured AMS
/// vendor ids; Bluetooth ports when their name starts with the configured
/// prefix.
#[derive(Debug, Clone)]
pub struct SerialEnumerator {
    usb_vendor_ids: Vec<u16>,
    bluetooth_prefix: String,
}

impl SerialEnumerator {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            usb_vendor_ids: config.usb_vendor_ids.clone(),
            bluetooth_prefix: config.bluetooth_name_prefix.clone(),
        }
    }

    /// Turn one port into a descriptor if it looks like an AMS device.
    pub fn describe(&self, port: &SerialPortInfo) -> Option<DeviceDescriptor> {
        match &port.port_type {
            SerialPortType::UsbPort(usb) if self.usb_vendor_ids.contains(&usb.vid) => {
                let product = usb.product.as_deref().unwrap_or(DEFAULT_PRODUCT_NAME);
                let unique = usb
                    .serial_number
                    .clone()
                    .unwrap_or_else(|| format!("{:04x}:{:04x}@{}", usb.vid, usb.pid, port.port_name));
                Some(descriptor(
                    product,
                    usb.pid as u32,
                    DeviceInterface::USB,
                    &port.port_name,
                    &unique,
                ))
            }
            SerialPortType::BluetoothPort if self.matches_bluetooth(&port.port_name) => {
                Some(descriptor(
                    DEFAULT_PRODUCT_NAME,
                    0,
                    DeviceInterface::BLUETOOTH,
                    &port.port_name,
                    &port.port_name,
                ))
            }
            _ => None,
        }
    }

    fn matches_bluetooth(&self, port_name: &str) -> bool {
        let base = port_name.rsplit('/').next().unwrap_or(port_name);
        // macOS exposes paired devices as /dev/cu.<name>
        let base = base.strip_prefix("cu.").unwrap_or(base);
        !self.bluetooth_prefix.is_empty() && base.starts_with(&self.bluetooth_prefix)
    }
}

fn descriptor(
    product: &str,
    product_id: u32,
    interface: DeviceInterface,
    dev_string: &str,
    unique_id: &str,
) -> DeviceDescriptor {
    DeviceDescriptor {
        product_name: NameField::truncated(product),
        product_id,
        interface,
        dev_string: NameField::truncated(dev_string),
        unique_id: NameField::truncated(unique_id),
        reserved: [0; crate::types::DESCRIPTOR_RESERVED_LEN],
    }
}

impl Enumerator for SerialEnumerator {
    fn interfaces(&self) -> DeviceInterface {
        DeviceInterface::USB | DeviceInterface::BLUETOOTH
    }

    fn enumerate(&self, filter: DeviceInterface) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let ports = serialport::available_ports().map_err(|e| {
            TransportError::new(
                TransportFault::InterfaceUnavailable,
                format!("Serial port enumeration failed: {e}"),
            )
        })?;
        let mut devices: Vec<DeviceDescriptor> = ports
            .iter()
            .filter_map(|p| self.describe(p))
            .filter(|d| filter.contains(d.interface))
            .collect();
        devices.sort_by(|a, b| a.dev_string.as_str().cmp(b.dev_string.as_str()));
        Ok(devices)
    }
}
