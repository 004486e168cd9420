//! Byte-level link to a physical device.
//!
//! The session layer only talks to devices through [`Connection`]; concrete
//! links live in [`crate::serial`] (USB and Bluetooth serial ports) and
//! [`crate::net`] (Ethernet). Failures are reported as [`TransportError`] and
//! converted to public error codes by [`crate::error_map::ErrorMapper`].

use std::io;
use std::time::Duration;

use crate::config::SdkConfig;
use crate::net::TcpConnection;
use crate::serial::SerialConnection;
use crate::types::{DeviceDescriptor, DeviceInterface};

/// Kind of transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportFault {
    /// No device answers at the requested address.
    NotFound,
    /// The OS refused access to the device node.
    PermissionDenied,
    /// Another process holds the interface.
    InterfaceClaimed,
    /// Network device already serving another host.
    InUse,
    Timeout,
    /// Opening or handshaking failed.
    ConnectionFailed,
    /// An established link went away.
    ConnectionLost,
    /// The host-side adapter is missing or down.
    InterfaceUnavailable,
    /// Malformed frame on the wire.
    BadFrame,
    Other,
}

/// Error raised by a [`Connection`] or [`Connector`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("{fault:?}: {message}")]
pub struct TransportError {
    pub fault: TransportFault,
    pub message: String,
}

impl TransportError {
    pub fn new(fault: TransportFault, message: impl Into<String>) -> Self {
        Self {
            fault,
            message: message.into(),
        }
    }

    pub fn bad_frame(message: impl Into<String>) -> Self {
        Self::new(TransportFault::BadFrame, message)
    }

    /// Classify an I/O error raised while using an established link.
    pub fn from_io(context: &str, err: &io::Error) -> Self {
        let fault = match err.kind() {
            io::ErrorKind::NotFound => TransportFault::NotFound,
            io::ErrorKind::PermissionDenied => TransportFault::PermissionDenied,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportFault::Timeout,
            io::ErrorKind::ConnectionRefused => TransportFault::ConnectionFailed,
            io::ErrorKind::AddrInUse => TransportFault::InUse,
            io::ErrorKind::AddrNotAvailable => TransportFault::InterfaceUnavailable,
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => TransportFault::ConnectionLost,
            _ => TransportFault::Other,
        };
        Self::new(fault, format!("{context}: {err}"))
    }
}

/// An open byte link to one device.
pub trait Connection: Send {
    /// Write the whole buffer.
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Read up to `len` bytes. Returns fewer (possibly none) when the read
    /// timeout expires first.
    fn read(&mut self, len: usize) -> Result<Vec<u8>, TransportError>;

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError>;

    /// Whether the link is still usable.
    fn is_alive(&self) -> bool;

    /// Release the link. Further calls fail with `ConnectionLost`.
    fn close(&mut self);
}

/// Opens connections to devices described by a [`DeviceDescriptor`].
pub trait Connector: Send + Sync {
    fn open(
        &self,
        descriptor: &DeviceDescriptor,
        timeout: Duration,
    ) -> Result<Box<dyn Connection>, TransportError>;
}

/// Connector for real hardware.
///
/// USB and Bluetooth descriptors name a serial port in `dev_string`;
/// Ethernet descriptors carry `host:port`.
#[derive(Debug, Clone)]
pub struct SystemConnector {
    baud_rate: u32,
}

impl SystemConnector {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            baud_rate: config.baud_rate,
        }
    }
}

impl Connector for SystemConnector {
    fn open(
        &self,
        descriptor: &DeviceDescriptor,
        timeout: Duration,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let address = descriptor.dev_string.as_str();
        match descriptor.interface {
            DeviceInterface::USB | DeviceInterface::BLUETOOTH => Ok(Box::new(
                SerialConnection::open(address, self.baud_rate, timeout)?,
            )),
            DeviceInterface::ETHERNET => Ok(Box::new(TcpConnection::open(address, timeout)?)),
            other => Err(TransportError::new(
                TransportFault::InterfaceUnavailable,
                format!("No transport for interface {other}"),
            )),
        }
    }
}
