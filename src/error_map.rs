//! Maps transport failures and device status bytes onto [`ErrorCode`].
//!
//! Which code a transport failure becomes depends on the interface class it
//! happened on. The defaults below can be overridden per interface with
//! [`ErrorMapper::with_rule`].

use crate::error::ErrorCode;
use crate::protocol::*;
use crate::transport::{TransportError, TransportFault};
use crate::types::DeviceInterface;

#[derive(Debug, Clone)]
struct Rule {
    interfaces: DeviceInterface,
    fault: TransportFault,
    code: ErrorCode,
}

/// Error-code policy.
#[derive(Debug, Clone, Default)]
pub struct ErrorMapper {
    rules: Vec<Rule>,
}

impl ErrorMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `fault` to `code` on every interface in `interfaces`.
    ///
    /// Later rules take precedence over earlier ones and over the defaults.
    /// A rule mapping to `NoError` is ignored.
    pub fn with_rule(
        mut self,
        interfaces: DeviceInterface,
        fault: TransportFault,
        code: ErrorCode,
    ) -> Self {
        if code.is_success() {
            log::warn!("ignoring error rule {fault:?} -> NoError");
            return self;
        }
        self.rules.push(Rule {
            interfaces,
            fault,
            code,
        });
        self
    }

    /// Code for a transport failure on `interface`.
    pub fn map_transport(&self, interface: DeviceInterface, err: &TransportError) -> ErrorCode {
        let code = self
            .rules
            .iter()
            .rev()
            .find(|r| r.fault == err.fault && r.interfaces.intersects(interface))
            .map(|r| r.code)
            .unwrap_or_else(|| default_transport_code(interface, err.fault));
        log::debug!("{interface} transport error {err} -> {code:?}");
        code
    }

    /// Code for a device-reported status byte.
    pub fn map_status(&self, status: u8) -> ErrorCode {
        match status {
            STATUS_BAD_COMMAND => ErrorCode::BadDevType,
            STATUS_BAD_ARG => ErrorCode::BadArg,
            STATUS_BAD_GAIN => ErrorCode::BadConfigVal,
            STATUS_BUSY => ErrorCode::AlreadyActive,
            STATUS_NOT_READY => ErrorCode::DevNotReady,
            STATUS_BAD_RATE => ErrorCode::BadRate,
            STATUS_OVERRUN => ErrorCode::Overrun,
            STATUS_ADC_OVERRUN => ErrorCode::AdcOverrun,
            STATUS_PACER_OVERRUN => ErrorCode::PacerOverrun,
            STATUS_UNDERRUN => ErrorCode::Underrun,
            STATUS_INTERNAL => ErrorCode::Internal,
            _ => ErrorCode::UnhandledException,
        }
    }
}

fn default_transport_code(interface: DeviceInterface, fault: TransportFault) -> ErrorCode {
    let ethernet = interface == DeviceInterface::ETHERNET;
    match fault {
        TransportFault::NotFound => ErrorCode::DevNotFound,
        TransportFault::PermissionDenied if ethernet => ErrorCode::NetConnectionFailed,
        TransportFault::PermissionDenied => ErrorCode::UsbDevNoPermission,
        TransportFault::InterfaceClaimed | TransportFault::InUse if ethernet => {
            ErrorCode::NetDevInUse
        }
        TransportFault::InterfaceClaimed | TransportFault::InUse => ErrorCode::UsbInterfaceClaimed,
        TransportFault::Timeout if ethernet => ErrorCode::NetTimeout,
        TransportFault::Timeout => ErrorCode::TimedOut,
        TransportFault::ConnectionFailed if ethernet => ErrorCode::NetConnectionFailed,
        TransportFault::ConnectionFailed => ErrorCode::DevNotConnected,
        TransportFault::ConnectionLost => ErrorCode::DeadDev,
        TransportFault::InterfaceUnavailable if ethernet => ErrorCode::NetIfcUnavailable,
        TransportFault::InterfaceUnavailable if interface == DeviceInterface::BLUETOOTH => {
            ErrorCode::BadNetIfc
        }
        TransportFault::InterfaceUnavailable => ErrorCode::DevUnavailable,
        TransportFault::BadFrame if ethernet => ErrorCode::BadNetFrame,
        TransportFault::BadFrame => ErrorCode::Internal,
        TransportFault::Other => ErrorCode::UnhandledException,
    }
}
