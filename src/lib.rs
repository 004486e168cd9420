//! # lpams
//!
//! Rust SDK for LaserPulse AMS analog-input acquisition devices.
//!
//! Discovers devices over USB, Bluetooth and Ethernet, manages device
//! sessions through opaque handles, sets the three front-end gains and runs
//! buffered background scans that can be polled while they fill the caller's
//! buffer.
//!
//! ## Quick Start
//!
//! ```no_run
//! use lpams::{AmsSdk, DeviceInterface, ScanBuffer, ScanOptions, ScanStatus, SdkConfig};
//!
//! let sdk = AmsSdk::new(SdkConfig::from_env());
//!
//! let devices = sdk.inventory(DeviceInterface::ANY)?;
//! let handle = sdk.create_device(&devices[0])?;
//! sdk.connect(handle)?;
//! println!("Serial: {}", sdk.read_serial(handle)?);
//!
//! sdk.set_gain(handle, (1, 2, 4))?;
//!
//! // One second of 4-channel data at 1 kHz, stopping when full.
//! let buffer = ScanBuffer::new(4 * 1000);
//! sdk.start_scan(handle, &buffer, ScanOptions::finite(1000))?;
//! while sdk.scan_status(handle)?.0 == ScanStatus::Running {
//!     std::thread::sleep(std::time::Duration::from_millis(100));
//! }
//! println!("first scan: {:?}", &buffer.read()[..4]);
//!
//! sdk.release_device(handle)?;
//! # Ok::<(), lpams::ErrorCode>(())
//! ```

use std::sync::{LockResult, Mutex, MutexGuard, PoisonError};

pub mod config;
mod device;
pub mod error;
pub mod error_map;
pub mod mock;
pub mod net;
pub mod protocol;
pub mod registry;
pub mod scan;
pub mod serial;
pub mod session;
pub mod transport;
pub mod types;

pub use config::{NetworkEndpoint, SdkConfig};
pub use error::{ErrorCode, ErrorGroup, Result};
pub use error_map::ErrorMapper;
pub use registry::{Enumerator, InventoryError, Registry};
pub use scan::ScanBuffer;
pub use session::AmsSdk;
pub use transport::{Connection, Connector, TransportError, TransportFault};
pub use types::*;

/// Take the value out of a possibly poisoned lock result.
///
/// A panic on another thread never leaves session or scan state half
/// written, so the data is still usable.
pub(crate) fn recover<G>(result: LockResult<G>) -> G {
    result.unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    recover(mutex.lock())
}
