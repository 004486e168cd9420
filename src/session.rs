//! Handle-based SDK entry point.

use std::sync::{Arc, Mutex};

use crate::config::SdkConfig;
use crate::device::{Device, DeviceEnv};
use crate::error::{ErrorCode, Result};
use crate::error_map::ErrorMapper;
use crate::lock;
use crate::registry::{InventoryError, Registry};
use crate::scan::ScanBuffer;
use crate::transport::{Connector, SystemConnector};
use crate::types::*;

struct Slot {
    generation: u32,
    device: Option<Arc<Mutex<Device>>>,
}

/// Entry point of the SDK.
///
/// Owns device discovery and every session created from it. Sessions are
/// addressed by [`DeviceHandle`]; a handle stays valid until
/// [`AmsSdk::release_device`], after which every call with it fails
/// `BadDevHandle`. Calls on different handles never block each other.
///
/// ```no_run
/// use lpams::{AmsSdk, DeviceInterface, Gains, ScanBuffer, ScanOptions, SdkConfig};
///
/// let sdk = AmsSdk::new(SdkConfig::from_env());
/// let devices = sdk.inventory(DeviceInterface::ANY)?;
/// let handle = sdk.create_device(&devices[0])?;
/// sdk.connect(handle)?;
/// sdk.set_gain(handle, Gains::new(1, 2, 4))?;
///
/// let buffer = ScanBuffer::new(4000);
/// sdk.start_scan(handle, &buffer, ScanOptions::continuous(1000))?;
/// let (status, transfer) = sdk.scan_status(handle)?;
/// println!("{status:?}: {} scans", transfer.current_scan_count);
/// sdk.stop_scan(handle)?;
/// sdk.release_device(handle)?;
/// # Ok::<(), lpams::ErrorCode>(())
/// ```
pub struct AmsSdk {
    env: Arc<DeviceEnv>,
    registry: Registry,
    slots: Mutex<Vec<Slot>>,
}

impl AmsSdk {
    /// SDK for real hardware: serial ports and configured network devices.
    pub fn new(config: SdkConfig) -> Self {
        let registry = Registry::system(&config);
        let connector = SystemConnector::new(&config);
        Self::with_transport(config, registry, connector)
    }

    /// SDK with caller-provided discovery and links.
    pub fn with_transport(
        config: SdkConfig,
        registry: Registry,
        connector: impl Connector + 'static,
    ) -> Self {
        Self::with_parts(config, registry, connector, ErrorMapper::default())
    }

    /// As [`AmsSdk::with_transport`], with a custom error-code policy.
    pub fn with_parts(
        config: SdkConfig,
        registry: Registry,
        connector: impl Connector + 'static,
        mapper: ErrorMapper,
    ) -> Self {
        Self {
            registry: registry.with_error_mapper(mapper.clone()),
            env: Arc::new(DeviceEnv {
                config,
                connector: Box::new(connector),
                mapper: Arc::new(mapper),
            }),
            slots: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &SdkConfig {
        &self.env.config
    }

    // --- Discovery ---

    /// Copy matching descriptors into `out`. See [`Registry::fill_inventory`].
    pub fn get_inventory(
        &self,
        filter: DeviceInterface,
        out: &mut [DeviceDescriptor],
    ) -> std::result::Result<usize, InventoryError> {
        self.registry.fill_inventory(filter, out)
    }

    pub fn inventory(&self, filter: DeviceInterface) -> Result<Vec<DeviceDescriptor>> {
        self.registry.inventory(filter)
    }

    pub fn device_count(&self, filter: DeviceInterface) -> Result<usize> {
        self.registry.device_count(filter)
    }

    // --- Session lifecycle ---

    /// Create a session for `descriptor`. Does not touch the hardware.
    pub fn create_device(&self, descriptor: &DeviceDescriptor) -> Result<DeviceHandle> {
        descriptor.validate()?;
        let device = Arc::new(Mutex::new(Device::new(
            Arc::clone(&self.env),
            descriptor.clone(),
        )));

        let mut slots = lock(&self.slots);
        let index = match slots.iter().position(|s| s.device.is_none()) {
            Some(index) => index,
            None => {
                slots.push(Slot {
                    generation: 1,
                    device: None,
                });
                slots.len() - 1
            }
        };
        let index32 = u32::try_from(index).map_err(|_| ErrorCode::Internal)?;
        let slot = &mut slots[index];
        slot.device = Some(device);
        let handle = DeviceHandle::new(index32, slot.generation);
        log::debug!("created session {handle} for {}", descriptor.unique_id);
        Ok(handle)
    }

    /// Open the link and read the device identity and gains.
    pub fn connect(&self, handle: DeviceHandle) -> Result<()> {
        self.with_device(handle, Device::connect)
    }

    /// Serial number reported by a connected device.
    pub fn read_serial(&self, handle: DeviceHandle) -> Result<i32> {
        self.with_device(handle, |d| d.info().map(|i| i.serial))
    }

    /// Identity reported by a connected device.
    pub fn device_info(&self, handle: DeviceHandle) -> Result<DeviceInfo> {
        self.with_device(handle, |d| d.info())
    }

    pub fn descriptor(&self, handle: DeviceHandle) -> Result<DeviceDescriptor> {
        self.with_device(handle, |d| d.descriptor().cloned())
    }

    pub fn is_connected(&self, handle: DeviceHandle) -> Result<bool> {
        self.with_device(handle, |d| d.is_connected())
    }

    /// Write the three gain codes. Accepts [`Gains`] or a tuple.
    pub fn set_gain(&self, handle: DeviceHandle, gains: impl Into<Gains>) -> Result<()> {
        let gains = gains.into();
        self.with_device(handle, |d| d.set_gain(gains))
    }

    /// Gains last confirmed by the device.
    pub fn get_gain(&self, handle: DeviceHandle) -> Result<Gains> {
        self.with_device(handle, |d| d.gains())
    }

    /// Stop any scan and close the link. The handle stays valid.
    pub fn disconnect(&self, handle: DeviceHandle) -> Result<()> {
        self.with_device(handle, Device::disconnect)
    }

    /// Disconnect and invalidate the handle.
    pub fn release_device(&self, handle: DeviceHandle) -> Result<()> {
        let device = {
            let mut slots = lock(&self.slots);
            let slot = slots
                .get_mut(handle.index())
                .filter(|s| s.generation == handle.generation() && s.device.is_some())
                .ok_or(ErrorCode::BadDevHandle)?;
            slot.generation = match slot.generation.wrapping_add(1) {
                0 => 1,
                g => g,
            };
            slot.device.take()
        };
        if let Some(device) = device {
            lock(&device).release();
            log::debug!("released session {handle}");
        }
        Ok(())
    }

    // --- Scanning ---

    /// Start a background scan into `buffer`.
    ///
    /// Samples are interleaved by channel, one scan of
    /// [`SdkConfig::scan_channels`] samples after another. The buffer length
    /// must be a positive multiple of the channel count.
    pub fn start_scan(
        &self,
        handle: DeviceHandle,
        buffer: &ScanBuffer,
        options: ScanOptions,
    ) -> Result<()> {
        self.with_device(handle, |d| d.start_scan(buffer, options))
    }

    /// Snapshot of the current or last scan.
    ///
    /// A fault that ended the scan is returned once as the error.
    pub fn scan_status(&self, handle: DeviceHandle) -> Result<(ScanStatus, TransferStatus)> {
        self.with_device(handle, Device::scan_status)
    }

    /// Stop the scan and wait for the acquisition thread to exit.
    pub fn stop_scan(&self, handle: DeviceHandle) -> Result<()> {
        self.with_device(handle, Device::stop_scan)
    }

    fn lookup(&self, handle: DeviceHandle) -> Result<Arc<Mutex<Device>>> {
        let slots = lock(&self.slots);
        slots
            .get(handle.index())
            .filter(|s| s.generation == handle.generation())
            .and_then(|s| s.device.clone())
            .ok_or(ErrorCode::BadDevHandle)
    }

    fn with_device<T>(&self, handle: DeviceHandle, f: impl FnOnce(&mut Device) -> Result<T>) -> Result<T> {
        let device = self.lookup(handle)?;
        let mut device = lock(&device);
        f(&mut device)
    }
}

impl Drop for AmsSdk {
    fn drop(&mut self) {
        let slots = std::mem::take(&mut *lock(&self.slots));
        for device in slots.into_iter().filter_map(|s| s.device) {
            lock(&device).release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBus, MockDevice};

    fn sdk() -> (AmsSdk, MockDevice) {
        let dev = MockDevice::new(7);
        let bus = MockBus::new([dev.clone()]);
        let sdk = AmsSdk::with_transport(
            SdkConfig::default(),
            Registry::new().with_enumerator(bus.clone()),
            bus,
        );
        (sdk, dev)
    }

    #[test]
    fn slots_are_reused_with_new_generation() {
        let (sdk, dev) = sdk();
        let first = sdk.create_device(dev.descriptor()).unwrap();
        sdk.release_device(first).unwrap();
        let second = sdk.create_device(dev.descriptor()).unwrap();
        assert_eq!(first.index(), second.index());
        assert_eq!(second.generation(), first.generation() + 1);
        assert_eq!(sdk.is_connected(first), Err(ErrorCode::BadDevHandle));
        assert_eq!(sdk.is_connected(second), Ok(false));
    }

    #[test]
    fn forged_handles_are_rejected() {
        let (sdk, dev) = sdk();
        let h = sdk.create_device(dev.descriptor()).unwrap();
        assert_eq!(sdk.connect(DeviceHandle::from_raw(0)), Err(ErrorCode::BadDevHandle));
        assert_eq!(
            sdk.connect(DeviceHandle::new(5, h.generation())),
            Err(ErrorCode::BadDevHandle)
        );
        assert_eq!(
            sdk.connect(DeviceHandle::new(0, h.generation() + 1)),
            Err(ErrorCode::BadDevHandle)
        );
        assert_eq!(sdk.release_device(DeviceHandle::from_raw(0)), Err(ErrorCode::BadDevHandle));
    }

    #[test]
    fn invalid_descriptor_is_bad_arg() {
        let (sdk, dev) = sdk();
        let mut d = dev.descriptor().clone();
        d.interface = DeviceInterface::USB | DeviceInterface::ETHERNET;
        assert_eq!(sdk.create_device(&d), Err(ErrorCode::BadArg));
    }

    #[test]
    fn create_device_only_returns_vendor_codes() {
        let (sdk, dev) = sdk();
        let valid = dev.descriptor().clone();
        let mut no_interface = valid.clone();
        no_interface.interface = DeviceInterface::NONE;
        let mut two_interfaces = valid.clone();
        two_interfaces.interface = DeviceInterface::USB | DeviceInterface::BLUETOOTH;
        let mut no_name = valid.clone();
        no_name.product_name = Default::default();
        let mut no_path = valid.clone();
        no_path.dev_string = Default::default();
        let mut no_id = valid.clone();
        no_id.unique_id = Default::default();

        for d in [valid, no_interface, two_interfaces, no_name, no_path, no_id] {
            let code = ErrorCode::of(&sdk.create_device(&d));
            assert_eq!(ErrorCode::try_from(code.code()), Ok(code));
            assert!(matches!(code, ErrorCode::NoError | ErrorCode::BadArg), "{code:?}");
        }
    }

    #[test]
    fn dropping_the_sdk_closes_links() {
        let (sdk, dev) = sdk();
        let h = sdk.create_device(dev.descriptor()).unwrap();
        sdk.connect(h).unwrap();
        drop(sdk);

        let bus = MockBus::new([dev.clone()]);
        let sdk = AmsSdk::with_transport(SdkConfig::default(), Registry::new(), bus);
        let h = sdk.create_device(dev.descriptor()).unwrap();
        assert_eq!(sdk.connect(h), Ok(()));
    }
}
