//! Device discovery across interface classes.

use std::collections::HashSet;
use std::time::Duration;

use crate::config::SdkConfig;
use crate::error::{ErrorCode, Result};
use crate::error_map::ErrorMapper;
use crate::net::NetworkEnumerator;
use crate::serial::SerialEnumerator;
use crate::transport::TransportError;
use crate::types::{DeviceDescriptor, DeviceInterface};

/// Source of device descriptors for one or more interface classes.
pub trait Enumerator: Send + Sync {
    /// Classes this enumerator can report.
    fn interfaces(&self) -> DeviceInterface;

    /// Devices currently reachable whose interface is in `filter`.
    fn enumerate(&self, filter: DeviceInterface) -> std::result::Result<Vec<DeviceDescriptor>, TransportError>;
}

/// Failure of [`Registry::fill_inventory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InventoryError {
    /// The output slice was too small; nothing was written.
    #[error("Descriptor buffer too small: {required} required")]
    BufferTooSmall { required: usize },
    #[error(transparent)]
    Failed(#[from] ErrorCode),
}

impl InventoryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            InventoryError::BufferTooSmall { .. } => ErrorCode::BadBufferSize,
            InventoryError::Failed(code) => *code,
        }
    }

    /// Descriptor count needed for a retry, if that is what went wrong.
    pub fn required(&self) -> Option<usize> {
        match self {
            InventoryError::BufferTooSmall { required } => Some(*required),
            InventoryError::Failed(_) => None,
        }
    }
}

/// Enumerates devices on every registered interface class.
pub struct Registry {
    enumerators: Vec<Box<dyn Enumerator>>,
    mapper: ErrorMapper,
}

impl Registry {
    /// Empty registry; add sources with [`Registry::with_enumerator`].
    pub fn new() -> Self {
        Self {
            enumerators: Vec::new(),
            mapper: ErrorMapper::default(),
        }
    }

    /// Registry backed by the host's serial ports and configured network
    /// endpoints.
    pub fn system(config: &SdkConfig) -> Self {
        let probe = config
            .probe_network
            .then(|| config.open_timeout.min(Duration::from_millis(500)));
        Self::new()
            .with_enumerator(SerialEnumerator::new(config))
            .with_enumerator(NetworkEnumerator::new(config.network_devices.clone(), probe))
    }

    pub fn with_enumerator(mut self, enumerator: impl Enumerator + 'static) -> Self {
        self.enumerators.push(Box::new(enumerator));
        self
    }

    pub fn with_error_mapper(mut self, mapper: ErrorMapper) -> Self {
        self.mapper = mapper;
        self
    }

    /// All devices matching `filter`, without duplicates, in enumeration
    /// order.
    ///
    /// A failing interface class is skipped as long as another selected
    /// class enumerates successfully.
    pub fn inventory(&self, filter: DeviceInterface) -> Result<Vec<DeviceDescriptor>> {
        if filter.is_empty() {
            return Err(ErrorCode::BadArg);
        }
        let mut seen = HashSet::new();
        let mut devices = Vec::new();
        let mut first_error = None;
        let mut any_ok = false;

        for source in self.enumerators.iter().filter(|e| e.interfaces().intersects(filter)) {
            match source.enumerate(filter) {
                Ok(found) => {
                    any_ok = true;
                    for d in found {
                        if !filter.contains(d.interface) {
                            continue;
                        }
                        let (interface, id) = d.identity();
                        if seen.insert((interface, id.to_string())) {
                            devices.push(d);
                        }
                    }
                }
                Err(e) => {
                    let interface = source.interfaces();
                    log::warn!("enumeration on {interface} failed: {e}");
                    first_error.get_or_insert(self.mapper.map_transport(interface, &e));
                }
            }
        }

        match first_error {
            Some(code) if !any_ok => Err(code),
            _ => {
                log::debug!("inventory {filter}: {} device(s)", devices.len());
                Ok(devices)
            }
        }
    }

    /// Number of devices matching `filter`.
    pub fn device_count(&self, filter: DeviceInterface) -> Result<usize> {
        self.inventory(filter).map(|d| d.len())
    }

    /// Write matching descriptors to the front of `out` and return how many.
    ///
    /// If `out` cannot hold them all, nothing is written and the error
    /// carries the exact count required.
    pub fn fill_inventory(
        &self,
        filter: DeviceInterface,
        out: &mut [DeviceDescriptor],
    ) -> std::result::Result<usize, InventoryError> {
        let devices = self.inventory(filter)?;
        if devices.len() > out.len() {
            return Err(InventoryError::BufferTooSmall {
                required: devices.len(),
            });
        }
        let n = devices.len();
        for (slot, d) in out.iter_mut().zip(devices) {
            *slot = d;
        }
        Ok(n)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportFault;

    struct Fixed(DeviceInterface, Vec<DeviceDescriptor>);

    impl Enumerator for Fixed {
        fn interfaces(&self) -> DeviceInterface {
            self.0
        }

        fn enumerate(
            &self,
            _filter: DeviceInterface,
        ) -> std::result::Result<Vec<DeviceDescriptor>, TransportError> {
            Ok(self.1.clone())
        }
    }

    struct Broken(DeviceInterface);

    impl Enumerator for Broken {
        fn interfaces(&self) -> DeviceInterface {
            self.0
        }

        fn enumerate(
            &self,
            _filter: DeviceInterface,
        ) -> std::result::Result<Vec<DeviceDescriptor>, TransportError> {
            Err(TransportError::new(TransportFault::InterfaceUnavailable, "adapter off"))
        }
    }

    fn dev(interface: DeviceInterface, id: &str) -> DeviceDescriptor {
        DeviceDescriptor::new("AMS", 1, interface, "addr", id).unwrap()
    }

    fn registry() -> Registry {
        Registry::new()
            .with_enumerator(Fixed(
                DeviceInterface::USB,
                vec![dev(DeviceInterface::USB, "A"), dev(DeviceInterface::USB, "B")],
            ))
            .with_enumerator(Fixed(
                DeviceInterface::ETHERNET,
                vec![dev(DeviceInterface::ETHERNET, "A")],
            ))
            .with_enumerator(Fixed(DeviceInterface::USB, vec![dev(DeviceInterface::USB, "B")]))
    }

    #[test]
    fn inventory_filters_and_dedups() {
        let r = registry();
        let all = r.inventory(DeviceInterface::ANY).unwrap();
        let ids: Vec<_> = all.iter().map(|d| (d.interface, d.unique_id.as_str())).collect();
        assert_eq!(
            ids,
            vec![
                (DeviceInterface::USB, "A"),
                (DeviceInterface::USB, "B"),
                (DeviceInterface::ETHERNET, "A"),
            ]
        );
        assert_eq!(r.device_count(DeviceInterface::ETHERNET).unwrap(), 1);
        assert_eq!(r.device_count(DeviceInterface::BLUETOOTH).unwrap(), 0);
    }

    #[test]
    fn empty_filter_is_bad_arg() {
        assert_eq!(registry().inventory(DeviceInterface::NONE), Err(ErrorCode::BadArg));
    }

    #[test]
    fn undersized_buffer_is_untouched() {
        let r = registry();
        let marker = dev(DeviceInterface::BLUETOOTH, "marker");
        let mut out = vec![marker.clone(); 2];
        let err = r.fill_inventory(DeviceInterface::ANY, &mut out).unwrap_err();
        assert_eq!(err, InventoryError::BufferTooSmall { required: 3 });
        assert_eq!(err.code(), ErrorCode::BadBufferSize);
        assert_eq!(err.required(), Some(3));
        assert!(out.iter().all(|d| *d == marker));

        let mut out = vec![marker.clone(); 4];
        assert_eq!(r.fill_inventory(DeviceInterface::ANY, &mut out).unwrap(), 3);
        assert_eq!(out[0].unique_id.as_str(), "A");
        assert_eq!(out[3], marker);
    }

    #[test]
    fn one_failing_class_is_skipped() {
        let r = Registry::new()
            .with_enumerator(Broken(DeviceInterface::BLUETOOTH))
            .with_enumerator(Fixed(DeviceInterface::USB, vec![dev(DeviceInterface::USB, "A")]));
        assert_eq!(r.device_count(DeviceInterface::ANY).unwrap(), 1);
        assert_eq!(
            r.inventory(DeviceInterface::BLUETOOTH),
            Err(ErrorCode::BadNetIfc)
        );
        assert_eq!(
            r.fill_inventory(DeviceInterface::BLUETOOTH, &mut []).unwrap_err(),
            InventoryError::Failed(ErrorCode::BadNetIfc)
        );
    }
}
