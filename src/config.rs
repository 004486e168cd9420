//! SDK configuration.

use std::time::Duration;

/// Default firmware floor: 1.0.
pub const DEFAULT_MIN_FIRMWARE: u32 = 0x0100;
/// Gain codes accepted by AMS front ends.
pub const DEFAULT_GAINS: [i32; 8] = [1, 2, 4, 8, 16, 32, 64, 128];
/// A/D channels returned per scan.
pub const DEFAULT_SCAN_CHANNELS: usize = 4;
/// USB vendor id reported by AMS devices.
pub const LASER_PULSE_VID: u16 = 0x1FC9;

/// A network-attached device listed by address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEndpoint {
    /// `host:port`.
    pub address: String,
    pub product_name: String,
    pub product_id: u32,
    /// MAC or serial; the address is used when unset.
    pub unique_id: Option<String>,
}

impl NetworkEndpoint {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            product_name: "AMS".to_string(),
            product_id: 0,
            unique_id: None,
        }
    }

    pub fn with_unique_id(mut self, id: &str) -> Self {
        self.unique_id = Some(id.to_string());
        self
    }

    pub fn with_product(mut self, name: &str, id: u32) -> Self {
        self.product_name = name.to_string();
        self.product_id = id;
        self
    }
}

/// Tunables shared by every session created from one SDK instance.
#[derive(Debug, Clone)]
pub struct SdkConfig {
    /// Time allowed to open a link and complete the handshake.
    pub open_timeout: Duration,
    /// Read timeout for command replies and stream polling.
    pub io_timeout: Duration,
    /// A running scan that sees no data for this long fails `TimedOut`.
    pub scan_stall_timeout: Duration,
    /// Firmware older than this fails `IncompatibleFirmware` on connect.
    pub min_firmware: u32,
    pub allowed_gains: Vec<i32>,
    pub scan_channels: usize,
    /// USB vendor ids claimed during discovery.
    pub usb_vendor_ids: Vec<u16>,
    /// Bluetooth serial ports whose name starts with this are AMS devices.
    pub bluetooth_name_prefix: String,
    pub baud_rate: u32,
    pub network_devices: Vec<NetworkEndpoint>,
    /// Probe network endpoints with a TCP connect during discovery.
    pub probe_network: bool,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_secs(2),
            io_timeout: Duration::from_millis(500),
            scan_stall_timeout: Duration::from_secs(3),
            min_firmware: DEFAULT_MIN_FIRMWARE,
            allowed_gains: DEFAULT_GAINS.to_vec(),
            scan_channels: DEFAULT_SCAN_CHANNELS,
            usb_vendor_ids: vec![LASER_PULSE_VID],
            bluetooth_name_prefix: "AMS".to_string(),
            baud_rate: 921_600,
            network_devices: Vec::new(),
            probe_network: true,
        }
    }
}

impl SdkConfig {
    /// Defaults overlaid with `LPAMS_*` environment variables.
    ///
    /// - `LPAMS_NET_DEVICES`: comma-separated `host:port` list
    /// - `LPAMS_OPEN_TIMEOUT_MS`, `LPAMS_IO_TIMEOUT_MS`
    /// - `LPAMS_MIN_FIRMWARE`: decimal or `0x` hex
    /// - `LPAMS_BAUD_RATE`
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup. Malformed values are skipped.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(list) = lookup("LPAMS_NET_DEVICES") {
            self.network_devices = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(NetworkEndpoint::new)
                .collect();
        }
        if let Some(ms) = parse_var(&lookup, "LPAMS_OPEN_TIMEOUT_MS", |v| v.parse::<u64>().ok()) {
            self.open_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "LPAMS_IO_TIMEOUT_MS", |v| v.parse::<u64>().ok()) {
            self.io_timeout = Duration::from_millis(ms);
        }
        if let Some(fw) = parse_var(&lookup, "LPAMS_MIN_FIRMWARE", parse_u32) {
            self.min_firmware = fw;
        }
        if let Some(baud) = parse_var(&lookup, "LPAMS_BAUD_RATE", |v| v.parse::<u32>().ok()) {
            self.baud_rate = baud;
        }
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_scan_stall_timeout(mut self, timeout: Duration) -> Self {
        self.scan_stall_timeout = timeout;
        self
    }

    pub fn with_min_firmware(mut self, version: u32) -> Self {
        self.min_firmware = version;
        self
    }

    pub fn with_allowed_gains(mut self, gains: &[i32]) -> Self {
        self.allowed_gains = gains.to_vec();
        self
    }

    pub fn with_scan_channels(mut self, channels: usize) -> Self {
        self.scan_channels = channels;
        self
    }

    /// USB vendor ids that identify AMS serial adapters.
    pub fn with_usb_vendor_ids(mut self, ids: &[u16]) -> Self {
        self.usb_vendor_ids = ids.to_vec();
        self
    }

    pub fn with_bluetooth_name_prefix(mut self, prefix: &str) -> Self {
        self.bluetooth_name_prefix = prefix.to_string();
        self
    }

    pub fn with_baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    pub fn with_network_device(mut self, endpoint: NetworkEndpoint) -> Self {
        self.network_devices.push(endpoint);
        self
    }

    pub fn with_probe_network(mut self, probe: bool) -> Self {
        self.probe_network = probe;
        self
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = lookup(key)?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        log::warn!("ignoring malformed {key}={raw:?}");
    }
    parsed
}

fn parse_u32(v: &str) -> Option<u32> {
    match v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => v.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let c = SdkConfig::default();
        assert_eq!(c.scan_channels, 4);
        assert_eq!(c.allowed_gains, vec![1, 2, 4, 8, 16, 32, 64, 128]);
        assert!(c.network_devices.is_empty());
    }

    #[test]
    fn env_overrides_apply() {
        let c = SdkConfig::default().with_env_overrides(lookup(&[
            ("LPAMS_NET_DEVICES", "10.0.0.5:5025, 10.0.0.6:5025,"),
            ("LPAMS_OPEN_TIMEOUT_MS", "750"),
            ("LPAMS_MIN_FIRMWARE", "0x0203"),
            ("LPAMS_BAUD_RATE", "115200"),
        ]));
        assert_eq!(c.network_devices.len(), 2);
        assert_eq!(c.network_devices[1].address, "10.0.0.6:5025");
        assert_eq!(c.open_timeout, Duration::from_millis(750));
        assert_eq!(c.min_firmware, 0x0203);
        assert_eq!(c.baud_rate, 115_200);
    }

    #[test]
    fn malformed_env_values_are_ignored() {
        let c = SdkConfig::default().with_env_overrides(lookup(&[
            ("LPAMS_IO_TIMEOUT_MS", "soon"),
            ("LPAMS_MIN_FIRMWARE", "0xZZ"),
        ]));
        assert_eq!(c.io_timeout, SdkConfig::default().io_timeout);
        assert_eq!(c.min_firmware, DEFAULT_MIN_FIRMWARE);
    }

    #[test]
    fn builder_setters() {
        let c = SdkConfig::default()
            .with_allowed_gains(&[1, 10, 100])
            .with_scan_channels(2)
            .with_network_device(NetworkEndpoint::new("host:1").with_product("AMS-E", 7));
        assert_eq!(c.allowed_gains, vec![1, 10, 100]);
        assert_eq!(c.scan_channels, 2);
        assert_eq!(c.network_devices[0].product_id, 7);

        let c = SdkConfig::default()
            .with_usb_vendor_ids(&[0x1234, 0xABCD])
            .with_bluetooth_name_prefix("LP-")
            .with_baud_rate(57_600);
        assert_eq!(c.usb_vendor_ids, vec![0x1234, 0xABCD]);
        assert_eq!(c.bluetooth_name_prefix, "LP-");
        assert_eq!(c.baud_rate, 57_600);
    }
}
