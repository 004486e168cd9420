use std::fmt;
use std::ops::{BitOr, BitOrAssign, Deref};

use crate::error::{ErrorCode, Result};

/// Width of every fixed text field in [`DeviceDescriptor`].
pub const NAME_FIELD_LEN: usize = 64;
/// Reserved tail of a [`DeviceDescriptor`].
pub const DESCRIPTOR_RESERVED_LEN: usize = 512;
/// Reserved tail of a [`TransferStatus`].
pub const TRANSFER_RESERVED_LEN: usize = 64;

/// Size of the fixed descriptor layout: three text fields, product id,
/// interface and the reserved tail.
pub const DESCRIPTOR_LAYOUT_LEN: usize = NAME_FIELD_LEN * 3 + 4 + 4 + DESCRIPTOR_RESERVED_LEN;
/// Size of the fixed transfer-status layout.
pub const TRANSFER_LAYOUT_LEN: usize = 8 + 8 + 8 + TRANSFER_RESERVED_LEN;

/// Number of independently configurable gain channels.
pub const GAIN_CHANNELS: usize = 3;

/// Set of device interface classes.
///
/// A descriptor carries exactly one class. Unions built with `|` are only
/// meaningful as discovery filters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceInterface(u32);

impl DeviceInterface {
    pub const NONE: Self = Self(0);
    pub const USB: Self = Self(1 << 0);
    pub const BLUETOOTH: Self = Self(1 << 1);
    pub const ETHERNET: Self = Self(1 << 2);
    pub const ANY: Self = Self(Self::USB.0 | Self::BLUETOOTH.0 | Self::ETHERNET.0);

    /// Build from raw bits. Unknown bits are rejected.
    pub fn from_bits(bits: u32) -> Option<Self> {
        if bits & !Self::ANY.0 != 0 {
            return None;
        }
        Some(Self(bits))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every class in `other` is also in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// True for exactly one interface class.
    pub fn is_single(self) -> bool {
        self.0.count_ones() == 1
    }
}

impl BitOr for DeviceInterface {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DeviceInterface {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for DeviceInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.intersects(Self::USB) {
            names.push("USB");
        }
        if self.intersects(Self::BLUETOOTH) {
            names.push("BLUETOOTH");
        }
        if self.intersects(Self::ETHERNET) {
            names.push("ETHERNET");
        }
        if names.is_empty() {
            return f.write_str("NONE");
        }
        f.write_str(&names.join("|"))
    }
}

impl fmt::Display for DeviceInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Text bounded to fit an `N`-byte NUL-terminated field.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct FixedStr<const N: usize>(String);

impl<const N: usize> FixedStr<N> {
    /// Longest accepted text, in bytes.
    pub const MAX_LEN: usize = N - 1;

    /// Checked construction: fails `BadArg` if the text does not fit or
    /// contains an interior NUL.
    pub fn new(s: &str) -> Result<Self> {
        if s.len() > Self::MAX_LEN || s.contains('\0') {
            return Err(ErrorCode::BadArg);
        }
        Ok(Self(s.to_string()))
    }

    /// Clip to the field width on a char boundary and stop at the first NUL.
    pub fn truncated(s: &str) -> Self {
        let s = s.split('\0').next().unwrap_or_default();
        let mut end = s.len().min(Self::MAX_LEN);
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        Self(s[..end].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn write_to(&self, out: &mut [u8]) {
        out[..N].fill(0);
        out[..self.0.len()].copy_from_slice(self.0.as_bytes());
    }

    fn read_from(raw: &[u8]) -> Self {
        let end = raw[..N].iter().position(|&b| b == 0).unwrap_or(N);
        Self::truncated(&String::from_utf8_lossy(&raw[..end]))
    }
}

impl<const N: usize> Deref for FixedStr<N> {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl<const N: usize> fmt::Display for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 64-byte text field.
pub type NameField = FixedStr<NAME_FIELD_LEN>;

/// Identifies one physical AMS device without implying a connection.
///
/// Usually obtained from device discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Generic product name.
    pub product_name: NameField,
    pub product_id: u32,
    /// Interface class the device was found on. Exactly one class.
    pub interface: DeviceInterface,
    /// Address used to open the device: a serial port path for USB and
    /// Bluetooth devices, `host:port` for Ethernet devices.
    pub dev_string: NameField,
    /// Serial number or MAC-derived identifier.
    pub unique_id: NameField,
    /// Forward-compatibility bytes. Preserved verbatim.
    pub reserved: [u8; DESCRIPTOR_RESERVED_LEN],
}

/// Blank descriptor, used to size output slices for inventory calls.
impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            product_name: NameField::default(),
            product_id: 0,
            interface: DeviceInterface::NONE,
            dev_string: NameField::default(),
            unique_id: NameField::default(),
            reserved: [0; DESCRIPTOR_RESERVED_LEN],
        }
    }
}

impl DeviceDescriptor {
    /// Build a descriptor, failing `BadArg` on oversized text.
    pub fn new(
        product_name: &str,
        product_id: u32,
        interface: DeviceInterface,
        dev_string: &str,
        unique_id: &str,
    ) -> Result<Self> {
        Ok(Self {
            product_name: NameField::new(product_name)?,
            product_id,
            interface,
            dev_string: NameField::new(dev_string)?,
            unique_id: NameField::new(unique_id)?,
            reserved: [0; DESCRIPTOR_RESERVED_LEN],
        })
    }

    /// Structural check applied before a session is created.
    pub fn validate(&self) -> Result<()> {
        if !self.interface.is_single()
            || self.product_name.is_empty()
            || self.dev_string.is_empty()
            || self.unique_id.is_empty()
        {
            return Err(ErrorCode::BadArg);
        }
        Ok(())
    }

    /// Encode to the fixed little-endian layout.
    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_LAYOUT_LEN] {
        let mut out = [0u8; DESCRIPTOR_LAYOUT_LEN];
        let mut at = 0;
        self.product_name.write_to(&mut out[at..]);
        at += NAME_FIELD_LEN;
        out[at..at + 4].copy_from_slice(&self.product_id.to_le_bytes());
        at += 4;
        out[at..at + 4].copy_from_slice(&self.interface.bits().to_le_bytes());
        at += 4;
        self.dev_string.write_to(&mut out[at..]);
        at += NAME_FIELD_LEN;
        self.unique_id.write_to(&mut out[at..]);
        at += NAME_FIELD_LEN;
        out[at..].copy_from_slice(&self.reserved);
        out
    }

    /// Decode from the fixed layout.
    ///
    /// Fails `BadBufferSize` if `raw` is short and `BadArg` on unknown
    /// interface bits.
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < DESCRIPTOR_LAYOUT_LEN {
            return Err(ErrorCode::BadBufferSize);
        }
        let mut at = 0;
        let product_name = NameField::read_from(&raw[at..]);
        at += NAME_FIELD_LEN;
        let product_id = u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        at += 4;
        let bits = u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        let interface = DeviceInterface::from_bits(bits).ok_or(ErrorCode::BadArg)?;
        at += 4;
        let dev_string = NameField::read_from(&raw[at..]);
        at += NAME_FIELD_LEN;
        let unique_id = NameField::read_from(&raw[at..]);
        at += NAME_FIELD_LEN;
        let mut reserved = [0u8; DESCRIPTOR_RESERVED_LEN];
        reserved.copy_from_slice(&raw[at..at + DESCRIPTOR_RESERVED_LEN]);
        Ok(Self {
            product_name,
            product_id,
            interface,
            dev_string,
            unique_id,
            reserved,
        })
    }

    /// Key used to suppress duplicates during discovery.
    pub(crate) fn identity(&self) -> (DeviceInterface, &str) {
        (self.interface, self.unique_id.as_str())
    }
}

/// Opaque reference to a device session.
///
/// Low 32 bits select an arena slot, high 32 bits carry the slot generation.
/// Generations start at 1, so a raw value of 0 is never a valid handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(u64);

impl DeviceHandle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | index as u64)
    }

    pub(crate) fn index(self) -> usize {
        (self.0 & 0xFFFF_FFFF) as usize
    }

    pub(crate) fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Rebuild a handle from a value previously returned by [`Self::into_raw`].
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn into_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Gain codes for the three gain channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Gains(pub [i32; GAIN_CHANNELS]);

impl Gains {
    pub fn new(ch1: i32, ch2: i32, ch3: i32) -> Self {
        Self([ch1, ch2, ch3])
    }

    /// Fails `BadConfigVal` on the first value outside `allowed`.
    pub fn validate(&self, allowed: &[i32]) -> Result<()> {
        match self.0.iter().find(|g| !allowed.contains(g)) {
            Some(_) => Err(ErrorCode::BadConfigVal),
            None => Ok(()),
        }
    }
}

impl From<(i32, i32, i32)> for Gains {
    fn from((a, b, c): (i32, i32, i32)) -> Self {
        Self([a, b, c])
    }
}

/// Identification read from the device during connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: i32,
    pub fw_version: u32,
    pub product_id: u32,
}

/// State of the background scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ScanStatus {
    #[default]
    Idle = 0,
    Running = 1,
}

/// Progress of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStatus {
    /// Samples per channel transferred since the scan started.
    pub current_scan_count: u64,
    /// Total samples transferred: `current_scan_count` times the channel count.
    pub current_total_count: u64,
    /// Buffer index of the first sample of the most recent scan, or -1
    /// before any data arrived. Wraps to 0 in continuous mode.
    pub current_index: i64,
    pub reserved: [u8; TRANSFER_RESERVED_LEN],
}

impl Default for TransferStatus {
    fn default() -> Self {
        Self {
            current_scan_count: 0,
            current_total_count: 0,
            current_index: -1,
            reserved: [0; TRANSFER_RESERVED_LEN],
        }
    }
}

impl TransferStatus {
    pub fn to_bytes(&self) -> [u8; TRANSFER_LAYOUT_LEN] {
        let mut out = [0u8; TRANSFER_LAYOUT_LEN];
        out[0..8].copy_from_slice(&self.current_scan_count.to_le_bytes());
        out[8..16].copy_from_slice(&self.current_total_count.to_le_bytes());
        out[16..24].copy_from_slice(&self.current_index.to_le_bytes());
        out[24..].copy_from_slice(&self.reserved);
        out
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < TRANSFER_LAYOUT_LEN {
            return Err(ErrorCode::BadBufferSize);
        }
        let word = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&raw[at..at + 8]);
            b
        };
        let mut reserved = [0u8; TRANSFER_RESERVED_LEN];
        reserved.copy_from_slice(&raw[24..TRANSFER_LAYOUT_LEN]);
        Ok(Self {
            current_scan_count: u64::from_le_bytes(word(0)),
            current_total_count: u64::from_le_bytes(word(8)),
            current_index: i64::from_le_bytes(word(16)),
            reserved,
        })
    }
}

/// How long a scan runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    /// Keep acquiring, wrapping around the buffer, until stopped.
    #[default]
    Continuous,
    /// Fill the buffer once, then go idle.
    Finite,
}

/// Parameters of an analog-input scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Scan rate per channel, in Hz.
    pub rate_hz: u32,
    pub mode: ScanMode,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            rate_hz: 1000,
            mode: ScanMode::Continuous,
        }
    }
}

impl ScanOptions {
    pub fn continuous(rate_hz: u32) -> Self {
        Self {
            rate_hz,
            mode: ScanMode::Continuous,
        }
    }

    pub fn finite(rate_hz: u32) -> Self {
        Self {
            rate_hz,
            mode: ScanMode::Finite,
        }
    }
}
