//! Simulated AMS devices.
//!
//! A [`MockDevice`] speaks the same command framing as real hardware, so the
//! whole session and scan machinery can run without a device attached.
//! [`MockBus`] serves a set of simulated devices both as an
//! [`Enumerator`] and as a [`Connector`].
//!
//! ```
//! use lpams::mock::{MockBus, MockDevice};
//! use lpams::{AmsSdk, DeviceInterface, Registry, SdkConfig};
//!
//! let bus = MockBus::new([MockDevice::new(1234)]);
//! let sdk = AmsSdk::with_transport(
//!     SdkConfig::default(),
//!     Registry::new().with_enumerator(bus.clone()),
//!     bus,
//! );
//! let devices = sdk.inventory(DeviceInterface::ANY)?;
//! let handle = sdk.create_device(&devices[0])?;
//! sdk.connect(handle)?;
//! assert_eq!(sdk.read_serial(handle)?, 1234);
//! # Ok::<(), lpams::ErrorCode>(())
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::lock;
use crate::protocol::*;
use crate::registry::Enumerator;
use crate::transport::{Connection, Connector, TransportError, TransportFault};
use crate::types::{
    DeviceDescriptor, DeviceInfo, DeviceInterface, Gains, NameField, DESCRIPTOR_RESERVED_LEN,
};

/// Polling granularity of an idle link.
const IDLE_POLL: Duration = Duration::from_millis(5);

#[derive(Debug)]
struct Stream {
    channels: usize,
    next_block: Instant,
}

#[derive(Debug)]
struct MockState {
    info: DeviceInfo,
    gains: Gains,
    present: bool,
    silent: bool,
    open_fault: Option<TransportFault>,
    /// Bumped on every open and unplug; links from older epochs are dead.
    epoch: u64,
    claimed: bool,
    stream: Option<Stream>,
    scans_per_block: usize,
    block_interval: Duration,
    fail_after: Option<(u64, u8)>,
    blocks_sent: u64,
    scans_sent: u64,
    last_rate: Option<u32>,
    outbox: VecDeque<u8>,
    commands: Vec<u8>,
}

impl MockState {
    fn respond(&mut self, status: u8, payload: &[u8]) {
        self.outbox.extend(build_response(status, payload));
    }

    fn handle(&mut self, frame: Frame) {
        self.commands.push(frame.code);
        match frame.code {
            CMD_HELLO if self.silent => {}
            CMD_HELLO => {
                let hello = encode_hello(&self.info);
                self.respond(STATUS_OK, &hello);
            }
            CMD_GET_GAIN => {
                let gains = encode_gains(&self.gains);
                self.respond(STATUS_OK, &gains);
            }
            CMD_SET_GAIN => match parse_gains(&frame.payload) {
                Ok(g) if g.0.iter().all(|&v| v > 0) => {
                    self.gains = g;
                    self.respond(STATUS_OK, &[]);
                }
                Ok(_) => self.respond(STATUS_BAD_GAIN, &[]),
                Err(_) => self.respond(STATUS_BAD_ARG, &[]),
            },
            CMD_START_SCAN => match parse_start_scan(&frame.payload) {
                _ if self.stream.is_some() => self.respond(STATUS_BUSY, &[]),
                Some((0, _)) => self.respond(STATUS_BAD_RATE, &[]),
                Some((_, 0)) | None => self.respond(STATUS_BAD_ARG, &[]),
                Some((rate, channels)) => {
                    self.last_rate = Some(rate);
                    self.blocks_sent = 0;
                    self.scans_sent = 0;
                    self.stream = Some(Stream {
                        channels: channels as usize,
                        next_block: Instant::now(),
                    });
                    self.respond(STATUS_OK, &[]);
                }
            },
            CMD_STOP_SCAN => {
                self.stream = None;
                self.outbox.clear();
                self.respond(STATUS_OK, &[]);
            }
            _ => self.respond(STATUS_BAD_COMMAND, &[]),
        }
    }

    /// Queue the next data block if one is due. Returns how long until the
    /// next block when nothing was queued.
    fn pump(&mut self) -> Option<Duration> {
        let stream = self.stream.as_ref()?;
        let now = Instant::now();
        if now < stream.next_block {
            return Some(stream.next_block - now);
        }
        let channels = stream.channels;

        if let Some((after, status)) = self.fail_after {
            if self.blocks_sent >= after {
                self.stream = None;
                self.respond(status, &[]);
                return None;
            }
        }

        // One block must fit in a single frame.
        let per_block = self
            .scans_per_block
            .min(MAX_PAYLOAD / (SAMPLE_WIDTH * channels.max(1)))
            .max(1) as u64;
        let first = self.scans_sent;
        let samples: Vec<f32> = (first..first + per_block)
            .flat_map(|scan| (0..channels).map(move |ch| MockDevice::sample(scan, ch) as f32))
            .collect();
        self.respond(STATUS_DATA, &encode_samples(&samples));
        self.scans_sent += per_block;
        self.blocks_sent += 1;
        if let Some(stream) = self.stream.as_mut() {
            stream.next_block = now + self.block_interval;
        }
        None
    }
}

/// A simulated device. Clones share state.
#[derive(Debug, Clone)]
pub struct MockDevice {
    descriptor: DeviceDescriptor,
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    /// USB device with the given serial number and firmware 1.0.
    pub fn new(serial: i32) -> Self {
        let descriptor = DeviceDescriptor {
            product_name: NameField::truncated("AMS-3"),
            product_id: 0x0A31,
            interface: DeviceInterface::USB,
            dev_string: NameField::truncated(&format!("mock://usb/{serial}")),
            unique_id: NameField::truncated(&format!("LP{serial:08}")),
            reserved: [0; DESCRIPTOR_RESERVED_LEN],
        };
        Self::with_descriptor(descriptor, serial)
    }

    /// Device presenting `descriptor`.
    pub fn with_descriptor(descriptor: DeviceDescriptor, serial: i32) -> Self {
        let state = MockState {
            info: DeviceInfo {
                serial,
                fw_version: 0x0100,
                product_id: descriptor.product_id,
            },
            gains: Gains::new(1, 1, 1),
            present: true,
            silent: false,
            open_fault: None,
            epoch: 0,
            claimed: false,
            stream: None,
            scans_per_block: 8,
            block_interval: Duration::from_millis(2),
            fail_after: None,
            blocks_sent: 0,
            scans_sent: 0,
            last_rate: None,
            outbox: VecDeque::new(),
            commands: Vec::new(),
        };
        Self {
            descriptor,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Value the device reports for `channel` of scan number `scan`.
    pub fn sample(scan: u64, channel: usize) -> f64 {
        (scan % 1000) as f64 + channel as f64 * 0.25
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn with_firmware(self, version: u32) -> Self {
        lock(&self.state).info.fw_version = version;
        self
    }

    pub fn with_gains(self, gains: Gains) -> Self {
        lock(&self.state).gains = gains;
        self
    }

    /// Stream `scans` scans every `interval` while scanning.
    pub fn with_blocks(self, scans: usize, interval: Duration) -> Self {
        {
            let mut s = lock(&self.state);
            s.scans_per_block = scans.max(1);
            s.block_interval = interval;
        }
        self
    }

    /// Make every open attempt fail with `fault`.
    pub fn refuse_open(&self, fault: Option<TransportFault>) {
        lock(&self.state).open_fault = fault;
    }

    /// Stop answering HELLO.
    pub fn silence(&self) {
        lock(&self.state).silent = true;
    }

    /// After `blocks` data blocks, end the stream with `status`.
    pub fn fail_after(&self, blocks: u64, status: u8) {
        lock(&self.state).fail_after = Some((blocks, status));
    }

    /// Disappear from the bus. Open links die.
    pub fn unplug(&self) {
        let mut s = lock(&self.state);
        s.present = false;
        s.epoch += 1;
        s.claimed = false;
        s.stream = None;
        s.outbox.clear();
    }

    pub fn replug(&self) {
        lock(&self.state).present = true;
    }

    pub fn gains(&self) -> Gains {
        lock(&self.state).gains
    }

    pub fn is_streaming(&self) -> bool {
        lock(&self.state).stream.is_some()
    }

    /// Rate of the most recent accepted START_SCAN.
    pub fn last_rate(&self) -> Option<u32> {
        lock(&self.state).last_rate
    }

    /// Command codes received so far, in order.
    pub fn commands(&self) -> Vec<u8> {
        lock(&self.state).commands.clone()
    }

    fn open(&self) -> Result<MockConnection, TransportError> {
        let mut s = lock(&self.state);
        if !s.present {
            return Err(TransportError::new(
                TransportFault::NotFound,
                format!("{} is not attached", self.descriptor.unique_id),
            ));
        }
        if let Some(fault) = s.open_fault {
            return Err(TransportError::new(fault, "open refused"));
        }
        if s.claimed {
            return Err(TransportError::new(
                TransportFault::InterfaceClaimed,
                format!("{} is already open", self.descriptor.unique_id),
            ));
        }
        s.epoch += 1;
        s.claimed = true;
        s.stream = None;
        s.outbox.clear();
        Ok(MockConnection {
            device: self.clone(),
            epoch: s.epoch,
            timeout: IDLE_POLL,
            inbox: Vec::new(),
            closed: false,
        })
    }
}

/// Open link to a [`MockDevice`].
#[derive(Debug)]
pub struct MockConnection {
    device: MockDevice,
    epoch: u64,
    timeout: Duration,
    inbox: Vec<u8>,
    closed: bool,
}

impl MockConnection {
    fn lost() -> TransportError {
        TransportError::new(TransportFault::ConnectionLost, "Device detached")
    }

    fn live(&self, state: &MockState) -> bool {
        !self.closed && state.present && state.epoch == self.epoch
    }
}

impl Connection for MockConnection {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut s = lock(&self.device.state);
        if !self.live(&s) {
            return Err(Self::lost());
        }
        self.inbox.extend_from_slice(data);
        loop {
            match split_frame(&self.inbox, SYNC_COMMAND) {
                Ok(Some((frame, used))) => {
                    self.inbox.drain(..used);
                    s.handle(frame);
                }
                Ok(None) => break,
                Err(e) => {
                    log::debug!("mock device dropped garbage: {e}");
                    self.inbox.clear();
                    s.respond(STATUS_BAD_ARG, &[]);
                    break;
                }
            }
        }
        Ok(())
    }

    fn read(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let wait = {
            let mut s = lock(&self.device.state);
            if !self.live(&s) {
                return Err(Self::lost());
            }
            let wait = if s.outbox.is_empty() { s.pump() } else { None };
            if s.outbox.is_empty() {
                Some(wait.unwrap_or(IDLE_POLL).min(self.timeout))
            } else {
                None
            }
        };
        if let Some(wait) = wait {
            thread::sleep(wait);
        }

        let mut s = lock(&self.device.state);
        if !self.live(&s) {
            return Err(Self::lost());
        }
        if s.outbox.is_empty() {
            s.pump();
        }
        let n = len.min(s.outbox.len());
        Ok(s.outbox.drain(..n).collect())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TransportError> {
        self.timeout = timeout;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.live(&lock(&self.device.state))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut s = lock(&self.device.state);
        if s.epoch == self.epoch {
            s.claimed = false;
            s.stream = None;
            s.outbox.clear();
        }
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// A set of simulated devices.
#[derive(Debug, Clone, Default)]
pub struct MockBus {
    devices: Vec<MockDevice>,
}

impl MockBus {
    pub fn new(devices: impl IntoIterator<Item = MockDevice>) -> Self {
        Self {
            devices: devices.into_iter().collect(),
        }
    }

    fn find(&self, descriptor: &DeviceDescriptor) -> Option<&MockDevice> {
        self.devices
            .iter()
            .find(|d| d.descriptor.identity() == descriptor.identity())
    }
}

impl Enumerator for MockBus {
    fn interfaces(&self) -> DeviceInterface {
        DeviceInterface::ANY
    }

    fn enumerate(&self, filter: DeviceInterface) -> Result<Vec<DeviceDescriptor>, TransportError> {
        Ok(self
            .devices
            .iter()
            .filter(|d| filter.contains(d.descriptor.interface) && lock(&d.state).present)
            .map(|d| d.descriptor.clone())
            .collect())
    }
}

impl Connector for MockBus {
    fn open(
        &self,
        descriptor: &DeviceDescriptor,
        _timeout: Duration,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let device = self.find(descriptor).ok_or_else(|| {
            TransportError::new(
                TransportFault::NotFound,
                format!("No device {}", descriptor.unique_id),
            )
        })?;
        Ok(Box::new(device.open()?))
    }
}
