//! One device session: link, handshake data, gains and the current scan.

use std::sync::Arc;

use crate::config::SdkConfig;
use crate::error::{ErrorCode, Result};
use crate::error_map::ErrorMapper;
use crate::protocol::*;
use crate::scan::{Reclaimed, ScanBuffer, ScanContext, ScanTask};
use crate::transport::{Connection, Connector, TransportError, TransportFault};
use crate::types::*;

/// Frames skipped while waiting for a command reply.
const MAX_STALE_FRAMES: usize = 64;

/// Collaborators shared by every session of one SDK instance.
pub(crate) struct DeviceEnv {
    pub config: SdkConfig,
    pub connector: Box<dyn Connector>,
    pub mapper: Arc<ErrorMapper>,
}

/// Per-handle state.
///
/// The link is either held here or, while a scan runs, by the scan thread.
pub(crate) struct Device {
    env: Arc<DeviceEnv>,
    descriptor: DeviceDescriptor,
    link: Option<Box<dyn Connection>>,
    info: Option<DeviceInfo>,
    gains: Gains,
    scan: Option<ScanTask>,
    released: bool,
}

impl Device {
    pub fn new(env: Arc<DeviceEnv>, descriptor: DeviceDescriptor) -> Self {
        Self {
            env,
            descriptor,
            link: None,
            info: None,
            gains: Gains::default(),
            scan: None,
            released: false,
        }
    }

    pub fn descriptor(&self) -> Result<&DeviceDescriptor> {
        self.live()?;
        Ok(&self.descriptor)
    }

    pub fn is_connected(&mut self) -> Result<bool> {
        self.live()?;
        self.poll_scan();
        if self.scan.as_ref().is_some_and(|t| t.holds_link() && t.link_lost()) {
            return Ok(false);
        }
        Ok(self.info.is_some())
    }

    /// Open the link and handshake. Does nothing if already connected.
    pub fn connect(&mut self) -> Result<()> {
        self.live()?;
        self.reclaim();
        if self.info.is_some() {
            return Ok(());
        }
        let config = &self.env.config;
        let name = self.descriptor.unique_id.as_str();
        log::debug!("opening {name} at {}", self.descriptor.dev_string);

        let mut conn = self
            .env
            .connector
            .open(&self.descriptor, config.open_timeout)
            .map_err(|e| self.map(&e))?;

        match self.handshake(conn.as_mut()) {
            Ok((info, gains)) => {
                log::info!(
                    "connected to {name}: serial {}, firmware {:#06x}",
                    info.serial,
                    info.fw_version
                );
                self.link = Some(conn);
                self.info = Some(info);
                self.gains = gains;
                Ok(())
            }
            Err(code) => {
                log::warn!("handshake with {name} failed: {code}");
                conn.close();
                Err(code)
            }
        }
    }

    fn handshake(&self, conn: &mut dyn Connection) -> Result<(DeviceInfo, Gains)> {
        let config = &self.env.config;
        conn.set_timeout(config.open_timeout).map_err(|e| self.map(&e))?;

        let hello = match self.command(conn, &build_cmd(CMD_HELLO, &[])) {
            Err(ErrorCode::TimedOut | ErrorCode::NetTimeout) => {
                let silent = TransportError::new(TransportFault::NotFound, "No reply to HELLO");
                return Err(self.map(&silent));
            }
            other => other?,
        };
        let info = parse_hello(&hello).map_err(|e| self.map(&e))?;
        if info.fw_version < config.min_firmware {
            log::warn!(
                "firmware {:#06x} is older than required {:#06x}",
                info.fw_version,
                config.min_firmware
            );
            return Err(ErrorCode::IncompatibleFirmware);
        }

        let gains = self.command(conn, &build_cmd(CMD_GET_GAIN, &[]))?;
        let gains = parse_gains(&gains).map_err(|e| self.map(&e))?;
        conn.set_timeout(config.io_timeout).map_err(|e| self.map(&e))?;
        Ok((info, gains))
    }

    pub fn info(&self) -> Result<DeviceInfo> {
        self.live()?;
        self.info.ok_or(ErrorCode::BadDevHandle)
    }

    pub fn set_gain(&mut self, gains: Gains) -> Result<()> {
        self.live()?;
        self.reclaim();
        if self.scanning() {
            return Err(ErrorCode::AlreadyActive);
        }
        if self.info.is_none() {
            return Err(ErrorCode::DevNotConnected);
        }
        gains.validate(&self.env.config.allowed_gains)?;

        self.with_link(|dev, conn| dev.command(conn, &build_set_gain(&gains)))?;
        log::debug!("{} gains set to {:?}", self.descriptor.unique_id, gains.0);
        self.gains = gains;
        Ok(())
    }

    pub fn gains(&self) -> Result<Gains> {
        self.live()?;
        if self.info.is_none() {
            return Err(ErrorCode::DevNotConnected);
        }
        Ok(self.gains)
    }

    pub fn start_scan(&mut self, buffer: &ScanBuffer, options: ScanOptions) -> Result<()> {
        self.live()?;
        if self.info.is_none() {
            return Err(ErrorCode::DevNotConnected);
        }
        if self.scanning() {
            return Err(ErrorCode::AlreadyActive);
        }
        if options.rate_hz == 0 {
            return Err(ErrorCode::BadRate);
        }
        let channels = self.env.config.scan_channels;
        let wire_channels = u8::try_from(channels)
            .ok()
            .filter(|&c| c > 0)
            .ok_or(ErrorCode::ConfigNotSupported)?;
        let len = buffer.len();
        if len == 0 {
            return Err(ErrorCode::BadBuffer);
        }
        if len < channels {
            return Err(ErrorCode::BadBufferSize);
        }
        if len % channels != 0 {
            return Err(ErrorCode::BadBuffer);
        }

        self.retire_scan();
        if self.info.is_none() {
            return Err(ErrorCode::DevNotConnected);
        }
        self.with_link(|dev, conn| {
            dev.command(conn, &build_start_scan(options.rate_hz, wire_channels))
        })?;
        let conn = self.link.take().ok_or(ErrorCode::DevNotConnected)?;

        let ctx = ScanContext {
            name: self.descriptor.unique_id.to_string(),
            interface: self.descriptor.interface,
            mapper: Arc::clone(&self.env.mapper),
            options,
            channels,
            io_timeout: self.env.config.io_timeout,
            stall_timeout: self.env.config.scan_stall_timeout,
        };
        match ScanTask::spawn(conn, buffer.clone(), ctx) {
            Ok(task) => {
                log::info!(
                    "scan started on {}: {} Hz, {:?}, {} samples",
                    self.descriptor.unique_id,
                    options.rate_hz,
                    options.mode,
                    len
                );
                self.scan = Some(task);
                Ok(())
            }
            Err(code) => {
                self.drop_connection();
                Err(code)
            }
        }
    }

    pub fn scan_status(&mut self) -> Result<(ScanStatus, TransferStatus)> {
        self.live()?;
        self.poll_scan();
        match &self.scan {
            Some(task) => task.status(),
            None => Ok((ScanStatus::Idle, TransferStatus::default())),
        }
    }

    pub fn stop_scan(&mut self) -> Result<()> {
        self.live()?;
        let joined = self.scan.as_mut().and_then(ScanTask::stop);
        if let Some(joined) = joined {
            log::debug!("scan on {} stopped", self.descriptor.unique_id);
            self.restore(joined);
        }
        match self.scan.as_ref().and_then(ScanTask::take_fault) {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    /// Stop any scan and close the link. Safe to call repeatedly.
    pub fn disconnect(&mut self) -> Result<()> {
        self.live()?;
        self.retire_scan();
        self.scan = None;
        if self.info.is_some() {
            log::info!("disconnected from {}", self.descriptor.unique_id);
        }
        self.drop_connection();
        Ok(())
    }

    /// Disconnect and refuse every later call.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        // Cannot fail: the session is still live here.
        let _ = self.disconnect();
        self.released = true;
    }

    fn live(&self) -> Result<()> {
        if self.released {
            return Err(ErrorCode::BadDevHandle);
        }
        Ok(())
    }

    fn scanning(&self) -> bool {
        self.scan.as_ref().is_some_and(ScanTask::is_running)
    }

    fn map(&self, err: &TransportError) -> ErrorCode {
        self.env.mapper.map_transport(self.descriptor.interface, err)
    }

    /// Take the link back from a scan that ended on its own, waiting for
    /// the device to acknowledge the stop.
    fn reclaim(&mut self) {
        if let Some(joined) = self.scan.as_mut().and_then(ScanTask::reclaim) {
            self.restore(joined);
        }
    }

    /// Like [`Self::reclaim`], but only if the scan thread already exited.
    fn poll_scan(&mut self) {
        if let Some(joined) = self.scan.as_mut().and_then(ScanTask::try_reclaim) {
            self.restore(joined);
        }
    }

    /// Stop the current scan, if any, dropping an unreported fault.
    fn retire_scan(&mut self) {
        let Some(task) = self.scan.as_mut() else {
            return;
        };
        if let Some(joined) = task.stop() {
            self.restore(joined);
        }
        if let Some(fault) = self.scan.as_ref().and_then(ScanTask::take_fault) {
            log::warn!(
                "discarding unreported scan fault on {}: {fault}",
                self.descriptor.unique_id
            );
        }
    }

    fn restore(&mut self, joined: Reclaimed) {
        match joined {
            Ok(conn) if conn.is_alive() => self.link = Some(conn),
            _ => {
                log::warn!("{} lost its connection", self.descriptor.unique_id);
                self.drop_connection();
            }
        }
    }

    fn drop_connection(&mut self) {
        if let Some(mut conn) = self.link.take() {
            conn.close();
        }
        self.info = None;
    }

    /// Run `f` on the link. A link found dead afterwards is dropped and the
    /// session falls back to disconnected.
    fn with_link<T>(&mut self, f: impl FnOnce(&Self, &mut dyn Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.link.take().ok_or(ErrorCode::DevNotConnected)?;
        let result = f(self, conn.as_mut());
        if conn.is_alive() {
            self.link = Some(conn);
        } else {
            log::warn!("{} stopped responding", self.descriptor.unique_id);
            conn.close();
            self.info = None;
        }
        result
    }

    /// Send a command frame and return the payload of its OK reply.
    ///
    /// Stray DATA frames from an earlier stream are skipped. Any other status
    /// is mapped to an error code.
    fn command(&self, conn: &mut dyn Connection, frame: &[u8]) -> Result<Vec<u8>> {
        let code = frame.get(1).copied().unwrap_or_default();
        conn.write(frame).map_err(|e| self.map(&e))?;
        for _ in 0..MAX_STALE_FRAMES {
            let reply = read_frame(conn)
                .map_err(|e| self.map(&e))?
                .ok_or_else(|| {
                    self.map(&TransportError::new(
                        TransportFault::Timeout,
                        format!("No reply to command {code:#04x}"),
                    ))
                })?;
            match reply.code {
                STATUS_OK => return Ok(reply.payload),
                STATUS_DATA => continue,
                status => return Err(self.env.mapper.map_status(status)),
            }
        }
        Err(self.map(&TransportError::bad_frame("Too many stale frames")))
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.release();
    }
}
