//! Background analog-input scanning.
//!
//! A scan owns the device connection for its whole lifetime: the session
//! hands the link to a worker thread on start and gets it back when the
//! worker is joined. Progress is published through a single mutex so that a
//! status poll always sees the scan count, total count and buffer index of
//! the same instant.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{ErrorCode, Result};
use crate::error_map::ErrorMapper;
use crate::protocol::{self, CMD_STOP_SCAN, STATUS_DATA, STATUS_OK};
use crate::transport::{Connection, TransportError};
use crate::types::{DeviceInterface, ScanMode, ScanOptions, ScanStatus, TransferStatus};
use crate::{lock, recover};

/// Frames to read while waiting for the stop acknowledgement.
const MAX_DRAIN_FRAMES: usize = 256;
/// Upper bound on how long the worker blocks before checking for a stop.
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Back-off while a reader holds the buffer.
const WRITE_RETRY: Duration = Duration::from_millis(1);

/// Caller-supplied sample buffer.
///
/// Cloning shares the same storage. While a scan is running the acquisition
/// thread is the only writer; callers may read at any time.
#[derive(Debug, Clone)]
pub struct ScanBuffer {
    samples: Arc<RwLock<Vec<f64>>>,
}

impl ScanBuffer {
    /// Zero-filled buffer of `len` samples.
    pub fn new(len: usize) -> Self {
        Self::from_vec(vec![0.0; len])
    }

    pub fn from_vec(samples: Vec<f64>) -> Self {
        Self {
            samples: Arc::new(RwLock::new(samples)),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shared view of the samples. Holding it pauses acquisition, but
    /// `stop_scan` still returns.
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<f64>> {
        recover(self.samples.read())
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.read().clone()
    }

    /// Exclusive access for the acquisition thread. Gives up with `None`
    /// once `stop` is raised.
    fn write_unless(&self, stop: &AtomicBool) -> Option<RwLockWriteGuard<'_, Vec<f64>>> {
        loop {
            match self.samples.try_write() {
                Ok(guard) => return Some(guard),
                Err(TryLockError::Poisoned(e)) => return Some(e.into_inner()),
                Err(TryLockError::WouldBlock) => {}
            }
            if stop.load(Ordering::Acquire) {
                return None;
            }
            thread::sleep(WRITE_RETRY);
        }
    }
}

#[derive(Debug)]
struct Progress {
    status: ScanStatus,
    scan_count: u64,
    index: i64,
    fault: Option<ErrorCode>,
    link_lost: bool,
}

#[derive(Debug)]
struct ScanShared {
    stop: AtomicBool,
    channels: usize,
    progress: Mutex<Progress>,
}

impl ScanShared {
    fn publish(&self, scan_count: u64, capacity_scans: u64) {
        let mut p = lock(&self.progress);
        p.scan_count = scan_count;
        p.index = ((scan_count - 1) % capacity_scans * self.channels as u64) as i64;
    }

    fn finish(&self, fault: Option<ErrorCode>, link_lost: bool) {
        let mut p = lock(&self.progress);
        p.status = ScanStatus::Idle;
        p.fault = fault;
        p.link_lost = link_lost;
    }
}

/// Everything the worker needs besides the link and the buffer.
#[derive(Debug, Clone)]
pub(crate) struct ScanContext {
    pub name: String,
    pub interface: DeviceInterface,
    pub mapper: Arc<ErrorMapper>,
    pub options: ScanOptions,
    pub channels: usize,
    pub io_timeout: Duration,
    pub stall_timeout: Duration,
}

impl ScanContext {
    fn transport_code(&self, err: &TransportError) -> ErrorCode {
        self.mapper.map_transport(self.interface, err)
    }
}

/// What a joined worker hands back: the link, or the code describing why it
/// was lost.
pub(crate) type Reclaimed = Result<Box<dyn Connection>>;

/// Handle on a running or finished scan.
#[derive(Debug)]
pub(crate) struct ScanTask {
    shared: Arc<ScanShared>,
    worker: Option<JoinHandle<Box<dyn Connection>>>,
}

impl ScanTask {
    /// Start acquiring on a link whose device has already acknowledged
    /// START_SCAN.
    pub fn spawn(conn: Box<dyn Connection>, buffer: ScanBuffer, ctx: ScanContext) -> Result<Self> {
        let shared = Arc::new(ScanShared {
            stop: AtomicBool::new(false),
            channels: ctx.channels,
            progress: Mutex::new(Progress {
                status: ScanStatus::Running,
                scan_count: 0,
                index: -1,
                fault: None,
                link_lost: false,
            }),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(format!("lpams-scan-{}", ctx.name))
            .spawn(move || run(conn, &worker_shared, &buffer, &ctx))
            .map_err(|e| {
                log::error!("failed to spawn scan thread: {e}");
                ErrorCode::Internal
            })?;
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.progress).status == ScanStatus::Running
    }

    /// Consistent snapshot of the scan.
    pub fn snapshot(&self) -> (ScanStatus, TransferStatus) {
        let p = lock(&self.shared.progress);
        let transfer = TransferStatus {
            current_scan_count: p.scan_count,
            current_total_count: p.scan_count * self.shared.channels as u64,
            current_index: p.index,
            ..Default::default()
        };
        (p.status, transfer)
    }

    /// Snapshot, or the fault that ended the scan if it has not been
    /// reported yet.
    pub fn status(&self) -> Result<(ScanStatus, TransferStatus)> {
        if let Some(fault) = self.take_fault() {
            return Err(fault);
        }
        Ok(self.snapshot())
    }

    /// Whether the scan ended because the link died.
    pub fn link_lost(&self) -> bool {
        lock(&self.shared.progress).link_lost
    }

    /// Whether the worker still owns the link, running or not.
    pub fn holds_link(&self) -> bool {
        self.worker.is_some()
    }

    /// Remove and return the unreported fault, if any.
    pub fn take_fault(&self) -> Option<ErrorCode> {
        lock(&self.shared.progress).fault.take()
    }

    /// Join a worker whose thread has already exited. Never blocks.
    pub fn try_reclaim(&mut self) -> Option<Reclaimed> {
        if !self.worker.as_ref().is_some_and(JoinHandle::is_finished) {
            return None;
        }
        self.join()
    }

    /// Join a worker that has stopped acquiring, waiting for it to finish
    /// halting the device. Returns `None` if the scan is still running or
    /// was joined before.
    pub fn reclaim(&mut self) -> Option<Reclaimed> {
        if self.is_running() {
            return None;
        }
        self.join()
    }

    /// Ask the worker to stop and wait until it no longer touches the
    /// buffer. Returns `None` if it was joined before.
    pub fn stop(&mut self) -> Option<Reclaimed> {
        self.shared.stop.store(true, Ordering::Release);
        self.join()
    }

    fn join(&mut self) -> Option<Reclaimed> {
        let worker = self.worker.take()?;
        Some(worker.join().map_err(|_| {
            log::error!("scan thread panicked");
            self.shared.finish(Some(ErrorCode::UnhandledException), true);
            ErrorCode::UnhandledException
        }))
    }
}

fn run(
    mut conn: Box<dyn Connection>,
    shared: &ScanShared,
    buffer: &ScanBuffer,
    ctx: &ScanContext,
) -> Box<dyn Connection> {
    let poll = ctx.io_timeout.min(MAX_POLL_INTERVAL);
    let outcome = conn
        .set_timeout(poll)
        .map_err(|e| ctx.transport_code(&e))
        .and_then(|_| acquire(conn.as_mut(), shared, buffer, ctx));

    match outcome {
        Ok(()) => log::info!("scan on {} finished", ctx.name),
        Err(code) => log::warn!("scan on {} failed: {code}", ctx.name),
    }
    shared.finish(outcome.err(), !conn.is_alive());

    halt(conn.as_mut(), ctx);
    if conn.is_alive() {
        if let Err(e) = conn.set_timeout(ctx.io_timeout) {
            log::warn!("could not restore timeout on {}: {e}", ctx.name);
        }
    }
    conn
}

fn acquire(
    conn: &mut dyn Connection,
    shared: &ScanShared,
    buffer: &ScanBuffer,
    ctx: &ScanContext,
) -> Result<()> {
    let channels = ctx.channels;
    let capacity_scans = (buffer.len() / channels) as u64;
    let target = match ctx.options.mode {
        ScanMode::Finite => Some(capacity_scans),
        ScanMode::Continuous => None,
    };
    let mut done: u64 = 0;
    let mut pending: Vec<f64> = Vec::new();
    let mut last_data = Instant::now();

    while !shared.stop.load(Ordering::Acquire) {
        let frame = match protocol::read_frame(conn) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                if !conn.is_alive() {
                    return Err(ErrorCode::DeadDev);
                }
                if last_data.elapsed() > ctx.stall_timeout {
                    return Err(ErrorCode::TimedOut);
                }
                continue;
            }
            Err(e) => {
                if !conn.is_alive() {
                    return Err(ErrorCode::DeadDev);
                }
                return Err(ctx.transport_code(&e));
            }
        };

        match frame.code {
            STATUS_DATA => {}
            STATUS_OK => continue,
            status => return Err(ctx.mapper.map_status(status)),
        }
        last_data = Instant::now();
        pending.extend(protocol::decode_samples(&frame.payload).map_err(|e| ctx.transport_code(&e))?);

        let mut whole = (pending.len() / channels) as u64;
        if let Some(target) = target {
            whole = whole.min(target - done);
        }
        if whole == 0 {
            continue;
        }

        {
            let Some(mut samples) = buffer.write_unless(&shared.stop) else {
                break;
            };
            for k in 0..whole {
                let at = ((done + k) % capacity_scans) as usize * channels;
                let from = k as usize * channels;
                samples[at..at + channels].copy_from_slice(&pending[from..from + channels]);
            }
        }
        pending.drain(..whole as usize * channels);
        done += whole;
        shared.publish(done, capacity_scans);

        if target == Some(done) {
            return Ok(());
        }
    }
    Ok(())
}

/// Tell the device to stop streaming and skip data already in flight.
fn halt(conn: &mut dyn Connection, ctx: &ScanContext) {
    if !conn.is_alive() {
        return;
    }
    if let Err(e) = conn.write(&protocol::build_cmd(CMD_STOP_SCAN, &[])) {
        log::warn!("stop command to {} failed: {e}", ctx.name);
        return;
    }
    for _ in 0..MAX_DRAIN_FRAMES {
        match protocol::read_frame(conn) {
            Ok(Some(frame)) if frame.code == STATUS_OK => return,
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                log::warn!("draining {} after stop failed: {e}", ctx.name);
                return;
            }
        }
    }
    log::warn!("{} did not acknowledge stop", ctx.name);
}
