//! End-to-end session tests against simulated devices.

use lpams::mock::{MockBus, MockDevice};
use lpams::protocol::{CMD_STOP_SCAN, STATUS_ADC_OVERRUN, STATUS_OVERRUN};
use lpams::*;
use std::thread;
use std::time::{Duration, Instant};

const CH: usize = 4;

fn config() -> SdkConfig {
    SdkConfig::default()
        .with_open_timeout(Duration::from_millis(200))
        .with_io_timeout(Duration::from_millis(50))
        .with_scan_stall_timeout(Duration::from_secs(2))
}

fn sdk_with(config: SdkConfig, devices: &[MockDevice]) -> AmsSdk {
    let bus = MockBus::new(devices.iter().cloned());
    AmsSdk::with_transport(config, Registry::new().with_enumerator(bus.clone()), bus)
}

fn connected(dev: &MockDevice) -> (AmsSdk, DeviceHandle) {
    let sdk = sdk_with(config(), &[dev.clone()]);
    let h = sdk.create_device(dev.descriptor()).unwrap();
    sdk.connect(h).unwrap();
    (sdk, h)
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

fn scans(sdk: &AmsSdk, h: DeviceHandle) -> u64 {
    sdk.scan_status(h).unwrap().1.current_scan_count
}

/// Connector whose links take `delay` to accept STOP_SCAN.
struct SlowStop {
    bus: MockBus,
    delay: Duration,
}

struct SlowStopLink {
    inner: Box<dyn Connection>,
    delay: Duration,
}

impl Connector for SlowStop {
    fn open(
        &self,
        descriptor: &DeviceDescriptor,
        timeout: Duration,
    ) -> std::result::Result<Box<dyn Connection>, TransportError> {
        let inner = self.bus.open(descriptor, timeout)?;
        Ok(Box::new(SlowStopLink {
            inner,
            delay: self.delay,
        }))
    }
}

impl Connection for SlowStopLink {
    fn write(&mut self, data: &[u8]) -> std::result::Result<(), TransportError> {
        if data.get(1) == Some(&CMD_STOP_SCAN) {
            thread::sleep(self.delay);
        }
        self.inner.write(data)
    }

    fn read(&mut self, len: usize) -> std::result::Result<Vec<u8>, TransportError> {
        self.inner.read(len)
    }

    fn set_timeout(&mut self, timeout: Duration) -> std::result::Result<(), TransportError> {
        self.inner.set_timeout(timeout)
    }

    fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }

    fn close(&mut self) {
        self.inner.close()
    }
}

#[test]
fn full_lifecycle() {
    let dev = MockDevice::new(1234);
    let sdk = sdk_with(config(), &[dev.clone()]);

    assert_eq!(sdk.device_count(DeviceInterface::ANY).unwrap(), 1);
    let err = sdk.get_inventory(DeviceInterface::ANY, &mut []).unwrap_err();
    assert_eq!(err.required(), Some(1));
    let mut out = vec![dev.descriptor().clone(); 1];
    assert_eq!(sdk.get_inventory(DeviceInterface::ANY, &mut out).unwrap(), 1);

    let h = sdk.create_device(&out[0]).unwrap();
    assert_eq!(sdk.is_connected(h), Ok(false));
    sdk.connect(h).unwrap();
    sdk.connect(h).unwrap();
    assert_eq!(sdk.read_serial(h), Ok(1234));
    assert_eq!(sdk.device_info(h).unwrap().fw_version, 0x0100);

    sdk.set_gain(h, (1, 2, 4)).unwrap();
    assert_eq!(sdk.get_gain(h), Ok(Gains::new(1, 2, 4)));
    assert_eq!(dev.gains(), Gains::new(1, 2, 4));

    let buffer = ScanBuffer::new(CH * 50);
    sdk.start_scan(h, &buffer, ScanOptions::continuous(1000)).unwrap();
    assert_eq!(dev.last_rate(), Some(1000));

    let mut last = 0;
    for _ in 0..20 {
        let (status, xfer) = sdk.scan_status(h).unwrap();
        assert_eq!(status, ScanStatus::Running);
        assert_eq!(xfer.current_total_count, xfer.current_scan_count * CH as u64);
        assert!(xfer.current_scan_count >= last);
        last = xfer.current_scan_count;
        thread::sleep(Duration::from_millis(3));
    }
    assert!(last > 0);

    sdk.stop_scan(h).unwrap();
    sdk.stop_scan(h).unwrap();
    assert_eq!(sdk.scan_status(h).unwrap().0, ScanStatus::Idle);
    assert!(!dev.is_streaming());

    sdk.disconnect(h).unwrap();
    sdk.disconnect(h).unwrap();
    sdk.release_device(h).unwrap();
    assert_eq!(sdk.read_serial(h), Err(ErrorCode::BadDevHandle));
}

#[test]
fn released_handle_fails_every_operation() {
    let dev = MockDevice::new(1);
    let (sdk, h) = connected(&dev);
    sdk.release_device(h).unwrap();

    let buffer = ScanBuffer::new(CH);
    let bad = Err(ErrorCode::BadDevHandle);
    assert_eq!(sdk.connect(h), bad);
    assert_eq!(sdk.read_serial(h), bad.map(|()| 0));
    assert_eq!(sdk.set_gain(h, (1, 1, 1)), bad);
    assert_eq!(sdk.get_gain(h), bad.map(|()| Gains::default()));
    assert_eq!(sdk.start_scan(h, &buffer, ScanOptions::default()), bad);
    assert_eq!(sdk.scan_status(h).unwrap_err(), ErrorCode::BadDevHandle);
    assert_eq!(sdk.stop_scan(h), bad);
    assert_eq!(sdk.disconnect(h), bad);
    assert_eq!(sdk.descriptor(h).unwrap_err(), ErrorCode::BadDevHandle);
    assert_eq!(sdk.is_connected(h), bad.map(|()| false));
    assert_eq!(sdk.device_info(h).unwrap_err(), ErrorCode::BadDevHandle);
    assert_eq!(sdk.release_device(h), bad);

    // The device itself was closed and can be opened again.
    let h2 = sdk.create_device(dev.descriptor()).unwrap();
    assert_ne!(h, h2);
    sdk.connect(h2).unwrap();
}

#[test]
fn gain_operations_need_a_connection() {
    let dev = MockDevice::new(1).with_gains(Gains::new(8, 8, 8));
    let sdk = sdk_with(config(), &[dev.clone()]);
    let h = sdk.create_device(dev.descriptor()).unwrap();

    assert_eq!(sdk.read_serial(h), Err(ErrorCode::BadDevHandle));
    assert_eq!(sdk.set_gain(h, (1, 1, 1)), Err(ErrorCode::DevNotConnected));
    assert_eq!(sdk.get_gain(h), Err(ErrorCode::DevNotConnected));

    sdk.connect(h).unwrap();
    assert_eq!(sdk.get_gain(h), Ok(Gains::new(8, 8, 8)));
    assert_eq!(sdk.set_gain(h, (1, 3, 4)), Err(ErrorCode::BadConfigVal));
    assert_eq!(sdk.get_gain(h), Ok(Gains::new(8, 8, 8)));
    for g in [(1, 1, 1), (128, 64, 32), (2, 16, 2)] {
        sdk.set_gain(h, g).unwrap();
        assert_eq!(sdk.get_gain(h), Ok(g.into()));
    }
}

#[test]
fn allowed_gains_come_from_config() {
    let dev = MockDevice::new(1);
    let sdk = sdk_with(config().with_allowed_gains(&[1, 10, 100]), &[dev.clone()]);
    let h = sdk.create_device(dev.descriptor()).unwrap();
    sdk.connect(h).unwrap();
    sdk.set_gain(h, (1, 10, 100)).unwrap();
    assert_eq!(sdk.set_gain(h, (1, 2, 4)), Err(ErrorCode::BadConfigVal));
}

#[test]
fn set_gain_during_scan_is_rejected() {
    let dev = MockDevice::new(1);
    let (sdk, h) = connected(&dev);
    sdk.set_gain(h, (2, 2, 2)).unwrap();
    let buffer = ScanBuffer::new(CH * 16);
    sdk.start_scan(h, &buffer, ScanOptions::continuous(500)).unwrap();
    wait_until("first scans", || scans(&sdk, h) > 0);

    assert_eq!(sdk.set_gain(h, (4, 4, 4)), Err(ErrorCode::AlreadyActive));
    assert_eq!(sdk.get_gain(h), Ok(Gains::new(2, 2, 2)));
    assert_eq!(dev.gains(), Gains::new(2, 2, 2));

    let before = scans(&sdk, h);
    wait_until("scan to continue", || scans(&sdk, h) > before);
    assert_eq!(sdk.scan_status(h).unwrap().0, ScanStatus::Running);

    sdk.stop_scan(h).unwrap();
    sdk.set_gain(h, (4, 4, 4)).unwrap();
    assert_eq!(dev.gains(), Gains::new(4, 4, 4));
}

#[test]
fn second_start_leaves_first_scan_running() {
    let dev = MockDevice::new(1);
    let (sdk, h) = connected(&dev);
    let first = ScanBuffer::new(CH * 16);
    let second = ScanBuffer::new(CH * 8);
    sdk.start_scan(h, &first, ScanOptions::continuous(1000)).unwrap();
    wait_until("first scans", || scans(&sdk, h) > 0);

    assert_eq!(
        sdk.start_scan(h, &second, ScanOptions::continuous(2000)),
        Err(ErrorCode::AlreadyActive)
    );
    assert_eq!(dev.last_rate(), Some(1000));
    let before = scans(&sdk, h);
    wait_until("first scan to continue", || scans(&sdk, h) > before);
    sdk.stop_scan(h).unwrap();

    assert!(second.to_vec().iter().all(|&s| s == 0.0));
    assert!(first.to_vec().iter().any(|&s| s != 0.0));
}

#[test]
fn scan_argument_checks() {
    let dev = MockDevice::new(1);
    let sdk = sdk_with(config(), &[dev.clone()]);
    let h = sdk.create_device(dev.descriptor()).unwrap();
    let ok = ScanBuffer::new(CH * 4);

    assert_eq!(
        sdk.start_scan(h, &ok, ScanOptions::default()),
        Err(ErrorCode::DevNotConnected)
    );
    sdk.connect(h).unwrap();
    assert_eq!(
        sdk.start_scan(h, &ok, ScanOptions::continuous(0)),
        Err(ErrorCode::BadRate)
    );
    assert_eq!(
        sdk.start_scan(h, &ScanBuffer::new(0), ScanOptions::default()),
        Err(ErrorCode::BadBuffer)
    );
    assert_eq!(
        sdk.start_scan(h, &ScanBuffer::new(CH - 1), ScanOptions::default()),
        Err(ErrorCode::BadBufferSize)
    );
    assert_eq!(
        sdk.start_scan(h, &ScanBuffer::new(CH + 2), ScanOptions::default()),
        Err(ErrorCode::BadBuffer)
    );
    assert!(!dev.is_streaming());
    assert_eq!(
        sdk.scan_status(h).unwrap(),
        (ScanStatus::Idle, TransferStatus::default())
    );
}

#[test]
fn finite_scan_fills_buffer_once() {
    let dev = MockDevice::new(1).with_blocks(8, Duration::from_millis(1));
    let (sdk, h) = connected(&dev);
    let buffer = ScanBuffer::new(CH * 20);
    sdk.start_scan(h, &buffer, ScanOptions::finite(1000)).unwrap();
    wait_until("finite scan to end", || {
        sdk.scan_status(h).unwrap().0 == ScanStatus::Idle
    });

    let (_, xfer) = sdk.scan_status(h).unwrap();
    assert_eq!(xfer.current_scan_count, 20);
    assert_eq!(xfer.current_total_count, 80);
    assert_eq!(xfer.current_index, 76);
    let samples = buffer.to_vec();
    for scan in 0..20 {
        for ch in 0..CH {
            assert_eq!(samples[scan * CH + ch], MockDevice::sample(scan as u64, ch));
        }
    }
    wait_until("device to stop streaming", || !dev.is_streaming());
    sdk.stop_scan(h).unwrap();

    // The link is back and usable.
    sdk.set_gain(h, (2, 2, 2)).unwrap();
}

#[test]
fn continuous_scan_wraps_around_the_buffer() {
    let dev = MockDevice::new(1).with_blocks(3, Duration::from_millis(1));
    let (sdk, h) = connected(&dev);
    let capacity = 10;
    let buffer = ScanBuffer::new(CH * capacity);
    sdk.start_scan(h, &buffer, ScanOptions::continuous(1000)).unwrap();
    wait_until("several wraps", || scans(&sdk, h) > 3 * capacity as u64);
    sdk.stop_scan(h).unwrap();

    let (status, xfer) = sdk.scan_status(h).unwrap();
    assert_eq!(status, ScanStatus::Idle);
    let n = xfer.current_scan_count;
    assert_eq!(xfer.current_total_count, n * CH as u64);
    let index = xfer.current_index as usize;
    assert_eq!(index, ((n - 1) as usize % capacity) * CH);

    let samples = buffer.to_vec();
    for ch in 0..CH {
        assert_eq!(samples[index + ch], MockDevice::sample(n - 1, ch));
    }
    // The slot after the newest scan holds the oldest retained one.
    let oldest = (index + CH) % samples.len();
    assert_eq!(samples[oldest], MockDevice::sample(n - capacity as u64, 0));
}

#[test]
fn device_fault_is_reported_once_by_status() {
    let dev = MockDevice::new(1);
    let (sdk, h) = connected(&dev);
    dev.fail_after(3, STATUS_OVERRUN);
    let buffer = ScanBuffer::new(CH * 64);
    sdk.start_scan(h, &buffer, ScanOptions::continuous(1000)).unwrap();

    let fault = loop {
        match sdk.scan_status(h) {
            Ok((ScanStatus::Running, _)) => thread::sleep(Duration::from_millis(2)),
            Ok((ScanStatus::Idle, _)) => panic!("scan ended without a fault"),
            Err(code) => break code,
        }
    };
    assert_eq!(fault, ErrorCode::Overrun);
    let (status, xfer) = sdk.scan_status(h).unwrap();
    assert_eq!(status, ScanStatus::Idle);
    assert_eq!(xfer.current_scan_count, 24);
    sdk.stop_scan(h).unwrap();

    // Still connected; a new scan starts cleanly.
    dev.fail_after(u64::MAX, STATUS_OVERRUN);
    sdk.start_scan(h, &buffer, ScanOptions::continuous(1000)).unwrap();
    wait_until("restarted scan", || scans(&sdk, h) > 0);
    sdk.stop_scan(h).unwrap();
}

#[test]
fn device_fault_is_reported_by_stop() {
    let dev = MockDevice::new(1);
    let (sdk, h) = connected(&dev);
    dev.fail_after(1, STATUS_ADC_OVERRUN);
    sdk.start_scan(h, &ScanBuffer::new(CH * 64), ScanOptions::continuous(1000))
        .unwrap();
    wait_until("device to fault", || !dev.is_streaming());
    // Let the acquisition thread read the fault frame.
    thread::sleep(Duration::from_millis(100));

    assert_eq!(sdk.stop_scan(h), Err(ErrorCode::AdcOverrun));
    assert_eq!(sdk.stop_scan(h), Ok(()));
}

#[test]
fn unreported_fault_is_dropped_on_restart() {
    let dev = MockDevice::new(1);
    let (sdk, h) = connected(&dev);
    dev.fail_after(1, STATUS_OVERRUN);
    let buffer = ScanBuffer::new(CH * 64);
    sdk.start_scan(h, &buffer, ScanOptions::continuous(1000)).unwrap();
    wait_until("device to fault", || !dev.is_streaming());
    thread::sleep(Duration::from_millis(50));

    dev.fail_after(u64::MAX, STATUS_OVERRUN);
    sdk.start_scan(h, &buffer, ScanOptions::continuous(1000)).unwrap();
    assert!(sdk.scan_status(h).is_ok());
    sdk.stop_scan(h).unwrap();
}

#[test]
fn unplugged_device_is_dead() {
    let dev = MockDevice::new(1);
    let (sdk, h) = connected(&dev);
    sdk.start_scan(h, &ScanBuffer::new(CH * 64), ScanOptions::continuous(1000))
        .unwrap();
    wait_until("first scans", || scans(&sdk, h) > 0);
    dev.unplug();

    wait_until("dead device", || sdk.scan_status(h) == Err(ErrorCode::DeadDev));
    assert_eq!(sdk.is_connected(h), Ok(false));
    assert_eq!(sdk.set_gain(h, (1, 1, 1)), Err(ErrorCode::DevNotConnected));
    assert_eq!(sdk.connect(h), Err(ErrorCode::DevNotFound));

    dev.replug();
    sdk.connect(h).unwrap();
    assert_eq!(sdk.read_serial(h), Ok(1));
}

#[test]
fn stalled_stream_times_out() {
    let dev = MockDevice::new(1).with_blocks(1, Duration::from_secs(60));
    let sdk = sdk_with(
        config().with_scan_stall_timeout(Duration::from_millis(100)),
        &[dev.clone()],
    );
    let h = sdk.create_device(dev.descriptor()).unwrap();
    sdk.connect(h).unwrap();
    sdk.start_scan(h, &ScanBuffer::new(CH * 8), ScanOptions::continuous(10))
        .unwrap();
    wait_until("stall", || sdk.scan_status(h) == Err(ErrorCode::TimedOut));
    assert_eq!(sdk.scan_status(h).unwrap().1.current_scan_count, 1);
}

#[test]
fn disconnect_stops_the_scan() {
    let dev = MockDevice::new(1);
    let (sdk, h) = connected(&dev);
    sdk.start_scan(h, &ScanBuffer::new(CH * 64), ScanOptions::continuous(1000))
        .unwrap();
    wait_until("first scans", || scans(&sdk, h) > 0);

    sdk.disconnect(h).unwrap();
    assert!(!dev.is_streaming());
    assert_eq!(sdk.is_connected(h), Ok(false));
    assert_eq!(
        sdk.scan_status(h).unwrap(),
        (ScanStatus::Idle, TransferStatus::default())
    );
    sdk.connect(h).unwrap();
}

#[test]
fn old_firmware_is_refused() {
    let dev = MockDevice::new(1).with_firmware(0x00FF);
    let sdk = sdk_with(config(), &[dev.clone()]);
    let h = sdk.create_device(dev.descriptor()).unwrap();
    assert_eq!(sdk.connect(h), Err(ErrorCode::IncompatibleFirmware));
    assert_eq!(sdk.is_connected(h), Ok(false));

    let sdk = sdk_with(config().with_min_firmware(0x0001), &[dev.clone()]);
    let h = sdk.create_device(dev.descriptor()).unwrap();
    sdk.connect(h).unwrap();
}

#[test]
fn connect_failures_are_mapped() {
    let dev = MockDevice::new(1);
    let sdk = sdk_with(config(), &[dev.clone()]);
    let h = sdk.create_device(dev.descriptor()).unwrap();

    dev.refuse_open(Some(TransportFault::PermissionDenied));
    assert_eq!(sdk.connect(h), Err(ErrorCode::UsbDevNoPermission));
    dev.refuse_open(Some(TransportFault::InterfaceClaimed));
    assert_eq!(sdk.connect(h), Err(ErrorCode::UsbInterfaceClaimed));
    dev.refuse_open(None);

    dev.silence();
    assert_eq!(sdk.connect(h), Err(ErrorCode::DevNotFound));

    let ghost = DeviceDescriptor::new("AMS-3", 1, DeviceInterface::USB, "nowhere", "ghost").unwrap();
    let g = sdk.create_device(&ghost).unwrap();
    assert_eq!(sdk.connect(g), Err(ErrorCode::DevNotFound));
}

#[test]
fn second_session_on_same_device_is_claimed() {
    let dev = MockDevice::new(1);
    let (sdk, h) = connected(&dev);
    let other = sdk.create_device(dev.descriptor()).unwrap();
    assert_eq!(sdk.connect(other), Err(ErrorCode::UsbInterfaceClaimed));
    sdk.disconnect(h).unwrap();
    sdk.connect(other).unwrap();
}

#[test]
fn error_policy_is_configurable() {
    let dev = MockDevice::new(1);
    dev.silence();
    let bus = MockBus::new([dev.clone()]);
    let mapper = ErrorMapper::new().with_rule(
        DeviceInterface::USB,
        TransportFault::NotFound,
        ErrorCode::DevUnavailable,
    );
    let sdk = AmsSdk::with_parts(config(), Registry::new(), bus, mapper);
    let h = sdk.create_device(dev.descriptor()).unwrap();
    assert_eq!(sdk.connect(h), Err(ErrorCode::DevUnavailable));
}

#[test]
fn inventory_filters_by_interface() {
    let usb = MockDevice::new(1);
    let eth = MockDevice::with_descriptor(
        DeviceDescriptor::new(
            "AMS-E",
            0x0E01,
            DeviceInterface::ETHERNET,
            "192.0.2.7:5025",
            "00:11:22:33:44:55",
        )
        .unwrap(),
        2,
    );
    let sdk = sdk_with(config(), &[usb, eth.clone()]);
    assert_eq!(sdk.device_count(DeviceInterface::ANY), Ok(2));
    assert_eq!(sdk.device_count(DeviceInterface::USB), Ok(1));
    assert_eq!(sdk.device_count(DeviceInterface::BLUETOOTH), Ok(0));
    assert_eq!(sdk.inventory(DeviceInterface::NONE), Err(ErrorCode::BadArg));

    let found = sdk.inventory(DeviceInterface::ETHERNET).unwrap();
    assert_eq!(found, vec![eth.descriptor().clone()]);
    let h = sdk.create_device(&found[0]).unwrap();
    sdk.connect(h).unwrap();
    assert_eq!(sdk.read_serial(h), Ok(2));
    assert_eq!(sdk.device_info(h).unwrap().product_id, 0x0E01);
}

#[test]
fn sessions_scan_independently() {
    let a = MockDevice::new(1);
    let b = MockDevice::new(2);
    let sdk = sdk_with(config(), &[a.clone(), b.clone()]);
    let ha = sdk.create_device(a.descriptor()).unwrap();
    let hb = sdk.create_device(b.descriptor()).unwrap();

    thread::scope(|s| {
        for h in [ha, hb] {
            let sdk = &sdk;
            s.spawn(move || {
                sdk.connect(h).unwrap();
                let buffer = ScanBuffer::new(CH * 32);
                sdk.start_scan(h, &buffer, ScanOptions::continuous(1000)).unwrap();
                wait_until("scans", || scans(sdk, h) > 40);
                sdk.stop_scan(h).unwrap();
                sdk.release_device(h).unwrap();
            });
        }
    });
    assert!(!a.is_streaming() && !b.is_streaming());
}

#[test]
fn scan_status_does_not_wait_for_the_stop_handshake() {
    let dev = MockDevice::new(1).with_blocks(8, Duration::from_millis(1));
    let bus = MockBus::new([dev.clone()]);
    let connector = SlowStop {
        bus: bus.clone(),
        delay: Duration::from_millis(500),
    };
    let sdk = AmsSdk::with_transport(config(), Registry::new().with_enumerator(bus), connector);
    let h = sdk.create_device(dev.descriptor()).unwrap();
    sdk.connect(h).unwrap();
    sdk.start_scan(h, &ScanBuffer::new(CH * 16), ScanOptions::finite(1000))
        .unwrap();

    let mut worst = Duration::ZERO;
    let mut idle_polls = 0;
    let deadline = Instant::now() + Duration::from_secs(5);
    while idle_polls < 20 {
        assert!(Instant::now() < deadline, "finite scan did not end");
        let started = Instant::now();
        let (status, _) = sdk.scan_status(h).unwrap();
        worst = worst.max(started.elapsed());
        if status == ScanStatus::Idle {
            idle_polls += 1;
        }
        thread::sleep(Duration::from_millis(5));
    }
    assert!(worst < Duration::from_millis(100), "scan_status took {worst:?}");
    assert_eq!(scans(&sdk, h), 16);

    sdk.stop_scan(h).unwrap();
    sdk.set_gain(h, (2, 2, 2)).unwrap();
}

#[test]
fn stop_scan_returns_while_the_buffer_is_being_read() {
    let dev = MockDevice::new(1).with_blocks(2, Duration::from_millis(1));
    let (sdk, h) = connected(&dev);
    let buffer = ScanBuffer::new(CH * 32);
    sdk.start_scan(h, &buffer, ScanOptions::continuous(1000)).unwrap();
    wait_until("first scans", || scans(&sdk, h) > 0);

    let view = buffer.read();
    let (tx, rx) = std::sync::mpsc::channel();
    let stopper = &sdk;
    thread::scope(|s| {
        s.spawn(move || tx.send(stopper.stop_scan(h)).unwrap());
        let stopped = rx.recv_timeout(Duration::from_secs(3));
        drop(view);
        assert_eq!(stopped, Ok(Ok(())));
    });
    assert_eq!(sdk.scan_status(h).unwrap().0, ScanStatus::Idle);
    assert!(buffer.to_vec().iter().any(|&v| v != 0.0));
}

#[test]
fn lost_link_shows_in_is_connected() {
    let dev = MockDevice::new(1);
    let (sdk, h) = connected(&dev);
    sdk.start_scan(h, &ScanBuffer::new(CH * 64), ScanOptions::continuous(1000))
        .unwrap();
    wait_until("first scans", || scans(&sdk, h) > 0);
    dev.unplug();

    wait_until("link loss", || sdk.is_connected(h) == Ok(false));
    assert_eq!(sdk.scan_status(h), Err(ErrorCode::DeadDev));
    assert_eq!(sdk.is_connected(h), Ok(false));

    dev.replug();
    sdk.connect(h).unwrap();
    assert_eq!(sdk.is_connected(h), Ok(true));
}
