// Device discovery, gain setup and a short scan.
//
// Runs against real hardware by default. Pass `--mock` to use a simulated
// device instead:
//
//   RUST_LOG=debug cargo run --example basic -- --mock

use std::thread;
use std::time::Duration;

use lpams::mock::{MockBus, MockDevice};
use lpams::{
    AmsSdk, DeviceDescriptor, DeviceInterface, Registry, ScanBuffer, ScanOptions, ScanStatus,
    SdkConfig,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = SdkConfig::from_env();
    let sdk = if std::env::args().any(|a| a == "--mock") {
        let bus = MockBus::new([MockDevice::new(1234)]);
        AmsSdk::with_transport(config, Registry::new().with_enumerator(bus.clone()), bus)
    } else {
        AmsSdk::new(config)
    };

    println!("LaserPulse AMS Example");
    println!("======================");

    // Step 1: size query, then fill
    println!("\n1. Getting device inventory...");
    let count = sdk.device_count(DeviceInterface::ANY)?;
    if count == 0 {
        println!("No devices found. Make sure your device is connected.");
        return Ok(());
    }
    println!("Found {count} device(s)");

    let mut descriptors = vec![DeviceDescriptor::default(); count];
    let n = sdk.get_inventory(DeviceInterface::ANY, &mut descriptors)?;
    for (i, dev) in descriptors[..n].iter().enumerate() {
        println!("\nDevice {}:", i + 1);
        println!("  Product Name: {}", dev.product_name);
        println!("  Product ID: {:#x}", dev.product_id);
        println!("  Interface: {}", dev.interface);
        println!("  Device String: {}", dev.dev_string);
        println!("  Unique ID: {}", dev.unique_id);
    }

    println!("\n2. Creating device object...");
    let handle = sdk.create_device(&descriptors[0])?;
    println!("Device handle created: {handle}");

    println!("\n3. Connecting to device...");
    sdk.connect(handle)?;
    let info = sdk.device_info(handle)?;
    println!("Connected: serial {}, firmware {:#06x}", info.serial, info.fw_version);

    println!("\n4. Reading current gains...");
    let [g1, g2, g3] = sdk.get_gain(handle)?.0;
    println!("Current gains - Ch1: {g1}, Ch2: {g2}, Ch3: {g3}");

    println!("\n5. Setting new gains...");
    sdk.set_gain(handle, (1, 1, 1))?;
    println!("Set gains to - Ch1: 1, Ch2: 1, Ch3: 1");

    println!("\n6. Verifying new gains...");
    let [g1, g2, g3] = sdk.get_gain(handle)?.0;
    println!("New gains - Ch1: {g1}, Ch2: {g2}, Ch3: {g3}");

    println!("\n7. Performing a scan...");
    let channels = sdk.config().scan_channels;
    let buffer = ScanBuffer::new(channels * 100);
    sdk.start_scan(handle, &buffer, ScanOptions::finite(1000))?;
    while sdk.scan_status(handle)?.0 == ScanStatus::Running {
        thread::sleep(Duration::from_millis(10));
    }
    println!("Scan data ({channels} channels): {:?}", &buffer.read()[..channels]);

    println!("\n8. Getting scan status...");
    let (status, xfer) = sdk.scan_status(handle)?;
    println!("Scan status: {status:?}");
    println!("Current scan count: {}", xfer.current_scan_count);
    println!("Current total count: {}", xfer.current_total_count);
    println!("Current index: {}", xfer.current_index);

    println!("\n9. Disconnecting and releasing device...");
    sdk.disconnect(handle)?;
    sdk.release_device(handle)?;
    println!("Disconnected and released device resources successfully!");

    Ok(())
}
