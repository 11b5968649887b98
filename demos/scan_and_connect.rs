//! Scan and connect example
//!
//! Demonstrates the basic central workflow:
//! - Scanning with a name filter
//! - Connecting to the strongest matching device
//! - Listing discovered services and characteristics
//! - Reading values and following notifications
//!
//! Run with: cargo run --example scan_and_connect
//!
//! To look for a specific name:
//!   cargo run --example scan_and_connect -- --name Thermo

use ble_central::{ConnectionManager, Error, ManagerConfig, NameFilter, Result};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,ble_central=debug".into()),
        )
        .init();

    println!("BLE Scan and Connect");
    println!("====================\n");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let pattern = args
        .iter()
        .position(|arg| arg == "--name")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .unwrap_or_default();

    let manager = ConnectionManager::with_btleplug(ManagerConfig::default()).await?;

    let mut powered_on = manager.watch_powered_on();
    if tokio::time::timeout(Duration::from_secs(5), powered_on.wait_for(|on| *on))
        .await
        .is_err()
    {
        println!("Bluetooth is not powered on.");
        return Err(Error::BluetoothUnavailable);
    }

    let _discovered = manager.on_device_discovered(|device| {
        if let Some(name) = device.name() {
            println!("  Seen {} ({}) at {} dBm", name, device.identifier(), device.rssi());
        }
    });

    println!("Scanning for devices matching {:?}...\n", pattern);
    manager.start_scan(None, Some(Arc::new(NameFilter::new(pattern))))?;
    tokio::time::sleep(Duration::from_secs(5)).await;
    manager.stop_scan()?;

    let Some(device) = manager.nearest_device() else {
        println!("\nNo matching devices found.");
        manager.shutdown().await?;
        return Ok(());
    };

    println!(
        "\nConnecting to {} ({})...",
        device.name().unwrap_or_else(|| "<unnamed>".to_string()),
        device.identifier()
    );
    manager.connect(&device).await?;
    println!("Connected!\n");

    // Characteristic discovery follows service discovery automatically
    tokio::time::sleep(Duration::from_secs(2)).await;

    let mut notifying = None;
    for service in device.services() {
        println!("Service {}", service.uuid);

        for characteristic in device.characteristics(&service.uuid) {
            print!("  Characteristic {}", characteristic.uuid);

            if characteristic.can_read() {
                match device
                    .read_characteristic(&characteristic, Duration::from_secs(2))
                    .await
                {
                    Ok(value) => print!(" = {:02X?}", &value[..]),
                    Err(e) => print!(" (read failed: {})", e),
                }
            }
            println!();

            if notifying.is_none() && characteristic.can_notify() {
                notifying = Some(characteristic);
            }
        }
    }

    if let Some(characteristic) = notifying {
        println!("\nFollowing notifications from {} for 10 seconds...", characteristic.uuid);
        let mut stream = device.subscribe_to_notifications(&characteristic)?;

        let deadline = tokio::time::sleep(Duration::from_secs(10));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                value = stream.next() => match value {
                    Some(Ok(value)) => println!("  {:02X?}", &value[..]),
                    Some(Err(e)) => {
                        println!("  Notification error: {}", e);
                        break;
                    }
                    None => break,
                },
                _ = &mut deadline => break,
            }
        }
    }

    println!("\nDisconnecting...");
    manager.shutdown().await?;

    Ok(())
}
