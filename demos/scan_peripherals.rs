//! Basic example: Scan for nearby peripherals and connect to the strongest one
//!
//! Run with: cargo run --example scan_peripherals

use ble_peripheral_manager::{
    ConnectedSnapshot, ManagerConfig, PeripheralManager, Result, ToggleOutcome,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ble_peripheral_manager=debug".parse().unwrap()),
        )
        .init();

    let manager = PeripheralManager::with_btleplug(ManagerConfig::default()).await?;
    manager.initialize().await?;

    if let ConnectedSnapshot::Found(count) = manager.retrieve_connected().await? {
        println!("{} peripherals already connected", count);
    }

    println!("Scanning for {:?}...", manager.config().scan.duration);
    manager.start_scan().await?;

    let mut scanning = manager.subscribe_scanning();
    let _ = scanning.wait_for(|scanning| !*scanning).await;

    let peripherals = manager.peripherals_by_signal();
    println!("\nFound {} peripherals:", peripherals.len());
    for peripheral in &peripherals {
        let progress = peripheral.signal_progress().unwrap_or(0.0);
        let filled = (progress * 20.0).round().clamp(0.0, 20.0) as usize;
        println!(
            "  {:<20} {:<40} {:>5} dBm [{:<20}] {:?}",
            peripheral.display_name(),
            peripheral.id,
            peripheral
                .rssi
                .map(|rssi| rssi.to_string())
                .unwrap_or_else(|| "?".to_string()),
            "#".repeat(filled),
            peripheral.advertising.service_uuids
        );
    }

    let Some(target) = peripherals.iter().find(|p| p.is_connectable()) else {
        println!("\nNothing to connect to.");
        return Ok(());
    };

    println!("\nConnecting to {} ({})...", target.display_name(), target.id);
    match manager.toggle_connection(target).await {
        Ok(ToggleOutcome::Connected(report)) => {
            println!(
                "Connected: rssi {} dBm, {} services, {} descriptors read ({} failed)",
                report.rssi, report.services, report.descriptors_read, report.descriptors_failed
            );
            if let Some(topology) = manager
                .get_peripheral(&target.id)
                .and_then(|p| p.services.clone())
            {
                for characteristic in &topology.characteristics {
                    println!(
                        "  {} / {} {:?}",
                        characteristic.service, characteristic.uuid, characteristic.properties
                    );
                }
            }
        }
        Ok(ToggleOutcome::DisconnectRequested) => println!("Disconnect requested"),
        Err(e) => println!("Connection failed: {}", e),
    }

    manager.shutdown().await?;
    Ok(())
}
