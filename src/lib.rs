// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # ble-peripheral-manager
//!
//! A cross-platform Rust library for discovering nearby Bluetooth Low Energy
//! peripherals, tracking their advertisement and connection state, and
//! connecting to them to inspect signal strength and GATT services.
//!
//! ## Features
//!
//! - **Scan Sessions**: Time-bounded scans that reset the known peripherals
//! - **Peripheral Registry**: Copy-on-write snapshots, change detection by pointer
//! - **Event Reconciliation**: Discovery, disconnect and scan-stop events folded into one view
//! - **Connect Sequence**: Connect, settle, discover services, read RSSI and descriptors
//! - **Signal Progress**: RSSI mapped onto a `0.0..=1.0` scale for display
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ble_peripheral_manager::{ManagerConfig, PeripheralManager, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = PeripheralManager::with_btleplug(ManagerConfig::default()).await?;
//!     manager.initialize().await?;
//!     manager.start_scan().await?;
//!
//!     // Wait for the scan session to end
//!     let mut scanning = manager.subscribe_scanning();
//!     let _ = scanning.wait_for(|scanning| !*scanning).await;
//!
//!     for peripheral in manager.peripherals() {
//!         println!(
//!             "{} ({}) rssi {:?}",
//!             peripheral.display_name(),
//!             peripheral.id,
//!             peripheral.rssi
//!         );
//!     }
//!
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Custom Radio Stacks
//!
//! [`PeripheralManager::new`] accepts any [`RadioStack`]. Feed the stack's
//! [`RadioEvent`]s to [`PeripheralManager::start_event_loop`].
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod peripheral;
pub mod radio;
pub mod reconciler;
pub mod registry;
pub mod scan;
pub mod utils;

// Re-exports for convenience
pub use ble::BtleplugRadio;
pub use config::{ManagerConfig, ScanModeHints, ScanOptions, StackOptions};
pub use connection::{ConnectReport, ConnectionOrchestrator, ToggleOutcome};
pub use error::{Error, Result};
pub use manager::{CallbackHandle, PeripheralManager};
pub use peripheral::{
    AdvertisingData, CharacteristicInfo, CharacteristicProperty, ConnectionState, DescriptorInfo,
    GattTopology, Peripheral, ServiceInfo, NO_NAME,
};
pub use radio::{CharacteristicUpdate, RadioEvent, RadioEventReceiver, RadioEventSender, RadioStack};
pub use reconciler::{ConnectedSnapshot, EventReconciler};
pub use registry::{PeripheralMap, PeripheralRegistry};
pub use scan::{ScanController, ScanStart};
pub use utils::map_rssi_to_progress;
