//! Radio stack abstraction.
//!
//! [`RadioStack`] is the command surface the manager drives; [`RadioEvent`]
//! is what a stack pushes back through the intake channel. The btleplug
//! backend lives in [`crate::ble`]; tests substitute scripted stacks.

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::config::{ScanOptions, StackOptions};
use crate::error::Result;
use crate::peripheral::{GattTopology, Peripheral};

/// Event pushed by the radio stack. Arrival order is not guaranteed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// A peripheral advertised during a scan.
    Discovered(Peripheral),
    /// The scan session ended.
    ScanStopped,
    /// A peripheral's link dropped.
    Disconnected {
        /// Identifier of the peripheral.
        identifier: String,
    },
    /// A subscribed characteristic changed value.
    CharacteristicValueUpdated(CharacteristicUpdate),
}

/// Value change reported for a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicUpdate {
    /// Identifier of the peripheral.
    pub identifier: String,
    /// Characteristic UUID.
    pub characteristic: Uuid,
    /// New value.
    pub value: Bytes,
}

/// Sending half of the radio event intake channel.
pub type RadioEventSender = tokio::sync::mpsc::Sender<RadioEvent>;

/// Receiving half of the radio event intake channel.
pub type RadioEventReceiver = tokio::sync::mpsc::Receiver<RadioEvent>;

/// Commands the manager issues to the radio stack.
///
/// `start_stack` must succeed before any other command is expected to.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RadioStack: Send + Sync {
    /// Turn the radio on, or confirm it is on.
    async fn enable_radio(&self) -> Result<()>;

    /// Start the stack and begin delivering events.
    async fn start_stack(&self, options: StackOptions) -> Result<()>;

    /// Start a scan session that ends by itself after `options.duration`.
    async fn scan(&self, options: ScanOptions) -> Result<()>;

    /// Peripherals the stack currently considers connected.
    async fn connected_peripherals(&self) -> Result<Vec<Peripheral>>;

    /// Establish a link to the peripheral.
    async fn connect(&self, identifier: &str) -> Result<()>;

    /// Drop the link to the peripheral.
    async fn disconnect(&self, identifier: &str) -> Result<()>;

    /// Discover the peripheral's GATT topology.
    async fn retrieve_services(&self, identifier: &str) -> Result<GattTopology>;

    /// Read the current signal strength in dBm.
    async fn read_rssi(&self, identifier: &str) -> Result<i16>;

    /// Read a descriptor value.
    async fn read_descriptor(
        &self,
        identifier: &str,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> Result<Bytes>;
}
