//! Peripheral records.
//!
//! A [`Peripheral`] is an immutable snapshot of what is known about one
//! BLE device. Updates never mutate a stored record; they build a modified
//! copy and upsert it into the [`PeripheralRegistry`](crate::PeripheralRegistry).

use bytes::Bytes;
use std::collections::HashMap;
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::utils::map_rssi_to_progress;

/// Name given to peripherals that advertise without one.
pub const NO_NAME: &str = "NO NAME";

/// Advertisement payload of a peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AdvertisingData {
    /// Advertised local name.
    pub local_name: Option<String>,
    /// Advertised service UUIDs.
    pub service_uuids: Vec<Uuid>,
    /// Whether the peripheral accepts connections, if the stack reports it.
    pub is_connectable: Option<bool>,
    /// Advertised transmit power level in dBm.
    pub tx_power_level: Option<i16>,
    /// Manufacturer-specific data keyed by company identifier.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    /// Service data keyed by service UUID.
    pub service_data: HashMap<Uuid, Vec<u8>>,
}

/// A GATT service.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ServiceInfo {
    /// Service UUID.
    pub uuid: Uuid,
    /// Whether this is a primary service.
    pub primary: bool,
}

/// A single characteristic property flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CharacteristicProperty {
    /// Value may be broadcast.
    Broadcast,
    /// Value may be read.
    Read,
    /// Value may be written without response.
    WriteWithoutResponse,
    /// Value may be written with response.
    Write,
    /// Value changes are notified.
    Notify,
    /// Value changes are indicated.
    Indicate,
    /// Signed writes are supported.
    AuthenticatedSignedWrites,
    /// Extended properties descriptor is present.
    ExtendedProperties,
}

/// A GATT descriptor, with its value once read.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DescriptorInfo {
    /// Descriptor UUID.
    pub uuid: Uuid,
    /// Value read after connecting, `None` if unread or the read failed.
    pub value: Option<Bytes>,
}

impl DescriptorInfo {
    /// Create an unread descriptor.
    pub fn new(uuid: Uuid) -> Self {
        Self { uuid, value: None }
    }
}

/// A GATT characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CharacteristicInfo {
    /// UUID of the owning service.
    pub service: Uuid,
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Property flags.
    pub properties: Vec<CharacteristicProperty>,
    /// Descriptors attached to the characteristic.
    pub descriptors: Vec<DescriptorInfo>,
}

/// Service topology discovered after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GattTopology {
    /// Discovered services.
    pub services: Vec<ServiceInfo>,
    /// Discovered characteristics across all services.
    pub characteristics: Vec<CharacteristicInfo>,
}

impl GattTopology {
    /// Total number of descriptors across all characteristics.
    pub fn descriptor_count(&self) -> usize {
        self.characteristics.iter().map(|c| c.descriptors.len()).sum()
    }
}

/// Connection state derived from a peripheral record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConnectionState {
    /// Not connected to the peripheral.
    #[default]
    Disconnected,
    /// Connect sequence in flight.
    Connecting,
    /// Link established, services not yet discovered.
    Connected,
    /// Link established and GATT topology known.
    ServicesDiscovered,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::ServicesDiscovered)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::ServicesDiscovered => write!(f, "Services discovered"),
        }
    }
}

/// Everything known about one peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Peripheral {
    /// Stable device identifier.
    pub id: String,
    /// Display name.
    pub name: Option<String>,
    /// Most recent signal strength in dBm.
    pub rssi: Option<i16>,
    /// Advertisement payload.
    pub advertising: AdvertisingData,
    /// Link is established.
    pub connected: bool,
    /// Connect sequence in flight.
    pub connecting: bool,
    /// GATT topology, populated after connecting.
    pub services: Option<GattTopology>,
}

impl Peripheral {
    /// Create a record with only an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Set the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the signal strength.
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Set the advertisement payload.
    pub fn with_advertising(mut self, advertising: AdvertisingData) -> Self {
        self.advertising = advertising;
        self
    }

    /// Name to display, falling back to [`NO_NAME`].
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => NO_NAME,
        }
    }

    /// Whether the peripheral advertises that it accepts connections.
    ///
    /// Stacks that do not report connectability are assumed connectable.
    pub fn is_connectable(&self) -> bool {
        self.advertising.is_connectable.unwrap_or(true)
    }

    /// Signal strength as a `0.0..=1.0` progress value.
    pub fn signal_progress(&self) -> Option<f64> {
        self.rssi.map(map_rssi_to_progress)
    }

    /// Derived connection state.
    pub fn connection_state(&self) -> ConnectionState {
        match (self.connecting, self.connected, &self.services) {
            (true, _, _) => ConnectionState::Connecting,
            (false, true, Some(_)) => ConnectionState::ServicesDiscovered,
            (false, true, None) => ConnectionState::Connected,
            (false, false, _) => ConnectionState::Disconnected,
        }
    }
}
