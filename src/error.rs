//! Error types for the ble-peripheral-manager crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// A command was issued before the radio stack was started.
    #[error("Radio stack not started")]
    StackNotStarted,

    /// The radio stack rejected a command.
    #[error("{command} rejected for {identifier}: {reason}")]
    CommandRejected {
        /// The step that failed (e.g. `connect`, `retrieve_services`).
        command: &'static str,
        /// The peripheral the command was issued for, or `-` for adapter commands.
        identifier: String,
        /// Description of why the command failed.
        reason: String,
    },

    /// The radio stack does not know the given peripheral.
    #[error("Peripheral not found: {identifier}")]
    PeripheralNotFound {
        /// The identifier that was searched for.
        identifier: String,
    },

    /// No signal strength reading is available for the peripheral.
    #[error("Signal strength unavailable for {identifier}")]
    SignalUnavailable {
        /// The peripheral that was queried.
        identifier: String,
    },
}

impl Error {
    /// Build a [`Error::CommandRejected`] for `command` on `identifier`.
    pub fn command(
        command: &'static str,
        identifier: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::CommandRejected {
            command,
            identifier: identifier.into(),
            reason: reason.to_string(),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
