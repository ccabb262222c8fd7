//! Manager configuration.
//!
//! Defaults reproduce the behaviour of a typical "scan everything nearby"
//! session: a 7 second scan with duplicate reporting and low-latency hints,
//! and a 900 ms settle pause after each connection.

use std::time::Duration;
use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default scan duration.
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(7);

/// Default pause between link establishment and service discovery.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(900);

/// Default capacity of the radio event intake channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// How aggressively the radio matches advertisements against filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MatchMode {
    /// Report on the first weak match.
    Aggressive,
    /// Require a sustained, stronger signal before reporting.
    #[default]
    Sticky,
}

/// Power/latency trade-off for the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ScanMode {
    /// Let the radio scan opportunistically.
    Opportunistic,
    /// Lowest power consumption.
    LowPower,
    /// Balanced power and latency.
    Balanced,
    /// Scan continuously.
    #[default]
    LowLatency,
}

/// Which advertisements trigger a discovery callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CallbackType {
    /// Every advertisement that matches.
    #[default]
    AllMatches,
    /// Only the first advertisement of each peripheral.
    FirstMatch,
    /// Only when a peripheral stops advertising.
    MatchLost,
}

/// Radio-specific scan hints. Stacks that cannot honour them ignore them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScanModeHints {
    /// Match mode.
    pub match_mode: MatchMode,
    /// Scan mode.
    pub scan_mode: ScanMode,
    /// Callback type.
    pub callback_type: CallbackType,
}

/// Parameters for a single scan session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScanOptions {
    /// Services to filter on. Empty scans for every advertising peripheral.
    pub service_uuids: Vec<Uuid>,
    /// How long the radio scans before reporting scan stop.
    pub duration: Duration,
    /// Report every advertisement, not just the first per peripheral.
    pub allow_duplicates: bool,
    /// Scan mode hints.
    pub mode: ScanModeHints,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            service_uuids: Vec::new(),
            duration: DEFAULT_SCAN_DURATION,
            allow_duplicates: true,
            mode: ScanModeHints::default(),
        }
    }
}

/// Options passed when starting the radio stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StackOptions {
    /// Ask the platform to show its own "Bluetooth is off" alert.
    pub show_alert: bool,
}

/// Configuration for a [`PeripheralManager`](crate::PeripheralManager).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ManagerConfig {
    /// Scan session parameters.
    pub scan: ScanOptions,
    /// Pause after connecting before discovering services.
    pub settle_delay: Duration,
    /// Radio stack start options.
    pub stack: StackOptions,
    /// Capacity of the radio event intake channel.
    pub event_buffer: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            scan: ScanOptions::default(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            stack: StackOptions::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl ManagerConfig {
    /// Set the scan parameters.
    pub fn with_scan(mut self, scan: ScanOptions) -> Self {
        self.scan = scan;
        self
    }

    /// Set the scan duration.
    pub fn with_scan_duration(mut self, duration: Duration) -> Self {
        self.scan.duration = duration;
        self
    }

    /// Set the post-connect settle delay.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the radio stack start options.
    pub fn with_stack(mut self, stack: StackOptions) -> Self {
        self.stack = stack;
        self
    }

    /// Set the radio event intake channel capacity (minimum 1).
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }
}
