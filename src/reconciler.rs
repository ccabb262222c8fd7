//! Radio event reconciliation.
//!
//! Folds the radio event stream into the peripheral registry, and pulls the
//! stack's view of connected peripherals on request.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::peripheral::{Peripheral, NO_NAME};
use crate::radio::{CharacteristicUpdate, RadioEvent, RadioEventReceiver, RadioStack};
use crate::registry::PeripheralRegistry;
use crate::scan::ScanController;

/// Outcome of [`EventReconciler::retrieve_connected_snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectedSnapshot {
    /// This many connected peripherals were upserted.
    Found(usize),
    /// The stack reported no connected peripherals.
    Empty,
}

/// Applies radio events to the registry.
pub struct EventReconciler {
    radio: Arc<dyn RadioStack>,
    registry: Arc<PeripheralRegistry>,
    scan: Arc<ScanController>,
    characteristic_tx: broadcast::Sender<CharacteristicUpdate>,
}

impl EventReconciler {
    /// Create a new reconciler.
    pub fn new(
        radio: Arc<dyn RadioStack>,
        registry: Arc<PeripheralRegistry>,
        scan: Arc<ScanController>,
    ) -> Self {
        let (characteristic_tx, _) = broadcast::channel(64);
        Self {
            radio,
            registry,
            scan,
            characteristic_tx,
        }
    }

    /// Consume events until the intake channel closes.
    pub async fn run(&self, mut events: RadioEventReceiver) {
        debug!("Reconciler event loop started");
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        debug!("Reconciler event loop ended");
    }

    /// Apply one radio event.
    pub fn handle_event(&self, event: RadioEvent) {
        match event {
            RadioEvent::Discovered(peripheral) => self.handle_discovered(peripheral),
            RadioEvent::ScanStopped => self.scan.handle_scan_stopped(),
            RadioEvent::Disconnected { identifier } => self.handle_disconnected(&identifier),
            RadioEvent::CharacteristicValueUpdated(update) => {
                self.handle_characteristic_update(update)
            }
        }
    }

    fn handle_discovered(&self, mut peripheral: Peripheral) {
        if peripheral.name.as_deref().map_or(true, str::is_empty) {
            peripheral.name = Some(NO_NAME.to_string());
        }
        debug!(
            "Discovered {} ({}, rssi {:?})",
            peripheral.id,
            peripheral.display_name(),
            peripheral.rssi
        );
        self.registry.upsert(peripheral.id.clone(), peripheral);
    }

    fn handle_disconnected(&self, identifier: &str) {
        match self.registry.get(identifier) {
            Some(existing) => {
                debug!("Previously connected peripheral {} is disconnected", identifier);
                let updated = Peripheral {
                    connected: false,
                    ..Peripheral::clone(&existing)
                };
                self.registry.upsert(identifier, updated);
            }
            None => {
                debug!("Disconnect for untracked peripheral {}, ignoring", identifier);
            }
        }
    }

    fn handle_characteristic_update(&self, update: CharacteristicUpdate) {
        debug!(
            "Received {} bytes from {} on characteristic {}: {:02X?}",
            update.value.len(),
            update.identifier,
            update.characteristic,
            &update.value[..]
        );
        let _ = self.characteristic_tx.send(update);
    }

    /// Upsert every peripheral the stack reports as connected.
    pub async fn retrieve_connected_snapshot(&self) -> Result<ConnectedSnapshot> {
        let connected = match self.radio.connected_peripherals().await {
            Ok(connected) => connected,
            Err(e) => {
                error!("Unable to retrieve connected peripherals: {}", e);
                return Err(e);
            }
        };

        if connected.is_empty() {
            warn!("No connected peripherals found");
            return Ok(ConnectedSnapshot::Empty);
        }

        info!("Retrieved {} connected peripherals", connected.len());

        let count = connected.len();
        for peripheral in connected {
            let updated = Peripheral {
                connected: true,
                ..peripheral
            };
            self.registry.upsert(updated.id.clone(), updated);
        }

        Ok(ConnectedSnapshot::Found(count))
    }

    /// Subscribe to characteristic value updates.
    pub fn subscribe_characteristic_updates(&self) -> broadcast::Receiver<CharacteristicUpdate> {
        self.characteristic_tx.subscribe()
    }
}
