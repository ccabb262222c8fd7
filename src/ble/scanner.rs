//! Adapter event pump.
//!
//! Translates btleplug central events into [`RadioEvent`]s on the intake
//! channel, and ends scan sessions after their configured duration.

use btleplug::api::{Central, CentralEvent, Peripheral as _};
use btleplug::platform::{Adapter, Peripheral as BlePeripheral, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace};

use crate::ble::properties::peripheral_record;
use crate::radio::{RadioEvent, RadioEventSender};

/// Peripheral handles keyed by identifier string.
#[derive(Debug)]
pub struct HandleCache<P> {
    handles: RwLock<HashMap<String, P>>,
}

impl<P: Clone> HandleCache<P> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Get the handle for `identifier`.
    pub fn get(&self, identifier: &str) -> Option<P> {
        self.handles.read().get(identifier).cloned()
    }

    /// Store or replace the handle for `identifier`.
    pub fn insert(&self, identifier: impl Into<String>, handle: P) {
        self.handles.write().insert(identifier.into(), handle);
    }

    /// Drop every handle whose identifier fails `keep`. Returns how many were dropped.
    pub fn prune(&self, keep: impl Fn(&str) -> bool) -> usize {
        let mut handles = self.handles.write();
        let before = handles.len();
        handles.retain(|identifier, _| keep(identifier));
        before - handles.len()
    }

    /// Number of cached handles.
    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }
}

impl<P: Clone> Default for HandleCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// btleplug handles of peripherals seen since the last scan started.
pub type KnownPeripherals = Arc<HandleCache<BlePeripheral>>;

/// Shared state used by the event pump.
#[derive(Clone)]
pub struct EventPump {
    /// The adapter producing events.
    pub adapter: Adapter,
    /// Peripheral handle cache.
    pub known: KnownPeripherals,
    /// Whether repeated advertisements are reported.
    pub allow_duplicates: Arc<AtomicBool>,
    /// Intake channel.
    pub event_tx: RadioEventSender,
}

impl EventPump {
    /// Spawn the pump task. It ends when the adapter stream ends or the
    /// intake channel closes.
    pub async fn spawn(self) -> btleplug::Result<tokio::task::JoinHandle<()>> {
        let mut events = self.adapter.events().await?;

        Ok(tokio::spawn(async move {
            debug!("Adapter event pump started");
            while let Some(event) = events.next().await {
                if !self.handle_event(event).await {
                    break;
                }
            }
            debug!("Adapter event pump ended");
        }))
    }

    /// Handle one central event. Returns `false` once the intake channel is closed.
    async fn handle_event(&self, event: CentralEvent) -> bool {
        match event {
            CentralEvent::DeviceDiscovered(id) => {
                trace!("Device discovered: {:?}", id);
                self.process_peripheral(id).await
            }
            CentralEvent::DeviceUpdated(id) => {
                if self.allow_duplicates.load(Ordering::SeqCst) {
                    trace!("Device updated: {:?}", id);
                    self.process_peripheral(id).await
                } else {
                    true
                }
            }
            CentralEvent::DeviceConnected(id) => {
                debug!("Device connected: {:?}", id);
                true
            }
            CentralEvent::DeviceDisconnected(id) => {
                debug!("Device disconnected: {:?}", id);
                self.send(RadioEvent::Disconnected {
                    identifier: id.to_string(),
                })
                .await
            }
            _ => true,
        }
    }

    /// Emit a discovery event for a peripheral.
    async fn process_peripheral(&self, id: PeripheralId) -> bool {
        let peripheral = match self.adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return true;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(properties) => properties,
            Err(e) => {
                trace!("Failed to get properties of {:?}: {}", id, e);
                return true;
            }
        };

        let identifier = id.to_string();
        self.known.insert(identifier.clone(), peripheral);

        self.send(RadioEvent::Discovered(peripheral_record(
            identifier, properties, false,
        )))
        .await
    }

    async fn send(&self, event: RadioEvent) -> bool {
        self.event_tx.send(event).await.is_ok()
    }
}

/// Stop the scan after `duration` and report it.
pub fn spawn_scan_timer(
    adapter: Adapter,
    duration: Duration,
    event_tx: RadioEventSender,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        stop_and_report(&adapter, &event_tx).await;
    })
}

/// Stop scanning and emit [`RadioEvent::ScanStopped`].
pub async fn stop_and_report(adapter: &Adapter, event_tx: &RadioEventSender) {
    info!("Stopping BLE scan");
    if let Err(e) = adapter.stop_scan().await {
        error!("Failed to stop scan: {}", e);
    }
    let _ = event_tx.send(RadioEvent::ScanStopped).await;
}
