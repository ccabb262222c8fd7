//! Peripheral manager.
//!
//! The manager owns the registry and wires the scan controller, event
//! reconciler and connection orchestrator to a single radio stack. It is
//! the surface a presentation layer talks to.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::ble::BtleplugRadio;
use crate::config::ManagerConfig;
use crate::connection::{ConnectionOrchestrator, ToggleOutcome};
use crate::error::Result;
use crate::peripheral::Peripheral;
use crate::radio::{CharacteristicUpdate, RadioEventReceiver, RadioStack};
use crate::reconciler::{ConnectedSnapshot, EventReconciler};
use crate::registry::{PeripheralMap, PeripheralRegistry};
use crate::scan::{ScanController, ScanStart};

/// Callback handle for unregistering callbacks.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// Central manager for discovering, tracking and connecting to peripherals.
pub struct PeripheralManager {
    /// Radio stack commands are issued to.
    radio: Arc<dyn RadioStack>,
    /// Known peripherals.
    registry: Arc<PeripheralRegistry>,
    /// Scan session lifecycle.
    scan: Arc<ScanController>,
    /// Radio event folding.
    reconciler: Arc<EventReconciler>,
    /// Connect/disconnect sequences.
    orchestrator: ConnectionOrchestrator,
    /// Configuration.
    config: ManagerConfig,
    /// Callback ID counter.
    callback_counter: AtomicU64,
    /// Reconciler task handle.
    event_loop: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl PeripheralManager {
    /// Create a manager over an arbitrary radio stack.
    ///
    /// Events only reach the registry once [`start_event_loop`](Self::start_event_loop)
    /// is called with the stack's event receiver.
    pub fn new(radio: Arc<dyn RadioStack>, config: ManagerConfig) -> Self {
        let registry = Arc::new(PeripheralRegistry::new());
        let scan = Arc::new(ScanController::new(
            radio.clone(),
            registry.clone(),
            config.scan.clone(),
        ));
        let reconciler = Arc::new(EventReconciler::new(
            radio.clone(),
            registry.clone(),
            scan.clone(),
        ));
        let orchestrator =
            ConnectionOrchestrator::new(radio.clone(), registry.clone(), config.settle_delay);

        Self {
            radio,
            registry,
            scan,
            reconciler,
            orchestrator,
            config,
            callback_counter: AtomicU64::new(0),
            event_loop: RwLock::new(None),
        }
    }

    /// Create a manager on the host's first Bluetooth adapter, with its
    /// event loop running.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn with_btleplug(config: ManagerConfig) -> Result<Self> {
        let (radio, events) = BtleplugRadio::new(config.event_buffer).await?;
        let manager = Self::new(Arc::new(radio), config);
        manager.start_event_loop(events);
        Ok(manager)
    }

    /// Enable the radio and start the stack.
    ///
    /// Both steps are attempted; the first failure is returned. The manager
    /// stays usable, but commands will fail until the radio is available.
    pub async fn initialize(&self) -> Result<()> {
        let enabled = match self.radio.enable_radio().await {
            Ok(()) => {
                info!("Bluetooth is turned on");
                Ok(())
            }
            Err(e) => {
                error!("Error enabling bluetooth: {}", e);
                Err(e)
            }
        };

        let started = match self.radio.start_stack(self.config.stack).await {
            Ok(()) => {
                debug!("Radio stack started");
                Ok(())
            }
            Err(e) => {
                error!("Radio stack could not be started: {}", e);
                Err(e)
            }
        };

        enabled.and(started)
    }

    /// Spawn the task folding radio events into the registry.
    ///
    /// Replaces any previously running event loop.
    pub fn start_event_loop(&self, events: RadioEventReceiver) {
        let reconciler = self.reconciler.clone();
        let handle = tokio::spawn(async move {
            reconciler.run(events).await;
        });

        if let Some(previous) = self.event_loop.write().replace(handle) {
            warn!("Replacing running event loop");
            previous.abort();
        }
    }

    /// Start a scan session. A no-op while one is running.
    pub async fn start_scan(&self) -> Result<ScanStart> {
        self.scan.start_scan().await
    }

    /// Add the peripherals the stack reports as connected.
    pub async fn retrieve_connected(&self) -> Result<ConnectedSnapshot> {
        self.reconciler.retrieve_connected_snapshot().await
    }

    /// Disconnect a connected peripheral, or connect a disconnected one.
    pub async fn toggle_connection(&self, peripheral: &Peripheral) -> Result<ToggleOutcome> {
        self.orchestrator.toggle_connection(peripheral).await
    }

    /// Check if a scan session is active.
    pub fn is_scanning(&self) -> bool {
        self.scan.is_scanning()
    }

    /// All known peripherals, ordered by identifier.
    pub fn peripherals(&self) -> Vec<Arc<Peripheral>> {
        self.registry.values()
    }

    /// Get a peripheral by identifier.
    pub fn get_peripheral(&self, identifier: &str) -> Option<Arc<Peripheral>> {
        self.registry.get(identifier)
    }

    /// Get known peripherals sorted by signal strength (strongest first).
    pub fn peripherals_by_signal(&self) -> Vec<Arc<Peripheral>> {
        let mut peripherals = self.registry.values();
        peripherals.sort_by_key(|p| std::cmp::Reverse(p.rssi.unwrap_or(i16::MIN)));
        peripherals
    }

    /// Get the number of known peripherals.
    pub fn peripheral_count(&self) -> usize {
        self.registry.len()
    }

    /// The shared registry.
    pub fn registry(&self) -> &Arc<PeripheralRegistry> {
        &self.registry
    }

    /// The active configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Subscribe to registry snapshots.
    pub fn subscribe(&self) -> watch::Receiver<PeripheralMap> {
        self.registry.subscribe()
    }

    /// Subscribe to scanning flag changes.
    pub fn subscribe_scanning(&self) -> watch::Receiver<bool> {
        self.scan.subscribe()
    }

    /// Subscribe to characteristic value updates.
    pub fn subscribe_characteristic_updates(&self) -> broadcast::Receiver<CharacteristicUpdate> {
        self.reconciler.subscribe_characteristic_updates()
    }

    /// Register a callback invoked with the latest snapshot after registry changes.
    ///
    /// Changes that land while the callback is running are coalesced into
    /// the next call.
    pub fn on_peripherals_changed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(PeripheralMap) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.registry.subscribe();

        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                callback(snapshot);
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Disconnect connected peripherals and stop the event loop.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down peripheral manager");

        let connected: Vec<_> = self
            .registry
            .values()
            .into_iter()
            .filter(|p| p.connected)
            .collect();
        for peripheral in connected {
            if let Err(e) = self.orchestrator.disconnect(&peripheral.id).await {
                warn!("Error disconnecting {}: {}", peripheral.id, e);
            }
        }

        if let Some(handle) = self.event_loop.write().take() {
            handle.abort();
        }

        Ok(())
    }
}

impl Drop for PeripheralManager {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::radio::{MockRadioStack, RadioEvent};
    use std::time::Duration;

    fn manager(radio: MockRadioStack) -> PeripheralManager {
        PeripheralManager::new(
            Arc::new(radio),
            ManagerConfig::default().with_settle_delay(Duration::ZERO),
        )
    }

    #[tokio::test]
    async fn test_initialize_attempts_both_steps() {
        let mut radio = MockRadioStack::new();
        radio
            .expect_enable_radio()
            .times(1)
            .returning(|| Err(Error::BluetoothUnavailable));
        radio
            .expect_start_stack()
            .withf(|options| !options.show_alert)
            .times(1)
            .returning(|_| Ok(()));

        let manager = manager(radio);
        assert!(matches!(
            manager.initialize().await,
            Err(Error::BluetoothUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_event_loop_feeds_registry() {
        let mut radio = MockRadioStack::new();
        radio.expect_scan().times(1).returning(|_| Ok(()));
        let manager = manager(radio);

        let (tx, rx) = tokio::sync::mpsc::channel(8);
        manager.start_event_loop(rx);
        let mut snapshots = manager.subscribe();

        manager.start_scan().await.unwrap();
        assert!(manager.is_scanning());

        tx.send(RadioEvent::Discovered(Peripheral::new("AA:BB").with_rssi(-60)))
            .await
            .unwrap();
        tx.send(RadioEvent::ScanStopped).await.unwrap();

        let mut scanning = manager.subscribe_scanning();
        scanning.wait_for(|scanning| !*scanning).await.unwrap();
        snapshots
            .wait_for(|snapshot| snapshot.contains_key("AA:BB"))
            .await
            .unwrap();

        assert_eq!(manager.peripheral_count(), 1);
        assert_eq!(manager.get_peripheral("AA:BB").unwrap().rssi, Some(-60));
    }

    #[tokio::test]
    async fn test_peripherals_by_signal() {
        let manager = manager(MockRadioStack::new());
        manager.registry().upsert("A", Peripheral::new("A").with_rssi(-80));
        manager.registry().upsert("B", Peripheral::new("B").with_rssi(-40));
        manager.registry().upsert("C", Peripheral::new("C"));

        let ids: Vec<_> = manager
            .peripherals_by_signal()
            .iter()
            .map(|p| p.id.clone())
            .collect();
        assert_eq!(ids, vec!["B", "A", "C"]);
    }

    #[tokio::test]
    async fn test_on_peripherals_changed_callback() {
        let manager = manager(MockRadioStack::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let handle = manager.on_peripherals_changed(move |snapshot| {
            let _ = tx.send(snapshot.len());
        });

        manager.registry().upsert("AA:BB", Peripheral::new("AA:BB"));
        assert_eq!(rx.recv().await, Some(1));

        handle.unregister();
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_connected_peripherals() {
        let mut radio = MockRadioStack::new();
        radio
            .expect_disconnect()
            .withf(|id| id == "AA:BB")
            .times(1)
            .returning(|_| Ok(()));
        let manager = manager(radio);

        let mut connected = Peripheral::new("AA:BB");
        connected.connected = true;
        manager.registry().upsert("AA:BB", connected);
        manager.registry().upsert("CC:DD", Peripheral::new("CC:DD"));

        manager.shutdown().await.unwrap();
    }
}
