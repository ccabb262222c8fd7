//! Peripheral registry.
//!
//! The registry is the single shared view of known peripherals. Every
//! mutation swaps in a new snapshot, so a reader holding an older
//! [`PeripheralMap`] keeps a consistent (if stale) view, and observers can
//! detect change by comparing `Arc` pointers instead of contents.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

use crate::peripheral::Peripheral;

/// Immutable snapshot of the registry, ordered by identifier.
pub type PeripheralMap = Arc<BTreeMap<String, Arc<Peripheral>>>;

/// Authoritative map of peripheral identifier to record.
#[derive(Debug)]
pub struct PeripheralRegistry {
    snapshot_tx: watch::Sender<PeripheralMap>,
}

impl Default for PeripheralRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeripheralRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(BTreeMap::new()));
        Self { snapshot_tx }
    }

    /// Insert or replace the record for `id`.
    ///
    /// Observers are notified exactly once per call.
    pub fn upsert(&self, id: impl Into<String>, record: impl Into<Arc<Peripheral>>) {
        let id = id.into();
        let record = record.into();
        trace!(
            "Upserting {} (connected={}, connecting={})",
            id,
            record.connected,
            record.connecting
        );
        self.snapshot_tx.send_modify(|snapshot| {
            let mut next = (**snapshot).clone();
            next.insert(id, record);
            *snapshot = Arc::new(next);
        });
    }

    /// Get the record for `id`.
    pub fn get(&self, id: &str) -> Option<Arc<Peripheral>> {
        self.snapshot_tx.borrow().get(id).cloned()
    }

    /// Check if a record for `id` exists.
    pub fn contains(&self, id: &str) -> bool {
        self.snapshot_tx.borrow().contains_key(id)
    }

    /// All current records, ordered by identifier.
    pub fn values(&self) -> Vec<Arc<Peripheral>> {
        self.snapshot_tx.borrow().values().cloned().collect()
    }

    /// Number of known peripherals.
    pub fn len(&self) -> usize {
        self.snapshot_tx.borrow().len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.snapshot_tx.borrow().is_empty()
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> PeripheralMap {
        self.snapshot_tx.borrow().clone()
    }

    /// Replace the whole map with a new empty one.
    pub fn reset(&self) {
        trace!("Resetting peripheral registry");
        self.snapshot_tx.send_replace(Arc::new(BTreeMap::new()));
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<PeripheralMap> {
        self.snapshot_tx.subscribe()
    }
}
