//! Scan session control.
//!
//! Only one scan session runs at a time. Starting a session clears the
//! registry; the session ends when the radio stack reports scan stop.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::ScanOptions;
use crate::error::Result;
use crate::radio::RadioStack;
use crate::registry::PeripheralRegistry;

/// Result of a [`ScanController::start_scan`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStart {
    /// A new scan session was started.
    Started,
    /// A scan was already running; nothing was done.
    AlreadyScanning,
}

/// Owns the scan session lifecycle and the scanning flag.
pub struct ScanController {
    radio: Arc<dyn RadioStack>,
    registry: Arc<PeripheralRegistry>,
    options: ScanOptions,
    scanning_tx: watch::Sender<bool>,
}

impl ScanController {
    /// Create a new scan controller.
    pub fn new(
        radio: Arc<dyn RadioStack>,
        registry: Arc<PeripheralRegistry>,
        options: ScanOptions,
    ) -> Self {
        let (scanning_tx, _) = watch::channel(false);
        Self {
            radio,
            registry,
            options,
            scanning_tx,
        }
    }

    /// Start a scan session.
    ///
    /// Does nothing if a session is already active. Otherwise clears the
    /// registry, raises the scanning flag and issues the scan command. If
    /// the command fails the flag stays raised until scan stop is reported.
    pub async fn start_scan(&self) -> Result<ScanStart> {
        let claimed = self.scanning_tx.send_if_modified(|scanning| {
            if *scanning {
                false
            } else {
                *scanning = true;
                true
            }
        });

        if !claimed {
            debug!("Already scanning, ignoring start request");
            return Ok(ScanStart::AlreadyScanning);
        }

        self.registry.reset();

        info!(
            "Starting BLE scan for {:?} (filter: {:?}, duplicates: {})",
            self.options.duration, self.options.service_uuids, self.options.allow_duplicates
        );

        match self.radio.scan(self.options.clone()).await {
            Ok(()) => {
                debug!("Scan command accepted");
                Ok(ScanStart::Started)
            }
            Err(e) => {
                error!("Scan command failed: {}", e);
                Err(e)
            }
        }
    }

    /// Record that the radio stack stopped scanning. Idempotent.
    pub fn handle_scan_stopped(&self) {
        let was_scanning = self.scanning_tx.send_if_modified(|scanning| {
            let was_scanning = *scanning;
            *scanning = false;
            was_scanning
        });
        if was_scanning {
            info!("Scan stopped");
        } else {
            debug!("Scan stop reported while not scanning");
        }
    }

    /// Check if a scan session is active.
    pub fn is_scanning(&self) -> bool {
        *self.scanning_tx.borrow()
    }

    /// Subscribe to scanning flag changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.scanning_tx.subscribe()
    }

    /// The options each scan is started with.
    pub fn options(&self) -> &ScanOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::peripheral::Peripheral;
    use crate::radio::MockRadioStack;
    use std::time::Duration;

    fn controller(radio: MockRadioStack) -> (ScanController, Arc<PeripheralRegistry>) {
        let registry = Arc::new(PeripheralRegistry::new());
        let controller = ScanController::new(
            Arc::new(radio),
            registry.clone(),
            ScanOptions::default(),
        );
        (controller, registry)
    }

    #[tokio::test]
    async fn test_start_scan_resets_registry_and_scans() {
        let mut radio = MockRadioStack::new();
        radio
            .expect_scan()
            .withf(|options| {
                options.service_uuids.is_empty()
                    && options.duration == Duration::from_secs(7)
                    && options.allow_duplicates
            })
            .times(1)
            .returning(|_| Ok(()));

        let (controller, registry) = controller(radio);
        registry.upsert("AA:BB", Peripheral::new("AA:BB"));

        assert_eq!(controller.start_scan().await.unwrap(), ScanStart::Started);
        assert!(controller.is_scanning());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_second_start_is_noop() {
        let mut radio = MockRadioStack::new();
        radio.expect_scan().times(1).returning(|_| Ok(()));

        let (controller, registry) = controller(radio);
        controller.start_scan().await.unwrap();

        registry.upsert("AA:BB", Peripheral::new("AA:BB"));
        assert_eq!(
            controller.start_scan().await.unwrap(),
            ScanStart::AlreadyScanning
        );
        assert!(registry.contains("AA:BB"));
    }

    #[tokio::test]
    async fn test_failed_scan_keeps_flag_raised() {
        let mut radio = MockRadioStack::new();
        radio
            .expect_scan()
            .times(1)
            .returning(|_| Err(Error::command("scan", "-", "permission denied")));

        let (controller, _registry) = controller(radio);
        assert!(controller.start_scan().await.is_err());
        assert!(controller.is_scanning());

        controller.handle_scan_stopped();
        assert!(!controller.is_scanning());
    }

    #[tokio::test]
    async fn test_scan_can_restart_after_stop() {
        let mut radio = MockRadioStack::new();
        radio.expect_scan().times(2).returning(|_| Ok(()));

        let (controller, _registry) = controller(radio);
        controller.start_scan().await.unwrap();
        controller.handle_scan_stopped();
        assert_eq!(controller.start_scan().await.unwrap(), ScanStart::Started);
    }

    #[test]
    fn test_handle_scan_stopped_is_idempotent() {
        let (controller, _registry) = controller(MockRadioStack::new());
        let mut rx = controller.subscribe();

        controller.handle_scan_stopped();
        controller.handle_scan_stopped();

        assert!(!controller.is_scanning());
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_start_scan_blocking() {
        let mut radio = MockRadioStack::new();
        radio.expect_scan().times(1).returning(|_| Ok(()));

        let (controller, _registry) = controller(radio);
        let outcome = tokio_test::block_on(controller.start_scan()).unwrap();
        assert_eq!(outcome, ScanStart::Started);
    }
}
