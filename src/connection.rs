//! Connection orchestration.
//!
//! Drives the per-peripheral connect sequence and the disconnect request,
//! publishing each step to the registry:
//!
//! 1. mark `connecting`
//! 2. connect
//! 3. mark `connected`
//! 4. wait the settle delay so bonding can finish
//! 5. discover services
//! 6. read signal strength
//! 7. read every descriptor (failures are skipped)
//! 8. merge signal strength and descriptor values into the stored record
//!
//! A failure in steps 2, 5 or 6 aborts the sequence and leaves the registry
//! as of the last completed step. In particular `connecting` is not cleared
//! when the connect command itself fails.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::peripheral::{GattTopology, Peripheral};
use crate::radio::RadioStack;
use crate::registry::PeripheralRegistry;

/// Summary of a completed connect sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectReport {
    /// Signal strength read after connecting.
    pub rssi: i16,
    /// Number of services discovered.
    pub services: usize,
    /// Descriptors read successfully.
    pub descriptors_read: usize,
    /// Descriptor reads that failed and were skipped.
    pub descriptors_failed: usize,
}

/// Result of [`ConnectionOrchestrator::toggle_connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// A disconnect was requested. The registry changes when the stack
    /// reports the disconnection.
    DisconnectRequested,
    /// The connect sequence completed.
    Connected(ConnectReport),
}

/// Runs connect and disconnect sequences against the radio stack.
pub struct ConnectionOrchestrator {
    radio: Arc<dyn RadioStack>,
    registry: Arc<PeripheralRegistry>,
    settle_delay: Duration,
}

impl ConnectionOrchestrator {
    /// Create a new orchestrator.
    pub fn new(
        radio: Arc<dyn RadioStack>,
        registry: Arc<PeripheralRegistry>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            radio,
            registry,
            settle_delay,
        }
    }

    /// Disconnect a connected peripheral, or connect a disconnected one.
    pub async fn toggle_connection(&self, peripheral: &Peripheral) -> Result<ToggleOutcome> {
        if peripheral.connected {
            self.disconnect(&peripheral.id).await?;
            Ok(ToggleOutcome::DisconnectRequested)
        } else {
            self.connect(peripheral).await.map(ToggleOutcome::Connected)
        }
    }

    /// Ask the stack to drop the link.
    ///
    /// The record keeps `connected = true` until the disconnect event arrives.
    pub async fn disconnect(&self, identifier: &str) -> Result<()> {
        info!("Disconnecting from {}", identifier);
        self.radio
            .disconnect(identifier)
            .await
            .map_err(|e| Self::step_failed("disconnect", identifier, e))
    }

    /// Run the full connect sequence for `peripheral`.
    pub async fn connect(&self, peripheral: &Peripheral) -> Result<ConnectReport> {
        let id = peripheral.id.as_str();
        info!("Connecting to {} ({})", id, peripheral.display_name());

        self.registry.upsert(
            id,
            Peripheral {
                connecting: true,
                ..peripheral.clone()
            },
        );

        self.radio
            .connect(id)
            .await
            .map_err(|e| Self::step_failed("connect", id, e))?;
        debug!("Connected to {}", id);

        self.registry.upsert(
            id,
            Peripheral {
                connecting: false,
                connected: true,
                services: None,
                ..peripheral.clone()
            },
        );

        // Heuristic: some stacks fail GATT operations issued while bonding is still in progress.
        tokio::time::sleep(self.settle_delay).await;

        let mut topology = self
            .radio
            .retrieve_services(id)
            .await
            .map_err(|e| Self::step_failed("retrieve_services", id, e))?;
        debug!(
            "Retrieved {} services and {} characteristics from {}",
            topology.services.len(),
            topology.characteristics.len(),
            id
        );
        let services = Some(topology.clone());
        self.merge_into_stored(id, |stored| stored.services = services);

        let rssi = self
            .radio
            .read_rssi(id)
            .await
            .map_err(|e| Self::step_failed("read_rssi", id, e))?;
        debug!("Current RSSI of {}: {} dBm", id, rssi);

        let (descriptors_read, descriptors_failed) = self.read_descriptors(id, &mut topology).await;

        let report = ConnectReport {
            rssi,
            services: topology.services.len(),
            descriptors_read,
            descriptors_failed,
        };

        self.merge_into_stored(id, |stored| {
            stored.rssi = Some(rssi);
            stored.services = Some(topology);
        });

        info!(
            "Connect sequence for {} complete ({} descriptors read, {} failed)",
            id, descriptors_read, descriptors_failed
        );

        Ok(report)
    }

    /// Read every descriptor in `topology`, storing values in place.
    async fn read_descriptors(&self, id: &str, topology: &mut GattTopology) -> (usize, usize) {
        let mut read = 0;
        let mut failed = 0;

        for characteristic in &mut topology.characteristics {
            for descriptor in &mut characteristic.descriptors {
                let result = self
                    .radio
                    .read_descriptor(
                        id,
                        characteristic.service,
                        characteristic.uuid,
                        descriptor.uuid,
                    )
                    .await;
                match result {
                    Ok(value) => {
                        debug!(
                            "Descriptor {} of {} on {} read as {:02X?}",
                            descriptor.uuid,
                            characteristic.uuid,
                            id,
                            &value[..]
                        );
                        descriptor.value = Some(value);
                        read += 1;
                    }
                    Err(e) => {
                        warn!(
                            "Failed to read descriptor {} of {} on {}: {}",
                            descriptor.uuid, characteristic.uuid, id, e
                        );
                        failed += 1;
                    }
                }
            }
        }

        (read, failed)
    }

    /// Apply `update` to a copy of the stored record and upsert it.
    ///
    /// Skipped if the record has been dropped by a registry reset.
    fn merge_into_stored(&self, id: &str, update: impl FnOnce(&mut Peripheral)) -> bool {
        let Some(stored) = self.registry.get(id) else {
            warn!("{} no longer tracked, skipping registry update", id);
            return false;
        };
        let mut updated = Peripheral::clone(&stored);
        update(&mut updated);
        self.registry.upsert(id, updated);
        true
    }

    fn step_failed(step: &'static str, id: &str, e: Error) -> Error {
        error!("{} failed for {}: {}", step, id, e);
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripheral::{
        CharacteristicInfo, CharacteristicProperty, DescriptorInfo, ServiceInfo,
    };
    use crate::radio::MockRadioStack;
    use bytes::Bytes;
    use uuid::Uuid;

    const SERVICE: Uuid = Uuid::from_u128(0x0000_180d_0000_1000_8000_00805f9b34fb);
    const CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000_2a37_0000_1000_8000_00805f9b34fb);
    const CCCD: Uuid = Uuid::from_u128(0x0000_2902_0000_1000_8000_00805f9b34fb);
    const USER_DESCRIPTION: Uuid = Uuid::from_u128(0x0000_2901_0000_1000_8000_00805f9b34fb);

    fn topology() -> GattTopology {
        GattTopology {
            services: vec![ServiceInfo {
                uuid: SERVICE,
                primary: true,
            }],
            characteristics: vec![CharacteristicInfo {
                service: SERVICE,
                uuid: CHARACTERISTIC,
                properties: vec![CharacteristicProperty::Notify],
                descriptors: vec![
                    DescriptorInfo::new(CCCD),
                    DescriptorInfo::new(USER_DESCRIPTION),
                ],
            }],
        }
    }

    fn orchestrator(radio: MockRadioStack) -> (ConnectionOrchestrator, Arc<PeripheralRegistry>) {
        let registry = Arc::new(PeripheralRegistry::new());
        let orchestrator =
            ConnectionOrchestrator::new(Arc::new(radio), registry.clone(), Duration::ZERO);
        (orchestrator, registry)
    }

    fn tracked(registry: &PeripheralRegistry) -> Peripheral {
        let peripheral = Peripheral::new("AA:BB").with_name("FSC-BP109T").with_rssi(-55);
        registry.upsert("AA:BB", peripheral.clone());
        peripheral
    }

    #[tokio::test]
    async fn test_connect_sequence_success() {
        let mut radio = MockRadioStack::new();
        radio
            .expect_connect()
            .withf(|id| id == "AA:BB")
            .times(1)
            .returning(|_| Ok(()));
        radio
            .expect_retrieve_services()
            .times(1)
            .returning(|_| Ok(topology()));
        radio.expect_read_rssi().times(1).returning(|_| Ok(-70));
        radio
            .expect_read_descriptor()
            .times(2)
            .returning(|_, _, _, _| Ok(Bytes::from_static(&[0x01, 0x00])));

        let (orchestrator, registry) = orchestrator(radio);
        let peripheral = tracked(&registry);

        let outcome = orchestrator.toggle_connection(&peripheral).await.unwrap();

        assert_eq!(
            outcome,
            ToggleOutcome::Connected(ConnectReport {
                rssi: -70,
                services: 1,
                descriptors_read: 2,
                descriptors_failed: 0,
            })
        );

        let stored = registry.get("AA:BB").unwrap();
        assert!(stored.connected);
        assert!(!stored.connecting);
        assert_eq!(stored.rssi, Some(-70));
        let services = stored.services.as_ref().unwrap();
        assert_eq!(services.services.len(), 1);
        assert!(services.characteristics[0]
            .descriptors
            .iter()
            .all(|d| d.value.as_deref() == Some(&[0x01, 0x00][..])));
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_connecting_set() {
        let mut radio = MockRadioStack::new();
        radio
            .expect_connect()
            .times(1)
            .returning(|id| Err(Error::command("connect", id, "timeout")));
        radio.expect_retrieve_services().never();
        radio.expect_read_rssi().never();

        let (orchestrator, registry) = orchestrator(radio);
        let peripheral = tracked(&registry);

        assert!(orchestrator.connect(&peripheral).await.is_err());

        let stored = registry.get("AA:BB").unwrap();
        assert!(stored.connecting);
        assert!(!stored.connected);
    }

    #[tokio::test]
    async fn test_service_discovery_failure_aborts_after_connected() {
        let mut radio = MockRadioStack::new();
        radio.expect_connect().returning(|_| Ok(()));
        radio
            .expect_retrieve_services()
            .returning(|id| Err(Error::command("retrieve_services", id, "gatt error")));
        radio.expect_read_rssi().never();

        let (orchestrator, registry) = orchestrator(radio);
        let peripheral = tracked(&registry);

        assert!(orchestrator.connect(&peripheral).await.is_err());

        let stored = registry.get("AA:BB").unwrap();
        assert!(stored.connected);
        assert!(!stored.connecting);
        assert!(stored.services.is_none());
    }

    #[tokio::test]
    async fn test_rssi_failure_keeps_services() {
        let mut radio = MockRadioStack::new();
        radio.expect_connect().returning(|_| Ok(()));
        radio.expect_retrieve_services().returning(|_| Ok(topology()));
        radio.expect_read_rssi().returning(|id| {
            Err(Error::SignalUnavailable {
                identifier: id.to_string(),
            })
        });
        radio.expect_read_descriptor().never();

        let (orchestrator, registry) = orchestrator(radio);
        let peripheral = tracked(&registry);

        assert!(orchestrator.connect(&peripheral).await.is_err());

        let stored = registry.get("AA:BB").unwrap();
        assert_eq!(stored.services, Some(topology()));
        assert_eq!(stored.rssi, Some(-55));
    }

    #[tokio::test]
    async fn test_descriptor_failure_is_skipped() {
        let mut radio = MockRadioStack::new();
        radio.expect_connect().returning(|_| Ok(()));
        radio.expect_retrieve_services().returning(|_| Ok(topology()));
        radio.expect_read_rssi().returning(|_| Ok(-65));
        radio
            .expect_read_descriptor()
            .returning(|id, _, _, descriptor| {
                if descriptor == CCCD {
                    Err(Error::command("read_descriptor", id, "not permitted"))
                } else {
                    Ok(Bytes::from_static(b"Heart Rate"))
                }
            });

        let (orchestrator, registry) = orchestrator(radio);
        let peripheral = tracked(&registry);

        let report = orchestrator.connect(&peripheral).await.unwrap();
        assert_eq!(report.descriptors_read, 1);
        assert_eq!(report.descriptors_failed, 1);

        let stored = registry.get("AA:BB").unwrap();
        assert!(stored.connected);
        assert_eq!(stored.rssi, Some(-65));
        let descriptors = &stored.services.as_ref().unwrap().characteristics[0].descriptors;
        assert_eq!(descriptors[0].value, None);
        assert_eq!(descriptors[1].value.as_deref(), Some(&b"Heart Rate"[..]));
    }

    #[tokio::test]
    async fn test_final_merge_skipped_after_reset() {
        let registry = Arc::new(PeripheralRegistry::new());
        let reset_registry = registry.clone();

        let mut radio = MockRadioStack::new();
        radio.expect_connect().returning(|_| Ok(()));
        radio
            .expect_retrieve_services()
            .returning(|_| Ok(GattTopology::default()));
        radio.expect_read_rssi().returning(move |_| {
            reset_registry.reset();
            Ok(-40)
        });

        let orchestrator =
            ConnectionOrchestrator::new(Arc::new(radio), registry.clone(), Duration::ZERO);
        let peripheral = tracked(&registry);

        let report = orchestrator.connect(&peripheral).await.unwrap();
        assert_eq!(report.rssi, -40);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_toggle_connected_only_requests_disconnect() {
        let mut radio = MockRadioStack::new();
        radio
            .expect_disconnect()
            .withf(|id| id == "AA:BB")
            .times(1)
            .returning(|_| Ok(()));
        radio.expect_connect().never();

        let (orchestrator, registry) = orchestrator(radio);
        let mut peripheral = tracked(&registry);
        peripheral.connected = true;
        registry.upsert("AA:BB", peripheral.clone());

        let outcome = orchestrator.toggle_connection(&peripheral).await.unwrap();

        assert_eq!(outcome, ToggleOutcome::DisconnectRequested);
        assert!(registry.get("AA:BB").unwrap().connected);
    }

    #[tokio::test]
    async fn test_disconnect_failure_is_returned() {
        let mut radio = MockRadioStack::new();
        radio
            .expect_disconnect()
            .returning(|id| Err(Error::command("disconnect", id, "not connected")));

        let (orchestrator, registry) = orchestrator(radio);
        let mut peripheral = tracked(&registry);
        peripheral.connected = true;

        assert!(orchestrator.toggle_connection(&peripheral).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_delay_precedes_service_discovery() {
        let mut radio = MockRadioStack::new();
        radio.expect_connect().returning(|_| Ok(()));
        radio
            .expect_retrieve_services()
            .returning(|_| Ok(GattTopology::default()));
        radio.expect_read_rssi().returning(|_| Ok(-60));

        let registry = Arc::new(PeripheralRegistry::new());
        let orchestrator = ConnectionOrchestrator::new(
            Arc::new(radio),
            registry.clone(),
            Duration::from_millis(900),
        );
        let peripheral = tracked(&registry);

        let started = tokio::time::Instant::now();
        orchestrator.connect(&peripheral).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(900));
    }
}
