//! btleplug-backed radio stack.

use async_trait::async_trait;
use btleplug::api::{Central, Descriptor, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral as BlePeripheral};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::ble::characteristics::{find_characteristic, spawn_notification_forwarder};
use crate::ble::properties::{gatt_topology, peripheral_record};
use crate::ble::scanner::{
    spawn_scan_timer, stop_and_report, EventPump, HandleCache, KnownPeripherals,
};
use crate::config::{ScanOptions, StackOptions};
use crate::error::{Error, Result};
use crate::peripheral::{GattTopology, Peripheral};
use crate::radio::{RadioEventReceiver, RadioEventSender, RadioStack};

/// [`RadioStack`] backed by the first btleplug adapter on the host.
pub struct BtleplugRadio {
    adapter: Adapter,
    event_tx: RadioEventSender,
    known: KnownPeripherals,
    allow_duplicates: Arc<AtomicBool>,
    pump_handle: RwLock<Option<JoinHandle<()>>>,
    scan_timer: RwLock<Option<JoinHandle<()>>>,
    forwarders: RwLock<HashMap<String, JoinHandle<()>>>,
}

impl BtleplugRadio {
    /// Open the first Bluetooth adapter.
    ///
    /// Returns the radio and the receiving end of its event channel.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(event_buffer: usize) -> Result<(Self, RadioEventReceiver)> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        Ok(Self::with_adapter(adapter, event_buffer))
    }

    /// Create a radio using a specific adapter.
    pub fn with_adapter(adapter: Adapter, event_buffer: usize) -> (Self, RadioEventReceiver) {
        let (event_tx, event_rx) = mpsc::channel(event_buffer.max(1));

        let radio = Self {
            adapter,
            event_tx,
            known: Arc::new(HandleCache::new()),
            allow_duplicates: Arc::new(AtomicBool::new(true)),
            pump_handle: RwLock::new(None),
            scan_timer: RwLock::new(None),
            forwarders: RwLock::new(HashMap::new()),
        };

        (radio, event_rx)
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Stop the running scan before its duration elapses.
    pub async fn stop_scan(&self) {
        if let Some(timer) = self.scan_timer.write().take() {
            timer.abort();
        }
        stop_and_report(&self.adapter, &self.event_tx).await;
    }

    /// Enable notifications for a characteristic of a connected peripheral.
    ///
    /// Values arrive as characteristic update events.
    pub async fn subscribe_characteristic(
        &self,
        identifier: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<()> {
        let peripheral = self.peripheral(identifier).await?;
        let characteristic = find_characteristic(&peripheral, service, characteristic)?;

        peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| Error::command("subscribe", identifier, e))?;

        debug!(
            "Subscribed to notifications from {} on {}",
            characteristic.uuid, identifier
        );

        Ok(())
    }

    fn ensure_started(&self) -> Result<()> {
        if self.pump_handle.read().is_some() {
            Ok(())
        } else {
            Err(Error::StackNotStarted)
        }
    }

    /// Look up the btleplug handle for `identifier`.
    async fn peripheral(&self, identifier: &str) -> Result<BlePeripheral> {
        self.ensure_started()?;

        let cached = self.known.get(identifier);
        if let Some(peripheral) = cached {
            return Ok(peripheral);
        }

        let peripheral = self
            .adapter
            .peripherals()
            .await
            .map_err(Error::Bluetooth)?
            .into_iter()
            .find(|p| p.id().to_string() == identifier)
            .ok_or_else(|| Error::PeripheralNotFound {
                identifier: identifier.to_string(),
            })?;

        self.known.insert(identifier, peripheral.clone());

        Ok(peripheral)
    }
}

#[async_trait]
impl RadioStack for BtleplugRadio {
    async fn enable_radio(&self) -> Result<()> {
        // Host stacks expose no power control; an adapter that answers is on.
        let info = self
            .adapter
            .adapter_info()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;
        info!("Using Bluetooth adapter: {}", info);
        Ok(())
    }

    async fn start_stack(&self, options: StackOptions) -> Result<()> {
        if self.pump_handle.read().is_some() {
            debug!("Radio stack already started");
            return Ok(());
        }

        if options.show_alert {
            debug!("Platform alerts are not available on this stack, ignoring");
        }

        let pump = EventPump {
            adapter: self.adapter.clone(),
            known: self.known.clone(),
            allow_duplicates: self.allow_duplicates.clone(),
            event_tx: self.event_tx.clone(),
        };
        let handle = pump.spawn().await.map_err(Error::Bluetooth)?;

        *self.pump_handle.write() = Some(handle);
        info!("Radio stack started");

        Ok(())
    }

    async fn scan(&self, options: ScanOptions) -> Result<()> {
        self.ensure_started()?;

        debug!(
            "Scan hints {:?} are advisory and not applied by host stacks",
            options.mode
        );
        self.allow_duplicates
            .store(options.allow_duplicates, Ordering::SeqCst);

        // Keep handles of peripherals with live notification forwarders.
        let dropped = {
            let forwarders = self.forwarders.read();
            self.known.prune(|identifier| forwarders.contains_key(identifier))
        };
        debug!("Dropped {} cached peripheral handles", dropped);

        self.adapter
            .start_scan(ScanFilter {
                services: options.service_uuids.clone(),
            })
            .await
            .map_err(|e| Error::command("scan", "-", e))?;

        let timer = spawn_scan_timer(
            self.adapter.clone(),
            options.duration,
            self.event_tx.clone(),
        );
        if let Some(previous) = self.scan_timer.write().replace(timer) {
            previous.abort();
        }

        Ok(())
    }

    async fn connected_peripherals(&self) -> Result<Vec<Peripheral>> {
        self.ensure_started()?;

        let peripherals = self.adapter.peripherals().await.map_err(Error::Bluetooth)?;

        let mut connected = Vec::new();
        for peripheral in peripherals {
            if !peripheral.is_connected().await.unwrap_or(false) {
                continue;
            }

            let identifier = peripheral.id().to_string();
            let properties = peripheral.properties().await.ok().flatten();
            self.known.insert(identifier.clone(), peripheral);
            connected.push(peripheral_record(identifier, properties, true));
        }

        Ok(connected)
    }

    async fn connect(&self, identifier: &str) -> Result<()> {
        let peripheral = self.peripheral(identifier).await?;

        peripheral
            .connect()
            .await
            .map_err(|e| Error::command("connect", identifier, e))?;

        let forwarder = spawn_notification_forwarder(
            peripheral,
            identifier.to_string(),
            self.event_tx.clone(),
        );
        if let Some(previous) = self
            .forwarders
            .write()
            .insert(identifier.to_string(), forwarder)
        {
            previous.abort();
        }

        Ok(())
    }

    async fn disconnect(&self, identifier: &str) -> Result<()> {
        let peripheral = self.peripheral(identifier).await?;

        peripheral
            .disconnect()
            .await
            .map_err(|e| Error::command("disconnect", identifier, e))?;

        if let Some(forwarder) = self.forwarders.write().remove(identifier) {
            forwarder.abort();
        }

        Ok(())
    }

    async fn retrieve_services(&self, identifier: &str) -> Result<GattTopology> {
        let peripheral = self.peripheral(identifier).await?;

        peripheral
            .discover_services()
            .await
            .map_err(|e| Error::command("retrieve_services", identifier, e))?;

        Ok(gatt_topology(&peripheral.services()))
    }

    /// Host stacks only expose the last advertised RSSI, which is returned here.
    async fn read_rssi(&self, identifier: &str) -> Result<i16> {
        let peripheral = self.peripheral(identifier).await?;

        peripheral
            .properties()
            .await
            .map_err(|e| Error::command("read_rssi", identifier, e))?
            .and_then(|properties| properties.rssi)
            .ok_or_else(|| Error::SignalUnavailable {
                identifier: identifier.to_string(),
            })
    }

    async fn read_descriptor(
        &self,
        identifier: &str,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> Result<Bytes> {
        let peripheral = self.peripheral(identifier).await?;

        let descriptor = Descriptor {
            uuid: descriptor,
            service_uuid: service,
            characteristic_uuid: characteristic,
        };

        let value = peripheral
            .read_descriptor(&descriptor)
            .await
            .map_err(|e| Error::command("read_descriptor", identifier, e))?;

        Ok(Bytes::from(value))
    }
}

impl Drop for BtleplugRadio {
    fn drop(&mut self) {
        if let Some(handle) = self.pump_handle.get_mut().take() {
            handle.abort();
        }
        if let Some(timer) = self.scan_timer.get_mut().take() {
            timer.abort();
        }
        for (_, forwarder) in self.forwarders.get_mut().drain() {
            forwarder.abort();
        }
    }
}
