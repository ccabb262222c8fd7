//! Characteristic notifications.
//!
//! Forwards value notifications from a connected peripheral onto the radio
//! intake channel as [`RadioEvent::CharacteristicValueUpdated`].

use btleplug::api::{Characteristic, Peripheral as _};
use btleplug::platform::Peripheral as BlePeripheral;
use bytes::Bytes;
use futures::stream::StreamExt;
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::radio::{CharacteristicUpdate, RadioEvent, RadioEventSender};

/// Spawn a task forwarding notifications of `peripheral` to `event_tx`.
///
/// The task ends when the peripheral's notification stream ends (the link
/// dropped) or the intake channel closes.
pub fn spawn_notification_forwarder(
    peripheral: BlePeripheral,
    identifier: String,
    event_tx: RadioEventSender,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut notifications = match peripheral.notifications().await {
            Ok(n) => n,
            Err(e) => {
                error!("Failed to get notifications stream for {}: {}", identifier, e);
                return;
            }
        };

        debug!("Notification forwarder for {} started", identifier);

        while let Some(notification) = notifications.next().await {
            trace!(
                "Notification from {} on {}: {} bytes",
                identifier,
                notification.uuid,
                notification.value.len()
            );

            let event = RadioEvent::CharacteristicValueUpdated(CharacteristicUpdate {
                identifier: identifier.clone(),
                characteristic: notification.uuid,
                value: Bytes::from(notification.value),
            });

            if event_tx.send(event).await.is_err() {
                break;
            }
        }

        debug!("Notification forwarder for {} stopped", identifier);
    })
}

/// Find a discovered characteristic by service and characteristic UUID.
pub fn find_characteristic(
    peripheral: &BlePeripheral,
    service: Uuid,
    characteristic: Uuid,
) -> Result<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.service_uuid == service && c.uuid == characteristic)
        .ok_or_else(|| {
            Error::command(
                "find_characteristic",
                peripheral.id().to_string(),
                format!(
                    "characteristic {} of service {} not discovered",
                    characteristic, service
                ),
            )
        })
}
