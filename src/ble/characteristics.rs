//! Snapshot subscriptions on a connected device (companion side).

use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use chrono::{DateTime, Utc};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::ble::uuids::{
    characteristic_for_class, class_for_characteristic, ACKNOWLEDGMENT_CHARACTERISTIC_UUID,
};
use crate::data::{decode_snapshot, SensorClass, SensorRecord};
use crate::error::{Error, Result};

/// A decoded snapshot notification.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SnapshotEvent {
    /// Class the snapshot belongs to.
    pub class: SensorClass,
    /// Records in slot order.
    pub records: Vec<SensorRecord>,
    /// When the notification arrived.
    pub received_at: DateTime<Utc>,
}

impl SnapshotEvent {
    /// Decode a notification received on `uuid`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] if `uuid` is not a snapshot
    /// characteristic or the payload is not a whole number of records.
    pub fn decode(uuid: &Uuid, data: &[u8], received_at: DateTime<Utc>) -> Result<Self> {
        let class = class_for_characteristic(uuid).ok_or_else(|| Error::InvalidData {
            context: format!("{} is not a snapshot characteristic", uuid),
        })?;
        Ok(Self {
            class,
            records: decode_snapshot(data)?,
            received_at,
        })
    }

    /// The value reported by sensor `id`, if present.
    pub fn value(&self, id: u8) -> Option<f32> {
        self.records.iter().find(|r| r.id == id).map(|r| r.value)
    }
}

/// Subscribes to the three snapshot characteristics and decodes them.
pub struct SnapshotSubscriber {
    peripheral: Peripheral,
    characteristics: RwLock<HashMap<Uuid, Characteristic>>,
    event_tx: broadcast::Sender<SnapshotEvent>,
    listener: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl SnapshotSubscriber {
    /// Create a subscriber for a connected peripheral.
    pub fn new(peripheral: Peripheral) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            peripheral,
            characteristics: RwLock::new(HashMap::new()),
            event_tx,
            listener: RwLock::new(None),
        }
    }

    /// Cache the Disense characteristics, whichever service hosts them.
    ///
    /// Services must already be discovered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CharacteristicNotFound`] if a snapshot
    /// characteristic is missing.
    pub fn discover(&self) -> Result<()> {
        let found = select_characteristics(self.peripheral.characteristics())?;
        *self.characteristics.write() = found;
        Ok(())
    }

    fn characteristic(&self, uuid: &Uuid) -> Result<Characteristic> {
        self.characteristics
            .read()
            .get(uuid)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }

    /// Subscribe to every snapshot characteristic and start decoding.
    pub async fn start(&self) -> Result<()> {
        for class in SensorClass::ALL {
            let characteristic = self.characteristic(&characteristic_for_class(class))?;
            self.peripheral.subscribe(&characteristic).await?;
            debug!("Subscribed to {} snapshots", class);
        }

        if self.listener.read().is_some() {
            return Ok(());
        }

        let mut notifications = self.peripheral.notifications().await?;
        let event_tx = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                match SnapshotEvent::decode(&notification.uuid, &notification.value, Utc::now()) {
                    Ok(event) => {
                        debug!(
                            "{} snapshot: {} records",
                            event.class,
                            event.records.len()
                        );
                        let _ = event_tx.send(event);
                    }
                    Err(e) => warn!("Dropping notification from {}: {}", notification.uuid, e),
                }
            }
            error!("Notification stream ended");
        });

        *self.listener.write() = Some(handle);
        Ok(())
    }

    /// Stop decoding and unsubscribe.
    pub async fn stop(&self) -> Result<()> {
        let handle = self.listener.write().take();
        if let Some(handle) = handle {
            handle.abort();
        }
        for class in SensorClass::ALL {
            if let Ok(characteristic) = self.characteristic(&characteristic_for_class(class)) {
                self.peripheral.unsubscribe(&characteristic).await?;
            }
        }
        Ok(())
    }

    /// Receive decoded snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotEvent> {
        self.event_tx.subscribe()
    }

    /// Write to the acknowledgment characteristic.
    pub async fn acknowledge(&self, data: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(&ACKNOWLEDGMENT_CHARACTERISTIC_UUID)?;
        self.peripheral
            .write(&characteristic, data, WriteType::WithResponse)
            .await?;
        Ok(())
    }
}

/// Pick the snapshot and acknowledgment characteristics out of everything
/// the peripheral exposes. Lookup is by characteristic UUID only.
fn select_characteristics(
    all: BTreeSet<Characteristic>,
) -> Result<HashMap<Uuid, Characteristic>> {
    let found: HashMap<Uuid, Characteristic> = all
        .into_iter()
        .filter(|c| {
            class_for_characteristic(&c.uuid).is_some()
                || c.uuid == ACKNOWLEDGMENT_CHARACTERISTIC_UUID
        })
        .inspect(|c| debug!("Found characteristic {} in {}", c.uuid, c.service_uuid))
        .map(|c| (c.uuid, c))
        .collect();

    for class in SensorClass::ALL {
        let uuid = characteristic_for_class(class);
        if !found.contains_key(&uuid) {
            return Err(Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            });
        }
    }
    Ok(found)
}

impl Drop for SnapshotSubscriber {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.write().take() {
            handle.abort();
        }
    }
}
