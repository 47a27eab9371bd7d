//! BLE scanning for Disense devices (companion side).

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace};
use uuid::Uuid;

use crate::ble::uuids::{is_disense_name, DISENSE_SERVICE_UUID};
use crate::error::{Error, Result};

/// A Disense device seen in advertising.
#[derive(Debug, Clone)]
pub struct DeviceDiscoveryEvent {
    /// The BLE peripheral identifier.
    pub identifier: String,
    /// The peripheral handle.
    pub peripheral: Peripheral,
    /// Advertised local name, if any.
    pub local_name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
}

/// Scanner that keeps a table of nearby Disense devices.
pub struct DeviceScanner {
    adapter: Adapter,
    is_scanning: Arc<RwLock<bool>>,
    discovered: Arc<RwLock<HashMap<String, DeviceDiscoveryEvent>>>,
    event_tx: broadcast::Sender<DeviceDiscoveryEvent>,
    scan_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl DeviceScanner {
    /// Create a scanner on the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BluetoothUnavailable`] if there is no adapter.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter))
    }

    /// Create a scanner on a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            adapter,
            is_scanning: Arc::new(RwLock::new(false)),
            discovered: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            scan_handle: RwLock::new(None),
        }
    }

    /// Start scanning. Repeated calls are ignored.
    pub async fn start_scanning(&self) -> Result<()> {
        if *self.is_scanning.read() {
            debug!("Already scanning");
            return Ok(());
        }

        // Unfiltered: devices advertising only their name must still reach
        // `process_peripheral`.
        info!("Scanning for Disense devices");
        self.adapter.start_scan(ScanFilter::default()).await?;
        *self.is_scanning.write() = true;

        let adapter = self.adapter.clone();
        let is_scanning = self.is_scanning.clone();
        let discovered = self.discovered.clone();
        let event_tx = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    error!("Failed to get adapter events: {}", e);
                    return;
                }
            };

            while *is_scanning.read() {
                tokio::select! {
                    Some(event) = events.next() => {
                        if let Some(id) = Self::peripheral_of(event) {
                            Self::process_peripheral(&adapter, id, &discovered, &event_tx).await;
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                }
            }

            debug!("Scan event loop ended");
        });

        *self.scan_handle.write() = Some(handle);
        Ok(())
    }

    /// Stop scanning and wait for the event task.
    pub async fn stop_scanning(&self) -> Result<()> {
        if !*self.is_scanning.read() {
            return Ok(());
        }

        info!("Stopping scan");
        *self.is_scanning.write() = false;
        self.adapter.stop_scan().await?;

        let handle = self.scan_handle.write().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }

    /// The adapter this scanner runs on.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        *self.is_scanning.read()
    }

    /// Devices seen so far, by peripheral identifier.
    pub fn discovered_devices(&self) -> HashMap<String, DeviceDiscoveryEvent> {
        self.discovered.read().clone()
    }

    /// Subscribe to discovery events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceDiscoveryEvent> {
        self.event_tx.subscribe()
    }

    /// Wait until a device matching `name` (or any Disense device when
    /// `None`) shows up, preferring the strongest signal already seen.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if nothing matching is seen within
    /// `timeout`.
    pub async fn find_device(
        &self,
        name: Option<&str>,
        timeout: Duration,
    ) -> Result<DeviceDiscoveryEvent> {
        let rx = self.subscribe();
        let known = strongest(
            self.discovered
                .read()
                .values()
                .filter(|e| name_matches(e.local_name.as_deref(), name))
                .cloned(),
            |e| e.rssi,
        );
        if let Some(event) = known {
            return Ok(event);
        }

        wait_for(rx, timeout, |e| name_matches(e.local_name.as_deref(), name))
            .await
            .ok_or_else(|| not_found(name))
    }

    fn peripheral_of(event: CentralEvent) -> Option<PeripheralId> {
        match event {
            CentralEvent::DeviceDiscovered(id)
            | CentralEvent::DeviceUpdated(id)
            | CentralEvent::ServicesAdvertisement { id, .. } => Some(id),
            CentralEvent::DeviceDisconnected(id) => {
                debug!("Device disconnected: {:?}", id);
                None
            }
            _ => None,
        }
    }

    async fn process_peripheral(
        adapter: &Adapter,
        id: PeripheralId,
        discovered: &Arc<RwLock<HashMap<String, DeviceDiscoveryEvent>>>,
        event_tx: &broadcast::Sender<DeviceDiscoveryEvent>,
    ) {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return,
        };

        if !is_disense_advertisement(properties.local_name.as_deref(), &properties.services) {
            return;
        }

        let identifier = id.to_string();
        let event = DeviceDiscoveryEvent {
            identifier: identifier.clone(),
            peripheral,
            local_name: properties.local_name,
            rssi: properties.rssi,
        };

        trace!("Disense device {} rssi={:?}", identifier, event.rssi);
        discovered.write().insert(identifier, event.clone());
        let _ = event_tx.send(event);
    }
}

/// A device is ours if it advertises the Disense service or a Disense name.
pub fn is_disense_advertisement(local_name: Option<&str>, services: &[Uuid]) -> bool {
    services.contains(&DISENSE_SERVICE_UUID) || local_name.map(is_disense_name).unwrap_or(false)
}

/// `None` accepts any name.
fn name_matches(local_name: Option<&str>, wanted: Option<&str>) -> bool {
    match wanted {
        Some(wanted) => local_name == Some(wanted),
        None => true,
    }
}

/// The candidate with the highest RSSI; unknown RSSI ranks last.
fn strongest<T>(
    candidates: impl IntoIterator<Item = T>,
    rssi: impl Fn(&T) -> Option<i16>,
) -> Option<T> {
    candidates
        .into_iter()
        .max_by_key(|c| rssi(c).unwrap_or(i16::MIN))
}

/// First value on `rx` accepted by `accept`, or `None` on timeout or close.
async fn wait_for<T: Clone>(
    mut rx: broadcast::Receiver<T>,
    timeout: Duration,
    accept: impl Fn(&T) -> bool,
) -> Option<T> {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(value) if accept(&value) => return Some(value),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(timeout, wait).await.ok().flatten()
}

fn not_found(name: Option<&str>) -> Error {
    Error::DeviceNotFound {
        identifier: name.unwrap_or("any Disense device").to_string(),
    }
}

impl Drop for DeviceScanner {
    fn drop(&mut self) {
        *self.is_scanning.write() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::ble::uuids::FORCE_CHARACTERISTIC_UUID;

    #[test]
    fn test_discovery_event_is_clone_and_send() {
        fn assert_traits<T: Clone + Send + Sync>() {}
        assert_traits::<DeviceDiscoveryEvent>();
    }

    #[test]
    fn test_advertisement_matches_by_name_or_service() {
        assert!(is_disense_advertisement(Some("Disense-1"), &[]));
        assert!(is_disense_advertisement(None, &[DISENSE_SERVICE_UUID]));
        assert!(is_disense_advertisement(
            Some("ESP32"),
            &[FORCE_CHARACTERISTIC_UUID, DISENSE_SERVICE_UUID]
        ));
        assert!(!is_disense_advertisement(
            Some("HeartStrap"),
            &[FORCE_CHARACTERISTIC_UUID]
        ));
        assert!(!is_disense_advertisement(None, &[]));
    }

    #[test]
    fn test_name_matching() {
        assert!(name_matches(Some("Disense-1"), Some("Disense-1")));
        assert!(!name_matches(Some("Disense-2"), Some("Disense-1")));
        assert!(!name_matches(None, Some("Disense-1")));
        assert!(name_matches(None, None));
        assert!(name_matches(Some("Disense-2"), None));
    }

    #[test]
    fn test_strongest_prefers_highest_rssi() {
        let seen = vec![
            ("a", Some(-80i16)),
            ("b", None),
            ("c", Some(-42)),
            ("d", Some(-60)),
        ];
        assert_eq!(strongest(seen, |c| c.1).map(|c| c.0), Some("c"));

        let unknown = vec![("x", None::<i16>)];
        assert_eq!(strongest(unknown, |c| c.1).map(|c| c.0), Some("x"));
        assert_eq!(strongest(Vec::<(&str, Option<i16>)>::new(), |c| c.1), None);
    }

    #[tokio::test]
    async fn test_wait_for_skips_non_matching() {
        let (tx, rx) = broadcast::channel(8);
        tx.send("Disense-2").unwrap();
        tx.send("Disense-1").unwrap();

        let found = wait_for(rx, Duration::from_secs(1), |name| *name == "Disense-1").await;
        assert_eq!(found, Some("Disense-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_times_out() {
        let (tx, rx) = broadcast::channel::<&str>(8);
        let found = wait_for(rx, Duration::from_secs(20), |_| true).await;
        assert_eq!(found, None);
        drop(tx);
    }

    #[test]
    fn test_not_found_names_the_target() {
        match not_found(Some("Disense-7")) {
            Error::DeviceNotFound { identifier } => assert_eq!(identifier, "Disense-7"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(not_found(None), Error::DeviceNotFound { .. }));
    }
}
