//! Companion-side receiver for Disense snapshots.
//!
//! [`DisenseMonitor`] finds a device by name or service UUID, connects,
//! subscribes to the three snapshot characteristics and keeps the most
//! recent snapshot of each class.

use btleplug::api::Peripheral as _;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::ble::characteristics::{SnapshotEvent, SnapshotSubscriber};
use crate::ble::connection::{ConnectionState, DeviceLink};
use crate::ble::scanner::DeviceScanner;
use crate::data::SensorClass;
use crate::error::{Error, Result};

/// How the monitor finds and connects to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Advertised name to look for; any Disense device when `None`.
    pub device_name: Option<String>,
    /// How long to scan before giving up.
    pub scan_timeout: Duration,
    /// Connection attempts.
    pub connect_attempts: u32,
    /// Pause between connection attempts.
    pub retry_delay: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            scan_timeout: Duration::from_secs(30),
            connect_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl MonitorConfig {
    /// Look for a specific device name.
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    /// Set the scan timeout.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the connection retry policy.
    pub fn with_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.connect_attempts = attempts;
        self.retry_delay = delay;
        self
    }
}

/// Latest snapshot per class.
#[derive(Debug, Default, Clone)]
pub struct LatestSnapshots {
    inner: Arc<RwLock<HashMap<SensorClass, SnapshotEvent>>>,
}

impl LatestSnapshots {
    /// Store `event`, replacing the previous snapshot of its class.
    pub fn record(&self, event: SnapshotEvent) {
        self.inner.write().insert(event.class, event);
    }

    /// The most recent snapshot of `class`.
    pub fn get(&self, class: SensorClass) -> Option<SnapshotEvent> {
        self.inner.read().get(&class).cloned()
    }

    /// Number of classes seen so far.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Check if nothing has been received.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// A connected companion receiver.
pub struct DisenseMonitor {
    link: DeviceLink,
    subscriber: SnapshotSubscriber,
    latest: LatestSnapshots,
    cache_handle: Option<tokio::task::JoinHandle<()>>,
    watch_handle: Option<tokio::task::JoinHandle<()>>,
    name: Option<String>,
}

impl DisenseMonitor {
    /// Scan for a device, connect and start receiving snapshots.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DeviceNotFound`] when nothing matching shows up
    /// within the scan timeout, [`crate::Error::ConnectionFailed`] when every
    /// connection attempt fails, and [`crate::Error::CharacteristicNotFound`]
    /// when the peripheral lacks a snapshot characteristic. The link is
    /// closed again if setup fails after connecting.
    pub async fn connect(config: MonitorConfig) -> Result<Self> {
        let scanner = DeviceScanner::new().await?;
        scanner.start_scanning().await?;
        let found = scanner
            .find_device(config.device_name.as_deref(), config.scan_timeout)
            .await;
        scanner.stop_scanning().await?;
        let found = found?;

        info!(
            "Found {} ({}), rssi {:?}",
            found.local_name.as_deref().unwrap_or("unnamed device"),
            found.identifier,
            found.rssi
        );

        let link = DeviceLink::new(found.peripheral.clone())
            .with_retries(config.connect_attempts, config.retry_delay);
        link.connect().await?;

        let subscriber = SnapshotSubscriber::new(found.peripheral.clone());
        let setup = async {
            subscriber.discover()?;
            subscriber.start().await
        };
        link.disconnect_on_error(setup.await).await?;
        let watch_handle =
            link.watch_disconnects(scanner.adapter().clone(), found.peripheral.id());

        let latest = LatestSnapshots::default();
        let cache_handle = {
            let latest = latest.clone();
            let mut rx = subscriber.subscribe();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => latest.record(event),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!("Snapshot cache skipped {} events", n)
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        Ok(Self {
            link,
            subscriber,
            latest,
            cache_handle: Some(cache_handle),
            watch_handle: Some(watch_handle),
            name: found.local_name,
        })
    }

    /// Advertised name of the connected device.
    pub fn device_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Link state.
    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    /// Receive decoded snapshots as they arrive.
    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotEvent> {
        self.subscriber.subscribe()
    }

    /// The most recent snapshot of `class`.
    pub fn latest(&self, class: SensorClass) -> Option<SnapshotEvent> {
        self.latest.get(class)
    }

    /// Write `data` to the device's acknowledgment characteristic.
    pub async fn acknowledge(&self, data: &[u8]) -> Result<()> {
        if !self.link.is_connected() {
            return Err(Error::NotConnected);
        }
        self.subscriber.acknowledge(data).await
    }

    /// Unsubscribe and drop the link.
    pub async fn disconnect(mut self) -> Result<()> {
        self.abort_tasks();
        self.subscriber.stop().await?;
        self.link.disconnect().await
    }
}

impl DisenseMonitor {
    fn abort_tasks(&mut self) {
        for handle in [self.cache_handle.take(), self.watch_handle.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

impl Drop for DisenseMonitor {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SensorRecord;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn event(class: SensorClass, value: f32) -> SnapshotEvent {
        SnapshotEvent {
            class,
            records: vec![SensorRecord::new(1, value)],
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_monitor_config_builders() {
        let config = MonitorConfig::default()
            .with_device_name("Disense-1")
            .with_scan_timeout(Duration::from_secs(5))
            .with_retries(5, Duration::from_millis(250));

        assert_eq!(config.device_name.as_deref(), Some("Disense-1"));
        assert_eq!(config.scan_timeout, Duration::from_secs(5));
        assert_eq!(config.connect_attempts, 5);
    }

    #[test]
    fn test_latest_keeps_newest_per_class() {
        let latest = LatestSnapshots::default();
        assert!(latest.is_empty());

        latest.record(event(SensorClass::Thermistor, 20.0));
        latest.record(event(SensorClass::Thermistor, 21.5));
        latest.record(event(SensorClass::Oxygen, 97.0));

        assert_eq!(latest.len(), 2);
        assert_eq!(
            latest.get(SensorClass::Thermistor).and_then(|e| e.value(1)),
            Some(21.5)
        );
        assert!(latest.get(SensorClass::Force).is_none());
    }
}
