//! Companion-side link to a Disense device.

use async_trait::async_trait;
use btleplug::api::{Central as _, CentralEvent};
use btleplug::platform::{Adapter, Peripheral, PeripheralId};
use futures::stream::{Stream, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Connection state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,
    /// Connecting and discovering services.
    Connecting,
    /// Connected with services discovered.
    Connected,
    /// Tearing the link down.
    Disconnecting,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Disconnecting => "Disconnecting",
        };
        f.write_str(name)
    }
}

/// The peripheral operations a [`DeviceLink`] drives.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LinkTarget: Send + Sync {
    /// Open the radio link.
    async fn connect(&self) -> btleplug::Result<()>;
    /// Discover GATT services on an open link.
    async fn discover_services(&self) -> btleplug::Result<()>;
    /// Close the radio link.
    async fn disconnect(&self) -> btleplug::Result<()>;
}

#[async_trait]
impl LinkTarget for Peripheral {
    async fn connect(&self) -> btleplug::Result<()> {
        btleplug::api::Peripheral::connect(self).await
    }

    async fn discover_services(&self) -> btleplug::Result<()> {
        btleplug::api::Peripheral::discover_services(self).await
    }

    async fn disconnect(&self) -> btleplug::Result<()> {
        btleplug::api::Peripheral::disconnect(self).await
    }
}

/// State shared between a link and its disconnect watcher.
#[derive(Clone)]
struct SharedState {
    state: Arc<RwLock<ConnectionState>>,
    state_tx: broadcast::Sender<ConnectionState>,
}

impl SharedState {
    fn new() -> Self {
        let (state_tx, _) = broadcast::channel(16);
        Self {
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            state_tx,
        }
    }

    fn get(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set(&self, new_state: ConnectionState) {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);
        if old_state != new_state {
            debug!("Link state: {} -> {}", old_state, new_state);
            let _ = self.state_tx.send(new_state);
        }
    }
}

/// One link to a device, with bounded connect retries.
pub struct DeviceLink<P: LinkTarget = Peripheral> {
    peripheral: P,
    state: SharedState,
    attempts: u32,
    retry_delay: Duration,
}

impl<P: LinkTarget> DeviceLink<P> {
    /// Wrap a discovered peripheral. Defaults to three attempts one second apart.
    pub fn new(peripheral: P) -> Self {
        Self {
            peripheral,
            state: SharedState::new(),
            attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Change the retry policy.
    pub fn with_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.state.state_tx.subscribe()
    }

    /// The peripheral.
    pub fn peripheral(&self) -> &P {
        &self.peripheral
    }

    /// Connect and discover services.
    ///
    /// A link whose service discovery fails is closed before the next
    /// attempt.
    pub async fn connect(&self) -> Result<()> {
        let current = self.state();
        if current.is_connected() {
            return Ok(());
        }
        if current.is_transitioning() {
            return Err(Error::ConnectionFailed {
                reason: format!("link is {}", current),
            });
        }

        self.state.set(ConnectionState::Connecting);

        for attempt in 1..=self.attempts {
            debug!("Connection attempt {} of {}", attempt, self.attempts);

            match self.try_connect().await {
                Ok(()) => {
                    info!("Connected to Disense device");
                    self.state.set(ConnectionState::Connected);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", attempt, e);
                    if attempt < self.attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        self.state.set(ConnectionState::Disconnected);
        Err(Error::ConnectionFailed {
            reason: format!("failed after {} attempts", self.attempts),
        })
    }

    async fn try_connect(&self) -> btleplug::Result<()> {
        self.peripheral.connect().await?;
        if let Err(e) = self.peripheral.discover_services().await {
            if let Err(close) = self.peripheral.disconnect().await {
                debug!("Closing link after failed discovery: {}", close);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Disconnect. Already-disconnected links are left alone.
    pub async fn disconnect(&self) -> Result<()> {
        if matches!(
            self.state(),
            ConnectionState::Disconnected | ConnectionState::Disconnecting
        ) {
            return Ok(());
        }

        self.state.set(ConnectionState::Disconnecting);
        let result = self.peripheral.disconnect().await;
        self.state.set(ConnectionState::Disconnected);
        result.map_err(Error::Bluetooth)
    }

    /// Pass `result` through, closing the link first if it is an error.
    pub async fn disconnect_on_error<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            warn!("Setup failed on an open link: {}", e);
            if let Err(close) = self.disconnect().await {
                warn!("Disconnect after failed setup: {}", close);
            }
        }
        result
    }

    /// Record that the device dropped the link.
    pub fn mark_disconnected(&self) {
        self.state.set(ConnectionState::Disconnected);
    }

    /// Follow `adapter` events and mark the link disconnected when `id`
    /// drops. Abort the returned handle when the link is torn down.
    pub fn watch_disconnects(&self, adapter: Adapter, id: PeripheralId) -> JoinHandle<()> {
        let state = self.state.clone();
        tokio::spawn(async move {
            let events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    warn!("Cannot watch for disconnects: {}", e);
                    return;
                }
            };
            let drops = events.map(move |event| {
                matches!(event, CentralEvent::DeviceDisconnected(ref d) if *d == id)
            });
            follow_drops(state, drops).await;
        })
    }
}

async fn follow_drops(state: SharedState, mut drops: impl Stream<Item = bool> + Unpin) {
    while let Some(dropped) = drops.next().await {
        if dropped && state.get().is_connected() {
            warn!("Device dropped the link");
            state.set(ConnectionState::Disconnected);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn connected_target() -> MockLinkTarget {
        let mut target = MockLinkTarget::new();
        target.expect_connect().returning(|| Ok(()));
        target.expect_discover_services().returning(|| Ok(()));
        target
    }

    #[test]
    fn test_connection_state() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(ConnectionState::Disconnecting.is_transitioning());
        assert!(!ConnectionState::Disconnected.is_transitioning());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
        assert_eq!(ConnectionState::Disconnected.to_string(), "Disconnected");
    }

    #[tokio::test]
    async fn test_connect_reports_transitions() {
        let link = DeviceLink::new(connected_target());
        let mut rx = link.subscribe();

        link.connect().await.unwrap();

        assert!(link.is_connected());
        assert_eq!(rx.recv().await.unwrap(), ConnectionState::Connecting);
        assert_eq!(rx.recv().await.unwrap(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_discovery_closes_link() {
        let mut target = MockLinkTarget::new();
        target.expect_connect().times(2).returning(|| Ok(()));
        target
            .expect_discover_services()
            .times(2)
            .returning(|| Err(btleplug::Error::NotConnected));
        target.expect_disconnect().times(2).returning(|| Ok(()));

        let link = DeviceLink::new(target).with_retries(2, Duration::from_secs(1));
        let err = link.connect().await.unwrap_err();

        assert!(matches!(err, Error::ConnectionFailed { .. }));
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_does_not_disconnect() {
        let mut target = MockLinkTarget::new();
        target
            .expect_connect()
            .times(3)
            .returning(|| Err(btleplug::Error::NotConnected));
        target.expect_discover_services().never();
        target.expect_disconnect().never();

        let link = DeviceLink::new(target);
        assert!(link.connect().await.is_err());
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_on_error_closes_link() {
        let mut target = connected_target();
        target.expect_disconnect().times(1).returning(|| Ok(()));
        let link = DeviceLink::new(target);
        link.connect().await.unwrap();

        let passed = link.disconnect_on_error(Ok(7)).await.unwrap();
        assert_eq!(passed, 7);
        assert!(link.is_connected());

        let result: Result<()> = link
            .disconnect_on_error(Err(Error::CharacteristicNotFound {
                uuid: "missing".to_string(),
            }))
            .await;
        assert!(matches!(result, Err(Error::CharacteristicNotFound { .. })));
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_dropped_link_is_marked_disconnected() {
        let link = DeviceLink::new(connected_target());
        link.connect().await.unwrap();
        let mut rx = link.subscribe();

        follow_drops(link.state.clone(), futures::stream::iter([false, true])).await;

        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert_eq!(rx.recv().await.unwrap(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_mark_disconnected_notifies() {
        let link = DeviceLink::new(connected_target());
        link.connect().await.unwrap();
        let mut rx = link.subscribe();

        link.mark_disconnected();
        link.mark_disconnected();

        assert!(!link.is_connected());
        assert_eq!(rx.recv().await.unwrap(), ConnectionState::Disconnected);
        assert!(rx.try_recv().is_err());
    }
}
