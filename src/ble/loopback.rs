//! In-memory transport.
//!
//! Records every delivered notification instead of sending it over the air.
//! The connection flag is shared with a [`LoopbackHandle`] so a test or a
//! bench simulation can play the peer.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ble::transport::{ChannelId, ChannelKind, WirelessTransport};
use crate::error::{Error, Result};

/// A notification that reached the simulated peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Characteristic the value was pushed on.
    pub uuid: Uuid,
    /// The payload.
    pub payload: Vec<u8>,
}

struct LoopbackChannel {
    uuid: Uuid,
    kind: ChannelKind,
    value: Vec<u8>,
}

#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    advertising: AtomicBool,
    delivered: Mutex<Vec<Notification>>,
    writes: Mutex<Vec<Notification>>,
}

/// Peer-side view of a [`LoopbackTransport`].
#[derive(Clone)]
pub struct LoopbackHandle {
    shared: Arc<Shared>,
}

impl LoopbackHandle {
    /// Connect or disconnect the simulated peer.
    pub fn set_connected(&self, connected: bool) {
        self.shared.connected.store(connected, Ordering::SeqCst);
    }

    /// Whether the simulated peer is connected.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Whether the transport has started advertising.
    pub fn is_advertising(&self) -> bool {
        self.shared.advertising.load(Ordering::SeqCst)
    }

    /// All notifications delivered so far.
    pub fn notifications(&self) -> Vec<Notification> {
        self.shared.delivered.lock().clone()
    }

    /// Drain the delivered notifications.
    pub fn take_notifications(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.shared.delivered.lock())
    }

    /// Simulate the peer writing to a write channel.
    pub fn write(&self, uuid: Uuid, payload: &[u8]) {
        self.shared.writes.lock().push(Notification {
            uuid,
            payload: payload.to_vec(),
        });
    }

    /// Values written by the peer so far.
    pub fn writes(&self) -> Vec<Notification> {
        self.shared.writes.lock().clone()
    }
}

/// A [`WirelessTransport`] that keeps everything in memory.
pub struct LoopbackTransport {
    channels: Vec<LoopbackChannel>,
    service_started: bool,
    shared: Arc<Shared>,
}

impl LoopbackTransport {
    /// Create a transport and the handle that drives its peer.
    pub fn new() -> (Self, LoopbackHandle) {
        let shared = Arc::new(Shared::default());
        let transport = Self {
            channels: Vec::new(),
            service_started: false,
            shared: shared.clone(),
        };
        (transport, LoopbackHandle { shared })
    }

    /// The value currently held by a channel.
    pub fn value(&self, channel: ChannelId) -> Option<&[u8]> {
        self.channels.get(channel.0).map(|c| c.value.as_slice())
    }

    fn create_channel(&mut self, uuid: Uuid, kind: ChannelKind) -> Result<ChannelId> {
        if self.service_started {
            return Err(Error::Transport {
                reason: "channels must be created before the service starts".to_string(),
            });
        }
        if self.channels.iter().any(|c| c.uuid == uuid) {
            return Err(Error::Transport {
                reason: format!("channel {} already exists", uuid),
            });
        }
        self.channels.push(LoopbackChannel {
            uuid,
            kind,
            value: Vec::new(),
        });
        Ok(ChannelId(self.channels.len() - 1))
    }
}

#[async_trait]
impl WirelessTransport for LoopbackTransport {
    fn create_notify_channel(&mut self, uuid: Uuid) -> Result<ChannelId> {
        self.create_channel(uuid, ChannelKind::Notify)
    }

    fn create_write_channel(&mut self, uuid: Uuid) -> Result<ChannelId> {
        self.create_channel(uuid, ChannelKind::Write)
    }

    async fn start_service(&mut self) -> Result<()> {
        self.service_started = true;
        debug!("Loopback service started with {} channels", self.channels.len());
        Ok(())
    }

    async fn start_advertising(&mut self) -> Result<()> {
        self.shared.advertising.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_device_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn set_value(&mut self, channel: ChannelId, value: &[u8]) -> Result<()> {
        let entry = self
            .channels
            .get_mut(channel.0)
            .ok_or(Error::UnknownChannel(channel.0))?;
        entry.value.clear();
        entry.value.extend_from_slice(value);
        Ok(())
    }

    async fn notify(&mut self, channel: ChannelId) -> Result<()> {
        let entry = self
            .channels
            .get(channel.0)
            .ok_or(Error::UnknownChannel(channel.0))?;

        if entry.kind != ChannelKind::Notify {
            return Err(Error::Transport {
                reason: format!("{} is not a notify channel", entry.uuid),
            });
        }
        if !self.service_started {
            return Err(Error::Transport {
                reason: "service not started".to_string(),
            });
        }
        if !self.is_device_connected() {
            trace!("No peer for {}, dropping notification", entry.uuid);
            return Ok(());
        }

        self.shared.delivered.lock().push(Notification {
            uuid: entry.uuid,
            payload: entry.value.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[tokio::test]
    async fn test_notify_reaches_connected_peer() {
        let (mut transport, handle) = LoopbackTransport::new();
        let ch = transport.create_notify_channel(uuid(1)).unwrap();
        transport.start_service().await.unwrap();
        transport.start_advertising().await.unwrap();
        assert!(handle.is_advertising());

        handle.set_connected(true);
        transport.set_value(ch, &[1, 2, 3, 4, 5]).unwrap();
        transport.notify(ch).await.unwrap();

        assert_eq!(
            handle.take_notifications(),
            vec![Notification {
                uuid: uuid(1),
                payload: vec![1, 2, 3, 4, 5]
            }]
        );
        assert!(handle.notifications().is_empty());
    }

    #[tokio::test]
    async fn test_notify_without_peer_is_silent() {
        let (mut transport, handle) = LoopbackTransport::new();
        let ch = transport.create_notify_channel(uuid(1)).unwrap();
        transport.start_service().await.unwrap();

        transport.set_value(ch, &[9]).unwrap();
        assert!(transport.notify(ch).await.is_ok());
        assert!(handle.notifications().is_empty());
        assert_eq!(transport.value(ch), Some(&[9u8][..]));
    }

    #[tokio::test]
    async fn test_channel_rules() {
        let (mut transport, _handle) = LoopbackTransport::new();
        let ack = transport.create_write_channel(uuid(2)).unwrap();
        assert!(transport.create_notify_channel(uuid(2)).is_err());
        transport.start_service().await.unwrap();

        assert!(transport.create_notify_channel(uuid(3)).is_err());
        assert!(transport.notify(ack).await.is_err());
        assert!(matches!(
            transport.set_value(ChannelId(42), &[]),
            Err(Error::UnknownChannel(42))
        ));
    }
}
