//! BlueZ GATT server transport (Linux, `bluez` feature).
//!
//! Serves one primary service with a notify characteristic per declared
//! notify channel and a write characteristic per write channel, and
//! advertises the device name and service UUID.
//!
//! A peer counts as connected while BlueZ reports any device on the adapter
//! as connected, or while it holds a live notification session.

use async_trait::async_trait;
use bluer::adv::{Advertisement, AdvertisementHandle};
use bluer::{Address, AdapterEvent, DeviceEvent, DeviceProperty};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicNotifier, CharacteristicNotify,
    CharacteristicNotifyMethod, CharacteristicRead, CharacteristicWrite,
    CharacteristicWriteMethod, Service,
};
use futures::stream::{BoxStream, SelectAll};
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::transport::{ChannelId, ChannelKind, WirelessTransport};
use crate::device::config::DeviceConfig;
use crate::error::{Error, Result};

/// A value written by the peer to a write channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerWrite {
    /// Characteristic written.
    pub uuid: Uuid,
    /// Written bytes.
    pub value: Vec<u8>,
}

struct BluezChannel {
    uuid: Uuid,
    kind: ChannelKind,
    value: Arc<Mutex<Vec<u8>>>,
    notifiers: Arc<Mutex<Vec<CharacteristicNotifier>>>,
}

/// Centrals BlueZ currently reports as connected.
#[derive(Debug, Clone, Default)]
struct ConnectedPeers {
    peers: Arc<Mutex<HashSet<Address>>>,
}

impl ConnectedPeers {
    fn update(&self, addr: Address, connected: bool) {
        let mut peers = self.peers.lock();
        let changed = if connected {
            peers.insert(addr)
        } else {
            peers.remove(&addr)
        };
        if changed {
            let change = if connected { "connected" } else { "disconnected" };
            info!("Central {} {}", addr, change);
        }
    }

    fn apply(&self, addr: Address, event: &DeviceEvent) {
        if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(connected)) = event {
            self.update(addr, *connected);
        }
    }

    fn any(&self) -> bool {
        !self.peers.lock().is_empty()
    }
}

type DeviceEvents = BoxStream<'static, (Address, DeviceEvent)>;

async fn device_events(adapter: &bluer::Adapter, addr: Address) -> Result<DeviceEvents> {
    let events = adapter.device(addr)?.events().await?;
    Ok(events.map(move |event| (addr, event)).boxed())
}

/// Track connection state of every device known to `adapter`.
async fn watch_peers(adapter: bluer::Adapter, peers: ConnectedPeers) -> Result<()> {
    let mut adapter_events = adapter.events().await?.boxed();
    let mut devices: SelectAll<DeviceEvents> = SelectAll::new();

    for addr in adapter.device_addresses().await? {
        peers.update(addr, adapter.device(addr)?.is_connected().await?);
        devices.push(device_events(&adapter, addr).await?);
    }

    loop {
        tokio::select! {
            Some(event) = adapter_events.next() => match event {
                AdapterEvent::DeviceAdded(addr) => {
                    peers.update(addr, adapter.device(addr)?.is_connected().await?);
                    devices.push(device_events(&adapter, addr).await?);
                }
                AdapterEvent::DeviceRemoved(addr) => peers.update(addr, false),
                _ => {}
            },
            Some((addr, event)) = devices.next() => peers.apply(addr, &event),
            else => break,
        }
    }
    Ok(())
}

/// Peripheral transport on the default BlueZ adapter.
pub struct BluezTransport {
    device_name: String,
    service_uuid: Uuid,
    channels: Vec<BluezChannel>,
    writes_tx: broadcast::Sender<PeerWrite>,
    peers: ConnectedPeers,
    adapter: Option<bluer::Adapter>,
    app_handle: Option<ApplicationHandle>,
    adv_handle: Option<AdvertisementHandle>,
    watch_handle: Option<JoinHandle<()>>,
}

impl BluezTransport {
    /// Create a transport that will advertise `device_name`.
    pub fn new(device_name: impl Into<String>, service_uuid: Uuid) -> Self {
        let (writes_tx, _) = broadcast::channel(32);
        Self {
            device_name: device_name.into(),
            service_uuid,
            channels: Vec::new(),
            writes_tx,
            peers: ConnectedPeers::default(),
            adapter: None,
            app_handle: None,
            adv_handle: None,
            watch_handle: None,
        }
    }

    /// Create a transport for `config`'s name and service.
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(config.device_name.clone(), config.uuids.service)
    }

    /// Subscribe to writes from the peer (acknowledgments).
    pub fn subscribe_writes(&self) -> broadcast::Receiver<PeerWrite> {
        self.writes_tx.subscribe()
    }

    fn create_channel(&mut self, uuid: Uuid, kind: ChannelKind) -> Result<ChannelId> {
        if self.app_handle.is_some() {
            return Err(Error::Transport {
                reason: "channels must be created before the service starts".to_string(),
            });
        }
        if self.channels.iter().any(|c| c.uuid == uuid) {
            return Err(Error::Transport {
                reason: format!("channel {} already exists", uuid),
            });
        }
        self.channels.push(BluezChannel {
            uuid,
            kind,
            value: Arc::new(Mutex::new(Vec::new())),
            notifiers: Arc::new(Mutex::new(Vec::new())),
        });
        Ok(ChannelId(self.channels.len() - 1))
    }

    fn characteristic(&self, channel: &BluezChannel) -> Characteristic {
        let uuid = channel.uuid;
        match channel.kind {
            ChannelKind::Notify => {
                let value = channel.value.clone();
                let notifiers = channel.notifiers.clone();
                Characteristic {
                    uuid,
                    read: Some(CharacteristicRead {
                        read: true,
                        fun: Box::new(move |_req| {
                            let value = value.clone();
                            async move { Ok(value.lock().clone()) }.boxed()
                        }),
                        ..Default::default()
                    }),
                    notify: Some(CharacteristicNotify {
                        notify: true,
                        method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                            let notifiers = notifiers.clone();
                            async move {
                                info!("Peer subscribed to {}", uuid);
                                notifiers.lock().push(notifier);
                            }
                            .boxed()
                        })),
                        ..Default::default()
                    }),
                    ..Default::default()
                }
            }
            ChannelKind::Write => {
                let value = channel.value.clone();
                let writes_tx = self.writes_tx.clone();
                Characteristic {
                    uuid,
                    write: Some(CharacteristicWrite {
                        write: true,
                        write_without_response: true,
                        method: CharacteristicWriteMethod::Fun(Box::new(move |new_value, _req| {
                            let value = value.clone();
                            let writes_tx = writes_tx.clone();
                            async move {
                                debug!("Peer wrote {} bytes to {}", new_value.len(), uuid);
                                *value.lock() = new_value.clone();
                                let _ = writes_tx.send(PeerWrite {
                                    uuid,
                                    value: new_value,
                                });
                                Ok(())
                            }
                            .boxed()
                        })),
                        ..Default::default()
                    }),
                    ..Default::default()
                }
            }
        }
    }
}

#[async_trait]
impl WirelessTransport for BluezTransport {
    fn create_notify_channel(&mut self, uuid: Uuid) -> Result<ChannelId> {
        self.create_channel(uuid, ChannelKind::Notify)
    }

    fn create_write_channel(&mut self, uuid: Uuid) -> Result<ChannelId> {
        self.create_channel(uuid, ChannelKind::Write)
    }

    async fn start_service(&mut self) -> Result<()> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        info!(
            "Using Bluetooth adapter {} ({})",
            adapter.name(),
            adapter.address().await?
        );

        let characteristics = self
            .channels
            .iter()
            .map(|channel| self.characteristic(channel))
            .collect();
        let app = Application {
            services: vec![Service {
                uuid: self.service_uuid,
                primary: true,
                characteristics,
                ..Default::default()
            }],
            ..Default::default()
        };

        self.app_handle = Some(adapter.serve_gatt_application(app).await?);

        let watched = adapter.clone();
        let peers = self.peers.clone();
        self.watch_handle = Some(tokio::spawn(async move {
            if let Err(e) = watch_peers(watched, peers).await {
                warn!("Stopped tracking central connections: {}", e);
            }
        }));
        self.adapter = Some(adapter);
        info!(
            "GATT service {} registered with {} characteristics",
            self.service_uuid,
            self.channels.len()
        );
        Ok(())
    }

    async fn start_advertising(&mut self) -> Result<()> {
        let adapter = self.adapter.as_ref().ok_or(Error::Transport {
            reason: "service not started".to_string(),
        })?;

        let advertisement = Advertisement {
            service_uuids: [self.service_uuid].into_iter().collect(),
            discoverable: Some(true),
            local_name: Some(self.device_name.clone()),
            ..Default::default()
        };
        self.adv_handle = Some(adapter.advertise(advertisement).await?);
        info!("Advertising as {}", self.device_name);
        Ok(())
    }

    fn is_device_connected(&self) -> bool {
        if self.peers.any() {
            return true;
        }
        self.channels.iter().any(|channel| {
            let mut notifiers = channel.notifiers.lock();
            notifiers.retain(|n| !n.is_stopped());
            !notifiers.is_empty()
        })
    }

    fn set_value(&mut self, channel: ChannelId, value: &[u8]) -> Result<()> {
        let entry = self
            .channels
            .get(channel.0)
            .ok_or(Error::UnknownChannel(channel.0))?;
        let mut held = entry.value.lock();
        held.clear();
        held.extend_from_slice(value);
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

        let value = entry.value.lock().clone();
        // Sessions are taken out so no lock is held across the sends.
        let sessions = std::mem::take(&mut *entry.notifiers.lock());
        let mut alive = Vec::with_capacity(sessions.len());

        for mut notifier in sessions {
            match notifier.notify(value.clone()).await {
                Ok(()) => alive.push(notifier),
                Err(e) => debug!("Notification session on {} ended: {}", entry.uuid, e),
            }
        }

        trace!(
            "Notified {} bytes on {} to {} sessions",
            value.len(),
            entry.uuid,
            alive.len()
        );
        entry.notifiers.lock().extend(alive);
        Ok(())
    }
}

impl Drop for BluezTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.watch_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::*;

    #[test]
    fn test_channels_declared_offline() {
        let mut transport = BluezTransport::new(DEVICE_NAME, DISENSE_SERVICE_UUID);
        let a = transport
            .create_notify_channel(THERMISTOR_CHARACTERISTIC_UUID)
            .unwrap();
        let b = transport
            .create_write_channel(ACKNOWLEDGMENT_CHARACTERISTIC_UUID)
            .unwrap();
        assert_eq!(a, ChannelId(0));
        assert_eq!(b, ChannelId(1));
        assert!(transport
            .create_notify_channel(THERMISTOR_CHARACTERISTIC_UUID)
            .is_err());

        transport.set_value(a, &[1, 2, 3, 4, 5]).unwrap();
        assert!(!transport.is_device_connected());
    }

    #[test]
    fn test_connected_peers_follow_device_events() {
        let peers = ConnectedPeers::default();
        let phone = Address::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        let laptop = Address::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert!(!peers.any());

        peers.apply(
            phone,
            &DeviceEvent::PropertyChanged(DeviceProperty::Connected(true)),
        );
        peers.apply(laptop, &DeviceEvent::PropertyChanged(DeviceProperty::Rssi(-60)));
        assert!(peers.any());

        peers.update(laptop, true);
        peers.apply(
            phone,
            &DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)),
        );
        assert!(peers.any());

        peers.update(laptop, false);
        assert!(!peers.any());
    }

    #[test]
    fn test_connected_central_counts_without_subscription() {
        let mut transport = BluezTransport::new(DEVICE_NAME, DISENSE_SERVICE_UUID);
        transport
            .create_notify_channel(FORCE_CHARACTERISTIC_UUID)
            .unwrap();
        assert!(!transport.is_device_connected());

        transport.peers.update(Address::new([1, 2, 3, 4, 5, 6]), true);
        assert!(transport.is_device_connected());
    }
}
