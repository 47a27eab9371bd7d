//! BLE plumbing for both ends of the link.
//!
//! The device side talks to a [`WirelessTransport`]: the in-memory
//! [`LoopbackTransport`] for tests and bench runs, or the BlueZ GATT server
//! behind the `bluez` feature. The companion side scans for, connects to and
//! subscribes on a Disense device through btleplug.

#[cfg(feature = "bluez")]
pub mod bluez;
pub mod characteristics;
pub mod connection;
pub mod loopback;
pub mod scanner;
pub mod transport;
pub mod uuids;

#[cfg(feature = "bluez")]
pub use bluez::{BluezTransport, PeerWrite};
pub use characteristics::{SnapshotEvent, SnapshotSubscriber};
pub use connection::{ConnectionState, DeviceLink, LinkTarget};
pub use loopback::{LoopbackHandle, LoopbackTransport, Notification};
pub use scanner::{DeviceDiscoveryEvent, DeviceScanner};
pub use transport::{ChannelId, ChannelKind, WirelessTransport};
pub use uuids::*;
