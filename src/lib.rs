// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # disense-ble
//!
//! Firmware core and companion library for the Disense wearable sensor
//! board: four thermistors, four force-sensitive resistors and a pulse
//! oximeter, streamed over Bluetooth Low Energy.
//!
//! ## Device side
//!
//! [`Firmware`] samples every sensor into fixed-width records (one id byte
//! followed by a little-endian `f32`), packs them into one snapshot per
//! sensor class, and notifies the three snapshots every five seconds while a
//! peer is connected. Without a peer the status LED blinks.
//!
//! ```rust,no_run
//! use disense_ble::{DeviceConfig, Firmware, LoopbackTransport, SimulatedBoard, TokioClock};
//!
//! #[tokio::main]
//! async fn main() -> disense_ble::Result<()> {
//!     let (transport, peer) = LoopbackTransport::new();
//!     let mut board = SimulatedBoard::new().with_force_pins(&[13, 12, 14, 27]);
//!     let mut firmware =
//!         Firmware::setup(DeviceConfig::default(), &mut board, transport, TokioClock::new())
//!             .await?;
//!
//!     peer.set_connected(true);
//!     loop {
//!         firmware.tick().await?;
//!     }
//! }
//! ```
//!
//! ## Companion side
//!
//! [`DisenseMonitor`] scans for a device, subscribes to its snapshot
//! characteristics and decodes every notification into a [`SnapshotEvent`].
//!
//! ## Platform Notes
//!
//! ### Linux
//! Requires BlueZ. The device side needs the `bluez` feature and a
//! `bluetoothd` recent enough to host GATT applications.
//!
//! ### macOS / Windows
//! Only the companion side is available.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types
//! - `bluez`: GATT server transport on Linux

pub mod ble;
pub mod data;
pub mod device;
pub mod error;
pub mod monitor;
pub mod sensors;
pub mod sim;
pub mod utils;

pub use error::{Error, Result};
pub use utils::{celsius_to_fahrenheit, hex_dump};

pub use ble::{
    ConnectionState, LoopbackHandle, LoopbackTransport, SnapshotEvent, WirelessTransport,
};
#[cfg(feature = "bluez")]
pub use ble::BluezTransport;
pub use data::{
    decode_snapshot, BioReading, FingerStatus, SensorClass, SensorRecord, SensorSnapshot,
    RECORD_LEN,
};
pub use device::{
    Clock, DeviceConfig, Firmware, ManualClock, OxygenSampling, SensorSlot, TokioClock,
};
pub use monitor::{DisenseMonitor, MonitorConfig};
pub use sim::SimulatedBoard;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<SensorRecord>();
        let _ = std::any::TypeId::of::<SensorSnapshot>();
        let _ = std::any::TypeId::of::<DeviceConfig>();
        let _ = std::any::TypeId::of::<Firmware<LoopbackTransport, ManualClock>>();
        let _ = std::any::TypeId::of::<DisenseMonitor>();
        let _ = std::any::TypeId::of::<SnapshotEvent>();
    }

    #[test]
    fn test_record_len() {
        assert_eq!(RECORD_LEN, 5);
    }
}
