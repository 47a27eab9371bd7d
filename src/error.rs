//! Error types for the disense-ble crate.

use thiserror::Error;

use crate::data::SensorClass;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the central-side BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Error from the BlueZ peripheral stack.
    #[cfg(feature = "bluez")]
    #[error("BlueZ error: {0}")]
    BlueZ(#[from] bluer::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// No Disense device was found while scanning.
    #[error("Device not found: {identifier}")]
    DeviceNotFound {
        /// The identifier or name that was searched for.
        identifier: String,
    },

    /// Operation requires a connection but the device is not connected.
    #[error("Device not connected")]
    NotConnected,

    /// Failed to establish a connection to the device.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// Invalid data was received or decoded.
    #[error("Invalid data: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// A destination buffer cannot hold the record being written.
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes required.
        needed: usize,
        /// Bytes available at the given offset.
        available: usize,
    },

    /// The device configuration is not usable.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// Two slots of the same sensor class share an identifier.
    #[error("Duplicate sensor id {id} in {class} slots")]
    DuplicateSensorId {
        /// The class with the collision.
        class: SensorClass,
        /// The repeated identifier.
        id: u8,
    },

    /// A channel handle does not belong to the transport it was used with.
    #[error("Unknown channel: {0}")]
    UnknownChannel(usize),

    /// The wireless transport rejected an operation.
    #[error("Transport error: {reason}")]
    Transport {
        /// Description of the failure.
        reason: String,
    },

    /// Hardware bring-up or bus access failed.
    #[error("Hardware error: {reason}")]
    Hardware {
        /// Description of the failure.
        reason: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
