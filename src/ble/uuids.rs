//! BLE Service and Characteristic UUIDs.
//!
//! Contains the UUIDs the device serves and the companion application
//! subscribes to. Both ends are built against these values.

use uuid::Uuid;

use crate::data::SensorClass;

/// Name the device advertises.
pub const DEVICE_NAME: &str = "Disense-1";

/// Prefix shared by every Disense device name.
pub const DEVICE_NAME_PREFIX: &str = "Disense";

/// Disense sensor service UUID.
pub const DISENSE_SERVICE_UUID: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);

/// Thermistor snapshot characteristic UUID (Notify).
pub const THERMISTOR_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8);

/// Force sensor snapshot characteristic UUID (Notify).
pub const FORCE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xf00a075c_948e_4f01_9cb6_7d876cf96683);

/// Blood oxygen snapshot characteristic UUID (Notify).
pub const SPO2_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x9f7d8c4f_b3d4_4d72_8787_8386e5f13195);

/// Acknowledgment characteristic UUID (Write).
pub const ACKNOWLEDGMENT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x1b384bed_4282_41e1_8ef9_466bc94fa5ed);

/// The notify characteristic carrying snapshots of `class`.
pub fn characteristic_for_class(class: SensorClass) -> Uuid {
    match class {
        SensorClass::Thermistor => THERMISTOR_CHARACTERISTIC_UUID,
        SensorClass::Force => FORCE_CHARACTERISTIC_UUID,
        SensorClass::Oxygen => SPO2_CHARACTERISTIC_UUID,
    }
}

/// The sensor class whose snapshots `uuid` carries, if any.
pub fn class_for_characteristic(uuid: &Uuid) -> Option<SensorClass> {
    SensorClass::ALL
        .into_iter()
        .find(|class| characteristic_for_class(*class) == *uuid)
}

/// Check if an advertised local name belongs to a Disense device.
pub fn is_disense_name(name: &str) -> bool {
    name.starts_with(DEVICE_NAME_PREFIX)
}
