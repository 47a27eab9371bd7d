//! Device configuration.
//!
//! The hardware table is fixed at build time and agreed with the companion
//! application: which pin each sensor is on, which identifier it reports and
//! which channel its class travels on. [`DeviceConfig::default`] reproduces
//! the shipped board; [`DeviceConfig::validate`] runs once at startup.

use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

use crate::ble::uuids::*;
use crate::error::{Error, Result};
use crate::sensors::{ForceParams, ThermistorParams, BIO_HUB_ADDRESS};

pub use crate::data::SensorClass;

/// Longest local name that still fits a legacy advertising packet.
pub const MAX_DEVICE_NAME_LEN: usize = 29;

/// How a slot is wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SensorBinding {
    /// A sensor read through one ADC pin.
    Analog {
        /// GPIO number.
        pin: u8,
    },
    /// A sensor behind the I2C biometric hub.
    BioHub {
        /// I2C address.
        address: u8,
        /// Reset line GPIO.
        reset_pin: u8,
        /// MFIO line GPIO.
        mfio_pin: u8,
    },
}

/// One logical sensor: where it is wired and what it reports as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorSlot {
    /// Class the sensor belongs to.
    pub class: SensorClass,
    /// Physical wiring.
    pub binding: SensorBinding,
    /// Identifier carried in every record from this sensor.
    pub id: u8,
}

impl SensorSlot {
    /// A thermistor on an ADC pin.
    pub const fn thermistor(pin: u8, id: u8) -> Self {
        Self {
            class: SensorClass::Thermistor,
            binding: SensorBinding::Analog { pin },
            id,
        }
    }

    /// A force sensor on an ADC pin.
    pub const fn force(pin: u8, id: u8) -> Self {
        Self {
            class: SensorClass::Force,
            binding: SensorBinding::Analog { pin },
            id,
        }
    }

    /// A pulse oximeter on the biometric hub.
    pub const fn oxygen(reset_pin: u8, mfio_pin: u8, id: u8) -> Self {
        Self {
            class: SensorClass::Oxygen,
            binding: SensorBinding::BioHub {
                address: BIO_HUB_ADDRESS,
                reset_pin,
                mfio_pin,
            },
            id,
        }
    }
}

/// The shipped sensor table, in transmission order.
pub const DEFAULT_SLOTS: [SensorSlot; 9] = [
    SensorSlot::thermistor(25, 1),
    SensorSlot::thermistor(33, 2),
    SensorSlot::thermistor(32, 3),
    SensorSlot::thermistor(34, 4),
    SensorSlot::force(13, 1),
    SensorSlot::force(12, 2),
    SensorSlot::force(14, 3),
    SensorSlot::force(27, 4),
    SensorSlot::oxygen(4, 5, 1),
];

/// When the pulse oximeter is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OxygenSampling {
    /// Every tick, connected or not. Keeps the hub's algorithm warm while
    /// the device waits for a peer.
    #[default]
    Always,
    /// Only while a peer is connected, like the other sensors.
    WhenConnected,
}

/// The disconnected-state LED pattern, run once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlinkPattern {
    /// Time the LED stays off.
    pub off: Duration,
    /// Time the LED stays on.
    pub on: Duration,
}

impl Default for BlinkPattern {
    fn default() -> Self {
        Self {
            off: Duration::from_millis(500),
            on: Duration::from_millis(300),
        }
    }
}

/// UUIDs of the service and its channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelUuids {
    /// Primary service.
    pub service: Uuid,
    /// Thermistor snapshots.
    pub thermistor: Uuid,
    /// Force snapshots.
    pub force: Uuid,
    /// Oxygen snapshots.
    pub oxygen: Uuid,
    /// Acknowledgment writes from the peer.
    pub acknowledgment: Uuid,
}

impl ChannelUuids {
    /// The notify channel for `class`.
    pub fn for_class(&self, class: SensorClass) -> Uuid {
        match class {
            SensorClass::Thermistor => self.thermistor,
            SensorClass::Force => self.force,
            SensorClass::Oxygen => self.oxygen,
        }
    }

    fn all(&self) -> [Uuid; 5] {
        [
            self.service,
            self.thermistor,
            self.force,
            self.oxygen,
            self.acknowledgment,
        ]
    }
}

impl Default for ChannelUuids {
    fn default() -> Self {
        Self {
            service: DISENSE_SERVICE_UUID,
            thermistor: THERMISTOR_CHARACTERISTIC_UUID,
            force: FORCE_CHARACTERISTIC_UUID,
            oxygen: SPO2_CHARACTERISTIC_UUID,
            acknowledgment: ACKNOWLEDGMENT_CHARACTERISTIC_UUID,
        }
    }
}

/// Everything the firmware needs to know at startup.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceConfig {
    /// Advertised local name.
    pub device_name: String,
    /// Minimum time between two snapshot pushes.
    pub transmission_interval: Duration,
    /// Reserved housekeeping period.
    ///
    /// Declared for future periodic work and exposed to callers, but it does
    /// not influence sampling or transmission.
    pub housekeeping_interval: Duration,
    /// Pause at the end of every connected tick.
    pub post_transmission_pause: Duration,
    /// LED pattern while no peer is connected.
    pub blink: BlinkPattern,
    /// Status LED GPIO.
    pub led_pin: u8,
    /// When the pulse oximeter is sampled.
    pub oxygen_sampling: OxygenSampling,
    /// Sensor table in transmission order.
    pub slots: Vec<SensorSlot>,
    /// Service and channel UUIDs.
    pub uuids: ChannelUuids,
    /// Divider parameters shared by all thermistors.
    pub thermistor_params: ThermistorParams,
    /// Divider parameters shared by all force sensors.
    pub force_params: ForceParams,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_name: DEVICE_NAME.to_string(),
            transmission_interval: Duration::from_millis(5000),
            housekeeping_interval: Duration::from_millis(2000),
            post_transmission_pause: Duration::from_millis(200),
            blink: BlinkPattern::default(),
            led_pin: 2,
            oxygen_sampling: OxygenSampling::default(),
            slots: DEFAULT_SLOTS.to_vec(),
            uuids: ChannelUuids::default(),
            thermistor_params: ThermistorParams::default(),
            force_params: ForceParams::default(),
        }
    }
}

impl DeviceConfig {
    /// Set the advertised name.
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Set the transmission interval.
    pub fn with_transmission_interval(mut self, interval: Duration) -> Self {
        self.transmission_interval = interval;
        self
    }

    /// Set the oxygen sampling policy.
    pub fn with_oxygen_sampling(mut self, sampling: OxygenSampling) -> Self {
        self.oxygen_sampling = sampling;
        self
    }

    /// Replace the sensor table.
    pub fn with_slots(mut self, slots: Vec<SensorSlot>) -> Self {
        self.slots = slots;
        self
    }

    /// Slots of `class`, in transmission order.
    pub fn slots_for(&self, class: SensorClass) -> impl Iterator<Item = &SensorSlot> {
        self.slots.iter().filter(move |slot| slot.class == class)
    }

    /// Number of slots of `class`.
    pub fn count(&self, class: SensorClass) -> usize {
        self.slots_for(class).count()
    }

    /// Check the configuration before any hardware is touched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateSensorId`] if two slots of one class share an
    /// identifier, and [`Error::InvalidConfig`] for an unusable name, a zero
    /// interval, a class with no slots, a binding that does not suit its
    /// class, a GPIO claimed twice, or repeated UUIDs.
    pub fn validate(&self) -> Result<()> {
        if self.device_name.is_empty() || self.device_name.len() > MAX_DEVICE_NAME_LEN {
            return Err(invalid(format!(
                "device name must be 1..={} bytes, got {}",
                MAX_DEVICE_NAME_LEN,
                self.device_name.len()
            )));
        }

        if self.transmission_interval.is_zero() {
            return Err(invalid("transmission interval must be non-zero"));
        }

        for class in SensorClass::ALL {
            if self.count(class) == 0 {
                return Err(invalid(format!("no {} slots configured", class)));
            }
            validate_unique_ids(class, self.slots_for(class).map(|slot| slot.id))?;
        }

        let mut pins = HashSet::from([self.led_pin]);
        for slot in &self.slots {
            let claimed = match (slot.class, slot.binding) {
                (SensorClass::Thermistor | SensorClass::Force, SensorBinding::Analog { pin }) => {
                    vec![pin]
                }
                (
                    SensorClass::Oxygen,
                    SensorBinding::BioHub {
                        reset_pin,
                        mfio_pin,
                        ..
                    },
                ) => vec![reset_pin, mfio_pin],
                (class, binding) => {
                    return Err(invalid(format!(
                        "{} slot {} cannot use binding {:?}",
                        class, slot.id, binding
                    )))
                }
            };
            for pin in claimed {
                if !pins.insert(pin) {
                    return Err(invalid(format!("GPIO {} is claimed twice", pin)));
                }
            }
        }

        let uuids = self.uuids.all();
        let distinct: HashSet<_> = uuids.iter().collect();
        if distinct.len() != uuids.len() {
            return Err(invalid("service and channel UUIDs must be distinct"));
        }

        Ok(())
    }
}

/// Reject repeated identifiers within one class.
pub fn validate_unique_ids(class: SensorClass, ids: impl IntoIterator<Item = u8>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(Error::DuplicateSensorId { class, id });
        }
    }
    Ok(())
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidConfig {
        reason: reason.into(),
    }
}
