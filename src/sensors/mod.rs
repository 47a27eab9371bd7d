//! Sensor readers.
//!
//! Every sensor exposes a fixed identifier and a read that never fails: a
//! faulty sensor yields a sentinel or its previous value. Reads may touch the
//! bus on every call; nothing is cached beyond that fallback.

pub mod force;
pub mod hal;
pub mod oximeter;
pub mod thermistor;

pub use force::{ForceParams, ForceSensor};
pub use hal::{AnalogPin, BioHub, Board, DigitalOutput};
pub use oximeter::{PulseOximeter, BIO_HUB_ADDRESS};
pub use thermistor::{Thermistor, ThermistorParams};

use crate::data::BioReading;

/// A sensor producing one float per read.
#[cfg_attr(test, mockall::automock)]
pub trait ScalarSensor: Send {
    /// Identifier assigned at construction.
    fn id(&self) -> u8;

    /// Take a fresh reading.
    fn read_value(&mut self) -> f32;
}

/// A sensor producing a composite pulse-oximetry sample per read.
#[cfg_attr(test, mockall::automock)]
pub trait CompositeSensor: Send {
    /// Identifier assigned at construction.
    fn id(&self) -> u8;

    /// Take a fresh reading.
    fn read_reading(&mut self) -> BioReading;
}
