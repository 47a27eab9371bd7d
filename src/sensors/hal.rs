//! Hardware abstraction seams.
//!
//! Sensor drivers only see these traits, so the same drivers run on the
//! target board, against the simulator in [`crate::sim`], or against mocks.

use crate::data::BioReading;
use crate::error::Result;

/// One ADC-capable input pin.
#[cfg_attr(test, mockall::automock)]
pub trait AnalogPin: Send {
    /// GPIO number, for logging.
    fn pin(&self) -> u8;

    /// Sample the pin and return the raw ADC count.
    fn read_raw(&mut self) -> u16;
}

/// One push-pull output pin.
#[cfg_attr(test, mockall::automock)]
pub trait DigitalOutput: Send {
    /// Drive the pin high.
    fn set_high(&mut self);

    /// Drive the pin low.
    fn set_low(&mut self);
}

/// A biometric sensor hub running the pulse-oximetry algorithm on-chip.
#[cfg_attr(test, mockall::automock)]
pub trait BioHub: Send {
    /// Reset the hub into application mode.
    fn begin(&mut self) -> Result<()>;

    /// Put the hub into heart rate / SpO2 reporting mode.
    fn configure_bpm(&mut self) -> Result<()>;

    /// Read the latest algorithm output.
    fn read_bpm(&mut self) -> Result<BioReading>;
}

/// The board: hands out exclusively owned pin and bus handles.
///
/// Each handle is requested once, at startup, for the slot that owns it.
pub trait Board: Send {
    /// Claim an analog input.
    fn analog_pin(&mut self, pin: u8) -> Result<Box<dyn AnalogPin>>;

    /// Claim a digital output.
    fn digital_output(&mut self, pin: u8) -> Result<Box<dyn DigitalOutput>>;

    /// Claim the biometric hub at `address` with its reset and MFIO lines.
    fn bio_hub(&mut self, address: u8, reset_pin: u8, mfio_pin: u8) -> Result<Box<dyn BioHub>>;
}
