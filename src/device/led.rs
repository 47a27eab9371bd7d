//! Status LED.

use crate::sensors::hal::DigitalOutput;

/// On/off indicator over a digital output. Timing belongs to the caller.
pub struct StatusIndicator {
    output: Box<dyn DigitalOutput>,
    on: bool,
}

impl StatusIndicator {
    /// Wrap an output pin. The LED starts off.
    pub fn new(mut output: Box<dyn DigitalOutput>) -> Self {
        output.set_low();
        Self { output, on: false }
    }

    /// Light the LED.
    pub fn turn_on(&mut self) {
        self.output.set_high();
        self.on = true;
    }

    /// Switch the LED off.
    pub fn turn_off(&mut self) {
        self.output.set_low();
        self.on = false;
    }

    /// Whether the LED is lit.
    pub fn is_on(&self) -> bool {
        self.on
    }
}
