//! Simulated board for bench runs without hardware.
//!
//! Analog pins produce slow deterministic waveforms around plausible
//! operating points (skin temperature for thermistors, intermittent loading
//! for force sensors) and the biometric hub reports a finger with a drifting
//! oxygen saturation.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::data::{BioReading, FingerStatus};
use crate::error::{Error, Result};
use crate::sensors::hal::{AnalogPin, BioHub, Board, DigitalOutput};

/// ADC count of a 10k NTC at roughly 33C in the default divider.
const SKIN_TEMPERATURE_COUNT: f32 = 1696.0;

/// How a simulated pin behaves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    /// A sine around `center` with `amplitude` counts, advancing `step`
    /// radians per read.
    Sine {
        /// Midpoint in counts.
        center: f32,
        /// Peak deviation in counts.
        amplitude: f32,
        /// Phase advance per read.
        step: f32,
    },
    /// A constant count.
    Constant(u16),
}

impl Waveform {
    fn sample(&self, n: u64, phase: f32) -> u16 {
        match *self {
            Self::Sine {
                center,
                amplitude,
                step,
            } => {
                let value = center + amplitude * (phase + step * n as f32).sin();
                value.clamp(0.0, 4095.0) as u16
            }
            Self::Constant(raw) => raw,
        }
    }
}

struct SimAnalogPin {
    pin: u8,
    waveform: Waveform,
    reads: u64,
}

impl AnalogPin for SimAnalogPin {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn read_raw(&mut self) -> u16 {
        let raw = self.waveform.sample(self.reads, f32::from(self.pin) * 0.37);
        self.reads += 1;
        raw
    }
}

struct SimOutput {
    level: Arc<AtomicBool>,
}

impl DigitalOutput for SimOutput {
    fn set_high(&mut self) {
        self.level.store(true, Ordering::SeqCst);
    }

    fn set_low(&mut self) {
        self.level.store(false, Ordering::SeqCst);
    }
}

struct SimBioHub {
    started: bool,
    configured: bool,
    reads: u64,
    fail_begin: bool,
}

impl BioHub for SimBioHub {
    fn begin(&mut self) -> Result<()> {
        if self.fail_begin {
            return Err(Error::Hardware {
                reason: "bio hub did not enter application mode".to_string(),
            });
        }
        self.started = true;
        Ok(())
    }

    fn configure_bpm(&mut self) -> Result<()> {
        if !self.started {
            return Err(Error::Hardware {
                reason: "bio hub not started".to_string(),
            });
        }
        self.configured = true;
        Ok(())
    }

    fn read_bpm(&mut self) -> Result<BioReading> {
        if !self.configured {
            return Err(Error::Hardware {
                reason: "bio hub not in BPM mode".to_string(),
            });
        }
        self.reads += 1;
        let n = self.reads;
        Ok(BioReading {
            heart_rate: 64 + (n % 12) as u16,
            confidence: 95,
            oxygen: 95 + (n / 10 % 5) as u16,
            // The hub loses contact for one sample in fifty.
            status: FingerStatus::from_raw(if n % 50 == 0 { 1 } else { 3 }),
        })
    }
}

/// A [`Board`] backed by simulated peripherals.
#[derive(Default)]
pub struct SimulatedBoard {
    claimed: HashSet<u8>,
    waveforms: HashMap<u8, Waveform>,
    outputs: Arc<Mutex<HashMap<u8, Arc<AtomicBool>>>>,
    fail_bio_hub: bool,
}

impl SimulatedBoard {
    /// A board where every pin looks like a thermistor on warm skin.
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `pin` a specific waveform.
    pub fn with_waveform(mut self, pin: u8, waveform: Waveform) -> Self {
        self.waveforms.insert(pin, waveform);
        self
    }

    /// Simulate force sensors on `pins`: mostly unloaded, pressed periodically.
    pub fn with_force_pins(mut self, pins: &[u8]) -> Self {
        for pin in pins {
            self.waveforms.insert(
                *pin,
                Waveform::Sine {
                    center: 600.0,
                    amplitude: 1400.0,
                    step: 0.15,
                },
            );
        }
        self
    }

    /// Make the biometric hub refuse to start.
    pub fn with_failing_bio_hub(mut self) -> Self {
        self.fail_bio_hub = true;
        self
    }

    /// Current level of an output pin, if it was claimed.
    pub fn output_level(&self, pin: u8) -> Option<bool> {
        self.outputs
            .lock()
            .get(&pin)
            .map(|level| level.load(Ordering::SeqCst))
    }

    /// A cloneable view of output levels, usable after the board is lent out.
    pub fn output_tap(&self) -> OutputTap {
        OutputTap {
            outputs: self.outputs.clone(),
        }
    }

    fn claim(&mut self, pin: u8) -> Result<()> {
        if !self.claimed.insert(pin) {
            return Err(Error::Hardware {
                reason: format!("GPIO {} already claimed", pin),
            });
        }
        Ok(())
    }
}

/// Reads simulated output levels.
#[derive(Clone)]
pub struct OutputTap {
    outputs: Arc<Mutex<HashMap<u8, Arc<AtomicBool>>>>,
}

impl OutputTap {
    /// Current level of an output pin, if it was claimed.
    pub fn level(&self, pin: u8) -> Option<bool> {
        self.outputs
            .lock()
            .get(&pin)
            .map(|level| level.load(Ordering::SeqCst))
    }
}

impl Board for SimulatedBoard {
    fn analog_pin(&mut self, pin: u8) -> Result<Box<dyn AnalogPin>> {
        self.claim(pin)?;
        let waveform = self
            .waveforms
            .get(&pin)
            .copied()
            .unwrap_or(Waveform::Sine {
                center: SKIN_TEMPERATURE_COUNT,
                amplitude: 40.0,
                step: 0.05,
            });
        debug!("Simulated ADC on GPIO {}: {:?}", pin, waveform);
        Ok(Box::new(SimAnalogPin {
            pin,
            waveform,
            reads: 0,
        }))
    }

    fn digital_output(&mut self, pin: u8) -> Result<Box<dyn DigitalOutput>> {
        self.claim(pin)?;
        let level = Arc::new(AtomicBool::new(false));
        self.outputs.lock().insert(pin, level.clone());
        Ok(Box::new(SimOutput { level }))
    }

    fn bio_hub(&mut self, address: u8, reset_pin: u8, mfio_pin: u8) -> Result<Box<dyn BioHub>> {
        self.claim(reset_pin)?;
        self.claim(mfio_pin)?;
        debug!(
            "Simulated bio hub at {:#04x} (reset {}, mfio {})",
            address, reset_pin, mfio_pin
        );
        Ok(Box::new(SimBioHub {
            started: false,
            configured: false,
            reads: 0,
            fail_begin: self.fail_bio_hub,
        }))
    }
}
