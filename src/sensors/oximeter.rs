//! Pulse oximeter on the biometric sensor hub.

use tracing::{debug, info, warn};

use crate::data::BioReading;
use crate::error::Result;
use crate::sensors::hal::BioHub;
use crate::sensors::CompositeSensor;

/// Default I2C address of the biometric sensor hub.
pub const BIO_HUB_ADDRESS: u8 = 0x55;

/// A pulse oximeter behind a [`BioHub`].
pub struct PulseOximeter {
    hub: Box<dyn BioHub>,
    id: u8,
    last: BioReading,
}

impl PulseOximeter {
    /// Wrap a hub handle. Call [`init`](Self::init) before reading.
    pub fn new(hub: Box<dyn BioHub>, id: u8) -> Self {
        Self {
            hub,
            id,
            last: BioReading::default(),
        }
    }

    /// Bring the hub up and switch it to BPM mode.
    pub fn init(&mut self) -> Result<()> {
        self.hub.begin()?;
        self.hub.configure_bpm()?;
        info!("Pulse oximeter {} initialised", self.id);
        Ok(())
    }

    /// Read the hub, falling back to the previous sample on a bus error.
    pub fn read_sensor(&mut self) -> BioReading {
        match self.hub.read_bpm() {
            Ok(reading) => {
                debug!(
                    "SpO2 {}: hr={} conf={} o2={} status={:?}",
                    self.id, reading.heart_rate, reading.confidence, reading.oxygen, reading.status
                );
                self.last = reading;
                reading
            }
            Err(e) => {
                warn!("SpO2 {} read failed, reusing last sample: {}", self.id, e);
                self.last
            }
        }
    }

    /// The last good sample.
    pub fn last_reading(&self) -> BioReading {
        self.last
    }
}

impl CompositeSensor for PulseOximeter {
    fn id(&self) -> u8 {
        self.id
    }

    fn read_reading(&mut self) -> BioReading {
        self.read_sensor()
    }
}
