//! Pulse-oximetry readings.
//!
//! The biometric sensor hub reports a composite sample per read. Only the
//! oxygen saturation leaves the device; the rest is kept for logging.

/// Finger detection status reported by the sensor hub algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FingerStatus {
    /// Nothing on the sensor.
    #[default]
    NoObject,
    /// Something is on the sensor but it is not yet recognised.
    ObjectDetected,
    /// Something other than a finger is on the sensor.
    NotFinger,
    /// A finger is on the sensor and readings are meaningful.
    FingerDetected,
}

impl FingerStatus {
    /// Map the hub's raw status byte.
    pub fn from_raw(value: u8) -> Self {
        match value {
            1 => Self::ObjectDetected,
            2 => Self::NotFinger,
            3 => Self::FingerDetected,
            _ => Self::NoObject,
        }
    }
}

/// One composite sample from the pulse oximeter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BioReading {
    /// Heart rate in beats per minute.
    pub heart_rate: u16,
    /// Algorithm confidence in percent.
    pub confidence: u8,
    /// Blood oxygen saturation in percent.
    pub oxygen: u16,
    /// Finger detection status.
    pub status: FingerStatus,
}

impl BioReading {
    /// The scalar carried in the oxygen record.
    pub fn oxygen_saturation(&self) -> f32 {
        f32::from(self.oxygen)
    }

    /// Whether a finger is on the sensor.
    pub fn has_finger(&self) -> bool {
        self.status == FingerStatus::FingerDetected
    }
}
