//! Fixed-width sensor records.
//!
//! Every reading travels as a 5-byte record: one identifier byte followed by
//! the four raw bytes of an IEEE-754 single-precision float. The receiving
//! application walks a notification at a stride of [`RECORD_LEN`] with no
//! length prefix or delimiter, so the layout must never change.
//!
//! The float is written little-endian, which is the native order of the
//! ESP32 the companion application decodes against.

use crate::data::bio::BioReading;
use crate::error::{Error, Result};

/// Size of one encoded record in bytes.
pub const RECORD_LEN: usize = 5;

/// One decoded (identifier, value) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorRecord {
    /// Identifier of the sensor within its class.
    pub id: u8,
    /// The reading.
    pub value: f32,
}

impl SensorRecord {
    /// Create a new record.
    pub fn new(id: u8, value: f32) -> Self {
        Self { id, value }
    }

    /// Encode this record into its 5-byte wire form.
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        out[0] = self.id;
        out[1..].copy_from_slice(&self.value.to_le_bytes());
        out
    }

    /// Decode a record from exactly [`RECORD_LEN`] bytes.
    pub fn from_bytes(bytes: [u8; RECORD_LEN]) -> Self {
        Self {
            id: bytes[0],
            value: f32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
        }
    }

    /// Compare two records bit-for-bit, so that NaN sentinels match themselves.
    pub fn bit_eq(&self, other: &Self) -> bool {
        self.id == other.id && self.value.to_bits() == other.value.to_bits()
    }
}

impl std::fmt::Display for SensorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}={}", self.id, self.value)
    }
}

/// Write one scalar reading as a record at the start of `out`.
///
/// The caller does the offset bookkeeping by passing the sub-slice that starts
/// at the record's position, e.g. `&mut buf[slot * RECORD_LEN..]`.
///
/// # Errors
///
/// Returns [`Error::BufferTooSmall`] if fewer than [`RECORD_LEN`] bytes remain.
///
/// # Example
///
/// ```
/// use disense_ble::data::{encode_scalar_record, RECORD_LEN};
///
/// let mut buf = [0u8; RECORD_LEN * 2];
/// encode_scalar_record(1.0, 7, &mut buf[RECORD_LEN..]).unwrap();
/// assert_eq!(buf[5], 7);
/// assert_eq!(&buf[6..], &1.0f32.to_le_bytes());
/// ```
pub fn encode_scalar_record(value: f32, id: u8, out: &mut [u8]) -> Result<()> {
    let available = out.len();
    let slot = out.get_mut(..RECORD_LEN).ok_or(Error::BufferTooSmall {
        needed: RECORD_LEN,
        available,
    })?;
    slot.copy_from_slice(&SensorRecord::new(id, value).to_bytes());
    Ok(())
}

/// Write a pulse-oximetry reading as a record at the start of `out`.
///
/// Only the oxygen saturation is carried; heart rate, confidence and status
/// stay on the device.
pub fn encode_composite_record(id: u8, reading: &BioReading, out: &mut [u8]) -> Result<()> {
    encode_scalar_record(reading.oxygen_saturation(), id, out)
}
