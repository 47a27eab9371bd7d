//! Per-class snapshot buffers.
//!
//! A snapshot is the concatenation of one record per sensor of a class, in
//! slot order. The buffer is allocated once at startup and overwritten in
//! place on every sample.

use bytes::Buf;

use crate::data::bio::BioReading;
use crate::data::record::{encode_composite_record, encode_scalar_record, SensorRecord, RECORD_LEN};
use crate::error::{Error, Result};

/// The sensor classes, one notify channel each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SensorClass {
    /// Skin temperature thermistors.
    Thermistor,
    /// Force-sensitive resistors.
    Force,
    /// Pulse-oximetry (blood oxygen saturation).
    Oxygen,
}

impl SensorClass {
    /// All classes in transmission order.
    pub const ALL: [SensorClass; 3] = [Self::Thermistor, Self::Force, Self::Oxygen];
}

impl std::fmt::Display for SensorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Thermistor => write!(f, "thermistor"),
            Self::Force => write!(f, "force"),
            Self::Oxygen => write!(f, "oxygen"),
        }
    }
}

/// The encoded records of one sensor class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorSnapshot {
    class: SensorClass,
    buf: Vec<u8>,
}

impl SensorSnapshot {
    /// Allocate a zeroed snapshot for `count` sensors.
    pub fn new(class: SensorClass, count: usize) -> Self {
        Self {
            class,
            buf: vec![0; count * RECORD_LEN],
        }
    }

    /// Build a snapshot from records, keeping their order.
    pub fn from_records(class: SensorClass, records: &[SensorRecord]) -> Self {
        let buf = records.iter().flat_map(|r| r.to_bytes()).collect();
        Self { class, buf }
    }

    /// The class this snapshot belongs to.
    pub fn class(&self) -> SensorClass {
        self.class
    }

    /// Number of record slots.
    pub fn record_count(&self) -> usize {
        self.buf.len() / RECORD_LEN
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the snapshot has no slots.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The payload handed to the transport.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Overwrite slot `slot` with a scalar reading.
    pub fn write_scalar(&mut self, slot: usize, id: u8, value: f32) -> Result<()> {
        let offset = slot * RECORD_LEN;
        let out = self.buf.get_mut(offset..).unwrap_or_default();
        encode_scalar_record(value, id, out)
    }

    /// Overwrite slot `slot` with a pulse-oximetry reading.
    pub fn write_composite(&mut self, slot: usize, id: u8, reading: &BioReading) -> Result<()> {
        let offset = slot * RECORD_LEN;
        let out = self.buf.get_mut(offset..).unwrap_or_default();
        encode_composite_record(id, reading, out)
    }

    /// Iterate the records currently held.
    pub fn records(&self) -> SnapshotRecords<'_> {
        SnapshotRecords { remaining: &self.buf }
    }
}

/// Fixed-stride iterator over an encoded snapshot.
///
/// Trailing bytes that do not fill a whole record are ignored; use
/// [`decode_snapshot`] to reject them.
pub struct SnapshotRecords<'a> {
    remaining: &'a [u8],
}

impl<'a> SnapshotRecords<'a> {
    /// Iterate records in `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { remaining: data }
    }
}

impl Iterator for SnapshotRecords<'_> {
    type Item = SensorRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.remaining() < RECORD_LEN {
            return None;
        }
        let id = self.remaining.get_u8();
        let value = self.remaining.get_f32_le();
        Some(SensorRecord { id, value })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining.len() / RECORD_LEN;
        (n, Some(n))
    }
}

impl ExactSizeIterator for SnapshotRecords<'_> {}

/// Decode a whole notification payload.
///
/// # Errors
///
/// Returns [`Error::InvalidData`] if the length is not a multiple of
/// [`RECORD_LEN`].
pub fn decode_snapshot(data: &[u8]) -> Result<Vec<SensorRecord>> {
    if data.len() % RECORD_LEN != 0 {
        return Err(Error::InvalidData {
            context: format!(
                "snapshot length {} is not a multiple of {}",
                data.len(),
                RECORD_LEN
            ),
        });
    }
    Ok(SnapshotRecords::new(data).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::bio::FingerStatus;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_thermistor_scenario() {
        let values = [20.5f32, 21.0, 19.75, 22.25];
        let mut snapshot = SensorSnapshot::new(SensorClass::Thermistor, 4);
        for (slot, value) in values.iter().enumerate() {
            snapshot.write_scalar(slot, slot as u8 + 1, *value).unwrap();
        }

        assert_eq!(snapshot.len(), 20);
        let decoded = decode_snapshot(snapshot.as_bytes()).unwrap();
        assert_eq!(
            decoded,
            vec![
                SensorRecord::new(1, 20.5),
                SensorRecord::new(2, 21.0),
                SensorRecord::new(3, 19.75),
                SensorRecord::new(4, 22.25),
            ]
        );
    }

    #[test]
    fn test_slot_order_not_id_order() {
        let mut snapshot = SensorSnapshot::new(SensorClass::Force, 3);
        snapshot.write_scalar(0, 9, 1.0).unwrap();
        snapshot.write_scalar(1, 2, 2.0).unwrap();
        snapshot.write_scalar(2, 5, 3.0).unwrap();

        let ids: Vec<u8> = snapshot.records().map(|r| r.id).collect();
        assert_eq!(ids, vec![9, 2, 5]);
    }

    #[test]
    fn test_write_past_last_slot_fails() {
        let mut snapshot = SensorSnapshot::new(SensorClass::Oxygen, 1);
        let reading = BioReading {
            oxygen: 95,
            status: FingerStatus::FingerDetected,
            ..Default::default()
        };
        snapshot.write_composite(0, 1, &reading).unwrap();
        assert!(snapshot.write_composite(1, 1, &reading).is_err());
        assert!(snapshot.write_scalar(7, 1, 0.0).is_err());
        assert_eq!(snapshot.as_bytes(), &[1, 0x00, 0x00, 0xBE, 0x42]);
    }

    #[test]
    fn test_decode_rejects_ragged_length() {
        let err = decode_snapshot(&[1, 2, 3, 4, 5, 6]).unwrap_err();
        assert!(matches!(err, Error::InvalidData { .. }));
        assert_eq!(SnapshotRecords::new(&[1, 2, 3, 4, 5, 6]).count(), 1);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = SensorSnapshot::new(SensorClass::Force, 0);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.records().len(), 0);
        assert_eq!(decode_snapshot(&[]).unwrap(), vec![]);
    }

    proptest! {
        #[test]
        fn prop_snapshot_preserves_order(
            entries in proptest::collection::vec((any::<u8>(), any::<u32>()), 0..16)
        ) {
            let records: Vec<SensorRecord> = entries
                .iter()
                .map(|(id, bits)| SensorRecord::new(*id, f32::from_bits(*bits)))
                .collect();
            let snapshot = SensorSnapshot::from_records(SensorClass::Thermistor, &records);

            prop_assert_eq!(snapshot.len(), records.len() * RECORD_LEN);
            let decoded = decode_snapshot(snapshot.as_bytes()).unwrap();
            prop_assert_eq!(decoded.len(), records.len());
            for (a, b) in decoded.iter().zip(&records) {
                prop_assert!(a.bit_eq(b));
            }
        }

        #[test]
        fn prop_slot_writes_preserve_order(
            entries in proptest::collection::vec((any::<u8>(), any::<u32>()), 1..16)
        ) {
            let mut snapshot = SensorSnapshot::new(SensorClass::Force, entries.len());
            // Fill slots back to front so offsets, not write order, decide placement.
            for (slot, (id, bits)) in entries.iter().enumerate().rev() {
                snapshot.write_scalar(slot, *id, f32::from_bits(*bits)).unwrap();
            }

            prop_assert_eq!(snapshot.len(), entries.len() * RECORD_LEN);
            let decoded: Vec<SensorRecord> = snapshot.records().collect();
            prop_assert_eq!(decoded.len(), entries.len());
            for (record, (id, bits)) in decoded.iter().zip(&entries) {
                prop_assert!(record.bit_eq(&SensorRecord::new(*id, f32::from_bits(*bits))));
            }
        }
    }
}
