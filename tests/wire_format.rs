//! Wire format as seen by a receiver.

use disense_ble::ble::{SPO2_CHARACTERISTIC_UUID, THERMISTOR_CHARACTERISTIC_UUID};
use disense_ble::data::encode_scalar_record;
use disense_ble::{
    decode_snapshot, BioReading, Error, FingerStatus, SensorClass, SensorRecord, SensorSnapshot,
    SnapshotEvent, RECORD_LEN,
};
use pretty_assertions::assert_eq;

#[test]
fn test_thermistor_snapshot_bytes() {
    let mut snapshot = SensorSnapshot::new(SensorClass::Thermistor, 4);
    for (slot, value) in [20.5f32, 21.0, 19.75, 22.25].into_iter().enumerate() {
        snapshot.write_scalar(slot, slot as u8 + 1, value).unwrap();
    }

    let mut expected = Vec::new();
    for (id, value) in [(1u8, 20.5f32), (2, 21.0), (3, 19.75), (4, 22.25)] {
        expected.push(id);
        expected.extend_from_slice(&value.to_le_bytes());
    }
    assert_eq!(snapshot.as_bytes(), expected.as_slice());
    assert_eq!(snapshot.len(), 4 * RECORD_LEN);
}

#[test]
fn test_receiver_decodes_at_five_byte_stride() {
    let mut payload = vec![0u8; 3 * RECORD_LEN];
    encode_scalar_record(1.0, 7, &mut payload[0..5]).unwrap();
    encode_scalar_record(-2.5, 8, &mut payload[5..10]).unwrap();
    encode_scalar_record(f32::NAN, 9, &mut payload[10..15]).unwrap();

    let records = decode_snapshot(&payload).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0], SensorRecord::new(7, 1.0));
    assert_eq!(records[1], SensorRecord::new(8, -2.5));
    assert_eq!(records[2].id, 9);
    assert!(records[2].value.is_nan());
}

#[test]
fn test_short_buffer_rejected() {
    let mut out = [0u8; 4];
    let err = encode_scalar_record(1.0, 1, &mut out).unwrap_err();
    assert!(matches!(
        err,
        Error::BufferTooSmall {
            needed: 5,
            available: 4
        }
    ));
}

#[test]
fn test_oxygen_snapshot_carries_saturation() {
    let reading = BioReading {
        heart_rate: 72,
        confidence: 98,
        oxygen: 97,
        status: FingerStatus::FingerDetected,
    };
    let mut snapshot = SensorSnapshot::new(SensorClass::Oxygen, 1);
    snapshot.write_composite(0, 1, &reading).unwrap();
    assert_eq!(snapshot.as_bytes(), &[1, 0x00, 0x00, 0xc2, 0x42]);

    let event = SnapshotEvent::decode(
        &SPO2_CHARACTERISTIC_UUID,
        snapshot.as_bytes(),
        chrono::Utc::now(),
    )
    .unwrap();
    assert_eq!(event.class, SensorClass::Oxygen);
    assert_eq!(event.value(1), Some(97.0));
}

#[test]
fn test_event_rejects_partial_record() {
    let result = SnapshotEvent::decode(
        &THERMISTOR_CHARACTERISTIC_UUID,
        &[1, 0, 0, 0, 0, 2, 0],
        chrono::Utc::now(),
    );
    assert!(matches!(result, Err(Error::InvalidData { .. })));
}
