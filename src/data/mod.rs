//! Data structures for sensor readings and their wire encoding.
//!
//! This module contains the fixed-width record codec, the per-class
//! snapshot buffers and the composite pulse-oximetry reading.

pub mod bio;
pub mod record;
pub mod snapshot;

pub use bio::{BioReading, FingerStatus};
pub use record::{encode_composite_record, encode_scalar_record, SensorRecord, RECORD_LEN};
pub use snapshot::{decode_snapshot, SensorClass, SensorSnapshot, SnapshotRecords};
