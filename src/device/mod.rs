//! Device-side firmware core.
//!
//! This module holds the configuration, the clock, the transmission
//! scheduler, the connection gate with its status LED, and the loop that
//! drives them.

pub mod clock;
pub mod config;
pub mod firmware;
pub mod gate;
pub mod led;
pub mod scheduler;

pub use clock::{Clock, ManualClock, TokioClock};
pub use config::{
    BlinkPattern, ChannelUuids, DeviceConfig, OxygenSampling, SensorBinding, SensorSlot,
    DEFAULT_SLOTS,
};
pub use firmware::{Channels, Firmware, FirmwareStats, SensorSet, TickOutcome};
pub use gate::{ConnectionGate, GateState};
pub use led::StatusIndicator;
pub use scheduler::TransmissionScheduler;
