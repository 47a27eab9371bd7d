//! Force-sensitive resistor driver.

use tracing::trace;

use crate::sensors::hal::AnalogPin;
use crate::sensors::ScalarSensor;

/// Divider parameters for an FSR.
///
/// The FSR sits between the supply and the ADC pin, with `measure_ohms` to
/// ground, so the count rises with applied force.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ForceParams {
    /// Full-scale ADC count.
    pub adc_max: u16,
    /// Supply voltage across the divider.
    pub supply_volts: f32,
    /// Pull-down resistor in ohms.
    pub measure_ohms: f32,
}

impl Default for ForceParams {
    fn default() -> Self {
        Self {
            adc_max: 4095,
            supply_volts: 3.3,
            measure_ohms: 10_000.0,
        }
    }
}

/// Convert a raw ADC count to force in Newtons.
///
/// Uses the piecewise conductance fit from the FSR 402 integration guide. An
/// unloaded sensor reads 0.
pub fn newtons_from_raw(raw: u16, params: &ForceParams) -> f32 {
    if raw == 0 {
        return 0.0;
    }
    // A count at full scale would mean zero FSR resistance.
    let raw = raw.min(params.adc_max.saturating_sub(1)).max(1);

    let volts = f32::from(raw) * params.supply_volts / f32::from(params.adc_max);
    let resistance = (params.supply_volts - volts) * params.measure_ohms / volts;
    let micro_siemens = 1_000_000.0 / resistance;

    if micro_siemens <= 1000.0 {
        micro_siemens / 80.0
    } else {
        (micro_siemens - 1000.0) / 30.0
    }
}

/// An FSR on one ADC pin.
pub struct ForceSensor {
    pin: Box<dyn AnalogPin>,
    id: u8,
    params: ForceParams,
}

impl ForceSensor {
    /// Create a force sensor with default divider parameters.
    pub fn new(pin: Box<dyn AnalogPin>, id: u8) -> Self {
        Self::with_params(pin, id, ForceParams::default())
    }

    /// Create a force sensor with explicit divider parameters.
    pub fn with_params(pin: Box<dyn AnalogPin>, id: u8, params: ForceParams) -> Self {
        Self { pin, id, params }
    }

    /// Read the applied force in Newtons.
    pub fn read_force(&mut self) -> f32 {
        let raw = self.pin.read_raw();
        let force = newtons_from_raw(raw, &self.params);
        trace!(
            "FSR {} (pin {}): raw={} -> {:.2}N",
            self.id,
            self.pin.pin(),
            raw,
            force
        );
        force
    }
}

impl ScalarSensor for ForceSensor {
    fn id(&self) -> u8 {
        self.id
    }

    fn read_value(&mut self) -> f32 {
        self.read_force()
    }
}
