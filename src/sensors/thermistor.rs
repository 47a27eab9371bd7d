//! NTC thermistor driver.

use tracing::trace;

use crate::sensors::hal::AnalogPin;
use crate::sensors::ScalarSensor;

const KELVIN_OFFSET: f32 = 273.15;

/// Divider and NTC parameters.
///
/// The thermistor sits on the low side of a divider with `series_ohms` to the
/// supply, so the ADC count rises with resistance.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ThermistorParams {
    /// Full-scale ADC count.
    pub adc_max: u16,
    /// Series resistor in ohms.
    pub series_ohms: f32,
    /// NTC resistance at `nominal_celsius`.
    pub nominal_ohms: f32,
    /// Reference temperature for `nominal_ohms`.
    pub nominal_celsius: f32,
    /// Beta coefficient.
    pub beta: f32,
}

impl Default for ThermistorParams {
    fn default() -> Self {
        Self {
            adc_max: 4095,
            series_ohms: 10_000.0,
            nominal_ohms: 10_000.0,
            nominal_celsius: 25.0,
            beta: 3950.0,
        }
    }
}

/// Convert a raw ADC count to degrees Celsius with the Beta equation.
///
/// Returns `f32::NAN` when the count is pinned at either rail, which is what
/// an open or shorted thermistor looks like.
pub fn celsius_from_raw(raw: u16, params: &ThermistorParams) -> f32 {
    if raw == 0 || raw >= params.adc_max {
        return f32::NAN;
    }

    let raw = f32::from(raw);
    let resistance = params.series_ohms * raw / (f32::from(params.adc_max) - raw);

    let inv_kelvin = (resistance / params.nominal_ohms).ln() / params.beta
        + 1.0 / (params.nominal_celsius + KELVIN_OFFSET);
    1.0 / inv_kelvin - KELVIN_OFFSET
}

/// A thermistor on one ADC pin.
pub struct Thermistor {
    pin: Box<dyn AnalogPin>,
    id: u8,
    params: ThermistorParams,
}

impl Thermistor {
    /// Create a thermistor with default divider parameters.
    pub fn new(pin: Box<dyn AnalogPin>, id: u8) -> Self {
        Self::with_params(pin, id, ThermistorParams::default())
    }

    /// Create a thermistor with explicit divider parameters.
    pub fn with_params(pin: Box<dyn AnalogPin>, id: u8, params: ThermistorParams) -> Self {
        Self { pin, id, params }
    }

    /// Read the temperature in degrees Celsius.
    pub fn read_temperature(&mut self) -> f32 {
        let raw = self.pin.read_raw();
        let celsius = celsius_from_raw(raw, &self.params);
        trace!(
            "Thermistor {} (pin {}): raw={} -> {:.2}C",
            self.id,
            self.pin.pin(),
            raw,
            celsius
        );
        celsius
    }
}

impl ScalarSensor for Thermistor {
    fn id(&self) -> u8 {
        self.id
    }

    fn read_value(&mut self) -> f32 {
        self.read_temperature()
    }
}
