//! Small helpers shared by the device and companion sides.

use std::fmt::Write as _;

/// Convert Celsius to Fahrenheit.
///
/// NaN passes through unchanged, so a disconnected thermistor stays
/// recognizable after conversion.
///
/// # Example
///
/// ```
/// use disense_ble::celsius_to_fahrenheit;
///
/// let fahrenheit = celsius_to_fahrenheit(37.0);
/// assert!((fahrenheit - 98.6).abs() < 0.001);
/// ```
#[inline]
pub fn celsius_to_fahrenheit(celsius: f32) -> f32 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Render bytes as space-separated lowercase hex, for trace logs.
///
/// ```
/// use disense_ble::hex_dump;
///
/// assert_eq!(hex_dump(&[0x01, 0x00, 0xa4, 0x41]), "01 00 a4 41");
/// ```
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_celsius_to_fahrenheit() {
        assert!((celsius_to_fahrenheit(0.0) - 32.0).abs() < 0.001);
        assert!((celsius_to_fahrenheit(100.0) - 212.0).abs() < 0.001);
        assert!((celsius_to_fahrenheit(-40.0) - (-40.0)).abs() < 0.001);
        assert!(celsius_to_fahrenheit(f32::NAN).is_nan());
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[]), "");
        assert_eq!(hex_dump(&[0xff]), "ff");
        assert_eq!(hex_dump(&[1, 2, 0x10]), "01 02 10");
    }
}
