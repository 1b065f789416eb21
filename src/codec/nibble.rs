//! Nibble-packed numeric fields
//!
//! Console fields are runs of 4-bit digits. A field may start on the high or
//! the low nibble of its first byte, and digits are read most significant
//! first. Before any arithmetic the digits are classified: a nibble in
//! `0xA..=0xE` marks a sensor/format error, `0xF` marks overflow, and error
//! wins over overflow.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::core::Reading;

/// Offset subtracted from every encoded temperature
pub const TEMPERATURE_OFFSET: f64 = 40.0;

/// Raw 24-bit wind value the console uses for a sensor error
pub const WIND_ERROR_RAW: u32 = 0x47_B800;

/// Raw 24-bit wind value the console uses for overflow
pub const WIND_OVERFLOW_RAW: u32 = 0x47_DC00;

/// 3-nibble hex sentinels used by history wind and rain fields
const HEX3_ERROR: u16 = 0xFFE;
const HEX3_OVERFLOW: u16 = 0xFFF;

/// Outcome of inspecting a run of nibbles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigitClass {
    /// Every nibble is a decimal digit
    Valid,
    /// At least one nibble is in `0xA..=0xE`
    Error,
    /// No error nibble, at least one `0xF`
    Overflow,
}

/// Returns the `index`-th nibble of a field starting at `start`
pub fn nibble_at(buf: &[u8], start: usize, high: bool, index: usize) -> Option<u8> {
    let pos = index + if high { 0 } else { 1 };
    let byte = *buf.get(start + pos / 2)?;
    Some(if pos % 2 == 0 { byte >> 4 } else { byte & 0x0F })
}

/// Collects `count` nibbles of a field
pub fn nibbles(buf: &[u8], start: usize, high: bool, count: usize) -> Option<Vec<u8>> {
    (0..count).map(|i| nibble_at(buf, start, high, i)).collect()
}

/// Writes digits into a buffer using the same layout the decoders read
pub fn write_nibbles(buf: &mut [u8], start: usize, high: bool, digits: &[u8]) {
    for (i, digit) in digits.iter().enumerate() {
        let pos = i + if high { 0 } else { 1 };
        let idx = start + pos / 2;
        if let Some(byte) = buf.get_mut(idx) {
            if pos % 2 == 0 {
                *byte = (*byte & 0x0F) | ((digit & 0x0F) << 4);
            } else {
                *byte = (*byte & 0xF0) | (digit & 0x0F);
            }
        }
    }
}

/// Classifies a run of nibbles, error taking precedence over overflow
pub fn classify(digits: &[u8]) -> DigitClass {
    if digits.iter().any(|d| (0x0A..=0x0E).contains(d)) {
        DigitClass::Error
    } else if digits.iter().any(|d| *d == 0x0F) {
        DigitClass::Overflow
    } else {
        DigitClass::Valid
    }
}

/// Decodes a decimal field with `decimals` fractional digits minus `offset`
pub fn decimal(buf: &[u8], start: usize, high: bool, count: usize, decimals: i32, offset: f64) -> Reading {
    let digits = match nibbles(buf, start, high, count) {
        Some(d) => d,
        None => return Reading::Error,
    };
    match classify(&digits) {
        DigitClass::Error => Reading::Error,
        DigitClass::Overflow => Reading::Overflow,
        DigitClass::Valid => {
            let raw = digits.iter().fold(0u64, |acc, d| acc * 10 + *d as u64);
            Reading::Value(raw as f64 / 10f64.powi(decimals) - offset)
        }
    }
}

/// Temperature, 5 nibbles, 3 decimals, degrees C
pub fn temperature_5_3(buf: &[u8], start: usize, high: bool) -> Reading {
    decimal(buf, start, high, 5, 3, TEMPERATURE_OFFSET)
}

/// Temperature, 3 nibbles, 1 decimal, degrees C
pub fn temperature_3_1(buf: &[u8], start: usize, high: bool) -> Reading {
    decimal(buf, start, high, 3, 1, TEMPERATURE_OFFSET)
}

/// Relative humidity, 2 nibbles, percent
pub fn humidity_2_0(buf: &[u8], start: usize, high: bool) -> Reading {
    decimal(buf, start, high, 2, 0, 0.0)
}

/// Rain, 6 nibbles, 2 decimals, mm
pub fn rain_6_2(buf: &[u8], start: usize, high: bool) -> Reading {
    decimal(buf, start, high, 6, 2, 0.0)
}

/// Rain, 7 nibbles, 3 decimals, mm
pub fn rain_7_3(buf: &[u8], start: usize, high: bool) -> Reading {
    decimal(buf, start, high, 7, 3, 0.0)
}

/// Pressure, 5 nibbles, 1 decimal, hPa
pub fn pressure_hpa_5_1(buf: &[u8], start: usize, high: bool) -> Reading {
    decimal(buf, start, high, 5, 1, 0.0)
}

/// Pressure, 5 nibbles, 2 decimals, inHg
pub fn pressure_inhg_5_2(buf: &[u8], start: usize, high: bool) -> Reading {
    decimal(buf, start, high, 5, 2, 0.0)
}

/// Pressure stored as an inHg/hPa pair sharing a byte
///
/// inHg starts at `start`; hPa starts two bytes later on the opposite nibble.
/// Returns `(hpa, inhg)`.
pub fn pressure_pair(buf: &[u8], start: usize, high: bool) -> (Reading, Reading) {
    (
        pressure_hpa_5_1(buf, start + 2, !high),
        pressure_inhg_5_2(buf, start, high),
    )
}

/// Three hex nibbles as a raw value
pub fn hex_3(buf: &[u8], start: usize, high: bool) -> Option<u16> {
    let digits = nibbles(buf, start, high, 3)?;
    Some(digits.iter().fold(0u16, |acc, d| (acc << 4) | *d as u16))
}

fn hex_3_reading(buf: &[u8], start: usize, high: bool, scale: f64) -> Reading {
    match hex_3(buf, start, high) {
        None | Some(HEX3_ERROR) => Reading::Error,
        Some(HEX3_OVERFLOW) => Reading::Overflow,
        Some(raw) => Reading::Value(raw as f64 / 10.0 * scale),
    }
}

/// Rain counter, 3 hex nibbles of 0.1 inch, returned in mm
pub fn rain_3_1(buf: &[u8], start: usize, high: bool) -> Reading {
    hex_3_reading(buf, start, high, 25.4)
}

/// Wind speed, 3 hex nibbles of 0.1 m/s, returned in km/h
pub fn wind_3_1(buf: &[u8], start: usize, high: bool) -> Reading {
    hex_3_reading(buf, start, high, 3.6)
}

/// Wind speed, 6 hex nibbles of 1/256 hundredths of km/h
pub fn wind_6_2(buf: &[u8], start: usize) -> Reading {
    let bytes = match buf.get(start..start + 3) {
        Some(b) => b,
        None => return Reading::Error,
    };
    let raw = (bytes[0] as u32) << 16 | (bytes[1] as u32) << 8 | bytes[2] as u32;
    match raw {
        WIND_ERROR_RAW => Reading::Error,
        WIND_OVERFLOW_RAW => Reading::Overflow,
        _ => Reading::Value(raw as f64 / 256.0 / 100.0),
    }
}

/// Date and time, 10 nibbles `YY MM DD hh mm`
///
/// Returns `None` when any nibble is not a decimal digit or the date does not exist.
pub fn date_time(buf: &[u8], start: usize, high: bool) -> Option<NaiveDateTime> {
    let digits = nibbles(buf, start, high, 10)?;
    if classify(&digits) != DigitClass::Valid {
        return None;
    }
    let pair = |i: usize| (digits[i] * 10 + digits[i + 1]) as u32;
    NaiveDate::from_ymd_opt(2000 + pair(0) as i32, pair(2), pair(4))?
        .and_hms_opt(pair(6), pair(8), 0)
}

/// Digits of a decimal field holding `value`, the inverse of [`decimal`]
pub fn encode_decimal(value: f64, count: usize, decimals: i32, offset: f64) -> Vec<u8> {
    let mut raw = ((value + offset) * 10f64.powi(decimals)).round().max(0.0) as u64;
    let mut digits = vec![0u8; count];
    for digit in digits.iter_mut().rev() {
        *digit = (raw % 10) as u8;
        raw /= 10;
    }
    digits
}

/// Ten digits `YY MM DD hh mm`, the inverse of [`date_time`]
pub fn encode_date_time(time: NaiveDateTime) -> Vec<u8> {
    let year = (time.year() - 2000).clamp(0, 99) as u32;
    [year, time.month(), time.day(), time.hour(), time.minute()]
        .iter()
        .flat_map(|v| [(v / 10) as u8, (v % 10) as u8])
        .collect()
}

/// Packs a value 0..=99 as two BCD digits
pub fn bcd(value: u8) -> u8 {
    ((value / 10) % 10) << 4 | (value % 10)
}
