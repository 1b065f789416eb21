//! Binary codec for console payloads
//!
//! Pure functions only: nibble/BCD field decoders with the station's error and
//! overflow markers, a few encoders used by frame builders, and the
//! configuration checksum.

pub mod checksum;
pub mod nibble;

pub use self::checksum::{config_checksum, read_u16};
pub use self::nibble::{bcd, date_time, write_nibbles, DigitClass};

use serde::{Serialize, Deserialize};

/// One of the 16 compass points reported by the wind sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8")]
pub struct CompassPoint(u8);

const COMPASS_LABELS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE",
    "S", "SSW", "SW", "WSW", "W", "WNW", "NW", "NNW",
];

impl CompassPoint {
    /// Creates a compass point from a direction nibble
    pub fn from_nibble(nibble: u8) -> Self {
        CompassPoint(nibble & 0x0F)
    }

    /// Raw direction code
    pub fn code(&self) -> u8 {
        self.0
    }

    /// Bearing in degrees
    pub fn degrees(&self) -> f64 {
        self.0 as f64 * 22.5
    }

    /// Short label such as "NNE"
    pub fn label(&self) -> &'static str {
        COMPASS_LABELS[(self.0 & 0x0F) as usize]
    }
}

impl TryFrom<u8> for CompassPoint {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        if code < 16 {
            Ok(CompassPoint(code))
        } else {
            Err(format!("compass code {} out of range 0..=15", code))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compass_point() {
        let point = CompassPoint::from_nibble(0x14);
        assert_eq!(point.code(), 4);
        assert_eq!(point.label(), "E");
        assert_eq!(point.degrees(), 90.0);
    }

    #[test]
    fn test_compass_point_deserialize_range() {
        let point: CompassPoint = serde_json::from_str("4").unwrap();
        assert_eq!(point.label(), "E");
        assert!(serde_json::from_str::<CompassPoint>("15").is_ok());
        assert!(serde_json::from_str::<CompassPoint>("16").is_err());
        assert!(serde_json::from_str::<CompassPoint>("200").is_err());
        assert_eq!(CompassPoint::try_from(200).unwrap_err(), "compass code 200 out of range 0..=15");
    }
}
