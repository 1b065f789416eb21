//! Current-weather frame decoding
//!
//! A CurrentWeather response is 215 bytes. Every field below is addressed by
//! its byte offset in the whole frame and by the nibble it starts on.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::codec::nibble::{
    date_time, humidity_2_0, nibble_at, pressure_pair, rain_6_2, rain_7_3, temperature_5_3, wind_6_2,
};
use crate::codec::CompassPoint;
use crate::core::{Error, Reading, Result};
use super::frame::{console_checksum, ResponseType};

/// Number of direction samples reported for wind and gust
pub const DIRECTION_SAMPLES: usize = 6;

/// A measurement with its recorded extremes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangedReading {
    pub current: Reading,
    pub min: Reading,
    pub min_time: Option<NaiveDateTime>,
    pub max: Reading,
    pub max_time: Option<NaiveDateTime>,
}

/// Rain accumulated over one window and the window's maximum
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RainWindow {
    pub value: Reading,
    pub max: Reading,
    pub max_time: Option<NaiveDateTime>,
}

/// Wind speed with the current and five previous directions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindReading {
    /// km/h
    pub speed: Reading,
    pub directions: [Option<CompassPoint>; DIRECTION_SAMPLES],
}

impl WindReading {
    pub fn direction(&self) -> Option<CompassPoint> {
        self.directions[0]
    }
}

/// Relative pressure in both units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pressure {
    pub hpa: Reading,
    pub inhg: Reading,
}

/// The most recent observation decoded from the console
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentWeather {
    /// Local time the frame was decoded
    pub captured_at: NaiveDateTime,
    /// Console's configuration checksum
    pub config_checksum: u16,
    /// Weather forecast icon, 0..=3
    pub weather_state: u8,
    /// Pressure tendency, 0..=3
    pub weather_tendency: u8,
    pub indoor_temperature: RangedReading,
    pub outdoor_temperature: RangedReading,
    pub windchill: RangedReading,
    pub dewpoint: RangedReading,
    pub indoor_humidity: RangedReading,
    pub outdoor_humidity: RangedReading,
    pub rain_month: RainWindow,
    pub rain_week: RainWindow,
    pub rain_24h: RainWindow,
    pub rain_1h: RainWindow,
    pub rain_total: Reading,
    pub rain_last_reset: Option<NaiveDateTime>,
    pub wind: WindReading,
    pub gust: WindReading,
    pub gust_max: Reading,
    pub gust_max_time: Option<NaiveDateTime>,
    pub pressure: Pressure,
    pub pressure_min: Pressure,
    pub pressure_min_time: Option<NaiveDateTime>,
    pub pressure_max: Pressure,
    pub pressure_max_time: Option<NaiveDateTime>,
}

/// Field offsets of a ranged temperature
struct TemperatureLayout {
    max_time: usize,
    min_time: usize,
    max: usize,
    min: usize,
    current: usize,
}

const INDOOR_TEMPERATURE: TemperatureLayout = TemperatureLayout { max_time: 9, min_time: 14, max: 19, min: 22, current: 24 };
const OUTDOOR_TEMPERATURE: TemperatureLayout = TemperatureLayout { max_time: 27, min_time: 32, max: 37, min: 40, current: 42 };
const WINDCHILL: TemperatureLayout = TemperatureLayout { max_time: 45, min_time: 50, max: 55, min: 58, current: 60 };
const DEWPOINT: TemperatureLayout = TemperatureLayout { max_time: 63, min_time: 68, max: 73, min: 76, current: 78 };

/// Times decode only for valid values; error/overflow extremes have no time
fn timed(reading: Reading, buf: &[u8], start: usize, high: bool) -> Option<NaiveDateTime> {
    if reading.is_valid() {
        date_time(buf, start, high)
    } else {
        None
    }
}

fn temperature(buf: &[u8], layout: &TemperatureLayout) -> RangedReading {
    // extremes start on the low nibble except the minimum
    let max = temperature_5_3(buf, layout.max, false);
    let min = temperature_5_3(buf, layout.min, true);
    RangedReading {
        current: temperature_5_3(buf, layout.current, false),
        min,
        min_time: timed(min, buf, layout.min_time, false),
        max,
        max_time: timed(max, buf, layout.max_time, false),
    }
}

fn humidity(buf: &[u8], start: usize) -> RangedReading {
    let max = humidity_2_0(buf, start + 10, true);
    let min = humidity_2_0(buf, start + 11, true);
    RangedReading {
        current: humidity_2_0(buf, start + 12, true),
        min,
        min_time: timed(min, buf, start + 5, true),
        max,
        max_time: timed(max, buf, start, true),
    }
}

fn rain_window(buf: &[u8], start: usize) -> RainWindow {
    let max = rain_6_2(buf, start + 5, true);
    RainWindow {
        value: rain_6_2(buf, start + 8, true),
        max,
        max_time: timed(max, buf, start, true),
    }
}

/// Six direction nibbles, newest first, walking bytes downwards low nibble first
fn directions(buf: &[u8], newest: usize, speed: Reading) -> [Option<CompassPoint>; DIRECTION_SAMPLES] {
    let mut out = [None; DIRECTION_SAMPLES];
    if !speed.is_valid() {
        return out;
    }
    for (i, slot) in out.iter_mut().enumerate() {
        let byte = newest - i / 2;
        *slot = nibble_at(buf, byte, i % 2 == 1, 0).map(CompassPoint::from_nibble);
    }
    out
}

fn pressure(buf: &[u8], start: usize) -> Pressure {
    let (hpa, inhg) = pressure_pair(buf, start, true);
    Pressure { hpa, inhg }
}

impl CurrentWeather {
    /// Decodes a CurrentWeather response captured at `captured_at`
    pub fn decode(frame: &[u8], captured_at: NaiveDateTime) -> Result<Self> {
        let expected = ResponseType::CurrentWeather.expected_len();
        if frame.len() != expected {
            return Err(Error::protocol(format!(
                "current weather frame has {} bytes, expected {}",
                frame.len(),
                expected
            )));
        }

        let wind_speed = wind_6_2(frame, 172);
        let gust_speed = wind_6_2(frame, 187);
        let gust_max = wind_6_2(frame, 184);
        let rain_total = rain_7_3(frame, 156, false);
        let pressure_max = pressure(frame, 200);
        let pressure_min = pressure(frame, 205);

        Ok(CurrentWeather {
            captured_at,
            config_checksum: console_checksum(frame).unwrap_or(0),
            weather_state: (frame[8] & 0x0F).min(3),
            weather_tendency: (frame[8] >> 4).min(3),
            indoor_temperature: temperature(frame, &INDOOR_TEMPERATURE),
            outdoor_temperature: temperature(frame, &OUTDOOR_TEMPERATURE),
            windchill: temperature(frame, &WINDCHILL),
            dewpoint: temperature(frame, &DEWPOINT),
            indoor_humidity: humidity(frame, 81),
            outdoor_humidity: humidity(frame, 94),
            rain_month: rain_window(frame, 107),
            rain_week: rain_window(frame, 118),
            rain_24h: rain_window(frame, 129),
            rain_1h: rain_window(frame, 140),
            rain_total,
            rain_last_reset: date_time(frame, 151, false),
            wind: WindReading {
                speed: wind_speed,
                directions: directions(frame, 162, wind_speed),
            },
            gust: WindReading {
                speed: gust_speed,
                directions: directions(frame, 177, gust_speed),
            },
            gust_max,
            gust_max_time: timed(gust_max, frame, 179, true),
            pressure: pressure(frame, 210),
            pressure_min_time: timed(pressure_min.hpa, frame, 195, true),
            pressure_min,
            pressure_max_time: timed(pressure_max.hpa, frame, 190, true),
            pressure_max,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::write_nibbles;
    use chrono::NaiveDate;

    /// Builds a plausible CurrentWeather frame for tests across the crate
    pub(crate) fn sample_frame(device_id: u16, checksum: u16) -> Vec<u8> {
        let mut frame = vec![0u8; 215];
        frame[0..2].copy_from_slice(&device_id.to_be_bytes());
        frame[2] = 0x60;
        frame[3] = 0x55;
        frame[4..6].copy_from_slice(&checksum.to_be_bytes());
        frame[8] = 0x12;

        // indoor 21.5, max 23.0 at 2024-03-15 08:45, min 19.0 with an error time
        write_nibbles(&mut frame, 24, false, &[6, 1, 5, 0, 0]);
        write_nibbles(&mut frame, 19, false, &[6, 3, 0, 0, 0]);
        write_nibbles(&mut frame, 9, false, &[2, 4, 0, 3, 1, 5, 0, 8, 4, 5]);
        write_nibbles(&mut frame, 22, true, &[5, 9, 0, 0, 0]);
        write_nibbles(&mut frame, 14, false, &[0xA; 10]);

        // outdoor sensor lost
        write_nibbles(&mut frame, 42, false, &[0xB, 0, 0, 0, 0]);
        write_nibbles(&mut frame, 37, false, &[0xF; 5]);

        // humidity 45% indoor
        write_nibbles(&mut frame, 93, true, &[4, 5]);

        // 1h rain 1.25 mm
        write_nibbles(&mut frame, 148, true, &[0, 0, 0, 1, 2, 5]);
        write_nibbles(&mut frame, 156, false, &[0, 1, 2, 3, 4, 5, 6]);

        // wind 12.5 km/h from E, previous samples N, S...
        let raw: u32 = 320_000;
        frame[172..175].copy_from_slice(&[(raw >> 16) as u8, (raw >> 8) as u8, raw as u8]);
        frame[162] = 0x04;
        frame[161] = 0x98;

        // gust in error
        frame[187..190].copy_from_slice(&[0x47, 0xB8, 0x00]);
        frame[177] = 0x33;

        // current pressure 1013.2 hPa / 29.92 inHg
        write_nibbles(&mut frame, 210, true, &[0, 2, 9, 9, 2]);
        write_nibbles(&mut frame, 212, false, &[1, 0, 1, 3, 2]);
        frame
    }

    fn captured() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap().and_hms_opt(9, 0, 0).unwrap()
    }

    #[test]
    fn test_decode_sample() {
        let weather = CurrentWeather::decode(&sample_frame(0x1234, 0x0BCD), captured()).unwrap();
        assert_eq!(weather.config_checksum, 0x0BCD);
        assert_eq!(weather.weather_tendency, 1);
        assert_eq!(weather.weather_state, 2);

        let indoor = weather.indoor_temperature;
        assert!((indoor.current.value().unwrap() - 21.5).abs() < 1e-9);
        assert!((indoor.max.value().unwrap() - 23.0).abs() < 1e-9);
        assert_eq!(indoor.max_time.unwrap().to_string(), "2024-03-15 08:45:00");
        assert!((indoor.min.value().unwrap() - 19.0).abs() < 1e-9);
        assert_eq!(indoor.min_time, None);

        assert_eq!(weather.outdoor_temperature.current, Reading::Error);
        assert_eq!(weather.outdoor_temperature.max, Reading::Overflow);
        assert_eq!(weather.outdoor_temperature.max_time, None);

        assert_eq!(weather.indoor_humidity.current, Reading::Value(45.0));
        assert!((weather.rain_1h.value.value().unwrap() - 1.25).abs() < 1e-9);
        assert!((weather.rain_total.value().unwrap() - 123.456).abs() < 1e-9);

        assert_eq!(weather.wind.speed, Reading::Value(12.5));
        assert_eq!(weather.wind.direction().map(|d| d.label()), Some("E"));
        assert_eq!(weather.wind.directions[1].map(|d| d.label()), Some("N"));
        assert_eq!(weather.wind.directions[2].map(|d| d.code()), Some(8));
        assert_eq!(weather.wind.directions[3].map(|d| d.code()), Some(9));

        assert_eq!(weather.gust.speed, Reading::Error);
        assert!(weather.gust.directions.iter().all(|d| d.is_none()));

        assert!((weather.pressure.hpa.value().unwrap() - 1013.2).abs() < 1e-9);
        assert!((weather.pressure.inhg.value().unwrap() - 29.92).abs() < 1e-9);
    }

    #[test]
    fn test_state_is_clamped() {
        let mut frame = sample_frame(1, 0);
        frame[8] = 0x7E;
        let weather = CurrentWeather::decode(&frame, captured()).unwrap();
        assert_eq!(weather.weather_state, 3);
        assert_eq!(weather.weather_tendency, 3);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let frame = sample_frame(1, 0);
        assert!(CurrentWeather::decode(&frame[..214], captured()).is_err());
    }
}
