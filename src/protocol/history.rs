//! History frames and ring-buffer arithmetic
//!
//! The console keeps its history in a ring of 1797 slots. Each History
//! response carries the address of the newest slot, the address of the slot
//! being delivered, and the 18-byte record itself.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::codec::nibble::{
    date_time, humidity_2_0, nibble_at, pressure_hpa_5_1, rain_3_1, temperature_3_1, wind_3_1,
};
use crate::codec::CompassPoint;
use crate::core::{Error, Reading, Result, HISTORY_CAPACITY};
use super::frame::{bytes_to_address, console_checksum, index_for_address, ResponseType};

/// One decoded history slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Ring index of the slot
    pub index: u16,
    pub time: Option<NaiveDateTime>,
    pub indoor_temperature: Reading,
    pub outdoor_temperature: Reading,
    /// Relative pressure, hPa
    pub pressure: Reading,
    pub indoor_humidity: Reading,
    pub outdoor_humidity: Reading,
    /// Rain counter, mm
    pub rain: Reading,
    /// km/h
    pub wind_speed: Reading,
    pub wind_direction: Option<CompassPoint>,
    /// km/h
    pub gust_speed: Reading,
    pub gust_direction: Option<CompassPoint>,
}

/// Decoded History response
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryFrame {
    /// Console's configuration checksum
    pub config_checksum: u16,
    /// Newest slot the console holds, if the address is valid
    pub latest_index: Option<u16>,
    pub record: HistoryRecord,
}

/// Number of slots from `this` up to `latest`, wrapping at the ring size
pub fn outstanding(latest: u16, this: u16) -> u16 {
    let cap = HISTORY_CAPACITY as i32;
    ((latest as i32 - this as i32).rem_euclid(cap)) as u16
}

/// Ring index `delta` slots after `index`
pub fn index_after(index: u16, delta: u16) -> u16 {
    ((index as u32 + delta as u32) % HISTORY_CAPACITY as u32) as u16
}

/// Ring index `delta` slots before `index`
pub fn index_before(index: u16, delta: u16) -> u16 {
    let cap = HISTORY_CAPACITY as i32;
    ((index as i32 - delta as i32).rem_euclid(cap)) as u16
}

fn direction(nibble: Option<u8>, speed: Reading) -> Option<CompassPoint> {
    if speed.is_valid() {
        nibble.map(CompassPoint::from_nibble)
    } else {
        None
    }
}

impl HistoryFrame {
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let expected = ResponseType::History.expected_len();
        if frame.len() != expected {
            return Err(Error::protocol(format!(
                "history frame has {} bytes, expected {}",
                frame.len(),
                expected
            )));
        }

        let latest_index = bytes_to_address(&frame[6..9]).and_then(index_for_address);
        let index = bytes_to_address(&frame[9..12])
            .and_then(index_for_address)
            .ok_or_else(|| Error::protocol("history frame carries an invalid slot address"))?;

        let gust_speed = wind_3_1(frame, 12, false);
        let wind_speed = wind_3_1(frame, 14, false);

        let record = HistoryRecord {
            index,
            time: date_time(frame, 25, true),
            indoor_temperature: temperature_3_1(frame, 23, false),
            outdoor_temperature: temperature_3_1(frame, 22, true),
            pressure: pressure_hpa_5_1(frame, 19, false),
            indoor_humidity: humidity_2_0(frame, 18, false),
            outdoor_humidity: humidity_2_0(frame, 17, false),
            rain: rain_3_1(frame, 16, true),
            wind_speed,
            wind_direction: direction(nibble_at(frame, 14, true, 0), wind_speed),
            gust_speed,
            gust_direction: direction(nibble_at(frame, 12, true, 0), gust_speed),
        };

        Ok(HistoryFrame {
            config_checksum: console_checksum(frame).unwrap_or(0),
            latest_index,
            record,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::write_nibbles;
    use crate::protocol::frame::address_for_index;

    /// Builds a History frame for slot `index` with `latest` as the newest slot
    pub(crate) fn sample_frame(device_id: u16, checksum: u16, latest: u16, index: u16) -> Vec<u8> {
        let mut frame = vec![0u8; 30];
        frame[0..2].copy_from_slice(&device_id.to_be_bytes());
        frame[2] = 0x80;
        frame[3] = 0x40;
        frame[4..6].copy_from_slice(&checksum.to_be_bytes());
        frame[6..9].copy_from_slice(&address_for_index(Some(latest)).to_be_bytes()[1..]);
        frame[9..12].copy_from_slice(&address_for_index(Some(index)).to_be_bytes()[1..]);

        // gust 0x01E = 3.0 m/s from SE, wind 0x00A = 1.0 m/s from N
        frame[12] = 0x60;
        frame[13] = 0x1E;
        frame[14] = 0x00;
        frame[15] = 0x0A;
        // rain 0x000, outdoor humidity 62, indoor 48
        write_nibbles(&mut frame, 17, false, &[6, 2]);
        write_nibbles(&mut frame, 18, false, &[4, 8]);
        write_nibbles(&mut frame, 19, false, &[1, 0, 0, 4, 5]);
        write_nibbles(&mut frame, 22, true, &[5, 2, 5]);
        write_nibbles(&mut frame, 23, false, &[6, 1, 0]);
        write_nibbles(&mut frame, 25, true, &[2, 4, 0, 3, 1, 5, 0, 8, 0, 0]);
        frame
    }

    #[test]
    fn test_decode_record() {
        let decoded = HistoryFrame::decode(&sample_frame(0x1234, 0x0777, 100, 98)).unwrap();
        assert_eq!(decoded.config_checksum, 0x0777);
        assert_eq!(decoded.latest_index, Some(100));

        let record = decoded.record;
        assert_eq!(record.index, 98);
        assert_eq!(record.time.unwrap().to_string(), "2024-03-15 08:00:00");
        assert!((record.outdoor_temperature.value().unwrap() - 12.5).abs() < 1e-9);
        assert!((record.indoor_temperature.value().unwrap() - 21.0).abs() < 1e-9);
        assert!((record.pressure.value().unwrap() - 1004.5).abs() < 1e-9);
        assert_eq!(record.outdoor_humidity, Reading::Value(62.0));
        assert_eq!(record.indoor_humidity, Reading::Value(48.0));
        assert_eq!(record.rain, Reading::Value(0.0));
        assert!((record.gust_speed.value().unwrap() - 10.8).abs() < 1e-9);
        assert_eq!(record.gust_direction.map(|d| d.label()), Some("SE"));
        assert!((record.wind_speed.value().unwrap() - 3.6).abs() < 1e-9);
        assert_eq!(record.wind_direction.map(|d| d.label()), Some("N"));
    }

    #[test]
    fn test_direction_hidden_when_speed_invalid() {
        let mut frame = sample_frame(1, 0, 5, 5);
        frame[14] = 0x4F;
        frame[15] = 0xFE;
        let record = HistoryFrame::decode(&frame).unwrap().record;
        assert_eq!(record.wind_speed, Reading::Error);
        assert_eq!(record.wind_direction, None);
    }

    #[test]
    fn test_invalid_slot_address() {
        let mut frame = sample_frame(1, 0, 5, 5);
        frame[9..12].copy_from_slice(&[0x0F, 0xFF, 0xFF]);
        assert!(HistoryFrame::decode(&frame).is_err());
        assert!(HistoryFrame::decode(&frame[..29]).is_err());
    }

    #[test]
    fn test_ring_arithmetic() {
        assert_eq!(outstanding(10, 4), 6);
        assert_eq!(outstanding(4, 4), 0);
        assert_eq!(outstanding(2, HISTORY_CAPACITY - 3), 5);
        assert_eq!(index_after(HISTORY_CAPACITY - 1, 1), 0);
        assert_eq!(index_before(0, 1), HISTORY_CAPACITY - 1);
        assert_eq!(index_before(10, 3), 7);
    }
}
