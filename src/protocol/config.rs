//! Console configuration block
//!
//! The console reports its settings as a 44-byte block following the frame
//! header. Bytes 0..39 carry display formats, alarm thresholds and the history
//! interval, bytes 39..42 the reset-min/max flags, and bytes 42..44 the
//! checksum the console computed.

use serde::{Deserialize, Serialize};

use crate::codec::nibble::{
    humidity_2_0, pressure_hpa_5_1, pressure_inhg_5_2, rain_7_3, temperature_5_3, wind_6_2,
};
use crate::codec::{config_checksum, read_u16};
use crate::core::{Error, Reading, Result};
use super::frame::{ResponseType, CONFIG_FRAME_LEN};

/// Length of the configuration block
pub const CONFIG_BLOCK_LEN: usize = CONFIG_FRAME_LEN - 4;

/// Offset of the 24-bit reset-min/max flags within the block
pub const RESET_FLAGS_OFFSET: usize = 39;

/// Offset of the console's checksum within the block
pub const STORED_CHECKSUM_OFFSET: usize = 42;

/// Threshold pair of the console's min/max alarms
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlarmRange {
    pub min: Reading,
    pub max: Reading,
}

/// The console's configuration block as last received
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationConfig {
    block: Vec<u8>,
}

impl StationConfig {
    /// Wraps a 44-byte block
    pub fn from_block(block: &[u8]) -> Result<Self> {
        if block.len() != CONFIG_BLOCK_LEN {
            return Err(Error::protocol(format!("configuration block has {} bytes", block.len())));
        }
        Ok(StationConfig { block: block.to_vec() })
    }

    /// Extracts the block from a Config response frame
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        if frame.len() != ResponseType::Config.expected_len() {
            return Err(Error::protocol(format!("config frame has {} bytes", frame.len())));
        }
        Self::from_block(&frame[4..])
    }

    pub fn block(&self) -> &[u8] {
        &self.block
    }

    /// Checksum over the covered span of the held block
    pub fn checksum(&self) -> u16 {
        config_checksum(&self.block)
    }

    /// Checksum the console stored alongside the block
    pub fn in_checksum(&self) -> u16 {
        read_u16(&self.block, STORED_CHECKSUM_OFFSET).unwrap_or(0)
    }

    /// Whether the stored checksum matches the content
    pub fn is_consistent(&self) -> bool {
        self.checksum() == self.in_checksum()
    }

    pub fn reset_flags(&self) -> u32 {
        let b = &self.block[RESET_FLAGS_OFFSET..RESET_FLAGS_OFFSET + 3];
        (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32
    }

    /// Block to send back with new reset flags and a recomputed checksum
    ///
    /// Unverified against a real console: the flag position and the checksum
    /// rule are inferred from received blocks, no captured SetConfig exchange
    /// confirms that a console accepts the mirror.
    pub fn outgoing_block(&self, reset_flags: u32) -> Vec<u8> {
        let mut block = self.block.clone();
        block[RESET_FLAGS_OFFSET] = (reset_flags >> 16) as u8;
        block[RESET_FLAGS_OFFSET + 1] = (reset_flags >> 8) as u8;
        block[RESET_FLAGS_OFFSET + 2] = reset_flags as u8;
        let checksum = config_checksum(&block).to_be_bytes();
        block[STORED_CHECKSUM_OFFSET..].copy_from_slice(&checksum);
        block
    }

    pub fn wind_speed_format(&self) -> u8 {
        self.block[0] >> 4
    }

    pub fn rain_format(&self) -> u8 {
        (self.block[0] >> 3) & 1
    }

    pub fn pressure_format(&self) -> u8 {
        (self.block[0] >> 2) & 1
    }

    pub fn temperature_format(&self) -> u8 {
        (self.block[0] >> 1) & 1
    }

    pub fn clock_mode(&self) -> u8 {
        self.block[0] & 1
    }

    pub fn storm_threshold(&self) -> u8 {
        self.block[1] >> 4
    }

    pub fn weather_threshold(&self) -> u8 {
        self.block[1] & 0x0F
    }

    pub fn low_battery_flags(&self) -> u8 {
        self.block[2] >> 4
    }

    pub fn lcd_contrast(&self) -> u8 {
        self.block[2] & 0x0F
    }

    pub fn wind_direction_alarm_flags(&self) -> u16 {
        u16::from_be_bytes([self.block[3], self.block[4]])
    }

    pub fn other_alarm_flags(&self) -> u16 {
        u16::from_be_bytes([self.block[5], self.block[6]])
    }

    pub fn indoor_temperature_alarm(&self) -> AlarmRange {
        AlarmRange {
            max: temperature_5_3(&self.block, 7, true),
            min: temperature_5_3(&self.block, 9, false),
        }
    }

    pub fn outdoor_temperature_alarm(&self) -> AlarmRange {
        AlarmRange {
            max: temperature_5_3(&self.block, 12, true),
            min: temperature_5_3(&self.block, 14, false),
        }
    }

    pub fn indoor_humidity_alarm(&self) -> AlarmRange {
        AlarmRange {
            max: humidity_2_0(&self.block, 17, true),
            min: humidity_2_0(&self.block, 18, true),
        }
    }

    pub fn outdoor_humidity_alarm(&self) -> AlarmRange {
        AlarmRange {
            max: humidity_2_0(&self.block, 19, true),
            min: humidity_2_0(&self.block, 20, true),
        }
    }

    pub fn rain_24h_alarm(&self) -> Reading {
        rain_7_3(&self.block, 21, false)
    }

    /// History interval code
    pub fn history_interval(&self) -> u8 {
        self.block[25]
    }

    pub fn gust_alarm(&self) -> Reading {
        wind_6_2(&self.block, 26)
    }

    /// Relative pressure alarm in hPa
    pub fn pressure_hpa_alarm(&self) -> AlarmRange {
        AlarmRange {
            min: pressure_hpa_5_1(&self.block, 29, true),
            max: pressure_hpa_5_1(&self.block, 34, true),
        }
    }

    /// Relative pressure alarm in inHg
    pub fn pressure_inhg_alarm(&self) -> AlarmRange {
        AlarmRange {
            min: pressure_inhg_5_2(&self.block, 31, false),
            max: pressure_inhg_5_2(&self.block, 36, false),
        }
    }
}
