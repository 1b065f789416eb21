use bytes::{BufMut, BytesMut};
use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::codec::{bcd, read_u16};
use crate::core::{Error, Result, HISTORY_BASE_ADDRESS, HISTORY_CAPACITY, HISTORY_SLOT_SIZE};

/// Length of an acknowledgement frame
pub const ACK_LEN: usize = 9;

/// Length of a time frame
pub const TIME_FRAME_LEN: usize = 12;

/// Length of a configuration frame
pub const CONFIG_FRAME_LEN: usize = 48;

/// Action byte of an outgoing time frame
pub const TIME_FRAME_ACTION: u8 = 0xC0;

/// Action byte of an outgoing configuration frame
pub const CONFIG_FRAME_ACTION: u8 = 0x40;

/// History address meaning "no index known"
pub const NO_HISTORY_ADDRESS: u32 = 0xF_FFFF;

/// Response types the console sends, from the top three bits of byte 2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseType {
    DataWritten,
    Config,
    CurrentWeather,
    History,
    NextAction,
}

impl ResponseType {
    /// Recognises the response type of a status byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte & 0xE0 {
            0x20 => Some(ResponseType::DataWritten),
            0x40 => Some(ResponseType::Config),
            0x60 => Some(ResponseType::CurrentWeather),
            0x80 => Some(ResponseType::History),
            0xA0 => Some(ResponseType::NextAction),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            ResponseType::DataWritten => 0x20,
            ResponseType::Config => 0x40,
            ResponseType::CurrentWeather => 0x60,
            ResponseType::History => 0x80,
            ResponseType::NextAction => 0xA0,
        }
    }

    /// The only frame length accepted for this type
    pub fn expected_len(&self) -> usize {
        match self {
            ResponseType::DataWritten => 6,
            ResponseType::Config => 48,
            ResponseType::CurrentWeather => 215,
            ResponseType::History => 30,
            ResponseType::NextAction => 6,
        }
    }
}

/// Console request carried in the low nibble of a NextAction frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    FirstConfig,
    SetConfig,
    SetTime,
    Other(u8),
}

impl NextAction {
    pub fn from_code(code: u8) -> Self {
        match code & 0x0F {
            1 => NextAction::FirstConfig,
            2 => NextAction::SetConfig,
            3 => NextAction::SetTime,
            other => NextAction::Other(other),
        }
    }
}

/// Common four-byte header of every incoming frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Sender device ID
    pub device_id: u16,
    /// Raw status byte
    pub status: u8,
    /// Link quality, 0..=127
    pub quality: u8,
}

impl FrameHeader {
    /// Parses the header, `None` for frames shorter than four bytes
    pub fn parse(frame: &[u8]) -> Option<Self> {
        if frame.len() < 4 {
            return None;
        }
        Some(FrameHeader {
            device_id: u16::from_be_bytes([frame[0], frame[1]]),
            status: frame[2],
            quality: frame[3] & 0x7F,
        })
    }

    pub fn response_type(&self) -> Option<ResponseType> {
        ResponseType::from_byte(self.status)
    }

    /// Battery bits or next-action code
    pub fn low_nibble(&self) -> u8 {
        self.status & 0x0F
    }
}

/// Action requested from the console by an acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckAction {
    GetHistory,
    ReqSetTime,
    ReqSetConfig,
    GetConfig,
    GetCurrent,
}

impl AckAction {
    pub fn code(&self) -> u8 {
        match self {
            AckAction::GetHistory => 0,
            AckAction::ReqSetTime => 1,
            AckAction::ReqSetConfig => 2,
            AckAction::GetConfig => 3,
            AckAction::GetCurrent => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code & 0x0F {
            0 => Some(AckAction::GetHistory),
            1 => Some(AckAction::ReqSetTime),
            2 => Some(AckAction::ReqSetConfig),
            3 => Some(AckAction::GetConfig),
            4 => Some(AckAction::GetCurrent),
            _ => None,
        }
    }
}

/// Decoded acknowledgement frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub device_id: u16,
    pub action: AckAction,
    pub checksum: u16,
    pub comm_interval: u16,
    pub address: u32,
}

/// Console memory address of a history slot
pub fn address_for_index(index: Option<u16>) -> u32 {
    match index {
        Some(i) if i < HISTORY_CAPACITY => HISTORY_SLOT_SIZE * i as u32 + HISTORY_BASE_ADDRESS,
        _ => NO_HISTORY_ADDRESS,
    }
}

/// Joins three address bytes, keeping the 20 significant bits
pub fn bytes_to_address(bytes: &[u8]) -> Option<u32> {
    match bytes {
        [a, b, c, ..] => Some(((*a as u32 & 0x0F) << 16) | ((*b as u32) << 8) | *c as u32),
        _ => None,
    }
}

/// History slot at a console memory address
pub fn index_for_address(address: u32) -> Option<u16> {
    let offset = address.checked_sub(HISTORY_BASE_ADDRESS)?;
    let index = offset / HISTORY_SLOT_SIZE;
    if offset % HISTORY_SLOT_SIZE != 0 || index >= HISTORY_CAPACITY as u32 {
        return None;
    }
    Some(index as u16)
}

/// Builds a 9-byte acknowledgement
pub fn build_ack(device_id: u16, action: AckAction, checksum: u16, comm_interval: u16, address: u32) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(ACK_LEN);
    buf.put_u16(device_id);
    buf.put_u8(action.code() & 0x0F);
    buf.put_u16(checksum);
    buf.put_u8((comm_interval >> 4) as u8);
    buf.put_u8((((address >> 16) & 0x0F) as u8) | (((comm_interval & 0x0F) as u8) << 4));
    buf.put_u8((address >> 8) as u8);
    buf.put_u8(address as u8);
    buf.to_vec()
}

/// Recovers the fields of an acknowledgement
pub fn parse_ack(frame: &[u8]) -> Result<Ack> {
    if frame.len() != ACK_LEN {
        return Err(Error::protocol(format!("acknowledgement has {} bytes", frame.len())));
    }
    let action = AckAction::from_code(frame[2])
        .ok_or_else(|| Error::protocol(format!("unknown acknowledgement action {}", frame[2])))?;
    Ok(Ack {
        device_id: u16::from_be_bytes([frame[0], frame[1]]),
        action,
        checksum: u16::from_be_bytes([frame[3], frame[4]]),
        comm_interval: ((frame[5] as u16) << 4) | (frame[6] >> 4) as u16,
        address: bytes_to_address(&frame[6..9]).unwrap_or(NO_HISTORY_ADDRESS),
    })
}

/// Reply to a console asking for the time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeReply {
    /// A real time frame
    Frame(Vec<u8>),
    /// Too close to a minute boundary, the acknowledgement asks for a retry later
    Defer { ack: Vec<u8>, wait_secs: u16 },
}

/// Seconds to wait before the time may be sent, `None` when it can go now
pub fn time_guard_delay(second: u32) -> Option<u16> {
    match second {
        0..=5 => Some((6 - second) as u16),
        55..=59 => Some((66 - second) as u16),
        _ => None,
    }
}

/// Builds the time frame, or a deferring acknowledgement near second 0
pub fn build_time_frame(device_id: u16, checksum: u16, now: NaiveDateTime, address: u32) -> TimeReply {
    if let Some(wait_secs) = time_guard_delay(now.second()) {
        return TimeReply::Defer {
            ack: build_ack(device_id, AckAction::ReqSetTime, checksum, wait_secs, address),
            wait_secs,
        };
    }

    let day = now.day() as u8;
    let month = now.month() as u8;
    let year = (now.year() - 2000).clamp(0, 99) as u8;
    let weekday = now.weekday().number_from_monday() as u8;

    let mut buf = BytesMut::with_capacity(TIME_FRAME_LEN);
    buf.put_u16(device_id);
    buf.put_u8(TIME_FRAME_ACTION);
    buf.put_u16(checksum);
    buf.put_u8(bcd(now.second() as u8));
    buf.put_u8(bcd(now.minute() as u8));
    buf.put_u8(bcd(now.hour() as u8));
    buf.put_u8(weekday | ((day % 10) << 4));
    buf.put_u8((day / 10) | ((month % 10) << 4));
    buf.put_u8((month / 10) | ((year % 10) << 4));
    buf.put_u8(year / 10);
    TimeReply::Frame(buf.to_vec())
}

/// Builds a configuration frame carrying a 44-byte block
pub fn build_config_frame(device_id: u16, quality: u8, block: &[u8]) -> Result<Vec<u8>> {
    if block.len() != CONFIG_FRAME_LEN - 4 {
        return Err(Error::protocol(format!("configuration block has {} bytes", block.len())));
    }
    let mut buf = BytesMut::with_capacity(CONFIG_FRAME_LEN);
    buf.put_u16(device_id);
    buf.put_u8(CONFIG_FRAME_ACTION);
    buf.put_u8(quality & 0x7F);
    buf.extend_from_slice(block);
    Ok(buf.to_vec())
}

/// Console's configuration checksum carried by weather and history frames
pub fn console_checksum(frame: &[u8]) -> Option<u16> {
    read_u16(frame, 4)
}
