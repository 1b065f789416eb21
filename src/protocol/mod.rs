//! Frame protocol implementation
//!
//! This module defines the console's frame formats, the decoders for its
//! responses, and the request state machine that decides what to send back.

pub mod config;
pub mod engine;
pub mod frame;
pub mod history;
pub mod weather;

pub use self::config::{AlarmRange, StationConfig};
pub use self::engine::{Clock, Command, Completion, Engine, RadioMode};
pub use self::frame::{
    address_for_index, build_ack, build_config_frame, build_time_frame, parse_ack, Ack, AckAction, FrameHeader,
    NextAction, ResponseType, TimeReply, NO_HISTORY_ADDRESS,
};
pub use self::history::{HistoryFrame, HistoryRecord};
pub use self::weather::{CurrentWeather, Pressure, RainWindow, RangedReading, WindReading};
