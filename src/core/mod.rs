//! Core types and traits for the console link
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod types;
pub mod serde;

pub use self::error::{Error, Result};
pub use self::types::{
    DeviceIdentity,
    EngineConfig,
    FrequencyBand,
    Reading,
    Request,
    RequestKind,
    RequestState,
    TransceiverSettings,
};

/// Device ID broadcast by a console that has not been paired yet
pub const UNPAIRED_DEVICE_ID: u16 = 0xF0F0;

/// Number of slots in the console's history ring buffer
pub const HISTORY_CAPACITY: u16 = 1797;

/// Size in bytes of one history slot in console memory
pub const HISTORY_SLOT_SIZE: u32 = 18;

/// Console memory address of history slot 0
pub const HISTORY_BASE_ADDRESS: u32 = 0x1A0;
