use std::path::PathBuf;
use std::time::Duration;

use serde::{Serialize, Deserialize};

/// Kind of high-level request the engine is working on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    GetCurrent,
    GetHistory,
    GetConfig,
    SetConfig,
    SetTime,
    FirstPairing,
    Invalid,
}

/// Lifecycle state of the outstanding request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestState {
    Queued,
    Running,
    Finished,
    Preamble,
    WaitDevice,
    WaitConfig,
    Error,
    Changed,
    Invalid,
}

impl RequestState {
    /// Terminal states notify the caller and reset the request
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Finished | RequestState::Error | RequestState::Invalid)
    }
}

/// The single request slot owned by the device state store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// What is being asked of the console
    pub kind: RequestKind,
    /// Where the request is in its lifecycle
    pub state: RequestState,
    /// Poll iterations left before the request is abandoned
    pub ttl: u32,
}

impl Default for Request {
    fn default() -> Self {
        Request::idle()
    }
}

impl Request {
    /// The idle request: nothing outstanding
    pub fn idle() -> Self {
        Request {
            kind: RequestKind::Invalid,
            state: RequestState::Invalid,
            ttl: 0,
        }
    }

    /// Creates a freshly queued request
    pub fn queued(kind: RequestKind, ttl: u32) -> Self {
        Request {
            kind,
            state: RequestState::Queued,
            ttl,
        }
    }

    /// Returns whether a request occupies the engine
    pub fn is_outstanding(&self) -> bool {
        self.kind != RequestKind::Invalid && !self.state.is_terminal()
    }

    /// Counts down one poll iteration
    ///
    /// Returns true on the first iteration past the TTL, so a request with a
    /// TTL of `n` survives `n` iterations and expires on iteration `n + 1`.
    pub fn tick(&mut self) -> bool {
        if !self.is_outstanding() {
            return false;
        }
        if self.ttl == 0 {
            return true;
        }
        self.ttl -= 1;
        false
    }

    /// Returns the request to idle
    pub fn reset(&mut self) {
        *self = Request::idle();
    }
}

/// Identity of the transceiver and of the console it is paired with
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Transceiver serial number as read from flash
    pub serial: Option<String>,
    /// Transceiver ID as read from flash
    pub transceiver_id: u16,
    /// ID the engine answers on
    pub device_id: u16,
    /// ID confirmed by the last successful pairing
    pub registered_id: Option<u16>,
}

impl DeviceIdentity {
    /// Creates an unpaired identity from the transceiver's flash contents
    pub fn from_flash(serial: String, transceiver_id: u16) -> Self {
        DeviceIdentity {
            serial: Some(serial),
            transceiver_id,
            device_id: transceiver_id,
            registered_id: None,
        }
    }

    /// Paired iff both IDs are known and equal
    pub fn is_paired(&self) -> bool {
        self.registered_id == Some(self.device_id)
    }
}

/// Regional radio band of the transceiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrequencyBand {
    /// 868.3 MHz
    Eu,
    /// 905.0 MHz
    Us,
}

impl FrequencyBand {
    /// Carrier frequency in Hz before flash correction
    pub fn base_frequency(&self) -> u32 {
        match self {
            FrequencyBand::Eu => 868_300_000,
            FrequencyBand::Us => 905_000_000,
        }
    }
}

impl Default for FrequencyBand {
    fn default() -> Self {
        FrequencyBand::Eu
    }
}

/// USB identity and radio tuning of the transceiver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransceiverSettings {
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
    /// USB interface number
    pub interface: u8,
    /// Selected regional band
    pub band: FrequencyBand,
    /// Correction read from flash, in Hz
    pub frequency_correction: i32,
}

impl Default for TransceiverSettings {
    fn default() -> Self {
        TransceiverSettings {
            vendor_id: 0x6666,
            product_id: 0x5555,
            interface: 0,
            band: FrequencyBand::default(),
            frequency_correction: 0,
        }
    }
}

impl TransceiverSettings {
    /// Base frequency of the band
    pub fn base_frequency(&self) -> u32 {
        self.band.base_frequency()
    }

    /// Corrected carrier frequency in Hz
    pub fn frequency(&self) -> u32 {
        (self.base_frequency() as i64 + self.frequency_correction as i64).max(0) as u32
    }
}

/// A decoded field that may carry the station's error or overflow marker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Reading {
    /// A valid measurement
    Value(f64),
    /// Sensor or format defect
    Error,
    /// Value outside the representable range
    Overflow,
}

impl Reading {
    /// Returns the measurement if it is valid
    pub fn value(&self) -> Option<f64> {
        match self {
            Reading::Value(v) => Some(*v),
            _ => None,
        }
    }

    /// NaN for errors, +inf for overflow
    pub fn to_f64(&self) -> f64 {
        match self {
            Reading::Value(v) => *v,
            Reading::Error => f64::NAN,
            Reading::Overflow => f64::INFINITY,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reading::Error)
    }

    pub fn is_overflow(&self) -> bool {
        matches!(self, Reading::Overflow)
    }

    /// Valid readings only
    pub fn is_valid(&self) -> bool {
        matches!(self, Reading::Value(_))
    }
}

/// Configuration for the link engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Sleep between poll iterations
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub poll_interval: Duration,
    /// Poll iterations a request may stay outstanding; it expires on the next one
    pub request_ttl: u32,
    /// Caller-side wait for data requests
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub request_timeout: Duration,
    /// Caller-side wait for pairing
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub pairing_timeout: Duration,
    /// How long the preamble is broadcast when pairing
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub preamble_duration: Duration,
    /// How long pairing waits for any console to answer
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub device_wait: Duration,
    /// How long an adopted candidate has to confirm
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub register_wait: Duration,
    /// Communication interval sent in every acknowledgement (12 bits)
    pub comm_interval: u16,
    /// Radio band
    pub band: FrequencyBand,
    /// Directory for persisted state, in-memory when unset
    pub state_dir: Option<PathBuf>,
    /// Capacity of the caller command queue
    pub command_queue: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            poll_interval: Duration::from_millis(85),
            request_ttl: 1500,
            request_timeout: Duration::from_secs(30),
            pairing_timeout: Duration::from_secs(120),
            preamble_duration: Duration::from_secs(5),
            device_wait: Duration::from_secs(90),
            register_wait: Duration::from_secs(30),
            comm_interval: 3,
            band: FrequencyBand::Eu,
            state_dir: None,
            command_queue: 8,
        }
    }
}

impl EngineConfig {
    /// Checks that the configuration is usable
    pub fn validate(&self) -> super::Result<()> {
        if self.poll_interval < Duration::from_millis(1) || self.poll_interval > Duration::from_secs(1) {
            return Err(super::Error::config("poll interval must be between 1ms and 1s"));
        }
        if self.request_ttl == 0 {
            return Err(super::Error::config("request TTL must be positive"));
        }
        if self.comm_interval > 0x0FFF {
            return Err(super::Error::config("communication interval must fit in 12 bits"));
        }
        if self.preamble_duration >= self.device_wait {
            return Err(super::Error::config("preamble must end before the device wait expires"));
        }
        if self.command_queue == 0 {
            return Err(super::Error::config("command queue must hold at least one request"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ttl_countdown() {
        let mut request = Request::queued(RequestKind::GetCurrent, 2);
        assert!(request.is_outstanding());
        assert!(!request.tick());
        assert!(!request.tick());
        assert!(request.tick());

        request.reset();
        assert!(!request.is_outstanding());
        assert!(!request.tick());
    }

    #[test]
    fn test_identity_pairing_invariant() {
        let mut identity = DeviceIdentity::from_flash("01020304050607".to_string(), 0x1234);
        assert!(!identity.is_paired());

        identity.registered_id = Some(0x4321);
        assert!(!identity.is_paired());

        identity.device_id = 0x4321;
        assert!(identity.is_paired());
    }

    #[test]
    fn test_corrected_frequency() {
        let settings = TransceiverSettings {
            frequency_correction: -1200,
            ..Default::default()
        };
        assert_eq!(settings.frequency(), 868_300_000 - 1200);
    }

    #[test]
    fn test_reading_sentinels_are_distinct() {
        assert!(Reading::Error.to_f64().is_nan());
        assert!(Reading::Overflow.to_f64().is_infinite());
        assert_eq!(Reading::Value(21.5).value(), Some(21.5));
        assert_eq!(Reading::Overflow.value(), None);
    }

    #[test]
    fn test_config_validation() {
        assert!(EngineConfig::default().validate().is_ok());

        let config = EngineConfig {
            comm_interval: 0x1000,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            request_ttl: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let decoded: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.poll_interval, config.poll_interval);
        assert_eq!(decoded.band, FrequencyBand::Eu);
    }
}
