//! wxlink: link engine for wireless weather-station consoles
//!
//! This library talks to a weather-station console through a USB radio
//! transceiver. It brings the transceiver up, pairs with a console, answers
//! the console's periodic frames, and turns them into observations, history
//! records and configuration snapshots for any number of async callers.
pub mod codec;
pub mod core;
pub mod protocol;
pub mod radio;
pub mod service;
pub mod store;
pub mod transport;
pub mod util;

// Re-export commonly used items
pub use crate::core::{DeviceIdentity, EngineConfig, Error, FrequencyBand, Reading, Result, TransceiverSettings};
pub use crate::protocol::{CurrentWeather, HistoryRecord, StationConfig};
pub use crate::service::{Station, WeatherDriver};
pub use crate::store::{LastStat, WeatherSnapshot};
pub use crate::transport::{MockTransport, SimulatedConsole, Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
