#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};

use wxlink::store::{StateStore, TransceiverRecord};
use wxlink::transport::ConsoleHandle;
use wxlink::{EngineConfig, MockTransport, SimulatedConsole};

/// ID the engine offers a console when pairing with the default mock
pub const TRANSCEIVER_ID: u16 = 0x0102;

pub fn fast_config(state_dir: Option<PathBuf>) -> EngineConfig {
    EngineConfig {
        poll_interval: Duration::from_millis(5),
        request_ttl: 400,
        request_timeout: Duration::from_secs(5),
        pairing_timeout: Duration::from_secs(5),
        preamble_duration: Duration::from_millis(20),
        device_wait: Duration::from_secs(2),
        register_wait: Duration::from_secs(1),
        state_dir,
        ..Default::default()
    }
}

/// Mid-minute so time frames are never deferred
pub fn fixed_clock() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 15)
        .and_then(|d| d.and_hms_opt(13, 42, 30))
        .unwrap()
}

/// Writes a pairing with the simulated console into `dir`
pub fn remember_pairing(dir: &Path) {
    let store = StateStore::open(dir).unwrap();
    store
        .save_transceiver(&TransceiverRecord {
            serial: None,
            registered_id: Some(TRANSCEIVER_ID),
            ..Default::default()
        })
        .unwrap();
}

/// Runs `console` on its own thread with a short beacon period
pub fn spawn(mut console: SimulatedConsole) -> ConsoleHandle {
    console.set_beacon_every(25);
    console.spawn(Duration::from_millis(2))
}

/// A transceiver mock with a console answering on its own thread
pub fn console(paired: bool) -> (MockTransport, ConsoleHandle) {
    let mock = MockTransport::new();
    let console = if paired {
        SimulatedConsole::paired(mock.clone(), TRANSCEIVER_ID)
    } else {
        SimulatedConsole::new(mock.clone())
    };
    (mock.clone(), spawn(console))
}
