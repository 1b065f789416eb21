//! Device state shared between the poller and callers
//!
//! The poller is the only writer. Each field sits behind its own mutex so a
//! caller reading the weather snapshot never waits on an identity update, and
//! readers always get a clone. A poisoned lock still yields its data.

pub mod persist;

pub use self::persist::{StateStore, TransceiverRecord};

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::core::DeviceIdentity;
use crate::protocol::history::outstanding;
use crate::protocol::{CurrentWeather, StationConfig};
use crate::util::{age, to_local};

/// Link statistics, persisted across restarts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LastStat {
    /// Last accepted frame
    #[serde(serialize_with = "crate::core::serde::serialize_opt_time")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_opt_time")]
    pub last_seen: Option<SystemTime>,
    /// Link quality of the last accepted frame, 0..=127
    pub link_quality: Option<u8>,
    /// Battery bits of the last DataWritten frame
    pub battery: Option<u8>,
    /// Last history slot processed
    pub last_history_index: Option<u16>,
    #[serde(serialize_with = "crate::core::serde::serialize_opt_time")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_opt_time")]
    pub last_current_at: Option<SystemTime>,
    #[serde(serialize_with = "crate::core::serde::serialize_opt_time")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_opt_time")]
    pub last_history_at: Option<SystemTime>,
    #[serde(serialize_with = "crate::core::serde::serialize_opt_time")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_opt_time")]
    pub last_config_at: Option<SystemTime>,
}

impl LastStat {
    /// Whether a frame was accepted within `window`
    pub fn seen_within(&self, window: Duration) -> bool {
        self.last_seen.map_or(false, |t| age(t) <= window)
    }

    /// Local wall-clock time of the last accepted frame
    pub fn last_seen_local(&self) -> Option<NaiveDateTime> {
        self.last_seen.map(to_local)
    }
}

/// Position of the engine in the console's history ring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryCursor {
    /// Last slot processed
    pub last_index: Option<u16>,
    /// Newest slot the console reported
    pub latest_index: Option<u16>,
}

impl HistoryCursor {
    /// Slots the console holds that have not been processed yet
    pub fn outstanding(&self) -> Option<u16> {
        match (self.latest_index, self.last_index) {
            (Some(latest), Some(last)) => Some(outstanding(latest, last)),
            _ => None,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Weather observation tagged with its publication number
///
/// Sequence numbers start at 1 and only grow, so they order snapshots even
/// when the local clock repeats an hour.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSnapshot {
    pub sequence: u64,
    pub weather: CurrentWeather,
}

/// Snapshots published by the poller
#[derive(Default)]
pub struct SharedState {
    weather: Mutex<Option<WeatherSnapshot>>,
    last_stat: Mutex<LastStat>,
    identity: Mutex<DeviceIdentity>,
    config: Mutex<Option<StationConfig>>,
    cursor: Mutex<HistoryCursor>,
}

impl SharedState {
    pub fn new(identity: DeviceIdentity, last_stat: LastStat) -> Self {
        let cursor = HistoryCursor {
            last_index: last_stat.last_history_index,
            latest_index: None,
        };
        SharedState {
            weather: Mutex::new(None),
            last_stat: Mutex::new(last_stat),
            identity: Mutex::new(identity),
            config: Mutex::new(None),
            cursor: Mutex::new(cursor),
        }
    }

    /// Replaces the weather snapshot wholesale, returning its sequence number
    pub fn publish_weather(&self, weather: CurrentWeather) -> u64 {
        let mut slot = lock(&self.weather);
        let sequence = slot.as_ref().map_or(0, |s| s.sequence) + 1;
        *slot = Some(WeatherSnapshot { sequence, weather });
        sequence
    }

    pub fn weather(&self) -> Option<CurrentWeather> {
        lock(&self.weather).as_ref().map(|s| s.weather.clone())
    }

    /// The snapshot if it was published after sequence number `since`
    pub fn fresh_weather(&self, since: u64) -> Option<WeatherSnapshot> {
        lock(&self.weather).as_ref().filter(|s| s.sequence > since).cloned()
    }

    pub fn last_stat(&self) -> LastStat {
        lock(&self.last_stat).clone()
    }

    /// Applies `f` to the statistics and returns the result
    pub fn update_last_stat(&self, f: impl FnOnce(&mut LastStat)) -> LastStat {
        let mut stat = lock(&self.last_stat);
        f(&mut stat);
        stat.clone()
    }

    pub fn identity(&self) -> DeviceIdentity {
        lock(&self.identity).clone()
    }

    pub fn set_identity(&self, identity: DeviceIdentity) {
        *lock(&self.identity) = identity;
    }

    pub fn config(&self) -> Option<StationConfig> {
        lock(&self.config).clone()
    }

    pub fn set_config(&self, config: StationConfig) {
        *lock(&self.config) = Some(config);
    }

    pub fn cursor(&self) -> HistoryCursor {
        *lock(&self.cursor)
    }

    pub fn set_cursor(&self, cursor: HistoryCursor) {
        *lock(&self.cursor) = cursor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::weather::tests::sample_frame;
    use chrono::NaiveDate;
    use std::sync::Arc;
    use std::thread;

    fn weather_at(hour: u32) -> CurrentWeather {
        let at = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap().and_hms_opt(hour, 0, 0).unwrap();
        CurrentWeather::decode(&sample_frame(1, 0), at).unwrap()
    }

    #[test]
    fn test_fresh_weather_delivers_once_per_snapshot() {
        let shared = SharedState::default();
        assert!(shared.fresh_weather(0).is_none());

        assert_eq!(shared.publish_weather(weather_at(9)), 1);
        let first = shared.fresh_weather(0).unwrap();
        assert_eq!(first.sequence, 1);
        assert!(shared.fresh_weather(first.sequence).is_none());

        shared.publish_weather(weather_at(10));
        let second = shared.fresh_weather(first.sequence).unwrap();
        assert!(second.sequence > first.sequence);
    }

    #[test]
    fn test_fresh_weather_survives_clock_stepping_back() {
        let shared = SharedState::default();
        shared.publish_weather(weather_at(2));
        let taken = shared.fresh_weather(0).unwrap();

        // the repeated hour at the end of daylight saving time
        shared.publish_weather(weather_at(1));
        let next = shared.fresh_weather(taken.sequence).unwrap();
        assert!(next.weather.captured_at < taken.weather.captured_at);
        assert!(shared.fresh_weather(next.sequence).is_none());
    }

    #[test]
    fn test_seen_within() {
        let mut stat = LastStat::default();
        assert!(!stat.seen_within(Duration::from_secs(60)));
        assert_eq!(stat.last_seen_local(), None);

        stat.last_seen = Some(SystemTime::now() - Duration::from_secs(120));
        assert!(!stat.seen_within(Duration::from_secs(60)));
        assert!(stat.seen_within(Duration::from_secs(300)));
        assert!(stat.last_seen_local().is_some());
    }

    #[test]
    fn test_cursor_seeded_from_last_stat() {
        let stat = LastStat {
            last_history_index: Some(1795),
            ..Default::default()
        };
        let shared = SharedState::new(DeviceIdentity::default(), stat);
        let mut cursor = shared.cursor();
        assert_eq!(cursor.last_index, Some(1795));
        assert_eq!(cursor.outstanding(), None);

        cursor.latest_index = Some(3);
        shared.set_cursor(cursor);
        assert_eq!(shared.cursor().outstanding(), Some(5));
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let shared = Arc::new(SharedState::default());
        let writer = {
            let shared = shared.clone();
            thread::spawn(move || {
                for hour in 0..20 {
                    shared.publish_weather(weather_at(hour));
                    shared.update_last_stat(|s| s.link_quality = Some(hour as u8));
                }
            })
        };
        for _ in 0..50 {
            if let Some(w) = shared.weather() {
                assert!(w.indoor_temperature.current.is_valid());
            }
            let _ = shared.last_stat();
        }
        writer.join().unwrap();
        assert_eq!(shared.last_stat().link_quality, Some(19));
    }
}
