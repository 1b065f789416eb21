//! Utility module
//!
//! Wall-clock helpers shared by the engine, the station handle and the demo.

use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local, NaiveDateTime};

/// Current local time without a zone, the way the console keeps it
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Local wall-clock rendering of a system time
pub fn to_local(time: SystemTime) -> NaiveDateTime {
    DateTime::<Local>::from(time).naive_local()
}

/// Time elapsed since `time`, zero if it lies in the future
pub fn age(time: SystemTime) -> Duration {
    SystemTime::now().duration_since(time).unwrap_or(Duration::ZERO)
}
