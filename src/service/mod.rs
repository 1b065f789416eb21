//! Polling loop and caller-facing handle
//!
//! One dedicated thread owns the transceiver and runs the poller; any number
//! of async callers talk to it through a [`Station`].

pub mod poller;
pub mod station;

pub use self::poller::{Poller, Responder, Submission};
pub use self::station::Station;

use crate::core::Result;
use crate::protocol::CurrentWeather;

/// Narrow driver interface for a data-collection host
pub trait WeatherDriver {
    /// Makes the driver ready to deliver packets
    fn open(&mut self) -> Result<()>;

    /// Releases the hardware
    fn close(&mut self) -> Result<()>;

    /// The newest observation not yet delivered, if any
    fn poll_packet(&mut self) -> Result<Option<CurrentWeather>>;
}
