//! Transceiver transport boundary
//!
//! The USB link to the transceiver is an abstract duplex control-transfer
//! channel. Every operation either succeeds with data of the expected fixed
//! length or fails; the poller treats failures as transient while bring-up
//! treats them as fatal.

pub mod console;
pub mod mock;

pub use self::console::{ConsoleHandle, ConsoleReadings, SimulatedConsole};
pub use self::mock::{MockEvent, MockTransport};

use crate::core::Result;

/// Status byte reported when a received frame is waiting
pub const STATE_FRAME_READY: u8 = 0x16;

/// Largest payload a single control transfer carries
pub const MAX_FRAME_LEN: usize = 0x111;

/// Hardware abstraction for the USB radio transceiver
pub trait Transport: Send {
    /// Claims the device
    fn open(&mut self) -> Result<()>;

    /// Releases the device
    fn close(&mut self) -> Result<()>;

    /// Switches the radio to receive mode
    fn set_rx(&mut self) -> Result<()>;

    /// Switches the radio to transmit mode, sending the loaded frame or preamble
    fn set_tx(&mut self) -> Result<()>;

    /// Reads the 2-byte transceiver state
    fn get_state(&mut self) -> Result<[u8; 2]>;

    /// Reads the pending received frame
    fn get_frame(&mut self) -> Result<Vec<u8>>;

    /// Loads a frame for transmission
    fn set_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Reads `len` bytes of configuration flash
    fn read_flash(&mut self, address: u16, len: usize) -> Result<Vec<u8>>;

    /// Writes one radio chip register
    fn write_register(&mut self, address: u8, value: u8) -> Result<()>;

    /// Runs a transceiver firmware command
    fn execute(&mut self, command: u8) -> Result<()>;

    /// Sets the byte broadcast as preamble
    fn set_preamble_pattern(&mut self, pattern: u8) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn set_rx(&mut self) -> Result<()> {
        (**self).set_rx()
    }

    fn set_tx(&mut self) -> Result<()> {
        (**self).set_tx()
    }

    fn get_state(&mut self) -> Result<[u8; 2]> {
        (**self).get_state()
    }

    fn get_frame(&mut self) -> Result<Vec<u8>> {
        (**self).get_frame()
    }

    fn set_frame(&mut self, frame: &[u8]) -> Result<()> {
        (**self).set_frame(frame)
    }

    fn read_flash(&mut self, address: u16, len: usize) -> Result<Vec<u8>> {
        (**self).read_flash(address, len)
    }

    fn write_register(&mut self, address: u8, value: u8) -> Result<()> {
        (**self).write_register(address, value)
    }

    fn execute(&mut self, command: u8) -> Result<()> {
        (**self).execute(command)
    }

    fn set_preamble_pattern(&mut self, pattern: u8) -> Result<()> {
        (**self).set_preamble_pattern(pattern)
    }
}
