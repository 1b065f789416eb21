//! Radio configuration and transceiver bring-up
//!
//! Bring-up reads the transceiver's identity and frequency correction from its
//! flash, programs the radio chip and leaves it listening. Nothing here is
//! retried: any failure aborts startup with [`Error::BringUp`].

pub mod registers;

pub use self::registers::{frequency_word, tuned_registers, REGISTERS};

use tracing::{debug, info};

use crate::core::{DeviceIdentity, Error, FrequencyBand, Result, TransceiverSettings};
use crate::transport::Transport;

/// Flash address of the 7-byte serial number
pub const FLASH_SERIAL_ADDRESS: u16 = 0x1F9;

/// Flash address of the 4-byte frequency correction
pub const FLASH_CORRECTION_ADDRESS: u16 = 0x1F5;

/// Transceiver command that latches the register set
pub const CMD_APPLY_REGISTERS: u8 = 5;

/// Byte broadcast as preamble
pub const PREAMBLE_PATTERN: u8 = 0xAA;

/// Renders the serial number and extracts the transceiver ID
///
/// Every byte becomes two decimal digits; bytes 5 and 6 are the big-endian ID.
pub fn parse_serial(bytes: &[u8]) -> Result<(String, u16)> {
    if bytes.len() != 7 {
        return Err(Error::bring_up(format!("serial block has {} bytes, expected 7", bytes.len())));
    }
    let serial = bytes.iter().map(|b| format!("{:02}", b)).collect::<String>();
    let id = u16::from_be_bytes([bytes[5], bytes[6]]);
    Ok((serial, id))
}

/// Decodes the signed frequency correction
pub fn parse_correction(bytes: &[u8]) -> Result<i32> {
    match bytes {
        [a, b, c, d] => Ok(i32::from_be_bytes([*a, *b, *c, *d])),
        _ => Err(Error::bring_up(format!("correction block has {} bytes, expected 4", bytes.len()))),
    }
}

fn fatal(step: &str) -> impl FnOnce(Error) -> Error + '_ {
    move |e| match e {
        Error::BringUp(_) => e,
        other => Error::bring_up(format!("{}: {}", step, other)),
    }
}

/// Opens and programs the transceiver
pub fn bring_up<T: Transport + ?Sized>(
    transport: &mut T,
    band: FrequencyBand,
) -> Result<(DeviceIdentity, TransceiverSettings)> {
    transport.open().map_err(fatal("open"))?;

    let serial_bytes = transport
        .read_flash(FLASH_SERIAL_ADDRESS, 7)
        .map_err(fatal("read serial"))?;
    let (serial, transceiver_id) = parse_serial(&serial_bytes)?;

    let correction_bytes = transport
        .read_flash(FLASH_CORRECTION_ADDRESS, 4)
        .map_err(fatal("read frequency correction"))?;
    let frequency_correction = parse_correction(&correction_bytes)?;

    let settings = TransceiverSettings {
        band,
        frequency_correction,
        ..Default::default()
    };
    debug!(
        "Tuning to {} Hz (base {}, correction {})",
        settings.frequency(),
        settings.base_frequency(),
        frequency_correction
    );

    for (address, value) in tuned_registers(settings.frequency()) {
        transport
            .write_register(address, value)
            .map_err(fatal("write register"))?;
    }
    transport.execute(CMD_APPLY_REGISTERS).map_err(fatal("apply registers"))?;
    transport
        .set_preamble_pattern(PREAMBLE_PATTERN)
        .map_err(fatal("set preamble"))?;
    transport.set_rx().map_err(fatal("enter receive mode"))?;

    info!("Transceiver {} (id 0x{:04x}) ready", serial, transceiver_id);
    Ok((DeviceIdentity::from_flash(serial, transceiver_id), settings))
}
