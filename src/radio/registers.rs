//! AX5051 register table
//!
//! Values the transceiver needs to talk to the console. The four FREQ
//! registers hold placeholders here; bring-up overwrites them with the
//! corrected frequency word.

pub const IFMODE: u8 = 0x08;
pub const MODULATION: u8 = 0x10;
pub const ENCODING: u8 = 0x11;
pub const FRAMING: u8 = 0x12;
pub const CRCINIT3: u8 = 0x14;
pub const CRCINIT2: u8 = 0x15;
pub const CRCINIT1: u8 = 0x16;
pub const CRCINIT0: u8 = 0x17;
pub const FREQ3: u8 = 0x20;
pub const FREQ2: u8 = 0x21;
pub const FREQ1: u8 = 0x22;
pub const FREQ0: u8 = 0x23;
pub const FSKDEV2: u8 = 0x25;
pub const FSKDEV1: u8 = 0x26;
pub const FSKDEV0: u8 = 0x27;
pub const IFFREQHI: u8 = 0x28;
pub const IFFREQLO: u8 = 0x29;
pub const PLLLOOP: u8 = 0x2C;
pub const PLLRANGING: u8 = 0x2D;
pub const PLLRNGCLK: u8 = 0x2E;
pub const TXPWR: u8 = 0x30;
pub const TXRATEHI: u8 = 0x31;
pub const TXRATEMID: u8 = 0x32;
pub const TXRATELO: u8 = 0x33;
pub const MODMISC: u8 = 0x34;
pub const ADCMISC: u8 = 0x38;
pub const AGCTARGET: u8 = 0x39;
pub const AGCATTACK: u8 = 0x3A;
pub const AGCDECAY: u8 = 0x3B;
pub const CICDEC: u8 = 0x3F;
pub const DATARATEHI: u8 = 0x40;
pub const DATARATELO: u8 = 0x41;
pub const TMGGAINHI: u8 = 0x42;
pub const TMGGAINLO: u8 = 0x43;
pub const PHASEGAIN: u8 = 0x44;
pub const FREQGAIN: u8 = 0x45;
pub const FREQGAIN2: u8 = 0x46;
pub const AMPLGAIN: u8 = 0x47;
pub const SPAREOUT: u8 = 0x60;
pub const TESTOBS: u8 = 0x68;
pub const APEOVER: u8 = 0x70;
pub const TMMUX: u8 = 0x71;
pub const PLLVCOI: u8 = 0x72;
pub const PLLCPEN: u8 = 0x73;
pub const AGCMANUAL: u8 = 0x78;
pub const ADCDCLEVEL: u8 = 0x79;
pub const RFMISC: u8 = 0x7A;
pub const TXDRIVER: u8 = 0x7B;
pub const REF: u8 = 0x7C;
pub const RXMISC: u8 = 0x7D;

/// Register addresses and values written during bring-up, in write order
pub const REGISTERS: [(u8, u8); 50] = [
    (IFMODE, 0x00),
    (MODULATION, 0x41),
    (ENCODING, 0x07),
    (FRAMING, 0x84),
    (CRCINIT3, 0xff),
    (CRCINIT2, 0xff),
    (CRCINIT1, 0xff),
    (CRCINIT0, 0xff),
    (FREQ3, 0x38),
    (FREQ2, 0x90),
    (FREQ1, 0x00),
    (FREQ0, 0x01),
    (FSKDEV2, 0x00),
    (FSKDEV1, 0x31),
    (FSKDEV0, 0x27),
    (IFFREQHI, 0x20),
    (IFFREQLO, 0x00),
    (PLLLOOP, 0x1d),
    (PLLRANGING, 0x08),
    (PLLRNGCLK, 0x03),
    (TXPWR, 0x03),
    (TXRATEHI, 0x00),
    (TXRATEMID, 0x51),
    (TXRATELO, 0xec),
    (MODMISC, 0x03),
    (ADCMISC, 0x01),
    (AGCTARGET, 0x0e),
    (AGCATTACK, 0x11),
    (AGCDECAY, 0x0e),
    (CICDEC, 0x3f),
    (DATARATEHI, 0x19),
    (DATARATELO, 0x66),
    (TMGGAINHI, 0x01),
    (TMGGAINLO, 0x96),
    (PHASEGAIN, 0x03),
    (FREQGAIN, 0x04),
    (FREQGAIN2, 0x0a),
    (AMPLGAIN, 0x06),
    (SPAREOUT, 0x00),
    (TESTOBS, 0x00),
    (APEOVER, 0x00),
    (TMMUX, 0x00),
    (PLLVCOI, 0x01),
    (PLLCPEN, 0x01),
    (AGCMANUAL, 0x00),
    (ADCDCLEVEL, 0x10),
    (RFMISC, 0xb0),
    (TXDRIVER, 0x88),
    (REF, 0x23),
    (RXMISC, 0x35),
];

/// Reference clock of the radio chip in Hz
pub const REFERENCE_CLOCK_HZ: f64 = 16_000_000.0;

/// Converts a carrier frequency to the 32-bit FREQ register word
pub fn frequency_word(hz: u32) -> u32 {
    (hz as f64 / REFERENCE_CLOCK_HZ * 16_777_216.0) as u32
}

/// Register table with the FREQ registers set for `hz`
pub fn tuned_registers(hz: u32) -> Vec<(u8, u8)> {
    let word = frequency_word(hz).to_be_bytes();
    REGISTERS
        .iter()
        .map(|&(address, value)| match address {
            FREQ3 => (address, word[0]),
            FREQ2 => (address, word[1]),
            FREQ1 => (address, word[2]),
            FREQ0 => (address, word[3]),
            _ => (address, value),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_has_unique_addresses() {
        let mut seen = std::collections::HashSet::new();
        for (address, _) in REGISTERS.iter() {
            assert!(seen.insert(*address), "duplicate register 0x{:02x}", address);
        }
    }

    #[test]
    fn test_frequency_word() {
        // 868.3 MHz / 16 MHz * 2^24
        assert_eq!(frequency_word(868_300_000), 0x3644_CCCC);
        assert_eq!(frequency_word(16_000_000), 1 << 24);
    }

    #[test]
    fn test_tuned_registers_override_frequency_only() {
        let tuned = tuned_registers(868_300_000);
        assert_eq!(tuned.len(), REGISTERS.len());
        let get = |reg: u8| tuned.iter().find(|(a, _)| *a == reg).map(|(_, v)| *v);
        assert_eq!(get(FREQ3), Some(0x36));
        assert_eq!(get(FREQ2), Some(0x44));
        assert_eq!(get(FREQ1), Some(0xCC));
        assert_eq!(get(FREQ0), Some(0xCC));
        assert_eq!(get(MODULATION), Some(0x41));
        assert_eq!(get(RXMISC), Some(0x35));
    }
}
