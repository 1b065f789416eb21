//! Configuration checksum
//!
//! The console sums the first 39 bytes of its configuration block, adds 7 and
//! keeps the low 16 bits. The same value travels in every acknowledgement as a
//! correlation token and is compared against the console's copy to detect drift.

/// Bytes of the configuration block covered by the checksum
pub const CHECKSUM_SPAN: usize = 39;

/// Constant added to the byte sum
pub const CHECKSUM_BIAS: u16 = 7;

/// Computes the configuration checksum over the covered span
pub fn config_checksum(block: &[u8]) -> u16 {
    block
        .iter()
        .take(CHECKSUM_SPAN)
        .fold(CHECKSUM_BIAS, |acc, b| acc.wrapping_add(*b as u16))
}

/// Reads a big-endian 16-bit value
pub fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}
