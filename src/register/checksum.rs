//! CRC-32 pallet identifiers
//!
//! Some deployments store a pallet as the CRC-32 of its text in two words,
//! high word first, instead of the packed text itself.

use crc::{Crc, CRC_32_ISO_HDLC};

const PALLET_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32 of the pallet text
pub fn pallet_checksum(text: &str) -> u32 {
    PALLET_CRC.checksum(text.as_bytes())
}

/// Splits a checksum into high and low words
pub fn checksum_words(checksum: u32) -> [u16; 2] {
    [(checksum >> 16) as u16, checksum as u16]
}

/// Rebuilds a checksum from high and low words
pub fn words_to_checksum(words: [u16; 2]) -> u32 {
    (words[0] as u32) << 16 | words[1] as u32
}

/// Display form of a stored checksum
pub fn format_checksum(checksum: u32) -> String {
    format!("{:08X}", checksum)
}
