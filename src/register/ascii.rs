//! Packed text fields
//!
//! Two 8-bit characters per word, the first in the high byte. Words stay in
//! natural order. Characters are Latin-1, so every byte read back from a
//! field can be written again.

use crate::core::{Error, Result};

/// One byte per character; characters above U+00FF have no byte
fn latin1_bytes(text: &str) -> Result<Vec<u8>> {
    text.chars()
        .map(|c| {
            u8::try_from(u32::from(c)).map_err(|_| {
                Error::encoding(format!(
                    "'{}' contains {:?}, which does not fit in one byte",
                    text, c
                ))
            })
        })
        .collect()
}

fn pack_bytes(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|pair| match *pair {
            [hi, lo] => u16::from_be_bytes([hi, lo]),
            [hi] => u16::from_be_bytes([hi, 0]),
            _ => 0,
        })
        .collect()
}

/// Packs `text` into ⌈len/2⌉ words
pub fn pack_text(text: &str) -> Result<Vec<u16>> {
    Ok(pack_bytes(&latin1_bytes(text)?))
}

/// Packs `text` into exactly `width` words, truncating or zero padding
pub fn pack_field(text: &str, width: u16) -> Result<Vec<u16>> {
    let mut bytes = latin1_bytes(text)?;
    bytes.truncate(width as usize * 2);

    let mut words = pack_bytes(&bytes);
    words.resize(width as usize, 0);
    Ok(words)
}

/// Unpacks a field: stops at the first zero word, skips zero bytes and
/// trims trailing whitespace
pub fn unpack_text(words: &[u16]) -> String {
    let text: String = words
        .iter()
        .take_while(|&&w| w != 0)
        .flat_map(|w| w.to_be_bytes())
        .filter(|&b| b != 0)
        .map(char::from)
        .collect();
    text.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_text_word_count() {
        assert_eq!(pack_text("").unwrap(), Vec::<u16>::new());
        assert_eq!(pack_text("A").unwrap(), vec![0x4100]);
        assert_eq!(pack_text("AB").unwrap(), vec![0x4142]);
        assert_eq!(pack_text("ABC").unwrap(), vec![0x4142, 0x4300]);
        for len in 0..40 {
            let text = "x".repeat(len);
            assert_eq!(pack_text(&text).unwrap().len(), (len + 1) / 2);
        }
    }

    #[test]
    fn test_pallet_round_trip() {
        let words = pack_field("FRE-39764-147332", 15).unwrap();
        assert_eq!(words.len(), 15);
        assert_eq!(words[0], 0x4652);
        assert_eq!(words[8], 0);
        assert_eq!(unpack_text(&words), "FRE-39764-147332");
    }

    #[test]
    fn test_field_truncation() {
        let words = pack_field("ABCDEFG", 2).unwrap();
        assert_eq!(words, vec![0x4142, 0x4344]);
        assert_eq!(unpack_text(&words), "ABCD");
    }

    #[test]
    fn test_unpack_stops_at_zero_word() {
        assert_eq!(unpack_text(&[0x4142, 0x0000, 0x4344]), "AB");
    }

    #[test]
    fn test_unpack_trims_trailing_whitespace_only() {
        assert_eq!(unpack_text(&pack_text(" CHENE  ").unwrap()), " CHENE");
    }

    #[test]
    fn test_unpack_skips_zero_bytes() {
        assert_eq!(unpack_text(&[0x4100, 0x0042]), "AB");
    }

    #[test]
    fn test_latin1_round_trip() {
        let words = pack_field("Chêne", 5).unwrap();
        assert_eq!(words, vec![0x4368, 0xEA6E, 0x6500, 0, 0]);
        assert_eq!(unpack_text(&words), "Chêne");

        let read_back = unpack_text(&pack_field("Non spécifiée", 15).unwrap());
        assert_eq!(read_back, "Non spécifiée");
        assert_eq!(pack_field(&read_back, 15).unwrap(), pack_field("Non spécifiée", 15).unwrap());
    }

    #[test]
    fn test_truncation_counts_characters() {
        assert_eq!(unpack_text(&pack_field("Tranché", 3).unwrap()), "Tranch");
    }

    #[test]
    fn test_empty_field_is_all_zero() {
        for width in [1u16, 10, 15] {
            let words = pack_field("", width).unwrap();
            assert_eq!(words.len(), width as usize);
            assert!(words.iter().all(|&w| w == 0));
        }
    }

    #[test]
    fn test_wide_characters_rejected() {
        assert!(matches!(pack_text("Œuvre"), Err(Error::Encoding(_))));
        assert!(matches!(pack_field("5 €", 15), Err(Error::Encoding(_))));
    }
}
