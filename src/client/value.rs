//! Typed register values
//!
//! Multi-word numerics are stored with their words in reverse order: the
//! least significant word sits at the lowest address, while each word keeps
//! its own bytes big-endian. Text is packed two Latin-1 characters per word
//! and is never reversed.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::{Error, Result};
use crate::register::ascii::{pack_text, unpack_text};

/// Interpretation of a run of words
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// INT, one word
    Int16,
    /// DINT, two words
    Int32,
    /// LINT, four words
    Int64,
    /// UINT, one word
    UInt16,
    /// UDINT, two words
    UInt32,
    /// ULINT, four words
    UInt64,
    /// REAL, two words
    Real,
    /// LREAL, four words
    LReal,
    /// WORD, one raw word
    Word,
    /// DWORD, two raw words
    DWord,
    /// LWORD, four raw words
    LWord,
    /// Packed text of the given width in words
    Text(u16),
}

impl DataType {
    /// Number of words one value occupies
    pub fn words_per_value(self) -> u16 {
        match self {
            DataType::Int16 | DataType::UInt16 | DataType::Word => 1,
            DataType::Int32 | DataType::UInt32 | DataType::Real | DataType::DWord => 2,
            DataType::Int64 | DataType::UInt64 | DataType::LReal | DataType::LWord => 4,
            DataType::Text(words) => words,
        }
    }

    /// Parses a short type tag such as `"di"` or `"r"`
    pub fn from_tag(tag: &str) -> Result<DataType> {
        match tag {
            "i" => Ok(DataType::Int16),
            "di" => Ok(DataType::Int32),
            "li" => Ok(DataType::Int64),
            "ui" => Ok(DataType::UInt16),
            "udi" => Ok(DataType::UInt32),
            "uli" => Ok(DataType::UInt64),
            "r" => Ok(DataType::Real),
            "l" => Ok(DataType::LReal),
            "w" => Ok(DataType::Word),
            "dw" => Ok(DataType::DWord),
            "lw" => Ok(DataType::LWord),
            other => Err(Error::config(format!("unknown data type tag '{}'", other))),
        }
    }
}

/// A decoded register value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RegisterValue {
    I16(i16),
    I32(i32),
    I64(i64),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    /// Raw 1, 2 or 4 word value, bytes in value order
    Raw(Vec<u8>),
    /// Packed text; an empty string occupies no words
    Text(String),
}

impl RegisterValue {
    /// Returns the type this value is written as
    pub fn data_type(&self) -> Result<DataType> {
        Ok(match self {
            RegisterValue::I16(_) => DataType::Int16,
            RegisterValue::I32(_) => DataType::Int32,
            RegisterValue::I64(_) => DataType::Int64,
            RegisterValue::U16(_) => DataType::UInt16,
            RegisterValue::U32(_) => DataType::UInt32,
            RegisterValue::U64(_) => DataType::UInt64,
            RegisterValue::F32(_) => DataType::Real,
            RegisterValue::F64(_) => DataType::LReal,
            RegisterValue::Raw(bytes) => match bytes.len() {
                2 => DataType::Word,
                4 => DataType::DWord,
                8 => DataType::LWord,
                n => {
                    return Err(Error::encoding(format!(
                        "raw value of {} bytes is not 1, 2 or 4 words",
                        n
                    )))
                }
            },
            RegisterValue::Text(text) => DataType::Text(((text.chars().count() + 1) / 2) as u16),
        })
    }

    /// Returns unsigned integer values widened to u64
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            RegisterValue::U16(v) => Some(v as u64),
            RegisterValue::U32(v) => Some(v as u64),
            RegisterValue::U64(v) => Some(v),
            _ => None,
        }
    }

    /// Bytes in the order they are written
    fn to_wire(&self) -> Result<Vec<u8>> {
        if let RegisterValue::Text(text) = self {
            return Ok(pack_text(text)?.iter().flat_map(|w| w.to_be_bytes()).collect());
        }
        Ok(reverse_word_order(&self.to_be_bytes()))
    }

    fn to_be_bytes(&self) -> Vec<u8> {
        match self {
            RegisterValue::I16(v) => v.to_be_bytes().to_vec(),
            RegisterValue::I32(v) => v.to_be_bytes().to_vec(),
            RegisterValue::I64(v) => v.to_be_bytes().to_vec(),
            RegisterValue::U16(v) => v.to_be_bytes().to_vec(),
            RegisterValue::U32(v) => v.to_be_bytes().to_vec(),
            RegisterValue::U64(v) => v.to_be_bytes().to_vec(),
            RegisterValue::F32(v) => v.to_be_bytes().to_vec(),
            RegisterValue::F64(v) => v.to_be_bytes().to_vec(),
            RegisterValue::Raw(bytes) => bytes.clone(),
            RegisterValue::Text(text) => text.as_bytes().to_vec(),
        }
    }

    /// Decodes one value from the bytes as they were read
    fn from_wire(data_type: DataType, wire: &[u8]) -> RegisterValue {
        match data_type {
            DataType::Text(_) => {
                let words: Vec<u16> = wire
                    .chunks_exact(2)
                    .map(|w| u16::from_be_bytes([w[0], w[1]]))
                    .collect();
                RegisterValue::Text(unpack_text(&words))
            }
            _ => RegisterValue::from_be_bytes(data_type, &reverse_word_order(wire)),
        }
    }

    fn from_be_bytes(data_type: DataType, b: &[u8]) -> RegisterValue {
        match data_type {
            DataType::Int16 => RegisterValue::I16(i16::from_be_bytes([b[0], b[1]])),
            DataType::UInt16 => RegisterValue::U16(u16::from_be_bytes([b[0], b[1]])),
            DataType::Int32 => RegisterValue::I32(i32::from_be_bytes([b[0], b[1], b[2], b[3]])),
            DataType::UInt32 => RegisterValue::U32(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
            DataType::Real => RegisterValue::F32(f32::from_be_bytes([b[0], b[1], b[2], b[3]])),
            DataType::Int64 => RegisterValue::I64(i64::from_be_bytes(eight(b))),
            DataType::UInt64 => RegisterValue::U64(u64::from_be_bytes(eight(b))),
            DataType::LReal => RegisterValue::F64(f64::from_be_bytes(eight(b))),
            DataType::Word | DataType::DWord | DataType::LWord => RegisterValue::Raw(b.to_vec()),
            DataType::Text(_) => RegisterValue::Text(String::from_utf8_lossy(b).into_owned()),
        }
    }
}

fn eight(b: &[u8]) -> [u8; 8] {
    [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::I16(v) => write!(f, "{}", v),
            RegisterValue::I32(v) => write!(f, "{}", v),
            RegisterValue::I64(v) => write!(f, "{}", v),
            RegisterValue::U16(v) => write!(f, "{}", v),
            RegisterValue::U32(v) => write!(f, "{}", v),
            RegisterValue::U64(v) => write!(f, "{}", v),
            RegisterValue::F32(v) => write!(f, "{}", v),
            RegisterValue::F64(v) => write!(f, "{}", v),
            RegisterValue::Raw(bytes) => {
                write!(f, "0x")?;
                for b in bytes {
                    write!(f, "{:02X}", b)?;
                }
                Ok(())
            }
            RegisterValue::Text(text) => write!(f, "{}", text),
        }
    }
}

/// Reverses the order of the 2-byte words in `data`, keeping each word's bytes
pub fn reverse_word_order(data: &[u8]) -> Vec<u8> {
    data.chunks(2).rev().flatten().copied().collect()
}

/// Lays out values for a write; returns the bytes and the word count
pub fn encode_values(values: &[RegisterValue]) -> Result<(Vec<u8>, u16)> {
    let mut bytes = Vec::new();
    let mut words: u32 = 0;
    for value in values {
        words += value.data_type()?.words_per_value() as u32;
        bytes.extend(value.to_wire()?);
    }
    let words = u16::try_from(words)
        .map_err(|_| Error::encoding(format!("{} words do not fit in one write", words)))?;
    Ok((bytes, words))
}

/// Splits read data into `count` values of `data_type`
pub fn decode_values(data: &[u8], data_type: DataType, count: u16) -> Result<Vec<RegisterValue>> {
    let value_len = data_type.words_per_value() as usize * 2;
    let expected = value_len * count as usize;
    if data.len() != expected {
        return Err(Error::malformed(format!(
            "expected {} bytes for {} x {:?}, got {}",
            expected,
            count,
            data_type,
            data.len()
        )));
    }

    Ok(data
        .chunks(value_len)
        .map(|chunk| RegisterValue::from_wire(data_type, chunk))
        .collect())
}
