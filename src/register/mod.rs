//! Register conventions
//!
//! This module packs site data into controller words: decimal-split job
//! numbers, packed ASCII fields, CRC-32 pallet identifiers and single-bit
//! flags. [`RegisterCodec`] applies them over a memory area client.

pub mod ascii;
pub mod checksum;
pub mod job;

pub use self::ascii::{pack_field, pack_text, unpack_text};
pub use self::checksum::{checksum_words, format_checksum, pallet_checksum, words_to_checksum};
pub use self::job::{join_job, split_job, MAX_JOB};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::client::{DataType, MemoryAreaClient, RegisterValue};
use crate::core::{CounterField, CounterFormat, Error, PalletEncoding, PalletField, Result};
use crate::network::CommandChannel;
use crate::protocol::{Address, MemoryArea};

/// Reads and writes site fields in one word area
pub struct RegisterCodec<'a, S = TcpStream> {
    memory: MemoryAreaClient<'a, S>,
    area: MemoryArea,
}

impl<'a, S> RegisterCodec<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a codec for fields in `area`
    pub fn new(channel: &'a mut CommandChannel<S>, area: MemoryArea) -> Self {
        RegisterCodec {
            memory: MemoryAreaClient::new(channel),
            area,
        }
    }

    fn address(&self, word: u16) -> Address {
        Address::word(self.area, word)
    }

    /// Reads a job number; `None` when both words are zero
    pub async fn read_job(&mut self, word: u16) -> Result<Option<u32>> {
        let words = self.memory.read_words(self.address(word), 2).await?;
        join_job([words[0], words[1]])
    }

    /// Writes a job number
    pub async fn write_job(&mut self, word: u16, value: u32) -> Result<()> {
        let words = split_job(value)?;
        self.memory.write_words(self.address(word), &words).await
    }

    /// Reads a packed ASCII field of `width` words
    pub async fn read_text(&mut self, word: u16, width: u16) -> Result<String> {
        let words = self.memory.read_words(self.address(word), width).await?;
        Ok(unpack_text(&words))
    }

    /// Writes `text` across the full width of a field
    pub async fn write_text(&mut self, word: u16, width: u16, text: &str) -> Result<()> {
        let words = pack_field(text, width)?;
        self.memory.write_words(self.address(word), &words).await
    }

    /// Writes pre-packed words starting at `word`
    pub async fn write_words(&mut self, word: u16, words: &[u16]) -> Result<()> {
        self.memory.write_words(self.address(word), words).await
    }

    /// Writes zeros across the full width of a field
    pub async fn clear_field(&mut self, word: u16, width: u16) -> Result<()> {
        let zeros = vec![0u16; width as usize];
        self.memory.write_words(self.address(word), &zeros).await
    }

    /// Reads a flag through the bit-access variant of `area`
    pub async fn read_flag(&mut self, area: MemoryArea, word: u16, bit: u8) -> Result<bool> {
        self.memory.read_bit(area, word, bit).await
    }

    /// Sets or clears a flag
    pub async fn write_flag(&mut self, area: MemoryArea, word: u16, bit: u8, active: bool) -> Result<()> {
        self.memory.write_bit(area, word, bit, active).await
    }

    /// Reads a pallet identifier; `None` when the field is empty
    pub async fn read_pallet(&mut self, field: &PalletField) -> Result<Option<String>> {
        let text = match field.encoding {
            PalletEncoding::Ascii => self.read_text(field.word, field.width).await?,
            PalletEncoding::Checksum => {
                let words = self.memory.read_words(self.address(field.word), 2).await?;
                match words_to_checksum([words[0], words[1]]) {
                    0 => String::new(),
                    checksum => format_checksum(checksum),
                }
            }
        };
        Ok(if text.is_empty() { None } else { Some(text) })
    }

    /// Writes a pallet identifier using the field's encoding
    pub async fn write_pallet(&mut self, field: &PalletField, text: &str) -> Result<()> {
        match field.encoding {
            PalletEncoding::Ascii => self.write_text(field.word, field.width, text).await,
            PalletEncoding::Checksum => {
                if !text.is_ascii() {
                    return Err(Error::encoding(format!(
                        "pallet '{}' contains non-ASCII characters",
                        text
                    )));
                }
                let words = checksum_words(pallet_checksum(text));
                self.memory.write_words(self.address(field.word), &words).await
            }
        }
    }

    /// Reads a counter
    pub async fn read_counter(&mut self, field: &CounterField) -> Result<u32> {
        let address = self.address(field.word);
        match field.format {
            CounterFormat::Word => {
                let words = self.memory.read_words(address, 1).await?;
                Ok(words[0] as u32)
            }
            CounterFormat::DoubleWord => match self.memory.read_value(address, DataType::UInt32).await? {
                RegisterValue::U32(value) => Ok(value),
                other => Err(Error::malformed(format!("unexpected counter value {:?}", other))),
            },
        }
    }
}
