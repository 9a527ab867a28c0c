use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use super::value::{decode_values, encode_values, DataType, RegisterValue};
use crate::core::{Error, Result};
use crate::network::CommandChannel;
use crate::protocol::{Address, CommandCode, MemoryArea, MAX_READ_WORDS};

/// Memory area reads and writes over a borrowed channel
pub struct MemoryAreaClient<'a, S = TcpStream> {
    channel: &'a mut CommandChannel<S>,
}

impl<'a, S> MemoryAreaClient<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a client borrowing `channel` for its lifetime
    pub fn new(channel: &'a mut CommandChannel<S>) -> Self {
        MemoryAreaClient { channel }
    }

    /// Reads `count` items starting at `address`; returns the raw item bytes
    pub async fn read(&mut self, address: Address, count: u16) -> Result<Bytes> {
        check_count(count)?;

        let mut body = Vec::with_capacity(6);
        body.extend_from_slice(&address.to_bytes());
        body.extend_from_slice(&count.to_be_bytes());

        let response = self.channel.execute(CommandCode::MemoryAreaRead, &body).await?;

        let expected = count as usize * address.area.item_size();
        if response.body.len() < expected {
            return Err(Error::malformed(format!(
                "read of {} items at {} returned {} bytes, expected {}",
                count,
                address,
                response.body.len(),
                expected
            )));
        }
        debug!("Read {} items at {}", count, address);
        Ok(response.body.slice(..expected))
    }

    /// Reads `count` words starting at `address`
    pub async fn read_words(&mut self, address: Address, count: u16) -> Result<Vec<u16>> {
        let data = self.read(address, count).await?;
        Ok(data
            .chunks_exact(2)
            .map(|w| u16::from_be_bytes([w[0], w[1]]))
            .collect())
    }

    /// Writes `count` items of `data` starting at `address`
    pub async fn write(&mut self, address: Address, data: &[u8], count: u16) -> Result<()> {
        check_count(count)?;
        let expected = count as usize * address.area.item_size();
        if data.len() != expected {
            return Err(Error::encoding(format!(
                "{} bytes of data for {} items at {}, expected {}",
                data.len(),
                count,
                address,
                expected
            )));
        }

        let mut body = Vec::with_capacity(6 + data.len());
        body.extend_from_slice(&address.to_bytes());
        body.extend_from_slice(&count.to_be_bytes());
        body.extend_from_slice(data);

        self.channel.execute(CommandCode::MemoryAreaWrite, &body).await?;
        debug!("Wrote {} items at {}", count, address);
        Ok(())
    }

    /// Writes words starting at `address`
    pub async fn write_words(&mut self, address: Address, words: &[u16]) -> Result<()> {
        let count = u16::try_from(words.len())
            .map_err(|_| Error::encoding(format!("{} words in one write", words.len())))?;
        let data: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
        self.write(address, &data, count).await
    }

    /// Reads one bit through the bit-access variant of `area`
    pub async fn read_bit(&mut self, area: MemoryArea, word: u16, bit: u8) -> Result<bool> {
        let address = Address::bit(area, word, bit)?;
        let data = self.read(address, 1).await?;
        Ok(data[0] & 0x01 == 0x01)
    }

    /// Writes one bit through the bit-access variant of `area`
    pub async fn write_bit(&mut self, area: MemoryArea, word: u16, bit: u8, value: bool) -> Result<()> {
        let address = Address::bit(area, word, bit)?;
        self.write(address, &[value as u8], 1).await
    }

    /// Reads `count` consecutive values of `data_type`
    pub async fn read_values(
        &mut self,
        address: Address,
        data_type: DataType,
        count: u16,
    ) -> Result<Vec<RegisterValue>> {
        let words = count
            .checked_mul(data_type.words_per_value())
            .ok_or_else(|| Error::encoding(format!("{} x {:?} is too many words", count, data_type)))?;
        let data = self.read(address, words).await?;
        decode_values(&data, data_type, count)
    }

    /// Reads a single value of `data_type`
    pub async fn read_value(&mut self, address: Address, data_type: DataType) -> Result<RegisterValue> {
        let mut values = self.read_values(address, data_type, 1).await?;
        values
            .pop()
            .ok_or_else(|| Error::malformed(format!("no value read at {}", address)))
    }

    /// Writes consecutive values starting at `address`
    ///
    /// Values that occupy no words, such as empty text, leave the controller
    /// untouched and no request is sent.
    pub async fn write_values(&mut self, address: Address, values: &[RegisterValue]) -> Result<()> {
        let (data, words) = encode_values(values)?;
        if words == 0 && !values.is_empty() {
            debug!("Nothing to write at {}", address);
            return Ok(());
        }
        self.write(address, &data, words).await
    }

    /// Writes a single value
    pub async fn write_value(&mut self, address: Address, value: &RegisterValue) -> Result<()> {
        self.write_values(address, std::slice::from_ref(value)).await
    }

    /// Reads values using an area tag (`w`, `c`, `d`, `h`) and a type tag (`di`, `r`, ...)
    pub async fn read_tagged(
        &mut self,
        area_tag: char,
        word: u16,
        type_tag: &str,
        count: u16,
    ) -> Result<Vec<RegisterValue>> {
        let address = Address::word(MemoryArea::from_tag(area_tag)?, word);
        self.read_values(address, DataType::from_tag(type_tag)?, count).await
    }

    /// Writes values using an area tag; each value's own type decides its width
    pub async fn write_tagged(
        &mut self,
        area_tag: char,
        word: u16,
        values: &[RegisterValue],
    ) -> Result<()> {
        let address = Address::word(MemoryArea::from_tag(area_tag)?, word);
        self.write_values(address, values).await
    }
}

fn check_count(count: u16) -> Result<()> {
    if count == 0 || count > MAX_READ_WORDS {
        return Err(Error::encoding(format!(
            "item count {} outside 1..={}",
            count, MAX_READ_WORDS
        )));
    }
    Ok(())
}
