use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{MAX_FRAME_SIZE, TCP_MAGIC};
use crate::core::Error;

/// Size of the FINS/TCP envelope header: magic, length, command, error code
pub const ENVELOPE_HEADER_LEN: usize = 16;

/// Bytes counted by the length field besides the payload (command + error code)
const LENGTH_OVERHEAD: usize = 8;

/// FINS/TCP envelope commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeCommand {
    /// Client announces its node number (0 asks the server to assign one)
    NodeAddressRequest,
    /// Server answers with client and server node numbers
    NodeAddressResponse,
    /// Carries a FINS frame
    Frame,
    /// Server could not process a frame
    FrameError,
    /// Anything else the server might send
    Other(u32),
}

impl EnvelopeCommand {
    fn code(self) -> u32 {
        match self {
            EnvelopeCommand::NodeAddressRequest => 0,
            EnvelopeCommand::NodeAddressResponse => 1,
            EnvelopeCommand::Frame => 2,
            EnvelopeCommand::FrameError => 3,
            EnvelopeCommand::Other(code) => code,
        }
    }

    fn from_code(code: u32) -> Self {
        match code {
            0 => EnvelopeCommand::NodeAddressRequest,
            1 => EnvelopeCommand::NodeAddressResponse,
            2 => EnvelopeCommand::Frame,
            3 => EnvelopeCommand::FrameError,
            other => EnvelopeCommand::Other(other),
        }
    }
}

/// One FINS/TCP message
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub command: EnvelopeCommand,
    pub error_code: u32,
    pub payload: Bytes,
}

impl Envelope {
    /// Wraps an encoded FINS frame
    pub fn frame(payload: Bytes) -> Self {
        Envelope {
            command: EnvelopeCommand::Frame,
            error_code: 0,
            payload,
        }
    }

    /// Node address request for `client_node` (0 = auto-assign)
    pub fn node_address_request(client_node: u32) -> Self {
        Envelope {
            command: EnvelopeCommand::NodeAddressRequest,
            error_code: 0,
            payload: Bytes::copy_from_slice(&client_node.to_be_bytes()),
        }
    }
}

/// Length-delimited codec for FINS/TCP envelopes
#[derive(Clone, Default)]
pub struct FinsTcpCodec;

impl FinsTcpCodec {
    /// Creates a new envelope codec
    pub fn new() -> Self {
        FinsTcpCodec
    }
}

impl Decoder for FinsTcpCodec {
    type Item = Envelope;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 8 {
            // Need magic and length first
            return Ok(None);
        }

        if src[..4] != TCP_MAGIC {
            return Err(Error::malformed(format!(
                "bad envelope magic {:02X?}",
                &src[..4]
            )));
        }

        let length = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if length < LENGTH_OVERHEAD || length > MAX_FRAME_SIZE {
            return Err(Error::malformed(format!(
                "envelope length {} outside {}..={}",
                length, LENGTH_OVERHEAD, MAX_FRAME_SIZE
            )));
        }

        if src.len() < 8 + length {
            src.reserve(8 + length - src.len());
            return Ok(None);
        }

        src.advance(8);
        let command = EnvelopeCommand::from_code(src.get_u32());
        let error_code = src.get_u32();
        let payload = src.split_to(length - LENGTH_OVERHEAD).freeze();

        Ok(Some(Envelope {
            command,
            error_code,
            payload,
        }))
    }
}

impl Encoder<Envelope> for FinsTcpCodec {
    type Error = Error;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = LENGTH_OVERHEAD + item.payload.len();
        if length > MAX_FRAME_SIZE {
            return Err(Error::malformed(format!(
                "envelope of {} bytes exceeds {}",
                length, MAX_FRAME_SIZE
            )));
        }

        dst.reserve(8 + length);
        dst.put_slice(&TCP_MAGIC);
        dst.put_u32(length as u32);
        dst.put_u32(item.command.code());
        dst.put_u32(item.error_code);
        dst.extend_from_slice(&item.payload);

        Ok(())
    }
}
