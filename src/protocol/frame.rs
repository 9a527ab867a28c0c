//! FINS command/response frames and their byte layout
//!
//! A command frame is a 10-byte addressing header, a 2-byte command code and
//! a variable body. A response frame carries the same header and command
//! code followed by a 2-byte end code and the body.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

use super::command::CommandCode;
use crate::core::{Error, Result};

/// Size of the addressing header
pub const HEADER_LEN: usize = 10;

/// Smallest valid response: header + command code + end code
pub const MIN_RESPONSE_LEN: usize = HEADER_LEN + 4;

/// FINS addressing header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    /// Information control field
    pub icf: u8,
    /// Reserved
    pub rsv: u8,
    /// Permissible gateway count
    pub gct: u8,
    /// Destination network
    pub dna: u8,
    /// Destination node
    pub da1: u8,
    /// Destination unit
    pub da2: u8,
    /// Source network
    pub sna: u8,
    /// Source node
    pub sa1: u8,
    /// Source unit
    pub sa2: u8,
    /// Service id
    pub sid: u8,
}

impl Header {
    fn put(&self, dst: &mut BytesMut) {
        dst.put_slice(&[
            self.icf, self.rsv, self.gct, self.dna, self.da1, self.da2, self.sna, self.sa1,
            self.sa2, self.sid,
        ]);
    }

    fn parse(src: &[u8]) -> Header {
        Header {
            icf: src[0],
            rsv: src[1],
            gct: src[2],
            dna: src[3],
            da1: src[4],
            da2: src[5],
            sna: src[6],
            sa1: src[7],
            sa2: src[8],
            sid: src[9],
        }
    }
}

/// Response status word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndCode(pub u16);

impl EndCode {
    pub const NORMAL_COMPLETION: EndCode = EndCode(0x0000);
    pub const SERVICE_CANCELLED: EndCode = EndCode(0x0001);

    /// Whether the controller completed the request
    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Main response code (error class)
    pub fn main_code(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Sub response code
    pub fn sub_code(self) -> u8 {
        self.0 as u8
    }
}

impl fmt::Display for EndCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.main_code(), self.sub_code())
    }
}

/// Outgoing command frame
#[derive(Debug, Clone, PartialEq)]
pub struct CommandFrame {
    pub header: Header,
    pub command: CommandCode,
    pub body: Bytes,
}

/// Incoming response frame
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFrame {
    pub header: Header,
    pub command_code: u16,
    pub end_code: EndCode,
    pub body: Bytes,
}

impl ResponseFrame {
    /// Turns a non-zero end code into a protocol error
    pub fn check(self) -> Result<ResponseFrame> {
        if self.end_code.is_success() {
            Ok(self)
        } else {
            Err(Error::Protocol {
                command: self.command_code,
                end_code: self.end_code.0,
            })
        }
    }
}

/// Stateless translation between frames and bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Lays out a command frame
    pub fn encode(frame: &CommandFrame) -> Bytes {
        let mut dst = BytesMut::with_capacity(HEADER_LEN + 2 + frame.body.len());
        frame.header.put(&mut dst);
        dst.put_u16(frame.command.code());
        dst.put_slice(&frame.body);
        dst.freeze()
    }

    /// Parses a response frame; everything after the end code is the body
    pub fn decode(src: &[u8]) -> Result<ResponseFrame> {
        if src.len() < MIN_RESPONSE_LEN {
            return Err(Error::malformed(format!(
                "response of {} bytes is shorter than the {}-byte minimum",
                src.len(),
                MIN_RESPONSE_LEN
            )));
        }

        let header = Header::parse(&src[..HEADER_LEN]);
        let command_code = u16::from_be_bytes([src[10], src[11]]);
        let end_code = EndCode(u16::from_be_bytes([src[12], src[13]]));

        Ok(ResponseFrame {
            header,
            command_code,
            end_code,
            body: Bytes::copy_from_slice(&src[MIN_RESPONSE_LEN..]),
        })
    }
}
