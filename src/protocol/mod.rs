//! Protocol implementation module
//!
//! This module defines FINS command codes, memory areas, the command and
//! response frame layout, and the FINS/TCP envelope codec.

pub mod codec;
pub mod command;
pub mod frame;

pub use self::codec::{Envelope, EnvelopeCommand, FinsTcpCodec};
pub use self::command::{Address, CommandCode, EmBank, MemoryArea};
pub use self::frame::{CommandFrame, EndCode, FrameCodec, Header, ResponseFrame};

// Constants
/// Maximum envelope length accepted from a controller
pub const MAX_FRAME_SIZE: usize = 2048;

/// FINS/TCP envelope magic
pub const TCP_MAGIC: [u8; 4] = *b"FINS";

/// Default port for FINS communication
pub const DEFAULT_PORT: u16 = 9600;

/// Largest word count a single memory area read may request
pub const MAX_READ_WORDS: u16 = 999;
