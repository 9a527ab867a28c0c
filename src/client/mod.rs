//! Client module
//!
//! Typed memory access and controller operation commands built on a
//! [`CommandChannel`](crate::network::CommandChannel).

pub mod control;
pub mod memory;
pub mod value;

pub use self::control::{
    ControlClient, CpuStatus, CpuUnitData, OperatingMode, ProgramBlock, RunMode, DEFAULT_PROGRAM_BLOCK,
    MAX_PROGRAM_BLOCK,
};
pub use self::memory::MemoryAreaClient;
pub use self::value::{decode_values, encode_values, reverse_word_order, DataType, RegisterValue};
