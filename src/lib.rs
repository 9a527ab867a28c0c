//! FINS bridge: polling and register conventions for Omron controllers
//!
//! This library talks FINS over TCP to production-floor controllers, packs
//! job numbers, pallet identifiers and operator text into register words, and
//! turns periodic reads into typed change events.

pub mod client;
pub mod core;
pub mod network;
pub mod protocol;
pub mod register;
pub mod session;
pub mod util;

// Re-export commonly used items
pub use crate::client::{ControlClient, DataType, MemoryAreaClient, RegisterValue};
pub use crate::core::{Config, ControllerConfig, Error, Result};
pub use crate::network::CommandChannel;
pub use crate::protocol::{Address, CommandCode, MemoryArea};
pub use crate::register::RegisterCodec;
pub use crate::session::{
    CommandSender, DeviceSession, EventKind, PollEvent, PollLoop, ScanCommand, SessionState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
