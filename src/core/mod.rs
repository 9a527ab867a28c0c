//! Core types shared across the crate
//!
//! This module contains the error type and the configuration records that
//! describe controllers and the registers polled on them.

pub mod error;
pub mod serde;
pub mod types;

pub use self::error::{Error, Result};
pub use self::types::{
    AlertField,
    Config,
    ControllerConfig,
    CounterField,
    CounterFormat,
    NodeAddressing,
    PalletEncoding,
    PalletField,
    RegisterMap,
    TextField,
};
