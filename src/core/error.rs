use std::io;
use std::time::Duration;
use thiserror::Error;

/// Error types for the FINS bridge
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Controller rejected command {command:#06x} with end code {end_code:#06x}")]
    Protocol { command: u16, end_code: u16 },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new not-connected error
    pub fn not_connected(msg: impl Into<String>) -> Self {
        Error::NotConnected(msg.into())
    }

    /// Creates a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }

    /// Creates a new malformed frame error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedFrame(msg.into())
    }

    /// Creates a new busy error
    pub fn busy(msg: impl Into<String>) -> Self {
        Error::Busy(msg.into())
    }

    /// Creates a new encoding error
    pub fn encoding(msg: impl Into<String>) -> Self {
        Error::Encoding(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new channel error
    pub fn channel(msg: impl Into<String>) -> Self {
        Error::Channel(msg.into())
    }

    /// Whether the connection that produced this error can no longer be used.
    ///
    /// Explicit controller rejections leave the byte stream in sync, so the
    /// channel survives them. Everything that may have desynchronised the
    /// stream does not.
    pub fn is_fatal_to_channel(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::NotConnected(_)
                | Error::Transport(_)
                | Error::Timeout(_)
                | Error::MalformedFrame(_)
        )
    }
}
