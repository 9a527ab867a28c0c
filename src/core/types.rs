use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use super::{Error, Result};
use crate::protocol::{MemoryArea, DEFAULT_PORT, MAX_READ_WORDS};

/// FINS addressing fields that stay fixed for the lifetime of a connection.
///
/// Node numbers are not configured here: the FINS/TCP handshake assigns them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeAddressing {
    /// Destination network (0 = local network)
    pub dest_network: u8,
    /// Destination unit (0 = CPU unit)
    pub dest_unit: u8,
    /// Source network
    pub source_network: u8,
    /// Source unit
    pub source_unit: u8,
    /// Node number requested during the handshake (0 = let the controller assign)
    pub client_node: u8,
    /// Permissible gateway count
    pub gateway_count: u8,
}

impl Default for NodeAddressing {
    fn default() -> Self {
        NodeAddressing {
            dest_network: 0,
            dest_unit: 0,
            source_network: 0,
            source_unit: 0,
            client_node: 0,
            gateway_count: 0x02,
        }
    }
}

/// How a pallet identifier is stored in controller memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PalletEncoding {
    /// Packed ASCII, two characters per word
    Ascii,
    /// CRC-32 of the pallet text as two words, high word first
    Checksum,
}

/// Width of a counter register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterFormat {
    /// One unsigned word
    Word,
    /// Two-word unsigned integer, low word first on the wire
    DoubleWord,
}

/// A fixed-width packed ASCII field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextField {
    /// Field name used in scan commands
    pub name: String,
    /// First word
    pub word: u16,
    /// Field width in words
    pub width: u16,
}

/// Pallet identifier register
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PalletField {
    /// First word
    pub word: u16,
    /// Field width in words (ASCII encoding only)
    #[serde(default = "default_pallet_width")]
    pub width: u16,
    /// Storage convention
    pub encoding: PalletEncoding,
}

fn default_pallet_width() -> u16 {
    15
}

/// Counter register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterField {
    /// First word
    pub word: u16,
    /// Register width
    pub format: CounterFormat,
}

/// Alert flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertField {
    /// Name reported in alert events
    pub name: String,
    /// Word area holding the flag; read through its bit-access variant
    #[serde(default = "default_alert_area")]
    pub area: MemoryArea,
    /// Word offset
    pub word: u16,
    /// Bit offset (0..=15)
    pub bit: u8,
}

fn default_alert_area() -> MemoryArea {
    MemoryArea::WorkWord
}

/// Registers polled on, and written to, one controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterMap {
    /// Word area holding job, pallet, counters and job details
    pub area: MemoryArea,
    /// First of the two job-number words
    pub job: Option<u16>,
    /// Pallet identifier
    pub pallet: Option<PalletField>,
    /// Sheet counter
    pub sheets: Option<CounterField>,
    /// Downtime counter, in seconds
    pub downtime: Option<CounterField>,
    /// Alert flags
    pub alerts: Vec<AlertField>,
    /// Job detail text fields shown on the operator panel
    pub job_details: Vec<TextField>,
}

impl Default for RegisterMap {
    fn default() -> Self {
        RegisterMap {
            area: MemoryArea::DataMemoryWord,
            job: None,
            pallet: None,
            sheets: None,
            downtime: None,
            alerts: Vec::new(),
            job_details: Vec::new(),
        }
    }
}

impl RegisterMap {
    /// Checks widths, bit offsets and name uniqueness
    pub fn validate(&self) -> Result<()> {
        if self.area.is_bit_access() {
            return Err(Error::config(format!(
                "register area {:?} must be a word area",
                self.area
            )));
        }

        if let Some(pallet) = &self.pallet {
            if pallet.encoding == PalletEncoding::Ascii {
                check_width("pallet", pallet.width)?;
            }
        }

        let mut names = HashSet::new();
        for alert in &self.alerts {
            if alert.bit > 15 {
                return Err(Error::config(format!(
                    "alert '{}' bit {} out of range 0..=15",
                    alert.name, alert.bit
                )));
            }
            if alert.area.bit_area().is_none() {
                return Err(Error::config(format!(
                    "alert '{}' area {:?} has no bit access",
                    alert.name, alert.area
                )));
            }
            if !names.insert(alert.name.as_str()) {
                return Err(Error::config(format!("duplicate alert '{}'", alert.name)));
            }
        }

        let mut names = HashSet::new();
        for field in &self.job_details {
            check_width(&field.name, field.width)?;
            if !names.insert(field.name.as_str()) {
                return Err(Error::config(format!("duplicate job detail '{}'", field.name)));
            }
        }

        Ok(())
    }
}

fn check_width(name: &str, width: u16) -> Result<()> {
    if width == 0 || width > MAX_READ_WORDS {
        return Err(Error::config(format!(
            "field '{}' width {} outside 1..={}",
            name, width, MAX_READ_WORDS
        )));
    }
    Ok(())
}

/// Configuration for one controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Session name used in events and logs
    pub name: String,
    /// Host name or IP address
    pub host: String,
    /// FINS/TCP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bound on connect and on every request/response round trip
    #[serde(default = "default_timeout")]
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub timeout: Duration,
    /// FINS addressing
    #[serde(default)]
    pub addressing: NodeAddressing,
    /// Registers on this controller
    #[serde(default)]
    pub registers: RegisterMap,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout() -> Duration {
    Duration::from_secs(2)
}

impl ControllerConfig {
    /// Creates a controller entry with default port, timeout and no registers
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        ControllerConfig {
            name: name.into(),
            host: host.into(),
            port: default_port(),
            timeout: default_timeout(),
            addressing: NodeAddressing::default(),
            registers: RegisterMap::default(),
        }
    }

    /// Returns `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Checks the controller entry
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("controller name cannot be empty"));
        }
        if self.host.is_empty() {
            return Err(Error::config(format!("controller '{}' has no host", self.name)));
        }
        if self.port == 0 {
            return Err(Error::config(format!("controller '{}' port cannot be zero", self.name)));
        }
        if self.timeout.is_zero() {
            return Err(Error::config(format!(
                "controller '{}' timeout must be greater than zero",
                self.name
            )));
        }
        self.registers.validate()
    }
}

/// Configuration for the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Controllers to poll
    pub controllers: Vec<ControllerConfig>,
    /// Time between poll ticks
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub poll_interval: Duration,
    /// Capacity of the event queue
    pub event_buffer: usize,
    /// Capacity of the scan command queue
    pub command_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            controllers: Vec::new(),
            poll_interval: Duration::from_secs(2),
            event_buffer: 256,
            command_buffer: 16,
        }
    }
}

impl Config {
    /// Checks every controller and the loop settings
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::config("poll interval must be greater than zero"));
        }
        if self.event_buffer == 0 || self.command_buffer == 0 {
            return Err(Error::config("queue capacities must be greater than zero"));
        }

        let mut names = HashSet::new();
        for controller in &self.controllers {
            controller.validate()?;
            if !names.insert(controller.name.as_str()) {
                return Err(Error::config(format!(
                    "duplicate controller '{}'",
                    controller.name
                )));
            }
        }
        Ok(())
    }
}
