//! Device sessions
//!
//! A [`DeviceSession`] pairs one controller's configuration with its
//! connection and the last values read from it. [`PollLoop`] drives every
//! session.

pub mod poll;

#[cfg(test)]
pub(crate) mod testing;

pub use self::poll::{CommandSender, EventKind, PollEvent, PollLoop, ScanCommand, ANY_SESSION};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::core::{ControllerConfig, Error, RegisterMap, Result, TextField};
use crate::network::CommandChannel;
use crate::protocol::MAX_READ_WORDS;
use crate::register::{pack_field, RegisterCodec};

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
}

/// Values from the last successful read
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LastSeen {
    pub job: Option<u32>,
    pub pallet: Option<String>,
    pub sheets: Option<u32>,
    pub downtime: Option<u32>,
    /// Alert name to active state
    pub alerts: BTreeMap<String, bool>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One value read from a controller
#[derive(Debug, Clone, PartialEq)]
pub enum FieldReading {
    Job(Option<u32>),
    Pallet(Option<String>),
    Sheets(u32),
    Downtime(u32),
    Alert { name: String, active: bool },
    /// Words that do not decode as the field's convention
    Invalid { field: String, reason: String },
}

/// Per-controller connection and state
pub struct DeviceSession {
    config: ControllerConfig,
    state: SessionState,
    channel: Option<CommandChannel>,
    last_seen: LastSeen,
}

impl DeviceSession {
    /// Creates a disconnected session
    pub fn new(config: ControllerConfig) -> Self {
        DeviceSession {
            config,
            state: SessionState::Disconnected,
            channel: None,
            last_seen: LastSeen::default(),
        }
    }

    /// Session name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Controller configuration
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Register map
    pub fn registers(&self) -> &RegisterMap {
        &self.config.registers
    }

    /// Current connection state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session holds a usable channel
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Values from the last successful read
    pub fn last_seen(&self) -> &LastSeen {
        &self.last_seen
    }

    pub(crate) fn last_seen_mut(&mut self) -> &mut LastSeen {
        &mut self.last_seen
    }

    /// Opens a channel; on failure the session stays disconnected
    pub async fn connect(&mut self) -> Result<()> {
        self.state = SessionState::Connecting;
        match CommandChannel::connect(&self.config).await {
            Ok(channel) => {
                self.channel = Some(channel);
                self.state = SessionState::Ready;
                info!("Session '{}' ready", self.config.name);
                Ok(())
            }
            Err(e) => {
                self.channel = None;
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Closes the channel; the last seen values are kept
    pub async fn disconnect(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
        self.state = SessionState::Disconnected;
    }

    /// Drops the channel when `result` failed in a way that leaves it unusable
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal_to_channel() && self.channel.is_some() {
                warn!("Session '{}' lost its channel: {}", self.config.name, e);
                self.channel = None;
                self.state = SessionState::Disconnected;
            }
        }
        result
    }

    /// Borrows the configuration alongside a codec over the open channel
    fn parts(&mut self) -> Result<(&ControllerConfig, RegisterCodec<'_>)> {
        let channel = self.channel.as_mut().ok_or_else(|| {
            Error::not_connected(format!("session '{}' is not connected", self.config.name))
        })?;
        let codec = RegisterCodec::new(channel, self.config.registers.area);
        Ok((&self.config, codec))
    }

    /// Reads every configured register in order: job, pallet, sheet count,
    /// downtime, then alerts. A job register holding out-of-range words is
    /// reported as an invalid reading and the remaining fields are still read.
    pub async fn read_snapshot(&mut self) -> Result<Vec<FieldReading>> {
        let result = self.read_registers().await;
        self.settle(result)
    }

    async fn read_registers(&mut self) -> Result<Vec<FieldReading>> {
        let (config, mut codec) = self.parts()?;
        let registers = &config.registers;
        let mut readings = Vec::new();

        if let Some(word) = registers.job {
            match codec.read_job(word).await {
                Ok(job) => readings.push(FieldReading::Job(job)),
                Err(Error::Encoding(reason)) => readings.push(FieldReading::Invalid {
                    field: "job".to_string(),
                    reason,
                }),
                Err(e) => return Err(e),
            }
        }
        if let Some(pallet) = &registers.pallet {
            readings.push(FieldReading::Pallet(codec.read_pallet(pallet).await?));
        }
        if let Some(sheets) = &registers.sheets {
            readings.push(FieldReading::Sheets(codec.read_counter(sheets).await?));
        }
        if let Some(downtime) = &registers.downtime {
            readings.push(FieldReading::Downtime(codec.read_counter(downtime).await?));
        }
        for alert in &registers.alerts {
            let active = codec.read_flag(alert.area, alert.word, alert.bit).await?;
            readings.push(FieldReading::Alert {
                name: alert.name.clone(),
                active,
            });
        }

        Ok(readings)
    }

    /// Writes a job number
    pub async fn write_job(&mut self, value: u32) -> Result<()> {
        let word = self.config.registers.job.ok_or_else(|| {
            Error::config(format!("session '{}' has no job register", self.config.name))
        })?;
        let result = match self.parts() {
            Ok((_, mut codec)) => codec.write_job(word, value).await,
            Err(e) => Err(e),
        };
        self.settle(result)
    }

    /// Writes a pallet identifier
    pub async fn write_pallet(&mut self, text: &str) -> Result<()> {
        if self.config.registers.pallet.is_none() {
            return Err(Error::config(format!(
                "session '{}' has no pallet register",
                self.config.name
            )));
        }
        let result = self.write_pallet_field(text).await;
        self.settle(result)
    }

    async fn write_pallet_field(&mut self, text: &str) -> Result<()> {
        let (config, mut codec) = self.parts()?;
        match &config.registers.pallet {
            Some(field) => codec.write_pallet(field, text).await,
            None => Ok(()),
        }
    }

    /// Writes every configured job detail field; fields missing from
    /// `details` are cleared
    pub async fn write_job_details(&mut self, details: &BTreeMap<String, String>) -> Result<()> {
        let fields = &self.config.registers.job_details;
        if let Some(unknown) = details
            .keys()
            .find(|key| !fields.iter().any(|f| &f.name == *key))
        {
            return Err(Error::config(format!(
                "session '{}' has no job detail field '{}'",
                self.config.name, unknown
            )));
        }

        let result = self.write_details(Some(details)).await;
        self.settle(result)
    }

    /// Writes zeros across every job detail field
    pub async fn clear_job_details(&mut self) -> Result<()> {
        let result = self.write_details(None).await;
        self.settle(result)
    }

    async fn write_details(&mut self, details: Option<&BTreeMap<String, String>>) -> Result<()> {
        let (config, mut codec) = self.parts()?;
        let blocks = detail_blocks(&config.registers.job_details, details)?;

        for (i, (word, words)) in blocks.iter().enumerate() {
            if let Err(e) = codec.write_words(*word, words).await {
                if !e.is_fatal_to_channel() && i > 0 {
                    warn!("Session '{}' clearing a partial job detail write", config.name);
                    for (word, words) in &blocks[..i] {
                        let zeros = vec![0u16; words.len()];
                        if let Err(clear) = codec.write_words(*word, &zeros).await {
                            warn!("Session '{}' could not clear word {}: {}", config.name, word, clear);
                            break;
                        }
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }
}

/// Packs every job detail field before anything is written; adjacent fields
/// share one block
fn detail_blocks(
    fields: &[TextField],
    details: Option<&BTreeMap<String, String>>,
) -> Result<Vec<(u16, Vec<u16>)>> {
    let mut packed = Vec::with_capacity(fields.len());
    for field in fields {
        let words = match details.and_then(|d| d.get(&field.name)) {
            Some(text) => pack_field(text, field.width)?,
            None => vec![0u16; field.width as usize],
        };
        packed.push((field.word, words));
    }
    packed.sort_by_key(|(word, _)| *word);

    let mut blocks: Vec<(u16, Vec<u16>)> = Vec::new();
    for (word, words) in packed {
        let adjacent = matches!(
            blocks.last(),
            Some((start, block))
                if *start as usize + block.len() == word as usize
                    && block.len() + words.len() <= MAX_READ_WORDS as usize
        );
        if !adjacent {
            blocks.push((word, words));
        } else if let Some((_, block)) = blocks.last_mut() {
            block.extend(words);
        }
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::testing::FakeController;
    use super::*;
    use crate::core::{AlertField, CounterField, CounterFormat, PalletEncoding, PalletField, TextField};
    use crate::protocol::MemoryArea;

    fn production(port: u16) -> ControllerConfig {
        let mut config = ControllerConfig::new("production", "127.0.0.1");
        config.port = port;
        config.registers.job = Some(8500);
        config.registers.pallet = Some(PalletField {
            word: 8570,
            width: 15,
            encoding: PalletEncoding::Ascii,
        });
        config.registers.sheets = Some(CounterField { word: 3100, format: CounterFormat::Word });
        config.registers.downtime = Some(CounterField {
            word: 3150,
            format: CounterFormat::DoubleWord,
        });
        config.registers.alerts.push(AlertField {
            name: "job_end".into(),
            area: MemoryArea::WorkWord,
            word: 29,
            bit: 0,
        });
        config.registers.job_details.push(TextField {
            name: "essence".into(),
            word: 8520,
            width: 15,
        });
        config.registers.job_details.push(TextField {
            name: "coupe".into(),
            word: 8535,
            width: 10,
        });
        config
    }

    #[tokio::test]
    async fn test_snapshot_order() {
        let fake = FakeController::start().await;
        fake.set_words(MemoryArea::DataMemoryWord, 8500, &[14, 7430]);
        fake.set_words(MemoryArea::DataMemoryWord, 8570, &[0x4142]);
        fake.set_words(MemoryArea::DataMemoryWord, 3100, &[12]);
        fake.set_words(MemoryArea::DataMemoryWord, 3150, &[0x86A0, 0x0001]);
        fake.set_words(MemoryArea::WorkWord, 29, &[0x0001]);

        let mut session = DeviceSession::new(production(fake.port()));
        session.connect().await.unwrap();
        assert!(session.is_ready());

        let readings = session.read_snapshot().await.unwrap();
        assert_eq!(
            readings,
            vec![
                FieldReading::Job(Some(147_430)),
                FieldReading::Pallet(Some("AB".into())),
                FieldReading::Sheets(12),
                FieldReading::Downtime(100_000),
                FieldReading::Alert { name: "job_end".into(), active: true },
            ]
        );
    }

    #[tokio::test]
    async fn test_writes_land_in_memory() {
        let fake = FakeController::start().await;
        let mut session = DeviceSession::new(production(fake.port()));
        session.connect().await.unwrap();

        session.write_job(147_430).await.unwrap();
        assert_eq!(fake.words(MemoryArea::DataMemoryWord, 8500, 2), vec![14, 7430]);

        session.write_pallet("FRE-39764-147332").await.unwrap();
        let pallet = fake.words(MemoryArea::DataMemoryWord, 8570, 15);
        assert_eq!(crate::register::unpack_text(&pallet), "FRE-39764-147332");

        let mut details = BTreeMap::new();
        details.insert("essence".to_string(), "CHENE".to_string());
        session.write_job_details(&details).await.unwrap();
        assert_eq!(
            crate::register::unpack_text(&fake.words(MemoryArea::DataMemoryWord, 8520, 15)),
            "CHENE"
        );

        session.clear_job_details().await.unwrap();
        assert!(fake
            .words(MemoryArea::DataMemoryWord, 8520, 25)
            .iter()
            .all(|&w| w == 0));
    }

    #[tokio::test]
    async fn test_job_details_encoded_before_any_write() {
        let fake = FakeController::start().await;
        let mut session = DeviceSession::new(production(fake.port()));
        session.connect().await.unwrap();

        let mut details = BTreeMap::new();
        details.insert("essence".to_string(), "ERABLE".to_string());
        details.insert("coupe".to_string(), "QUARTIER".to_string());
        session.write_job_details(&details).await.unwrap();

        let mut next = BTreeMap::new();
        next.insert("essence".to_string(), "PIN".to_string());
        next.insert("coupe".to_string(), "Œil".to_string());
        assert!(matches!(
            session.write_job_details(&next).await,
            Err(Error::Encoding(_))
        ));
        assert!(session.is_ready());

        let essence = fake.words(MemoryArea::DataMemoryWord, 8520, 15);
        let coupe = fake.words(MemoryArea::DataMemoryWord, 8535, 10);
        assert_eq!(crate::register::unpack_text(&essence), "ERABLE");
        assert_eq!(crate::register::unpack_text(&coupe), "QUARTIER");
    }

    #[tokio::test]
    async fn test_latin1_job_details() {
        let fake = FakeController::start().await;
        let mut session = DeviceSession::new(production(fake.port()));
        session.connect().await.unwrap();

        let mut details = BTreeMap::new();
        details.insert("coupe".to_string(), "Tranché".to_string());
        session.write_job_details(&details).await.unwrap();
        assert_eq!(
            crate::register::unpack_text(&fake.words(MemoryArea::DataMemoryWord, 8535, 10)),
            "Tranché"
        );
    }

    #[test]
    fn test_detail_blocks_merge_adjacent_fields() {
        let fields = vec![
            TextField { name: "coupe".into(), word: 8535, width: 10 },
            TextField { name: "essence".into(), word: 8520, width: 15 },
            TextField { name: "client".into(), word: 8600, width: 4 },
        ];
        let mut details = BTreeMap::new();
        details.insert("essence".to_string(), "PIN".to_string());

        let blocks = detail_blocks(&fields, Some(&details)).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].0, 8520);
        assert_eq!(blocks[0].1.len(), 25);
        assert_eq!(crate::register::unpack_text(&blocks[0].1[..15]), "PIN");
        assert!(blocks[0].1[15..].iter().all(|&w| w == 0));
        assert_eq!(blocks[1], (8600, vec![0; 4]));
    }

    #[tokio::test]
    async fn test_unknown_job_detail_rejected() {
        let mut session = DeviceSession::new(production(9600));
        let mut details = BTreeMap::new();
        details.insert("colour".to_string(), "red".to_string());
        assert!(matches!(
            session.write_job_details(&details).await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_write_without_connection() {
        let mut session = DeviceSession::new(production(9600));
        assert!(matches!(
            session.write_job(1).await,
            Err(Error::NotConnected(_))
        ));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_rejection_keeps_session_ready() {
        let fake = FakeController::start().await;
        fake.reject_writes(true);
        let mut session = DeviceSession::new(production(fake.port()));
        session.connect().await.unwrap();

        assert!(matches!(
            session.write_job(5).await,
            Err(Error::Protocol { command: 0x0102, end_code: 0x0001 })
        ));
        assert!(session.is_ready());
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let port = FakeController::unused_port().await;
        let mut session = DeviceSession::new(production(port));
        assert!(session.connect().await.is_err());
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
