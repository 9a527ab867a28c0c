use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{DeviceSession, FieldReading, LastSeen};
use crate::core::{Config, Error, Result};

/// Session name on events that concern no single controller
pub const ANY_SESSION: &str = "*";

/// Something that happened on a controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollEvent {
    /// Session name
    pub session: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Event payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    JobChanged { job: Option<u32> },
    PalletChanged { pallet: Option<String> },
    AlertRaised { name: String },
    AlertCleared { name: String },
    SheetCount { count: u32 },
    Downtime { seconds: u32 },
    SessionOnline,
    SessionDegraded { reason: String },
    ReadFailed { reason: String },
    WriteApplied { command: String },
    WriteFailed { command: String, reason: String },
}

/// Write requests from scanning stations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "value", rename_all = "snake_case")]
pub enum ScanCommand {
    WriteJob(u32),
    WritePallet(String),
    WriteJobDetails(BTreeMap<String, String>),
    ClearJobDetails,
}

impl ScanCommand {
    /// Short name used in write events
    pub fn name(&self) -> &'static str {
        match self {
            ScanCommand::WriteJob(_) => "write_job",
            ScanCommand::WritePallet(_) => "write_pallet",
            ScanCommand::WriteJobDetails(_) => "write_job_details",
            ScanCommand::ClearJobDetails => "clear_job_details",
        }
    }

    /// Whether `session` has the register this command writes
    fn targets(&self, session: &DeviceSession) -> bool {
        let registers = session.registers();
        match self {
            ScanCommand::WriteJob(_) => registers.job.is_some(),
            ScanCommand::WritePallet(_) => registers.pallet.is_some(),
            ScanCommand::WriteJobDetails(_) | ScanCommand::ClearJobDetails => {
                !registers.job_details.is_empty()
            }
        }
    }
}

/// Handle for queueing scan commands
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<ScanCommand>,
}

impl CommandSender {
    /// Queues a command without waiting; a full queue is `Busy`
    pub fn try_send(&self, command: ScanCommand) -> Result<()> {
        self.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(command) => {
                Error::busy(format!("command queue full, dropped {}", command.name()))
            }
            mpsc::error::TrySendError::Closed(_) => Error::channel("poll loop has stopped"),
        })
    }

    /// Queues a command, waiting for room
    pub async fn send(&self, command: ScanCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| Error::channel("poll loop has stopped"))
    }
}

/// Polls every session on a fixed interval and applies queued scan commands
pub struct PollLoop {
    sessions: Vec<DeviceSession>,
    poll_interval: Duration,
    events: mpsc::Sender<PollEvent>,
    commands: mpsc::Receiver<ScanCommand>,
}

impl PollLoop {
    /// Builds the loop with one session per controller; returns the command
    /// handle and the event stream alongside it
    pub fn new(config: Config) -> Result<(PollLoop, CommandSender, mpsc::Receiver<PollEvent>)> {
        config.validate()?;

        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer);

        let poll_loop = PollLoop {
            sessions: config.controllers.into_iter().map(DeviceSession::new).collect(),
            poll_interval: config.poll_interval,
            events: event_tx,
            commands: command_rx,
        };

        Ok((poll_loop, CommandSender { tx: command_tx }, event_rx))
    }

    /// Sessions in configuration order
    pub fn sessions(&self) -> &[DeviceSession] {
        &self.sessions
    }

    /// Runs one poll cycle over every session concurrently
    pub async fn tick(&mut self) -> Vec<PollEvent> {
        let cycles = self.sessions.iter_mut().map(|session| poll_session(session));
        join_all(cycles).await.into_iter().flatten().collect()
    }

    /// Applies a scan command to every session that has its register; when
    /// none has it, a single `WriteFailed` for session `"*"` is returned
    pub async fn apply(&mut self, command: ScanCommand) -> Vec<PollEvent> {
        if !self.sessions.iter().any(|session| command.targets(session)) {
            warn!("No session accepts {}", command.name());
            return vec![PollEvent {
                session: ANY_SESSION.to_string(),
                at: Utc::now(),
                kind: EventKind::WriteFailed {
                    command: command.name().to_string(),
                    reason: format!("no session accepts {}", command.name()),
                },
            }];
        }

        let writes = self
            .sessions
            .iter_mut()
            .filter(|session| command.targets(session))
            .map(|session| apply_command(session, &command));
        join_all(writes).await.into_iter().flatten().collect()
    }

    /// Runs until the event receiver is dropped
    pub async fn run(mut self) -> Result<()> {
        info!(
            "Polling {} controllers every {:?}",
            self.sessions.len(),
            self.poll_interval
        );
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let events = tokio::select! {
                _ = self.events.closed() => break,
                _ = ticker.tick() => self.tick().await,
                Some(command) = self.commands.recv() => self.apply(command).await,
            };

            if !publish(&self.events, events).await {
                break;
            }
        }

        for session in &mut self.sessions {
            session.disconnect().await;
        }
        info!("Poll loop stopped");
        Ok(())
    }
}

/// Returns false once nobody listens for events
async fn publish(tx: &mpsc::Sender<PollEvent>, events: Vec<PollEvent>) -> bool {
    for event in events {
        debug!("{}: {:?}", event.session, event.kind);
        if tx.send(event).await.is_err() {
            return false;
        }
    }
    true
}

fn event(session: &DeviceSession, kind: EventKind) -> PollEvent {
    PollEvent {
        session: session.name().to_string(),
        at: Utc::now(),
        kind,
    }
}

async fn poll_session(session: &mut DeviceSession) -> Vec<PollEvent> {
    let mut events = Vec::new();

    if !session.is_ready() {
        match session.connect().await {
            Ok(()) => events.push(event(session, EventKind::SessionOnline)),
            Err(e) => {
                warn!("Session '{}' degraded: {}", session.name(), e);
                events.push(event(session, EventKind::SessionDegraded { reason: e.to_string() }));
                return events;
            }
        }
    }

    match session.read_snapshot().await {
        Ok(readings) => {
            let at = Utc::now();
            let name = session.name().to_string();
            let kinds = detect_changes(session.last_seen_mut(), readings, at);
            events.extend(kinds.into_iter().map(|kind| PollEvent {
                session: name.clone(),
                at,
                kind,
            }));
        }
        Err(e) if !session.is_ready() => {
            warn!("Session '{}' degraded: {}", session.name(), e);
            events.push(event(session, EventKind::SessionDegraded { reason: e.to_string() }));
        }
        Err(e) => {
            warn!("Read on session '{}' failed: {}", session.name(), e);
            events.push(event(session, EventKind::ReadFailed { reason: e.to_string() }));
        }
    }

    events
}

/// Compares readings with the last seen values, updates them and returns one
/// event per transition plus the per-tick counters
pub fn detect_changes(
    last: &mut LastSeen,
    readings: Vec<FieldReading>,
    at: DateTime<Utc>,
) -> Vec<EventKind> {
    let mut kinds = Vec::new();

    for reading in readings {
        match reading {
            FieldReading::Job(job) => {
                if last.job != job {
                    last.job = job;
                    kinds.push(EventKind::JobChanged { job });
                }
            }
            FieldReading::Pallet(pallet) => {
                if last.pallet != pallet {
                    last.pallet = pallet.clone();
                    kinds.push(EventKind::PalletChanged { pallet });
                }
            }
            FieldReading::Sheets(count) => {
                last.sheets = Some(count);
                kinds.push(EventKind::SheetCount { count });
            }
            FieldReading::Downtime(seconds) => {
                last.downtime = Some(seconds);
                kinds.push(EventKind::Downtime { seconds });
            }
            FieldReading::Alert { name, active } => {
                let was_active = last.alerts.get(&name).copied().unwrap_or(false);
                if active && !was_active {
                    kinds.push(EventKind::AlertRaised { name: name.clone() });
                } else if !active && was_active {
                    kinds.push(EventKind::AlertCleared { name: name.clone() });
                }
                last.alerts.insert(name, active);
            }
            FieldReading::Invalid { field, reason } => {
                kinds.push(EventKind::ReadFailed {
                    reason: format!("{}: {}", field, reason),
                });
            }
        }
    }

    last.updated_at = Some(at);
    kinds
}

async fn apply_command(session: &mut DeviceSession, command: &ScanCommand) -> Vec<PollEvent> {
    let mut events = Vec::new();

    if !session.is_ready() {
        match session.connect().await {
            Ok(()) => events.push(event(session, EventKind::SessionOnline)),
            Err(e) => {
                events.push(event(
                    session,
                    EventKind::WriteFailed {
                        command: command.name().to_string(),
                        reason: e.to_string(),
                    },
                ));
                return events;
            }
        }
    }

    let result = match command {
        ScanCommand::WriteJob(job) => session.write_job(*job).await,
        ScanCommand::WritePallet(pallet) => session.write_pallet(pallet).await,
        ScanCommand::WriteJobDetails(details) => session.write_job_details(details).await,
        ScanCommand::ClearJobDetails => session.clear_job_details().await,
    };

    let kind = match result {
        Ok(()) => {
            info!("Session '{}' applied {}", session.name(), command.name());
            EventKind::WriteApplied {
                command: command.name().to_string(),
            }
        }
        Err(e) => {
            warn!("Session '{}' failed {}: {}", session.name(), command.name(), e);
            EventKind::WriteFailed {
                command: command.name().to_string(),
                reason: e.to_string(),
            }
        }
    };
    events.push(event(session, kind));
    events
}
