//! Polls the controllers listed in a JSON configuration file and prints every
//! event as one JSON line.
//!
//! ```text
//! cargo run --example monitor -- bridge.json
//! ```
//!
//! Lines typed on stdin are queued as scan commands: a number writes a job,
//! `clear` clears the job details, anything else writes a pallet.

use fins_bridge::{util::init_tracing, Config, Error, PollLoop, Result, ScanCommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

fn load_config() -> Result<Config> {
    match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)?;
            serde_json::from_str(&text)
                .map_err(|e| Error::config(format!("Failed to parse {}: {}", path, e)))
        }
        None => {
            warn!("No configuration file given, using defaults");
            Ok(Config::default())
        }
    }
}

fn parse_command(line: &str) -> ScanCommand {
    match line {
        "clear" => ScanCommand::ClearJobDetails,
        _ => match line.parse::<u32>() {
            Ok(job) => ScanCommand::WriteJob(job),
            Err(_) => ScanCommand::WritePallet(line.to_string()),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info")?;

    let config = load_config()?;
    info!("Loaded {} controllers", config.controllers.len());

    let (poll_loop, commands, mut events) = PollLoop::new(config)?;
    let poller = tokio::spawn(poll_loop.run());

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Err(e) = commands.try_send(parse_command(line)) {
                warn!("Command not queued: {}", e);
            }
        }
    });

    loop {
        tokio::select! {
            Some(event) = events.recv() => match serde_json::to_string(&event) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("Failed to serialize event: {}", e),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    drop(events);
    poller
        .await
        .map_err(|e| Error::channel(format!("Poll loop task failed: {}", e)))?
}
