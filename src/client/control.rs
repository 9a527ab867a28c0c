use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::core::{Error, Result};
use crate::network::CommandChannel;
use crate::protocol::{Address, CommandCode, MAX_READ_WORDS};

/// Program number meaning "all programs"
const ALL_PROGRAMS: [u8; 2] = [0xFF, 0xFF];

/// Length of the model and version fields in a CPU unit data response
const UNIT_TEXT_LEN: usize = 20;

/// Largest program area block one request carries
pub const MAX_PROGRAM_BLOCK: u16 = 992;

/// Block size for program backups and restores
pub const DEFAULT_PROGRAM_BLOCK: u16 = 400;

/// Set in a block's byte count when it ends the program
const LAST_BLOCK: u16 = 0x8000;

/// One block of the user program area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramBlock {
    /// Byte offset of the block in the program area
    pub start: u32,
    pub data: Bytes,
    /// No program data follows this block
    pub last: bool,
}

/// Operating mode requested with a run command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Debug,
    Monitor,
    Run,
}

impl RunMode {
    fn code(self) -> u8 {
        match self {
            RunMode::Debug => 0x01,
            RunMode::Monitor => 0x02,
            RunMode::Run => 0x04,
        }
    }
}

/// Operating mode reported by the CPU unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    Program,
    Debug,
    Monitor,
    Run,
    Unknown(u8),
}

impl From<u8> for OperatingMode {
    fn from(code: u8) -> Self {
        match code {
            0x00 => OperatingMode::Program,
            0x01 => OperatingMode::Debug,
            0x02 => OperatingMode::Monitor,
            0x04 => OperatingMode::Run,
            other => OperatingMode::Unknown(other),
        }
    }
}

/// Decoded CPU unit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuStatus {
    /// Program execution is active
    pub running: bool,
    /// Current operating mode
    pub mode: OperatingMode,
    /// Fatal error flags
    pub fatal_errors: u16,
    /// Non-fatal error flags
    pub non_fatal_errors: u16,
}

/// Identification strings of the CPU unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuUnitData {
    pub model: String,
    pub version: String,
}

/// Controller operation commands over a borrowed channel
pub struct ControlClient<'a, S = TcpStream> {
    channel: &'a mut CommandChannel<S>,
}

impl<'a, S> ControlClient<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a client borrowing `channel` for its lifetime
    pub fn new(channel: &'a mut CommandChannel<S>) -> Self {
        ControlClient { channel }
    }

    /// Switches the controller to `mode`
    pub async fn run(&mut self, mode: RunMode) -> Result<()> {
        let body = [ALL_PROGRAMS[0], ALL_PROGRAMS[1], mode.code()];
        self.channel.execute(CommandCode::Run, &body).await?;
        info!("{} switched to {:?} mode", self.channel.peer(), mode);
        Ok(())
    }

    /// Switches the controller to program mode
    pub async fn stop(&mut self) -> Result<()> {
        self.channel.execute(CommandCode::Stop, &ALL_PROGRAMS).await?;
        info!("{} stopped", self.channel.peer());
        Ok(())
    }

    /// Reads the CPU unit status
    pub async fn cpu_unit_status_read(&mut self) -> Result<CpuStatus> {
        let response = self.channel.execute(CommandCode::CpuUnitStatusRead, &[]).await?;
        let b = &response.body;
        if b.len() < 6 {
            return Err(Error::malformed(format!(
                "CPU unit status of {} bytes is too short",
                b.len()
            )));
        }

        Ok(CpuStatus {
            running: b[0] & 0x01 == 0x01,
            mode: OperatingMode::from(b[1]),
            fatal_errors: u16::from_be_bytes([b[2], b[3]]),
            non_fatal_errors: u16::from_be_bytes([b[4], b[5]]),
        })
    }

    /// Reads the CPU unit model and version
    pub async fn cpu_unit_data_read(&mut self) -> Result<CpuUnitData> {
        let response = self.channel.execute(CommandCode::CpuUnitDataRead, &[0x00]).await?;
        let b = &response.body;
        if b.len() < 2 * UNIT_TEXT_LEN {
            return Err(Error::malformed(format!(
                "CPU unit data of {} bytes is too short",
                b.len()
            )));
        }

        Ok(CpuUnitData {
            model: unit_text(&b[..UNIT_TEXT_LEN]),
            version: unit_text(&b[UNIT_TEXT_LEN..2 * UNIT_TEXT_LEN]),
        })
    }

    /// Writes `value` into `count` consecutive words starting at `address`
    pub async fn fill(&mut self, address: Address, count: u16, value: u16) -> Result<()> {
        if address.area.is_bit_access() {
            return Err(Error::encoding(format!("cannot fill bit area at {}", address)));
        }
        if count == 0 || count > MAX_READ_WORDS {
            return Err(Error::encoding(format!(
                "fill count {} outside 1..={}",
                count, MAX_READ_WORDS
            )));
        }

        let mut body = Vec::with_capacity(8);
        body.extend_from_slice(&address.to_bytes());
        body.extend_from_slice(&count.to_be_bytes());
        body.extend_from_slice(&value.to_be_bytes());
        self.channel.execute(CommandCode::MemoryAreaFill, &body).await?;
        Ok(())
    }

    /// Reads up to `bytes` bytes of the program area starting at `start`
    pub async fn program_area_read(&mut self, start: u32, bytes: u16) -> Result<ProgramBlock> {
        check_block(bytes as usize)?;

        let mut body = Vec::with_capacity(8);
        body.extend_from_slice(&ALL_PROGRAMS);
        body.extend_from_slice(&start.to_be_bytes());
        body.extend_from_slice(&bytes.to_be_bytes());
        let response = self.channel.execute(CommandCode::ProgramAreaRead, &body).await?;

        let b = &response.body;
        if b.len() < 8 {
            return Err(Error::malformed(format!(
                "program area response of {} bytes is too short",
                b.len()
            )));
        }
        let flags = u16::from_be_bytes([b[6], b[7]]);
        Ok(ProgramBlock {
            start: u32::from_be_bytes([b[2], b[3], b[4], b[5]]),
            data: response.body.slice(8..),
            last: flags & LAST_BLOCK != 0,
        })
    }

    /// Writes one block of the program area; `last` marks the end of the program
    pub async fn program_area_write(&mut self, start: u32, data: &[u8], last: bool) -> Result<()> {
        check_block(data.len())?;

        let mut count = data.len() as u16;
        if last {
            count |= LAST_BLOCK;
        }
        let mut body = Vec::with_capacity(8 + data.len());
        body.extend_from_slice(&ALL_PROGRAMS);
        body.extend_from_slice(&start.to_be_bytes());
        body.extend_from_slice(&count.to_be_bytes());
        body.extend_from_slice(data);
        self.channel.execute(CommandCode::ProgramAreaWrite, &body).await?;
        Ok(())
    }

    /// Reads the whole user program in blocks of `block` bytes
    pub async fn read_program(&mut self, block: u16) -> Result<Vec<u8>> {
        let mut program = Vec::new();
        let mut start = 0u32;
        loop {
            let chunk = self.program_area_read(start, block).await?;
            debug!("Program block at {}: {} bytes", start, chunk.data.len());
            program.extend_from_slice(&chunk.data);
            if chunk.last {
                break;
            }
            if chunk.data.is_empty() {
                return Err(Error::malformed(format!(
                    "empty program block at {} without the last block flag",
                    start
                )));
            }
            start += chunk.data.len() as u32;
        }
        info!("Read {} program bytes from {}", program.len(), self.channel.peer());
        Ok(program)
    }

    /// Writes a whole user program in blocks of `block` bytes
    ///
    /// The controller is stopped first and switched back to run mode once
    /// the last block is accepted. A failed block leaves it in program mode.
    pub async fn write_program(&mut self, program: &[u8], block: u16) -> Result<()> {
        check_block(block as usize)?;
        if program.is_empty() {
            return Err(Error::encoding("program is empty"));
        }

        self.stop().await?;
        let blocks = program.chunks(block as usize).count();
        let mut start = 0u32;
        for (i, chunk) in program.chunks(block as usize).enumerate() {
            self.program_area_write(start, chunk, i + 1 == blocks).await?;
            start += chunk.len() as u32;
        }
        info!("Wrote {} program bytes to {}", program.len(), self.channel.peer());
        self.run(RunMode::Run).await
    }

    /// Saves the user program to `path`; returns the number of bytes saved
    pub async fn backup_program(&mut self, path: impl AsRef<Path>, block: u16) -> Result<usize> {
        let program = self.read_program(block).await?;
        tokio::fs::write(path, &program).await?;
        Ok(program.len())
    }

    /// Loads a program saved by [`backup_program`](Self::backup_program) and
    /// writes it to the controller
    pub async fn restore_program(&mut self, path: impl AsRef<Path>, block: u16) -> Result<()> {
        let program = tokio::fs::read(path).await?;
        self.write_program(&program, block).await
    }
}

fn check_block(bytes: usize) -> Result<()> {
    if bytes == 0 || bytes > MAX_PROGRAM_BLOCK as usize {
        return Err(Error::encoding(format!(
            "program block of {} bytes outside 1..={}",
            bytes, MAX_PROGRAM_BLOCK
        )));
    }
    Ok(())
}

fn unit_text(bytes: &[u8]) -> String {
    bytes
        .iter()
        .filter(|&&b| b != 0)
        .map(|&b| b as char)
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::channel::tests::{channel, request, response};
    use crate::protocol::MemoryArea;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_run_monitor() {
        let mock = Builder::new()
            .write(&request(1, 0x0401, &[0xFF, 0xFF, 0x02]))
            .read(&response(1, 0x0401, 0x0000, &[]))
            .build();

        let mut channel = channel(mock);
        ControlClient::new(&mut channel).run(RunMode::Monitor).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop() {
        let mock = Builder::new()
            .write(&request(1, 0x0402, &[0xFF, 0xFF]))
            .read(&response(1, 0x0402, 0x0000, &[]))
            .build();

        let mut channel = channel(mock);
        ControlClient::new(&mut channel).stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_cpu_unit_status() {
        let mock = Builder::new()
            .write(&request(1, 0x0601, &[]))
            .read(&response(
                1,
                0x0601,
                0x0000,
                &[0x01, 0x04, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00],
            ))
            .build();

        let mut channel = channel(mock);
        let status = ControlClient::new(&mut channel)
            .cpu_unit_status_read()
            .await
            .unwrap();
        assert!(status.running);
        assert_eq!(status.mode, OperatingMode::Run);
        assert_eq!(status.fatal_errors, 0);
        assert_eq!(status.non_fatal_errors, 0x0040);
    }

    #[tokio::test]
    async fn test_cpu_unit_data() {
        let mut body = Vec::new();
        body.extend_from_slice(b"CJ2M-CPU31          ");
        body.extend_from_slice(b"02.01\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0");
        let mock = Builder::new()
            .write(&request(1, 0x0501, &[0x00]))
            .read(&response(1, 0x0501, 0x0000, &body))
            .build();

        let mut channel = channel(mock);
        let data = ControlClient::new(&mut channel)
            .cpu_unit_data_read()
            .await
            .unwrap();
        assert_eq!(data.model, "CJ2M-CPU31");
        assert_eq!(data.version, "02.01");
    }

    #[tokio::test]
    async fn test_fill() {
        let mock = Builder::new()
            .write(&request(
                1,
                0x0103,
                &[0x82, 0x21, 0x48, 0x00, 0x00, 0x0F, 0x00, 0x00],
            ))
            .read(&response(1, 0x0103, 0x0000, &[]))
            .build();

        let mut channel = channel(mock);
        ControlClient::new(&mut channel)
            .fill(Address::word(MemoryArea::DataMemoryWord, 8520), 15, 0)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_program_area_read() {
        let mock = Builder::new()
            .write(&request(
                1,
                0x0306,
                &[0xFF, 0xFF, 0x00, 0x00, 0x01, 0x90, 0x01, 0x90],
            ))
            .read(&response(
                1,
                0x0306,
                0x0000,
                &[0xFF, 0xFF, 0x00, 0x00, 0x01, 0x90, 0x80, 0x04, 0xDE, 0xAD, 0xBE, 0xEF],
            ))
            .build();

        let mut channel = channel(mock);
        let block = ControlClient::new(&mut channel)
            .program_area_read(400, DEFAULT_PROGRAM_BLOCK)
            .await
            .unwrap();
        assert_eq!(block.start, 400);
        assert_eq!(&block.data[..], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(block.last);
    }

    #[tokio::test]
    async fn test_read_program_until_last_block() {
        let mock = Builder::new()
            .write(&request(1, 0x0306, &[0xFF, 0xFF, 0, 0, 0, 0, 0x00, 0x04]))
            .read(&response(
                1,
                0x0306,
                0x0000,
                &[0xFF, 0xFF, 0, 0, 0, 0, 0x00, 0x04, 1, 2, 3, 4],
            ))
            .write(&request(2, 0x0306, &[0xFF, 0xFF, 0, 0, 0, 4, 0x00, 0x04]))
            .read(&response(
                2,
                0x0306,
                0x0000,
                &[0xFF, 0xFF, 0, 0, 0, 4, 0x80, 0x02, 5, 6],
            ))
            .build();

        let mut channel = channel(mock);
        let program = ControlClient::new(&mut channel).read_program(4).await.unwrap();
        assert_eq!(program, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_write_program_flags_last_block() {
        let mock = Builder::new()
            .write(&request(1, 0x0402, &[0xFF, 0xFF]))
            .read(&response(1, 0x0402, 0x0000, &[]))
            .write(&request(
                2,
                0x0307,
                &[0xFF, 0xFF, 0, 0, 0, 0, 0x00, 0x04, 1, 2, 3, 4],
            ))
            .read(&response(2, 0x0307, 0x0000, &[]))
            .write(&request(3, 0x0307, &[0xFF, 0xFF, 0, 0, 0, 4, 0x80, 0x02, 5, 6]))
            .read(&response(3, 0x0307, 0x0000, &[]))
            .write(&request(4, 0x0401, &[0xFF, 0xFF, 0x04]))
            .read(&response(4, 0x0401, 0x0000, &[]))
            .build();

        let mut channel = channel(mock);
        ControlClient::new(&mut channel)
            .write_program(&[1, 2, 3, 4, 5, 6], 4)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejected_block_stops_program_write() {
        let mock = Builder::new()
            .write(&request(1, 0x0402, &[0xFF, 0xFF]))
            .read(&response(1, 0x0402, 0x0000, &[]))
            .write(&request(2, 0x0307, &[0xFF, 0xFF, 0, 0, 0, 0, 0x80, 0x02, 7, 8]))
            .read(&response(2, 0x0307, 0x2102, &[]))
            .build();

        let mut channel = channel(mock);
        let result = ControlClient::new(&mut channel).write_program(&[7, 8], 4).await;
        assert!(matches!(
            result,
            Err(Error::Protocol { command: 0x0307, end_code: 0x2102 })
        ));
    }

    #[tokio::test]
    async fn test_backup_program_to_file() {
        let mock = Builder::new()
            .write(&request(1, 0x0306, &[0xFF, 0xFF, 0, 0, 0, 0, 0x01, 0x90]))
            .read(&response(
                1,
                0x0306,
                0x0000,
                &[0xFF, 0xFF, 0, 0, 0, 0, 0x80, 0x03, 9, 8, 7],
            ))
            .build();

        let path = std::env::temp_dir().join(format!("fins_bridge_backup_{}.bin", std::process::id()));
        let mut channel = channel(mock);
        let saved = ControlClient::new(&mut channel)
            .backup_program(&path, DEFAULT_PROGRAM_BLOCK)
            .await
            .unwrap();
        assert_eq!(saved, 3);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), vec![9, 8, 7]);
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_program_block_bounds() {
        let mock = Builder::new().build();
        let mut channel = channel(mock);
        let mut client = ControlClient::new(&mut channel);
        assert!(matches!(client.program_area_read(0, 0).await, Err(Error::Encoding(_))));
        assert!(matches!(
            client.program_area_read(0, MAX_PROGRAM_BLOCK + 1).await,
            Err(Error::Encoding(_))
        ));
        assert!(matches!(client.write_program(&[], 4).await, Err(Error::Encoding(_))));
    }
}
