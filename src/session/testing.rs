//! In-process FINS/TCP controller for session and poll loop tests

use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::protocol::codec::{Envelope, EnvelopeCommand, FinsTcpCodec};
use crate::protocol::MemoryArea;
use bytes::Bytes;

#[derive(Default)]
struct Memory {
    /// (word area code, word) -> value
    words: HashMap<(u8, u16), u16>,
    reject_writes: bool,
}

/// Word area code behind a bit-access area code
fn word_area(code: u8) -> u8 {
    match code {
        0x30 => 0xB0,
        0x31 => 0xB1,
        0x32 => 0xB2,
        0x33 => 0xB3,
        0x02 => 0x82,
        other => other,
    }
}

fn is_bit_area(code: u8) -> bool {
    matches!(code, 0x30 | 0x31 | 0x32 | 0x33 | 0x02)
}

impl Memory {
    fn handle(&mut self, frame: &[u8]) -> Vec<u8> {
        let header = &frame[..10];
        let command = u16::from_be_bytes([frame[10], frame[11]]);
        let body = &frame[12..];

        let mut reply = vec![
            0xC0, 0x00, 0x02, header[6], header[7], header[8], header[3], header[4], header[5],
            header[9],
        ];
        reply.extend_from_slice(&command.to_be_bytes());

        let area = body[0];
        let word = u16::from_be_bytes([body[1], body[2]]);
        let bit = body[3];
        let count = u16::from_be_bytes([body[4], body[5]]);
        let key_area = word_area(area);

        match command {
            0x0101 => {
                reply.extend_from_slice(&[0x00, 0x00]);
                for i in 0..count {
                    let value = *self.words.get(&(key_area, word + i)).unwrap_or(&0);
                    if is_bit_area(area) {
                        reply.push(((value >> bit) & 1) as u8);
                    } else {
                        reply.extend_from_slice(&value.to_be_bytes());
                    }
                }
            }
            0x0102 if self.reject_writes => reply.extend_from_slice(&[0x00, 0x01]),
            0x0102 => {
                let data = &body[6..];
                if is_bit_area(area) {
                    let entry = self.words.entry((key_area, word)).or_insert(0);
                    if data[0] & 1 == 1 {
                        *entry |= 1 << bit;
                    } else {
                        *entry &= !(1 << bit);
                    }
                } else {
                    for (i, pair) in data.chunks_exact(2).enumerate() {
                        self.words
                            .insert((key_area, word + i as u16), u16::from_be_bytes([pair[0], pair[1]]));
                    }
                }
                reply.extend_from_slice(&[0x00, 0x00]);
            }
            _ => reply.extend_from_slice(&[0x04, 0x01]),
        }
        reply
    }
}

/// Fake controller accepting any number of connections on a loopback port
pub(crate) struct FakeController {
    port: u16,
    memory: Arc<Mutex<Memory>>,
    accept: JoinHandle<()>,
}

impl FakeController {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let memory = Arc::new(Mutex::new(Memory::default()));

        let shared = memory.clone();
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, shared.clone()));
            }
        });

        FakeController { port, memory, accept }
    }

    /// A loopback port nothing listens on
    pub(crate) async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn set_words(&self, area: MemoryArea, word: u16, values: &[u16]) {
        let mut memory = self.memory.lock().unwrap();
        for (i, value) in values.iter().enumerate() {
            memory.words.insert((area.code(), word + i as u16), *value);
        }
    }

    pub(crate) fn words(&self, area: MemoryArea, word: u16, count: u16) -> Vec<u16> {
        let memory = self.memory.lock().unwrap();
        (0..count)
            .map(|i| *memory.words.get(&(area.code(), word + i)).unwrap_or(&0))
            .collect()
    }

    pub(crate) fn reject_writes(&self, reject: bool) {
        self.memory.lock().unwrap().reject_writes = reject;
    }
}

impl Drop for FakeController {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn serve(stream: TcpStream, memory: Arc<Mutex<Memory>>) {
    let mut framed = Framed::new(stream, FinsTcpCodec::new());
    while let Some(Ok(envelope)) = framed.next().await {
        let reply = match envelope.command {
            EnvelopeCommand::NodeAddressRequest => Envelope {
                command: EnvelopeCommand::NodeAddressResponse,
                error_code: 0,
                payload: Bytes::from_static(&[0, 0, 0, 0x22, 0, 0, 0, 0x0A]),
            },
            EnvelopeCommand::Frame => {
                let response = memory.lock().unwrap().handle(&envelope.payload);
                Envelope::frame(Bytes::from(response))
            }
            _ => break,
        };
        if framed.send(reply).await.is_err() {
            break;
        }
    }
}
