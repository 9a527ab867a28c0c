use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::core::{ControllerConfig, Error, NodeAddressing, Result};
use crate::protocol::{
    codec::{Envelope, EnvelopeCommand, FinsTcpCodec},
    frame::{CommandFrame, FrameCodec, Header, ResponseFrame},
    CommandCode,
};
use crate::util::format_hex;

/// Information control field for a command that expects a response
const ICF_COMMAND: u8 = 0x80;

/// Health of a command channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Requests may be sent
    Open,
    /// A request timed out; the byte stream may be out of step
    Suspect,
    /// The connection failed or was closed
    Closed,
}

/// One FINS/TCP connection to one controller.
///
/// Requests are strictly sequential: `send` takes `&mut self`, so a second
/// request cannot start before the first one has been answered or has timed
/// out.
pub struct CommandChannel<S = TcpStream> {
    /// Envelope-framed stream
    framed: Framed<S, FinsTcpCodec>,
    /// Header template; the service id is filled in per request
    header: Header,
    /// Last service id handed out
    sid: u8,
    /// Bound on each round trip
    timeout: Duration,
    /// Channel health
    state: ChannelState,
    /// Peer label for logs
    peer: String,
}

impl CommandChannel<TcpStream> {
    /// Connects to a controller and negotiates node numbers
    pub async fn connect(config: &ControllerConfig) -> Result<Self> {
        let endpoint = config.endpoint();
        debug!("Connecting to FINS endpoint: {}", endpoint);

        let stream = match timeout(config.timeout, TcpStream::connect(&endpoint)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(Error::transport(format!(
                    "Failed to connect to {}: {}",
                    endpoint, e
                )))
            }
            Err(_) => return Err(Error::Timeout(config.timeout)),
        };

        configure_socket(&stream)?;

        let channel =
            Self::handshake(stream, endpoint.clone(), config.addressing, config.timeout).await?;
        info!(
            "Connected to {} as node {} (controller node {})",
            endpoint, channel.header.sa1, channel.header.da1
        );
        Ok(channel)
    }
}

fn configure_socket(stream: &TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;
    let socket = socket2::SockRef::from(stream);
    if let Err(e) = socket.set_keepalive(true) {
        warn!("Failed to set keep-alive: {}", e);
    }
    Ok(())
}

impl<S> CommandChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Runs the FINS/TCP node address exchange over an established stream
    pub async fn handshake(
        stream: S,
        peer: String,
        addressing: NodeAddressing,
        round_trip_timeout: Duration,
    ) -> Result<Self> {
        let mut framed = Framed::new(stream, FinsTcpCodec::new());

        let exchange = async {
            framed
                .send(Envelope::node_address_request(addressing.client_node as u32))
                .await?;
            match framed.next().await {
                Some(result) => result,
                None => Err(Error::transport("connection closed during node address exchange")),
            }
        };

        let reply = match timeout(round_trip_timeout, exchange).await {
            Ok(reply) => reply?,
            Err(_) => return Err(Error::Timeout(round_trip_timeout)),
        };

        if reply.error_code != 0 {
            return Err(Error::transport(format!(
                "node address exchange refused with error {:#010x}",
                reply.error_code
            )));
        }
        if reply.command != EnvelopeCommand::NodeAddressResponse || reply.payload.len() < 8 {
            return Err(Error::malformed(format!(
                "unexpected node address reply {:?} with {} payload bytes",
                reply.command,
                reply.payload.len()
            )));
        }

        let client_node = u32::from_be_bytes([
            reply.payload[0],
            reply.payload[1],
            reply.payload[2],
            reply.payload[3],
        ]);
        let server_node = u32::from_be_bytes([
            reply.payload[4],
            reply.payload[5],
            reply.payload[6],
            reply.payload[7],
        ]);

        Ok(Self::from_framed(
            framed,
            peer,
            addressing,
            client_node as u8,
            server_node as u8,
            round_trip_timeout,
        ))
    }

    /// Wraps a stream whose node numbers are already known
    pub fn from_stream(
        stream: S,
        peer: String,
        addressing: NodeAddressing,
        client_node: u8,
        server_node: u8,
        round_trip_timeout: Duration,
    ) -> Self {
        Self::from_framed(
            Framed::new(stream, FinsTcpCodec::new()),
            peer,
            addressing,
            client_node,
            server_node,
            round_trip_timeout,
        )
    }

    fn from_framed(
        framed: Framed<S, FinsTcpCodec>,
        peer: String,
        addressing: NodeAddressing,
        client_node: u8,
        server_node: u8,
        round_trip_timeout: Duration,
    ) -> Self {
        let header = Header {
            icf: ICF_COMMAND,
            rsv: 0,
            gct: addressing.gateway_count,
            dna: addressing.dest_network,
            da1: server_node,
            da2: addressing.dest_unit,
            sna: addressing.source_network,
            sa1: client_node,
            sa2: addressing.source_unit,
            sid: 0,
        };

        CommandChannel {
            framed,
            header,
            sid: 0,
            timeout: round_trip_timeout,
            state: ChannelState::Open,
            peer,
        }
    }

    /// Returns the channel health
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Whether requests may be sent
    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    /// Returns the peer label
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Returns the header template (service id left at 0)
    pub fn header(&self) -> Header {
        self.header
    }

    fn next_sid(&mut self) -> u8 {
        self.sid = self.sid.wrapping_add(1);
        self.sid
    }

    /// Sends one command and waits for its response.
    ///
    /// The response is returned whatever its end code; use [`execute`] to
    /// turn a rejection into an error.
    ///
    /// [`execute`]: CommandChannel::execute
    pub async fn send(&mut self, command: CommandCode, body: &[u8]) -> Result<ResponseFrame> {
        match self.state {
            ChannelState::Open => {}
            ChannelState::Suspect => {
                return Err(Error::not_connected(format!(
                    "channel to {} timed out earlier and must be reconnected",
                    self.peer
                )))
            }
            ChannelState::Closed => {
                return Err(Error::not_connected(format!("channel to {} is closed", self.peer)))
            }
        }

        let sid = self.next_sid();
        let frame = CommandFrame {
            header: Header { sid, ..self.header },
            command,
            body: Bytes::copy_from_slice(body),
        };
        let encoded = FrameCodec::encode(&frame);
        debug!(peer = %self.peer, sid, "-> {} [{}]", command, format_hex(&encoded));

        let payload = match timeout(self.timeout, round_trip(&mut self.framed, encoded)).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                if e.is_fatal_to_channel() {
                    self.state = ChannelState::Closed;
                }
                warn!(peer = %self.peer, sid, "{} failed: {}", command, e);
                return Err(e);
            }
            Err(_) => {
                self.state = ChannelState::Suspect;
                warn!(peer = %self.peer, sid, "{} timed out after {:?}", command, self.timeout);
                return Err(Error::Timeout(self.timeout));
            }
        };

        let response = match FrameCodec::decode(&payload) {
            Ok(response) => response,
            Err(e) => {
                self.state = ChannelState::Closed;
                return Err(e);
            }
        };
        debug!(peer = %self.peer, sid, "<- end code {} [{}]", response.end_code, format_hex(&payload));

        if response.command_code != command.code() {
            self.state = ChannelState::Closed;
            return Err(Error::malformed(format!(
                "response command {:#06x} does not match request {:#06x}",
                response.command_code,
                command.code()
            )));
        }
        if response.header.sid != sid {
            warn!(
                peer = %self.peer,
                "response service id {} does not match request {}",
                response.header.sid, sid
            );
        }

        Ok(response)
    }

    /// Sends one command and fails on a non-zero end code
    pub async fn execute(&mut self, command: CommandCode, body: &[u8]) -> Result<ResponseFrame> {
        let response = self.send(command, body).await?;
        if !response.end_code.is_success() {
            warn!(
                peer = %self.peer,
                "{} rejected with end code {}",
                command, response.end_code
            );
        }
        response.check()
    }

    /// Shuts the connection down; the channel cannot be reused afterwards
    pub async fn close(&mut self) {
        self.state = ChannelState::Closed;
        if let Err(e) = self.framed.get_mut().shutdown().await {
            warn!("Error during shutdown of {}: {}", self.peer, e);
        }
        info!("Disconnected from {}", self.peer);
    }
}

async fn round_trip<S>(framed: &mut Framed<S, FinsTcpCodec>, frame: Bytes) -> Result<Bytes>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed.send(Envelope::frame(frame)).await?;

    let reply = match framed.next().await {
        Some(reply) => reply?,
        None => return Err(Error::transport("connection closed by controller")),
    };

    match reply.command {
        EnvelopeCommand::Frame if reply.error_code == 0 => Ok(reply.payload),
        EnvelopeCommand::Frame | EnvelopeCommand::FrameError => Err(Error::transport(format!(
            "controller reported envelope error {:#010x}",
            reply.error_code
        ))),
        other => Err(Error::malformed(format!(
            "unexpected envelope command {:?}",
            other
        ))),
    }
}
