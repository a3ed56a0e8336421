//! # Game Client Library
//!
//! A small scripted client for the game server. It speaks the same framed
//! protocol as the server through [`shared::Connection`] and is used both by
//! the `client` binary (a ping-burst load probe) and by the integration
//! tests.
//!
//! ## Session Flow
//!
//! 1. [`GameClient::connect`] opens the TCP stream
//! 2. [`GameClient::handshake`] sends a request with a random nonce and checks
//!    that the server's acknowledgement echoes it
//! 3. [`GameClient::ping`] / [`GameClient::ping_burst`] generate traffic
//! 4. [`GameClient::collect_replies`] tallies what the server sent back
//! 5. [`GameClient::disconnect`] says goodbye and waits for the server's answer
//!
//! A server that refuses the connection at any point sends a `Disconnect`
//! frame first; the client surfaces its reason as [`ClientError::Rejected`].
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::GameClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = GameClient::connect("127.0.0.1:7777".parse()?).await?;
//!     client.handshake().await?;
//!
//!     let sent = client.ping_burst(10, Duration::from_millis(20)).await?;
//!     let tally = client.collect_replies(Duration::from_millis(500)).await;
//!     println!("sent {} pings, got {} pongs", sent, tally.pongs);
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```

use log::{debug, info, warn};
use shared::{
    Connection, Disconnect, DisconnectReason, Envelope, Handshake, HandshakeStage, MessageType,
    NetError, NetStream, RateLimiter, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout_at, Instant};

/// Inbound limits for the client side. The server is trusted, so these only
/// guard against a runaway peer.
const CLIENT_MAX_MSGS_PER_SEC: u32 = 1_000_000;
const CLIENT_MAX_BYTES_PER_SEC: u32 = 256 * 1024 * 1024;

/// How long `disconnect` waits for the server's closing frame
const DISCONNECT_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server closed the connection: {0}")]
    Rejected(DisconnectReason),

    #[error("unexpected {0} message from server")]
    UnexpectedMessage(MessageType),

    #[error("handshake acknowledgement mismatch: sent nonce {sent_nonce}, got {nonce} (stage {stage:?}, version {version})")]
    HandshakeMismatch {
        sent_nonce: u32,
        nonce: u32,
        stage: HandshakeStage,
        version: u16,
    },

    #[error(transparent)]
    Net(#[from] NetError),
}

/// What the server sent back during [`GameClient::collect_replies`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyTally {
    pub pongs: u64,
    pub other: u64,
    /// Reason from the server's `Disconnect` frame, if one arrived
    pub disconnect: Option<DisconnectReason>,
    /// True once the server closed the stream
    pub closed: bool,
}

pub struct GameClient {
    conn: Connection,
    nonce: Option<u32>,
}

impl GameClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect { addr, source })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }
        info!("Connected to {}", addr);

        Ok(Self::from_connection(
            Connection::new(stream, Self::limiter()).with_peer_addr(addr),
        ))
    }

    /// Wraps an already-open stream, e.g. one half of an in-memory pipe.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: NetStream + 'static,
    {
        Self::from_connection(Connection::new(stream, Self::limiter()))
    }

    fn from_connection(conn: Connection) -> Self {
        Self { conn, nonce: None }
    }

    fn limiter() -> RateLimiter {
        RateLimiter::new(CLIENT_MAX_MSGS_PER_SEC, CLIENT_MAX_BYTES_PER_SEC)
    }

    /// Nonce agreed with the server, once the handshake completed
    pub fn nonce(&self) -> Option<u32> {
        self.nonce
    }

    pub fn is_handshaken(&self) -> bool {
        self.nonce.is_some()
    }

    /// Sends a handshake request with a fresh random nonce and validates the acknowledgement.
    pub async fn handshake(&mut self) -> Result<Handshake, ClientError> {
        self.handshake_with(PROTOCOL_VERSION, rand::random()).await
    }

    /// Like [`GameClient::handshake`] with an explicit version and nonce.
    pub async fn handshake_with(
        &mut self,
        protocol_version: u16,
        nonce: u32,
    ) -> Result<Handshake, ClientError> {
        let request = Handshake::request(protocol_version, nonce);
        self.conn
            .send(MessageType::HANDSHAKE, &request.encode()?)
            .await?;

        let (envelope, body) = self.receive().await?;
        if envelope.message_type != MessageType::HANDSHAKE {
            return Err(ClientError::UnexpectedMessage(envelope.message_type));
        }

        let ack = Handshake::decode(&body)?;
        let stage = ack.stage()?;
        if stage != HandshakeStage::Ack
            || ack.nonce != nonce
            || ack.protocol_version != protocol_version
        {
            return Err(ClientError::HandshakeMismatch {
                sent_nonce: nonce,
                nonce: ack.nonce,
                stage,
                version: ack.protocol_version,
            });
        }

        self.nonce = Some(nonce);
        info!(
            "Handshake complete (version={} nonce={})",
            ack.protocol_version, ack.nonce
        );
        Ok(ack)
    }

    pub async fn ping(&mut self) -> Result<(), ClientError> {
        self.conn.send(MessageType::PING, &[]).await?;
        Ok(())
    }

    /// Sends up to `count` pings, pausing `delay` between them.
    ///
    /// Stops early, without failing, once the server has closed the stream.
    /// Returns how many pings were written.
    pub async fn ping_burst(&mut self, count: u32, delay: Duration) -> Result<u32, ClientError> {
        let mut sent = 0;

        for _ in 0..count {
            match self.conn.send(MessageType::PING, &[]).await {
                Ok(()) => sent += 1,
                Err(NetError::Io(e)) => {
                    warn!("Connection closed by server after {} pings: {}", sent, e);
                    break;
                }
                Err(NetError::ConnectionClosed) => break,
                Err(e) => return Err(e.into()),
            }

            if !delay.is_zero() {
                sleep(delay).await;
            }
        }

        Ok(sent)
    }

    /// Reads one frame, turning a server `Disconnect` into [`ClientError::Rejected`].
    pub async fn receive(&mut self) -> Result<(Envelope, Vec<u8>), ClientError> {
        let (envelope, body) = self.conn.receive().await?;
        if envelope.message_type == MessageType::DISCONNECT {
            let reason = Disconnect::decode(&body)?.reason();
            return Err(ClientError::Rejected(reason));
        }
        Ok((envelope, body))
    }

    /// Counts replies until the server disconnects, closes the stream or `window` elapses.
    pub async fn collect_replies(&mut self, window: Duration) -> ReplyTally {
        let deadline = Instant::now() + window;
        let mut tally = ReplyTally::default();

        loop {
            match timeout_at(deadline, self.conn.receive()).await {
                Err(_) => break,
                Ok(Ok((envelope, body))) => match envelope.message_type {
                    MessageType::PONG => tally.pongs += 1,
                    MessageType::DISCONNECT => {
                        tally.disconnect = Some(
                            Disconnect::decode(&body)
                                .map(|d| d.reason())
                                .unwrap_or(DisconnectReason::Unknown),
                        );
                        break;
                    }
                    _ => tally.other += 1,
                },
                Ok(Err(e)) => {
                    debug!("Stopped collecting replies: {}", e);
                    tally.closed = true;
                    break;
                }
            }
        }

        tally
    }

    /// Sends a client `Disconnect` and waits briefly for the server's reply.
    ///
    /// Returns the reason the server gave, if its frame arrived.
    pub async fn disconnect(&mut self) -> Result<Option<DisconnectReason>, ClientError> {
        let body = Disconnect::new(DisconnectReason::ClientClosed).encode()?;
        self.conn.send(MessageType::DISCONNECT, &body).await?;

        let deadline = Instant::now() + DISCONNECT_WAIT;
        let mut reason = None;
        loop {
            match timeout_at(deadline, self.conn.receive()).await {
                Ok(Ok((envelope, body))) if envelope.message_type == MessageType::DISCONNECT => {
                    reason = Some(Disconnect::decode(&body)?.reason());
                    break;
                }
                Ok(Ok(_)) => continue,
                Ok(Err(_)) | Err(_) => break,
            }
        }

        self.conn.close();
        self.nonce = None;
        Ok(reason)
    }

    /// Drops the stream without any goodbye.
    pub fn close(&mut self) {
        self.conn.close();
    }
}
