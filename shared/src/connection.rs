//! One framed, rate-limited stream.

use crate::codec;
use crate::error::NetError;
use crate::protocol::{Disconnect, DisconnectReason, Envelope, MessageType};
use crate::rate_limiter::RateLimiter;
use crate::HEADER_SIZE;
use log::debug;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Instant};

/// How long a closing connection lingers after half-closing its send side.
pub const DISCONNECT_GRACE: Duration = Duration::from_millis(200);

/// Any byte stream a [`Connection`] can run over: TCP sockets in production,
/// in-memory duplex pipes in tests.
pub trait NetStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> NetStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Owns a stream, numbers outgoing frames and rate-limits incoming ones.
pub struct Connection {
    stream: Option<Box<dyn NetStream>>,
    limiter: RateLimiter,
    send_seq: u32,
    frames_sent: u64,
    write_timeout: Option<Duration>,
    peer_addr: Option<SocketAddr>,
}

impl Connection {
    pub fn new<S>(stream: S, limiter: RateLimiter) -> Self
    where
        S: NetStream + 'static,
    {
        Self {
            stream: Some(Box::new(stream)),
            limiter,
            send_seq: 0,
            frames_sent: 0,
            write_timeout: None,
            peer_addr: None,
        }
    }

    /// Bounds every write (including the final disconnect frame) by `limit`.
    pub fn with_write_timeout(mut self, limit: Duration) -> Self {
        self.write_timeout = Some(limit);
        self
    }

    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Number of frames fully written so far.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Sequence number of the last frame sent, 0 before the first send.
    pub fn last_sent_seq(&self) -> u32 {
        self.send_seq
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Encodes and writes one frame, flushing before returning.
    pub async fn send(&mut self, message_type: MessageType, body: &[u8]) -> Result<(), NetError> {
        let seq = self.send_seq.wrapping_add(1);
        let frame = codec::encode(message_type, seq, body, 0)?;
        let stream = self.stream.as_mut().ok_or(NetError::ConnectionClosed)?;

        let write = async {
            stream.write_all(&frame).await?;
            stream.flush().await
        };
        match self.write_timeout {
            Some(limit) => timeout(limit, write)
                .await
                .map_err(|_| NetError::WriteTimeout(limit))??,
            None => write.await?,
        }

        self.send_seq = seq;
        self.frames_sent += 1;
        Ok(())
    }

    /// Reads one frame and charges it against the rate limiter.
    ///
    /// A refused admission fails with [`NetError::RateLimitExceeded`] after the
    /// frame has already been consumed from the stream.
    pub async fn receive(&mut self) -> Result<(Envelope, Vec<u8>), NetError> {
        let stream = self.stream.as_mut().ok_or(NetError::ConnectionClosed)?;
        let (envelope, body) = codec::read_frame(stream).await?;

        if !self.limiter.try_consume(1, HEADER_SIZE + body.len()) {
            return Err(NetError::RateLimitExceeded);
        }
        Ok((envelope, body))
    }

    /// Best-effort goodbye: sends a `Disconnect` frame, half-closes the send
    /// side, lingers for [`DISCONNECT_GRACE`] while discarding inbound bytes,
    /// then closes. Never fails; each step runs even if an earlier one did.
    pub async fn send_disconnect_and_close(&mut self, reason: DisconnectReason) {
        match Disconnect::new(reason).encode() {
            Ok(body) => {
                if let Err(e) = self.send(MessageType::DISCONNECT, &body).await {
                    debug!("disconnect frame not delivered to {:?}: {}", self.peer_addr, e);
                }
            }
            Err(e) => debug!("failed to encode disconnect body: {}", e),
        }

        if let Some(stream) = self.stream.as_mut() {
            match timeout(DISCONNECT_GRACE, stream.shutdown()).await {
                Ok(Err(e)) => debug!("half-close failed for {:?}: {}", self.peer_addr, e),
                Err(_) => debug!("half-close timed out for {:?}", self.peer_addr),
                Ok(Ok(())) => {}
            }

            let deadline = Instant::now() + DISCONNECT_GRACE;
            let _ = tokio::time::timeout_at(deadline, drain_inbound(stream)).await;
            tokio::time::sleep_until(deadline).await;
        }

        self.close();
    }

    /// Drops the stream. Safe to call any number of times.
    pub fn close(&mut self) {
        self.stream.take();
    }
}

/// Reads and discards until EOF or error so unread input does not turn the
/// close into a reset.
async fn drain_inbound(stream: &mut Box<dyn NetStream>) {
    let mut scratch = [0u8; 4096];
    loop {
        match stream.read(&mut scratch).await {
            Ok(0) | Err(_) => break,
            Ok(_) => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Handshake;
    use crate::PROTOCOL_VERSION;
    use tokio::io::duplex;

    fn pair() -> (Connection, Connection) {
        let (a, b) = duplex(64 * 1024);
        (
            Connection::new(a, RateLimiter::new(1000, 1024 * 1024)),
            Connection::new(b, RateLimiter::new(1000, 1024 * 1024)),
        )
    }

    #[tokio::test]
    async fn test_send_numbers_frames_from_one() {
        let (mut left, mut right) = pair();

        left.send(MessageType::PING, &[]).await.unwrap();
        left.send(MessageType::PING, &[1, 2]).await.unwrap();

        let (first, _) = right.receive().await.unwrap();
        let (second, body) = right.receive().await.unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert_eq!(body, vec![1, 2]);
        assert_eq!(left.frames_sent(), 2);
        assert_eq!(left.last_sent_seq(), 2);
    }

    #[tokio::test]
    async fn test_sequence_wraps_after_max() {
        let (mut left, mut right) = pair();
        left.send_seq = u32::MAX - 1;

        left.send(MessageType::PING, &[]).await.unwrap();
        left.send(MessageType::PING, &[]).await.unwrap();

        let (first, _) = right.receive().await.unwrap();
        let (second, _) = right.receive().await.unwrap();
        assert_eq!(first.seq, u32::MAX);
        assert_eq!(second.seq, 0);
        assert_eq!(left.last_sent_seq(), 0);
    }

    #[tokio::test]
    async fn test_oversized_send_does_not_consume_sequence() {
        let (mut left, mut right) = pair();
        let too_big = vec![0u8; crate::MAX_BODY_BYTES + 1];

        assert!(matches!(
            left.send(MessageType::PING, &too_big).await,
            Err(NetError::BodyTooLarge { .. })
        ));
        left.send(MessageType::PING, &[]).await.unwrap();

        let (envelope, _) = right.receive().await.unwrap();
        assert_eq!(envelope.seq, 1);
    }

    #[tokio::test]
    async fn test_receive_enforces_rate_limit() {
        let (a, b) = duplex(64 * 1024);
        let mut sender = Connection::new(a, RateLimiter::new(1000, 1024 * 1024));
        let mut receiver = Connection::new(b, RateLimiter::new(2, 64 * 1024));

        for _ in 0..3 {
            sender.send(MessageType::PING, &[]).await.unwrap();
        }

        assert!(receiver.receive().await.is_ok());
        assert!(receiver.receive().await.is_ok());
        assert!(matches!(
            receiver.receive().await,
            Err(NetError::RateLimitExceeded)
        ));
    }

    #[tokio::test]
    async fn test_receive_charges_header_and_body_bytes() {
        let (a, b) = duplex(64 * 1024);
        let mut sender = Connection::new(a, RateLimiter::new(1000, 1024 * 1024));
        let mut receiver = Connection::new(b, RateLimiter::new(1000, 300));

        sender.send(MessageType::PING, &[0u8; 200]).await.unwrap();
        sender.send(MessageType::PING, &[0u8; 200]).await.unwrap();

        assert!(receiver.receive().await.is_ok());
        assert!(matches!(
            receiver.receive().await,
            Err(NetError::RateLimitExceeded)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_and_close_delivers_reason_then_eof() {
        let (mut server, mut client) = pair();
        let hs = Handshake::request(PROTOCOL_VERSION, 1).encode().unwrap();
        client.send(MessageType::HANDSHAKE, &hs).await.unwrap();

        server
            .send_disconnect_and_close(DisconnectReason::RateLimit)
            .await;
        assert!(server.is_closed());

        let (envelope, body) = client.receive().await.unwrap();
        assert_eq!(envelope.message_type, MessageType::DISCONNECT);
        assert_eq!(
            Disconnect::decode(&body).unwrap().reason(),
            DisconnectReason::RateLimit
        );
        assert!(matches!(
            client.receive().await,
            Err(NetError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_on_broken_peer_does_not_fail() {
        let (mut server, client) = pair();
        drop(client);

        server
            .send_disconnect_and_close(DisconnectReason::ProtocolError)
            .await;
        assert!(server.is_closed());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut left, _right) = pair();
        left.close();
        left.close();
        assert!(left.is_closed());
        assert!(matches!(
            left.send(MessageType::PING, &[]).await,
            Err(NetError::ConnectionClosed)
        ));
        assert!(matches!(
            left.receive().await,
            Err(NetError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_write_timeout_when_peer_stops_reading() {
        let (a, _b) = duplex(64);
        let mut conn = Connection::new(a, RateLimiter::new(1000, 1024 * 1024))
            .with_write_timeout(Duration::from_millis(50));

        let err = conn.send(MessageType::PING, &[0u8; 1024]).await.unwrap_err();
        assert!(matches!(err, NetError::WriteTimeout(_)));
    }
}
