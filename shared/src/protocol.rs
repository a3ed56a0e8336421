//! Fixed-layout wire structures: envelope header, handshake and disconnect bodies.

use crate::error::NetError;
use crate::{DISCONNECT_SIZE, HANDSHAKE_SIZE, HEADER_SIZE, PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric message type carried in the envelope.
///
/// Kept open rather than a closed enum: router consumers may register their
/// own values, and unknown values must survive decoding so they can be ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageType(pub u16);

impl MessageType {
    pub const PING: MessageType = MessageType(1);
    pub const PONG: MessageType = MessageType(2);
    pub const HANDSHAKE: MessageType = MessageType(3);
    pub const DISCONNECT: MessageType = MessageType(4);

    pub const fn value(self) -> u16 {
        self.0
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MessageType::PING => write!(f, "Ping"),
            MessageType::PONG => write!(f, "Pong"),
            MessageType::HANDSHAKE => write!(f, "Handshake"),
            MessageType::DISCONNECT => write!(f, "Disconnect"),
            MessageType(other) => write!(f, "Type({})", other),
        }
    }
}

impl From<u16> for MessageType {
    fn from(value: u16) -> Self {
        MessageType(value)
    }
}

/// Frame header.
///
/// Layout: `version:u16, flags:u16, message_type:u16, reserved:u16, seq:u32, body_len:u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u16,
    pub flags: u16,
    pub message_type: MessageType,
    pub reserved: u16,
    pub seq: u32,
    pub body_len: u32,
}

impl Envelope {
    /// Builds a header for the current protocol version.
    pub fn new(message_type: MessageType, seq: u32, body_len: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flags: 0,
            message_type,
            reserved: 0,
            seq,
            body_len,
        }
    }

    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    /// Serializes the header. The reserved field is always written as zero.
    pub fn encode(&self) -> Result<Vec<u8>, NetError> {
        let header = Envelope {
            reserved: 0,
            ..*self
        };
        let bytes = bincode::serialize(&header)?;
        debug_assert_eq!(bytes.len(), HEADER_SIZE);
        Ok(bytes)
    }

    /// Decodes a header. Version and length checks are left to the codec.
    pub fn decode(header: &[u8; HEADER_SIZE]) -> Result<Self, NetError> {
        Ok(bincode::deserialize(header)?)
    }
}

/// Which half of the handshake exchange a body represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeStage {
    Request = 0,
    Ack = 1,
}

impl TryFrom<u8> for HandshakeStage {
    type Error = NetError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(HandshakeStage::Request),
            1 => Ok(HandshakeStage::Ack),
            other => Err(NetError::Malformed(format!(
                "unknown handshake stage {}",
                other
            ))),
        }
    }
}

/// Handshake body: `protocol_version:u16, nonce:u32, stage:u8, reserved:u8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub protocol_version: u16,
    pub nonce: u32,
    stage: u8,
    reserved: u8,
}

impl Handshake {
    pub fn request(protocol_version: u16, nonce: u32) -> Self {
        Self {
            protocol_version,
            nonce,
            stage: HandshakeStage::Request as u8,
            reserved: 0,
        }
    }

    /// The responder's answer: same version and nonce, stage `Ack`.
    pub fn ack(&self) -> Self {
        Self {
            protocol_version: self.protocol_version,
            nonce: self.nonce,
            stage: HandshakeStage::Ack as u8,
            reserved: 0,
        }
    }

    pub fn stage(&self) -> Result<HandshakeStage, NetError> {
        HandshakeStage::try_from(self.stage)
    }

    pub fn encode(&self) -> Result<Vec<u8>, NetError> {
        let bytes = bincode::serialize(&Handshake {
            reserved: 0,
            ..*self
        })?;
        debug_assert_eq!(bytes.len(), HANDSHAKE_SIZE);
        Ok(bytes)
    }

    /// Decodes a handshake body. Shorter bodies are malformed; trailing bytes are ignored.
    pub fn decode(body: &[u8]) -> Result<Self, NetError> {
        if body.len() < HANDSHAKE_SIZE {
            return Err(NetError::Malformed(format!(
                "handshake body is {} bytes, expected {}",
                body.len(),
                HANDSHAKE_SIZE
            )));
        }
        Ok(bincode::deserialize(&body[..HANDSHAKE_SIZE])?)
    }
}

/// Why a peer is being disconnected. Travels as a `u16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DisconnectReason {
    Unknown = 0,
    RateLimit = 1,
    ProtocolError = 2,
    BadHandshake = 3,
    ServerShutdown = 4,
    ClientClosed = 5,
}

impl From<u16> for DisconnectReason {
    fn from(value: u16) -> Self {
        match value {
            1 => DisconnectReason::RateLimit,
            2 => DisconnectReason::ProtocolError,
            3 => DisconnectReason::BadHandshake,
            4 => DisconnectReason::ServerShutdown,
            5 => DisconnectReason::ClientClosed,
            _ => DisconnectReason::Unknown,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Disconnect body: `reason:u16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disconnect {
    reason: u16,
}

impl Disconnect {
    pub fn new(reason: DisconnectReason) -> Self {
        Self {
            reason: reason as u16,
        }
    }

    pub fn reason(&self) -> DisconnectReason {
        DisconnectReason::from(self.reason)
    }

    pub fn encode(&self) -> Result<Vec<u8>, NetError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(body: &[u8]) -> Result<Self, NetError> {
        if body.len() < DISCONNECT_SIZE {
            return Err(NetError::Malformed(format!(
                "disconnect body is {} bytes, expected {}",
                body.len(),
                DISCONNECT_SIZE
            )));
        }
        Ok(bincode::deserialize(&body[..DISCONNECT_SIZE])?)
    }
}
