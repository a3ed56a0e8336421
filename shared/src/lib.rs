//! Wire protocol and connection plumbing shared by the server and the client.
//!
//! Every frame on the stream is a fixed 16-byte [`Envelope`] followed by
//! `body_len` raw body bytes. All integers are little-endian. Fixed-layout
//! bodies ([`Handshake`], [`Disconnect`]) are serialized with bincode's
//! default fixed-width encoding, which writes struct fields back to back
//! without padding.

pub mod codec;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod rate_limiter;
pub mod router;

pub use codec::{encode, read_frame};
pub use connection::{Connection, NetStream};
pub use error::NetError;
pub use protocol::{Disconnect, DisconnectReason, Envelope, Handshake, HandshakeStage, MessageType};
pub use rate_limiter::RateLimiter;
pub use router::{MessageHandler, MessageRouter};

/// Protocol version written into every envelope and every handshake.
pub const PROTOCOL_VERSION: u16 = 1;
/// Encoded envelope size.
pub const HEADER_SIZE: usize = 16;
/// Largest body a single frame may carry (1 MiB).
pub const MAX_BODY_BYTES: usize = 1024 * 1024;
/// Encoded handshake body size.
pub const HANDSHAKE_SIZE: usize = 8;
/// Encoded disconnect body size.
pub const DISCONNECT_SIZE: usize = 2;
