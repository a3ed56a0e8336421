//! Server-side error types.

use shared::{DisconnectReason, NetError};
use std::net::SocketAddr;
use thiserror::Error;

/// Failures surfaced by the server host's lifecycle operations.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server host was already started")]
    AlreadyStarted,

    #[error("server host is stopping")]
    Stopped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a connection task ended. Every task finishes with exactly one cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloseCause {
    #[error("client closed the connection")]
    ClientClosed,

    #[error("bad handshake: {0}")]
    BadHandshake(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("idle timeout")]
    IdleTimeout,

    #[error("write timeout")]
    WriteTimeout,

    #[error("server shutting down")]
    Shutdown,

    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl CloseCause {
    /// Reason code carried by the Disconnect frame sent for this cause.
    pub fn reason(&self) -> DisconnectReason {
        match self {
            CloseCause::ClientClosed => DisconnectReason::ClientClosed,
            CloseCause::BadHandshake(_) => DisconnectReason::BadHandshake,
            CloseCause::Protocol(_) => DisconnectReason::ProtocolError,
            CloseCause::RateLimited => DisconnectReason::RateLimit,
            CloseCause::Shutdown => DisconnectReason::ServerShutdown,
            CloseCause::Io(_)
            | CloseCause::IdleTimeout
            | CloseCause::WriteTimeout
            | CloseCause::Unexpected(_) => DisconnectReason::Unknown,
        }
    }

    /// Whether a Disconnect frame is worth attempting. A peer whose stream
    /// already failed, or that stopped draining its socket, cannot receive one.
    pub fn notifies_peer(&self) -> bool {
        !matches!(self, CloseCause::Io(_) | CloseCause::WriteTimeout)
    }

    /// Short label used in `evt=client_disconnect` lines.
    pub fn label(&self) -> &'static str {
        match self {
            CloseCause::ClientClosed => "client_closed",
            CloseCause::BadHandshake(_) => "bad_handshake",
            CloseCause::Protocol(_) => "protocol_error",
            CloseCause::RateLimited => "rate_limited",
            CloseCause::Io(_) => "io",
            CloseCause::IdleTimeout => "idle_timeout",
            CloseCause::WriteTimeout => "write_timeout",
            CloseCause::Shutdown => "shutdown",
            CloseCause::Unexpected(_) => "unexpected",
        }
    }
}

impl From<NetError> for CloseCause {
    fn from(err: NetError) -> Self {
        match err {
            NetError::RateLimitExceeded => CloseCause::RateLimited,
            NetError::WriteTimeout(_) => CloseCause::WriteTimeout,
            NetError::ConnectionClosed => CloseCause::Io(err.to_string()),
            NetError::Io(e) => CloseCause::Io(e.to_string()),
            NetError::BodyTooLarge { .. } => CloseCause::Unexpected(err.to_string()),
            e if e.is_protocol_error() => CloseCause::Protocol(e.to_string()),
            e => CloseCause::Unexpected(e.to_string()),
        }
    }
}
