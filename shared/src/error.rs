use crate::MAX_BODY_BYTES;
use std::time::Duration;
use thiserror::Error;

/// Failures produced by the frame codec and by [`crate::Connection`].
#[derive(Debug, Error)]
pub enum NetError {
    #[error("body of {len} bytes exceeds the {max} byte limit", max = MAX_BODY_BYTES)]
    BodyTooLarge { len: usize },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u16, actual: u16 },

    #[error("declared body length {len} exceeds the {max} byte limit", max = MAX_BODY_BYTES)]
    DeclaredBodyTooLarge { len: u32 },

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetError {
    /// True for errors caused by a peer violating the wire format.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            NetError::VersionMismatch { .. }
                | NetError::DeclaredBodyTooLarge { .. }
                | NetError::Malformed(_)
        )
    }
}

impl From<bincode::Error> for NetError {
    fn from(err: bincode::Error) -> Self {
        NetError::Malformed(err.to_string())
    }
}
