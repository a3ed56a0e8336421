//! Session tracking for accepted connections
//!
//! This module keeps one lightweight record per accepted connection:
//! - Identity (a monotonically increasing session id) and remote address
//! - Protocol state (connected, handshaken, closing, closed)
//! - The protocol version and nonce agreed during the handshake
//!
//! The registry is shared by the accept loop and every connection task. Each
//! session's fields are written only by the task that registered it; the
//! registry holds the latest copy that task published.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Unique identifier assigned to a session at registration
pub type SessionId = u64;

/// Protocol state of a single connection
///
/// Sessions only ever move forward: `Connected → Handshaken → Closing → Closed`,
/// with `Connected → Closing` taken when the handshake fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Handshaken,
    Closing,
    Closed,
}

/// Server-side record of one accepted connection
#[derive(Debug, Clone)]
pub struct Session {
    /// Unique id, assigned in registration order
    pub id: SessionId,
    /// Address the connection was accepted from
    pub remote_addr: SocketAddr,
    /// Protocol version agreed in the handshake (0 before it completes)
    pub protocol_version: u16,
    /// Nonce the peer sent in its handshake request
    pub handshake_nonce: u32,
    /// Current protocol state
    pub state: SessionState,
    /// When the connection was accepted
    pub connected_at: Instant,
}

impl Session {
    /// Creates a freshly accepted session in the `Connected` state
    pub fn new(id: SessionId, remote_addr: SocketAddr) -> Self {
        Self {
            id,
            remote_addr,
            protocol_version: 0,
            handshake_nonce: 0,
            state: SessionState::Connected,
            connected_at: Instant::now(),
        }
    }

    /// Records the peer's handshake and moves to `Handshaken`
    pub fn mark_handshaken(&mut self, protocol_version: u16, nonce: u32) {
        self.protocol_version = protocol_version;
        self.handshake_nonce = nonce;
        self.state = SessionState::Handshaken;
    }
}

/// Thread-safe registry of live sessions keyed by session id
///
/// Registration hands out ids from a shared atomic counter, so concurrent
/// registrations never collide and ids increase in the order they are drawn.
pub struct SessionManager {
    /// Live sessions indexed by id
    sessions: DashMap<SessionId, Session>,
    /// Last id handed out
    last_id: AtomicU64,
}

impl SessionManager {
    /// Creates an empty registry. The first registered session gets id 1.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            last_id: AtomicU64::new(0),
        }
    }

    /// Registers a newly accepted connection
    ///
    /// Assigns the next id, stores the session and returns the caller's
    /// own copy, which it then owns and mutates.
    pub fn register(&self, remote_addr: SocketAddr) -> Session {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Session::new(id, remote_addr);
        self.sessions.insert(id, session.clone());
        session
    }

    /// Publishes the owner's latest copy of a session
    ///
    /// Returns false if the session was already removed.
    pub fn update(&self, session: &Session) -> bool {
        match self.sessions.get_mut(&session.id) {
            Some(mut entry) => {
                *entry = session.clone();
                true
            }
            None => false,
        }
    }

    /// Removes a session, returning it if it was present
    pub fn try_remove(&self, id: SessionId) -> Option<Session> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    /// Returns a copy of a live session
    pub fn try_get(&self, id: SessionId) -> Option<Session> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Number of live sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Point-in-time copy of all live sessions, ordered by id
    pub fn snapshot(&self) -> Vec<Session> {
        let mut all: Vec<Session> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(|session| session.id);
        all
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
