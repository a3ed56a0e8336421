//! Message-type to handler dispatch table.

use crate::connection::Connection;
use crate::error::NetError;
use crate::protocol::{Envelope, MessageType};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Reacts to one decoded message. Handlers may reply through `conn`.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        conn: &mut Connection,
        envelope: &Envelope,
        body: &[u8],
    ) -> Result<(), NetError>;
}

/// Registry of handlers keyed by message type.
///
/// Built before the server starts and shared read-only afterwards; it holds
/// no per-connection state.
#[derive(Clone, Default)]
pub struct MessageRouter {
    handlers: HashMap<MessageType, Arc<dyn MessageHandler>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `message_type`, replacing any previous one.
    pub fn register<H>(&mut self, message_type: MessageType, handler: H)
    where
        H: MessageHandler + 'static,
    {
        self.handlers.insert(message_type, Arc::new(handler));
    }

    pub fn is_registered(&self, message_type: MessageType) -> bool {
        self.handlers.contains_key(&message_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the handler for the envelope's type. Unregistered types are a no-op.
    pub async fn dispatch(
        &self,
        conn: &mut Connection,
        envelope: &Envelope,
        body: &[u8],
    ) -> Result<(), NetError> {
        match self.handlers.get(&envelope.message_type) {
            Some(handler) => handler.handle(conn, envelope, body).await,
            None => Ok(()),
        }
    }
}
