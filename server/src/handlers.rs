//! Built-in message handlers.

use async_trait::async_trait;
use log::debug;
use shared::{Connection, Envelope, MessageHandler, MessageRouter, MessageType, NetError};

/// Answers every `Ping` with an empty `Pong`.
pub struct PingHandler;

#[async_trait]
impl MessageHandler for PingHandler {
    async fn handle(
        &self,
        conn: &mut Connection,
        envelope: &Envelope,
        _body: &[u8],
    ) -> Result<(), NetError> {
        debug!("Ping seq={} from {:?}", envelope.seq, conn.peer_addr());
        conn.send(MessageType::PONG, &[]).await
    }
}

/// Router with every built-in handler registered.
pub fn default_router() -> MessageRouter {
    let mut router = MessageRouter::new();
    router.register(MessageType::PING, PingHandler);
    router
}
