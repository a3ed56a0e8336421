//! # Game Server Library
//!
//! This library provides the TCP server core for the multiplayer backend. It
//! accepts connections, enforces the handshake, rate-limits every peer and
//! routes framed messages to registered handlers, while keeping track of who
//! is connected and how the process is doing.
//!
//! ## Core Responsibilities
//!
//! ### Connection Lifecycle
//! Every accepted socket becomes a session that moves through
//! `Connected → Handshaken → Closing → Closed`. The first frame must be a
//! handshake request for the current protocol version; anything else closes
//! the connection with a `BadHandshake` reason.
//!
//! ### Abuse Protection
//! - A ceiling on live connections; sockets accepted beyond it are closed at once
//! - Per-connection token buckets for messages and bytes per second
//! - Handshake, idle-read and write timeouts
//!
//! ### Orderly Shutdown
//! Stopping the host cancels the accept loop and every connection task through
//! one root cancellation token, tells each peer why it is being dropped and
//! waits a bounded time for the tasks to drain.
//!
//! ## Module Organization
//!
//! ### Host Module (`host`)
//! Listener, accept loop, per-connection state machine and shutdown drain.
//!
//! ### Session Module (`session`)
//! Concurrent registry of live sessions with monotonically increasing ids.
//!
//! ### Metrics Module (`metrics`)
//! Atomic counters owned by the host plus a periodic snapshot reporter.
//!
//! ### Handlers Module (`handlers`)
//! Built-in message handlers and the default router.
//!
//! ### Config Module (`config`)
//! JSON runtime configuration with defaults for every field.
//!
//! ### Content Module (`content`)
//! Game content loading and validation. The binary refuses to start when the
//! content under its data root is missing or inconsistent.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::handlers::default_router;
//! use server::host::{HostConfig, ServerHost};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = ServerHost::new(HostConfig::default(), default_router());
//!     let addr = host.start().await?;
//!     println!("listening on {}", addr);
//!
//!     tokio::signal::ctrl_c().await?;
//!     host.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod content;
pub mod error;
pub mod handlers;
pub mod host;
pub mod metrics;
pub mod session;

pub use error::{CloseCause, ServerError};
pub use host::{HostConfig, ServerHost};
