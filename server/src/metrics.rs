//! Process counters for the server host
//!
//! One `ServerMetrics` is owned by each host and shared by reference with
//! every connection task. All updates are single atomic operations.

use log::info;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct ServerMetrics {
    current_connections: AtomicI64,
    total_connections: AtomicU64,
    total_disconnects: AtomicU64,
    messages_in: AtomicU64,
    messages_out: AtomicU64,
    io_errors: AtomicU64,
    parse_errors: AtomicU64,
    unhandled_errors: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub current_connections: i64,
    pub total_connections: u64,
    pub total_disconnects: u64,
    pub messages_in: u64,
    pub messages_out: u64,
    pub io_errors: u64,
    pub parse_errors: u64,
    pub unhandled_errors: u64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connection was accepted and a session registered.
    pub fn on_accept(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.current_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// A connection task finished and its session was removed.
    pub fn on_disconnect(&self) {
        self.total_disconnects.fetch_add(1, Ordering::Relaxed);
        self.current_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn inc_messages_in(&self) {
        self.messages_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_messages_out(&self) {
        self.add_messages_out(1);
    }

    pub fn add_messages_out(&self, count: u64) {
        if count > 0 {
            self.messages_out.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn inc_io_error(&self) {
        self.io_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_unhandled_error(&self) {
        self.unhandled_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn current_connections(&self) -> i64 {
        self.current_connections.load(Ordering::Relaxed)
    }

    pub fn total_connections(&self) -> u64 {
        self.total_connections.load(Ordering::Relaxed)
    }

    pub fn total_disconnects(&self) -> u64 {
        self.total_disconnects.load(Ordering::Relaxed)
    }

    pub fn messages_in(&self) -> u64 {
        self.messages_in.load(Ordering::Relaxed)
    }

    pub fn messages_out(&self) -> u64 {
        self.messages_out.load(Ordering::Relaxed)
    }

    pub fn io_errors(&self) -> u64 {
        self.io_errors.load(Ordering::Relaxed)
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    pub fn unhandled_errors(&self) -> u64 {
        self.unhandled_errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            current_connections: self.current_connections(),
            total_connections: self.total_connections(),
            total_disconnects: self.total_disconnects(),
            messages_in: self.messages_in(),
            messages_out: self.messages_out(),
            io_errors: self.io_errors(),
            parse_errors: self.parse_errors(),
            unhandled_errors: self.unhandled_errors(),
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "current_connections={} total_connections={} total_disconnects={} \
             messages_in={} messages_out={} io_errors={} parse_errors={} unhandled_errors={}",
            self.current_connections,
            self.total_connections,
            self.total_disconnects,
            self.messages_in,
            self.messages_out,
            self.io_errors,
            self.parse_errors,
            self.unhandled_errors
        )
    }
}

/// Spawns a task that logs a metrics snapshot every `interval` until `shutdown` fires
pub fn spawn_snapshot_reporter(
    metrics: Arc<ServerMetrics>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Skip the first tick since it fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    info!("evt=metrics_snapshot {}", metrics.snapshot());
                }
            }
        }
    })
}
