//! Host lifecycle tests driven by the structured log lines
//!
//! A capturing logger records every `evt=` line. Hosts in this binary run in
//! parallel, so each test only looks at lines carrying its own bound address
//! or its own client's address.

use async_trait::async_trait;
use log::{LevelFilter, Log, Metadata, Record};
use server::error::ServerError;
use server::handlers::default_router;
use server::host::{HostConfig, ServerHost};
use server::metrics::spawn_snapshot_reporter;
use shared::{
    Connection, Disconnect, DisconnectReason, Envelope, Handshake, MessageHandler, MessageType,
    NetError, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::sync::{Mutex, Once};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::sleep;

struct CaptureLogger {
    lines: Mutex<Vec<String>>,
}

impl Log for CaptureLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            if let Ok(mut lines) = self.lines.lock() {
                lines.push(record.args().to_string());
            }
        }
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger {
    lines: Mutex::new(Vec::new()),
};
static INIT: Once = Once::new();

fn install_logger() {
    INIT.call_once(|| {
        log::set_logger(&LOGGER).unwrap();
        log::set_max_level(LevelFilter::Info);
    });
}

/// Number of captured lines for `event` that carry `key=value` as a whole token.
fn count_events(event: &str, key: &str, value: &str) -> usize {
    let evt = format!("evt={}", event);
    let tag = format!("{}={}", key, value);
    LOGGER
        .lines
        .lock()
        .unwrap()
        .iter()
        .filter(|line| {
            let mut tokens = line.split_whitespace();
            tokens.next() == Some(evt.as_str()) && line.split_whitespace().any(|t| t == tag)
        })
        .count()
}

fn lines_for(key: &str, value: &str) -> Vec<String> {
    let tag = format!("{}={}", key, value);
    LOGGER
        .lines
        .lock()
        .unwrap()
        .iter()
        .filter(|line| line.split_whitespace().any(|t| t == tag))
        .cloned()
        .collect()
}

fn test_config() -> HostConfig {
    HostConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        handshake_timeout: Duration::from_millis(500),
        drain_timeout: Duration::from_secs(3),
        ..HostConfig::default()
    }
}

async fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// LIFECYCLE TESTS
mod lifecycle {
    use super::*;

    /// Start logs one server_start line with the bound address
    #[tokio::test]
    async fn start_is_logged_once() {
        install_logger();
        let host = ServerHost::new(test_config(), default_router());
        let addr = host.start().await.unwrap().to_string();

        assert!(matches!(
            host.start().await,
            Err(ServerError::AlreadyStarted)
        ));
        assert_eq!(count_events("server_start", "addr", &addr), 1);
        host.stop().await;
    }

    /// Calling stop twice produces exactly one begin/end pair
    #[tokio::test]
    async fn stop_twice_logs_one_sequence() {
        install_logger();
        let host = ServerHost::new(test_config(), default_router());
        let addr = host.start().await.unwrap().to_string();

        host.stop().await;
        let second = Instant::now();
        host.stop().await;
        assert!(second.elapsed() < Duration::from_millis(100));

        assert_eq!(count_events("server_stop_begin", "addr", &addr), 1);
        assert_eq!(count_events("server_stop_end", "addr", &addr), 1);
    }

    /// Concurrent stops still run the sequence once
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stops_log_one_sequence() {
        install_logger();
        let host = ServerHost::new(test_config(), default_router());
        let addr = host.start().await.unwrap().to_string();

        tokio::join!(host.stop(), host.stop(), host.stop());

        assert_eq!(count_events("server_stop_begin", "addr", &addr), 1);
        assert_eq!(count_events("server_stop_end", "addr", &addr), 1);
    }

    /// A full session leaves connect, handshake and disconnect lines behind
    #[tokio::test]
    async fn session_events_are_logged() {
        install_logger();
        let host = ServerHost::new(test_config(), default_router());
        let addr = host.start().await.unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let remote = stream.local_addr().unwrap().to_string();

        let request = Handshake::request(PROTOCOL_VERSION, 77).encode().unwrap();
        let frame = shared::encode(MessageType::HANDSHAKE, 1, &request, 0).unwrap();
        stream.write_all(&frame).await.unwrap();
        let (ack, _) = shared::read_frame(&mut stream).await.unwrap();
        assert_eq!(ack.message_type, MessageType::HANDSHAKE);

        let bye = Disconnect::new(DisconnectReason::ClientClosed).encode().unwrap();
        let frame = shared::encode(MessageType::DISCONNECT, 2, &bye, 0).unwrap();
        stream.write_all(&frame).await.unwrap();
        loop {
            match shared::read_frame(&mut stream).await {
                Ok(_) => continue,
                Err(_) => break,
            }
        }

        wait_for("client_disconnect line", || {
            count_events("client_disconnect", "remote", &remote) == 1
        })
        .await;
        assert_eq!(count_events("client_connect", "remote", &remote), 1);
        assert_eq!(count_events("handshake_ok", "remote", &remote), 1);

        let lines = lines_for("remote", &remote);
        let disconnect = lines
            .iter()
            .find(|line| line.starts_with("evt=client_disconnect "))
            .unwrap();
        assert!(disconnect.contains("reason=ClientClosed"));
        assert!(disconnect.contains("cause=client_closed"));

        host.stop().await;
    }

    /// Snapshots are logged periodically while the host runs
    #[tokio::test]
    async fn metrics_snapshots_are_logged() {
        install_logger();
        let host = ServerHost::new(test_config(), default_router());
        host.start().await.unwrap();

        let reporter = spawn_snapshot_reporter(
            host.metrics(),
            Duration::from_millis(20),
            host.shutdown_token(),
        );
        wait_for("metrics snapshot", || {
            LOGGER
                .lines
                .lock()
                .unwrap()
                .iter()
                .any(|line| line.starts_with("evt=metrics_snapshot current_connections="))
        })
        .await;

        host.stop().await;
        tokio::time::timeout(Duration::from_secs(1), reporter)
            .await
            .unwrap()
            .unwrap();
    }
}

/// DRAIN TESTS
mod drain {
    use super::*;

    struct Stalls;

    #[async_trait]
    impl MessageHandler for Stalls {
        async fn handle(
            &self,
            _conn: &mut Connection,
            _envelope: &Envelope,
            _body: &[u8],
        ) -> Result<(), NetError> {
            sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    /// A task stuck in a handler is abandoned once the drain timeout passes
    #[tokio::test]
    async fn stuck_handler_hits_drain_timeout() {
        install_logger();
        let mut router = default_router();
        router.register(MessageType(60), Stalls);
        let config = HostConfig {
            drain_timeout: Duration::from_millis(200),
            ..test_config()
        };
        let host = ServerHost::new(config, router);
        let addr: SocketAddr = host.start().await.unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = Handshake::request(PROTOCOL_VERSION, 1).encode().unwrap();
        stream
            .write_all(&shared::encode(MessageType::HANDSHAKE, 1, &request, 0).unwrap())
            .await
            .unwrap();
        shared::read_frame(&mut stream).await.unwrap();
        stream
            .write_all(&shared::encode(MessageType(60), 2, &[], 0).unwrap())
            .await
            .unwrap();

        let metrics = host.metrics();
        wait_for("stalled message", || metrics.messages_in() == 2).await;

        let started = Instant::now();
        host.stop().await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(host.active_tasks(), 1);

        let addr = addr.to_string();
        assert_eq!(count_events("drain_timeout", "addr", &addr), 1);
        assert_eq!(count_events("server_stop_end", "addr", &addr), 1);
    }
}
