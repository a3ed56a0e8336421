//! TCP server host: accept loop, per-connection tasks and shutdown drain
//!
//! One accept loop runs per host. Every accepted socket gets its own task that
//! walks the session through `Connected → Handshaken → Closing → Closed`:
//!
//! 1. **Handshake**: one frame, bounded by the handshake timeout, must be a
//!    `Handshake` request carrying the current protocol version. The server
//!    answers with an `Ack` that echoes the peer's nonce.
//! 2. **Message loop**: frames are read one at a time under the idle timeout
//!    and dispatched inline, so a connection's messages are handled strictly
//!    in arrival order.
//! 3. **Termination**: every exit path produces a single [`CloseCause`], which
//!    `finish_session` turns into a best-effort `Disconnect` frame, metrics
//!    and a log line.
//!
//! All waits select on the host's root [`CancellationToken`], so a shutdown
//! (mapped to `ServerShutdown`) is told apart from a local timeout.

use crate::error::{CloseCause, ServerError};
use crate::metrics::ServerMetrics;
use crate::session::{Session, SessionId, SessionManager, SessionState};
use log::{debug, info, warn};
use shared::{
    Connection, Disconnect, Handshake, HandshakeStage, MessageRouter,
    MessageType, NetError, RateLimiter, PROTOCOL_VERSION,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Pause after a failed `accept` before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Settings for one [`ServerHost`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub bind_addr: SocketAddr,
    pub handshake_timeout: Duration,
    pub idle_timeout: Duration,
    pub write_timeout: Duration,
    /// How long `stop` waits for connection tasks before abandoning them
    pub drain_timeout: Duration,
    /// Ceiling on live connection tasks; sockets accepted beyond it are closed at once
    pub max_connections: usize,
    pub max_msgs_per_sec: u32,
    pub max_bytes_per_sec: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7777)),
            handshake_timeout: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(5),
            max_connections: 1024,
            max_msgs_per_sec: 60,
            max_bytes_per_sec: 64 * 1024,
        }
    }
}

/// State shared by the accept loop and every connection task
struct Shared {
    config: HostConfig,
    router: MessageRouter,
    sessions: Arc<SessionManager>,
    metrics: Arc<ServerMetrics>,
    shutdown: CancellationToken,
}

/// Owns the listener and every connection task it spawned
pub struct ServerHost {
    shared: Arc<Shared>,
    tracker: TaskTracker,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: OnceLock<SocketAddr>,
    started: AtomicBool,
    stopping: AtomicBool,
}

impl ServerHost {
    /// Creates a stopped host. The router is frozen from here on.
    pub fn new(config: HostConfig, router: MessageRouter) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                router,
                sessions: Arc::new(SessionManager::new()),
                metrics: Arc::new(ServerMetrics::new()),
                shutdown: CancellationToken::new(),
            }),
            tracker: TaskTracker::new(),
            accept_task: Mutex::new(None),
            local_addr: OnceLock::new(),
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        }
    }

    /// Binds the listener and launches the accept loop.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// binding to port 0. A host can only be started once, and never after
    /// [`ServerHost::stop`] has begun.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }

        // Held until the accept loop handle is stored, so a concurrent stop
        // always finds the handle and waits for the listener to close.
        let mut accept_task = self.accept_task.lock().await;
        if self.stopping.load(Ordering::SeqCst) {
            return Err(ServerError::Stopped);
        }

        let bind_addr = self.shared.config.bind_addr;
        let listener = match TcpListener::bind(bind_addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(ServerError::Bind {
                    addr: bind_addr,
                    source,
                });
            }
        };
        let addr = listener.local_addr()?;
        let _ = self.local_addr.set(addr);

        let handle = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.shared),
            self.tracker.clone(),
        ));
        *accept_task = Some(handle);
        drop(accept_task);

        info!(
            "evt=server_start addr={} max_connections={}",
            addr, self.shared.config.max_connections
        );
        Ok(addr)
    }

    /// Stops accepting, signals every connection task and waits for them to
    /// drain, up to the configured drain timeout.
    ///
    /// Only the first call does anything; later calls return immediately.
    pub async fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }

        let addr = self.addr_label();
        info!(
            "evt=server_stop_begin addr={} sessions={}",
            addr,
            self.shared.sessions.count()
        );

        self.shared.shutdown.cancel();

        if let Some(handle) = self.accept_task.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Accept loop for {} ended abnormally: {}", addr, e);
            }
        }

        self.tracker.close();
        let drain = self.shared.config.drain_timeout;
        if tokio::time::timeout(drain, self.tracker.wait()).await.is_err() {
            warn!(
                "evt=drain_timeout addr={} abandoned={} waited_ms={}",
                addr,
                self.tracker.len(),
                drain.as_millis()
            );
        }

        info!("evt=server_stop_end addr={}", addr);
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub fn config(&self) -> &HostConfig {
        &self.shared.config
    }

    pub fn sessions(&self) -> Arc<SessionManager> {
        Arc::clone(&self.shared.sessions)
    }

    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.shared.metrics)
    }

    /// Root cancellation token, cancelled when `stop` begins
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    /// Number of connection tasks still running
    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    fn addr_label(&self) -> String {
        match self.local_addr() {
            Some(addr) => addr.to_string(),
            None => "unbound".to_string(),
        }
    }
}

impl Drop for ServerHost {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, tracker: TaskTracker) {
    loop {
        let accepted = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, remote_addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!("evt=accept_error error={}", e);
                tokio::select! {
                    _ = shared.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_BACKOFF) => continue,
                }
            }
        };

        let active = tracker.len();
        if active >= shared.config.max_connections {
            info!(
                "evt=connection_rejected remote={} reason=capacity active={}",
                remote_addr, active
            );
            drop(stream);
            continue;
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", remote_addr, e);
        }

        let session = shared.sessions.register(remote_addr);
        shared.metrics.on_accept();
        info!(
            "evt=client_connect session_id={} remote={}",
            session.id, remote_addr
        );

        tracker.spawn(run_session(Arc::clone(&shared), stream, session));
    }

    debug!("Accept loop stopped");
}

/// Removes the session and settles metrics if the task ends without
/// reaching `finish_session`, e.g. when a handler panics.
struct SessionGuard {
    shared: Arc<Shared>,
    session_id: SessionId,
    armed: bool,
}

impl SessionGuard {
    fn new(shared: Arc<Shared>, session_id: SessionId) -> Self {
        Self {
            shared,
            session_id,
            armed: true,
        }
    }

    fn release(&self) {
        self.shared.sessions.try_remove(self.session_id);
        self.shared.metrics.on_disconnect();
    }

    fn finish(mut self) {
        self.armed = false;
        self.release();
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.armed {
            self.release();
            self.shared.metrics.inc_unhandled_error();
            warn!("evt=session_task_aborted session_id={}", self.session_id);
        }
    }
}

async fn run_session(shared: Arc<Shared>, stream: TcpStream, mut session: Session) {
    let guard = SessionGuard::new(Arc::clone(&shared), session.id);

    let limiter = RateLimiter::new(
        shared.config.max_msgs_per_sec,
        shared.config.max_bytes_per_sec,
    );
    let mut conn = Connection::new(stream, limiter)
        .with_write_timeout(shared.config.write_timeout)
        .with_peer_addr(session.remote_addr);

    let cause = match handshake(&shared, &mut conn, &mut session).await {
        Ok(()) => message_loop(&shared, &mut conn, &session).await,
        Err(cause) => cause,
    };

    finish_session(&shared, &mut conn, &mut session, cause, guard).await;
}

/// Why a bounded wait ended early
enum Interrupted {
    Shutdown,
    TimedOut,
}

/// Runs `fut` until it completes, `limit` elapses or the host shuts down.
async fn bounded<F: Future>(
    shutdown: &CancellationToken,
    limit: Duration,
    fut: F,
) -> Result<F::Output, Interrupted> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(Interrupted::Shutdown),
        result = tokio::time::timeout(limit, fut) => result.map_err(|_| Interrupted::TimedOut),
    }
}

async fn handshake(
    shared: &Shared,
    conn: &mut Connection,
    session: &mut Session,
) -> Result<(), CloseCause> {
    let received = bounded(
        &shared.shutdown,
        shared.config.handshake_timeout,
        conn.receive(),
    )
    .await;

    let (envelope, body) = match received {
        Err(Interrupted::Shutdown) => return Err(CloseCause::Shutdown),
        Err(Interrupted::TimedOut) => {
            return Err(CloseCause::BadHandshake("handshake timeout".to_string()))
        }
        Ok(Err(e)) if e.is_protocol_error() => {
            shared.metrics.inc_parse_error();
            return Err(CloseCause::BadHandshake(e.to_string()));
        }
        Ok(Err(e)) => return Err(e.into()),
        Ok(Ok(frame)) => frame,
    };
    shared.metrics.inc_messages_in();

    if envelope.message_type != MessageType::HANDSHAKE {
        return Err(CloseCause::BadHandshake(format!(
            "first message was {}",
            envelope.message_type
        )));
    }

    let request = Handshake::decode(&body)
        .and_then(|hs| hs.stage().map(|stage| (hs, stage)))
        .map_err(|e| {
            shared.metrics.inc_parse_error();
            CloseCause::BadHandshake(e.to_string())
        });
    let (request, stage) = request?;

    if stage != HandshakeStage::Request {
        return Err(CloseCause::BadHandshake(format!(
            "expected a request, got {:?}",
            stage
        )));
    }
    if request.protocol_version != PROTOCOL_VERSION {
        return Err(CloseCause::BadHandshake(format!(
            "unsupported protocol version {}",
            request.protocol_version
        )));
    }

    session.mark_handshaken(request.protocol_version, request.nonce);
    shared.sessions.update(session);

    let ack = request
        .ack()
        .encode()
        .map_err(|e| CloseCause::Unexpected(e.to_string()))?;
    match bounded(
        &shared.shutdown,
        shared.config.write_timeout,
        conn.send(MessageType::HANDSHAKE, &ack),
    )
    .await
    {
        Err(Interrupted::Shutdown) => return Err(CloseCause::Shutdown),
        Err(Interrupted::TimedOut) => return Err(CloseCause::WriteTimeout),
        Ok(Err(e)) => return Err(e.into()),
        Ok(Ok(())) => shared.metrics.inc_messages_out(),
    }

    info!(
        "evt=handshake_ok session_id={} remote={} version={} nonce={}",
        session.id, session.remote_addr, request.protocol_version, request.nonce
    );
    Ok(())
}

async fn message_loop(shared: &Shared, conn: &mut Connection, session: &Session) -> CloseCause {
    loop {
        let received = bounded(&shared.shutdown, shared.config.idle_timeout, conn.receive()).await;

        let (envelope, body) = match received {
            Err(Interrupted::Shutdown) => return CloseCause::Shutdown,
            Err(Interrupted::TimedOut) => return CloseCause::IdleTimeout,
            Ok(Err(e)) => return e.into(),
            Ok(Ok(frame)) => frame,
        };
        shared.metrics.inc_messages_in();

        if envelope.message_type == MessageType::DISCONNECT {
            let reason = match Disconnect::decode(&body) {
                Ok(disconnect) => disconnect.reason(),
                Err(e) => return CloseCause::Protocol(e.to_string()),
            };
            info!(
                "evt=client_disconnect_request session_id={} reason={}",
                session.id, reason
            );
            return CloseCause::ClientClosed;
        }

        // Dispatch is not raced against shutdown: an interrupted handler could
        // leave half a frame on the wire ahead of the Disconnect frame.
        let sent_before = conn.frames_sent();
        let outcome: Result<(), NetError> =
            shared.router.dispatch(conn, &envelope, &body).await;
        shared
            .metrics
            .add_messages_out(conn.frames_sent() - sent_before);

        if let Err(e) = outcome {
            debug!(
                "Handler for {} failed on session {}: {}",
                envelope.message_type, session.id, e
            );
            return e.into();
        }
    }
}

/// The single terminal step for every connection task.
async fn finish_session(
    shared: &Shared,
    conn: &mut Connection,
    session: &mut Session,
    cause: CloseCause,
    guard: SessionGuard,
) {
    session.state = SessionState::Closing;
    shared.sessions.update(session);

    match &cause {
        CloseCause::Io(_) => shared.metrics.inc_io_error(),
        CloseCause::Protocol(_) => shared.metrics.inc_parse_error(),
        CloseCause::Unexpected(_) => shared.metrics.inc_unhandled_error(),
        _ => {}
    }

    let reason = cause.reason();
    if cause.notifies_peer() {
        let sent_before = conn.frames_sent();
        conn.send_disconnect_and_close(reason).await;
        shared
            .metrics
            .add_messages_out(conn.frames_sent() - sent_before);
    } else {
        conn.close();
    }

    session.state = SessionState::Closed;
    guard.finish();

    info!(
        "evt=client_disconnect session_id={} remote={} reason={} cause={} detail=\"{}\" duration_ms={}",
        session.id,
        session.remote_addr,
        reason,
        cause.label(),
        cause,
        session.connected_at.elapsed().as_millis()
    );
}
