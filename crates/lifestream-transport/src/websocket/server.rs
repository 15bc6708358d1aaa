//! WebSocket accept loop and broadcast fan-out.
//!
//! Every HTTP request is upgraded into a [`Session`] that registers itself
//! with the shared [`SessionRegistry`]; `broadcast_data` queues the frame on
//! each registered session.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::ws::{Utf8Bytes, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::registry::SessionRegistry;
use super::session::{self, Session};
use crate::engine::StreamingServer;
use crate::error::{Error, Result};
use crate::executor::IoExecutor;
use crate::state::{AtomicState, ServerState, SessionState};

/// How long `stop` waits for sessions to finish their closing handshake.
const SESSION_DRAIN: Duration = Duration::from_secs(1);

/// How long `stop` waits for the accept loop to return.
const ACCEPT_DRAIN: Duration = Duration::from_secs(2);

struct Shared {
    state: AtomicState<ServerState>,
    registry: Arc<SessionRegistry>,
}

#[derive(Clone)]
struct AcceptState {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

struct Running {
    executor: IoExecutor,
    shutdown: CancellationToken,
    local_addr: SocketAddr,
    accept: JoinHandle<()>,
}

/// WebSocket broadcaster: an HTTP accept loop that upgrades every request
/// into a [`Session`].
pub struct WebSocketServer {
    shared: Arc<Shared>,
    lifecycle: Mutex<Option<Running>>,
}

impl WebSocketServer {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicState::new(ServerState::Stopped),
                registry: Arc::new(SessionRegistry::new()),
            }),
            lifecycle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ServerState {
        self.shared.state.load()
    }

    /// Address actually bound; useful after starting on port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|running| running.local_addr)
    }

    /// Number of sessions currently registered.
    pub fn session_count(&self) -> usize {
        self.shared.registry.len()
    }

    fn launch(&self, address: &str, port: u16, thread_count: usize) -> Result<Running> {
        let ip: IpAddr = address
            .trim()
            .parse()
            .map_err(|_| Error::InvalidAddress(format!("'{}' is not an IP address", address)))?;

        let executor = IoExecutor::start("websocket-server", thread_count)?;
        let listener = executor.block_on(TcpListener::bind(SocketAddr::new(ip, port)))??;
        let local_addr = listener.local_addr()?;

        let shutdown = executor.shutdown_token();
        let app = Router::new()
            .fallback(accept_session)
            .with_state(AcceptState {
                shared: self.shared.clone(),
                shutdown: shutdown.clone(),
            });

        let token = shutdown.clone();
        let accept = executor.spawn(async move {
            let serve = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!("WebSocket accept loop failed: {}", e);
            }
            debug!("WebSocket accept loop finished");
        });

        Ok(Running {
            executor,
            shutdown,
            local_addr,
            accept,
        })
    }
}

impl Default for WebSocketServer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingServer for WebSocketServer {
    fn start(&self, address: &str, port: u16, thread_count: usize) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        if !self
            .shared
            .state
            .transition(ServerState::Stopped, ServerState::Starting)
        {
            warn!("WebSocketServer::start called but server is already running");
            return Err(Error::AlreadyRunning);
        }

        info!(
            "Starting WebSocket server on {}:{} with {} thread(s)",
            address, port, thread_count
        );
        match self.launch(address, port, thread_count) {
            Ok(running) => {
                info!("WebSocket server listening on ws://{}", running.local_addr);
                *lifecycle = Some(running);
                self.shared.state.store(ServerState::Running);
                Ok(())
            }
            Err(e) => {
                error!("Failed to start WebSocket server: {}", e);
                self.shared.state.store(ServerState::Stopped);
                Err(e)
            }
        }
    }

    fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        if !self
            .shared
            .state
            .transition(ServerState::Running, ServerState::Stopping)
        {
            debug!("WebSocketServer::stop called but server is not running");
            return;
        }
        info!("Stopping WebSocket server...");

        if let Some(running) = lifecycle.take() {
            let Running {
                executor,
                shutdown,
                accept,
                ..
            } = running;

            // Stops accepting and cancels every session token.
            shutdown.cancel();
            let sessions = self.shared.registry.close_all();
            info!("Closing {} session(s)", sessions.len());

            let drained = executor.block_on(async move {
                let deadline = Instant::now() + SESSION_DRAIN;
                while Instant::now() < deadline
                    && sessions.iter().any(|s| s.state() != SessionState::Closed)
                {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                let _ = tokio::time::timeout(ACCEPT_DRAIN, accept).await;
            });
            if let Err(e) = drained {
                debug!("Not waiting for WebSocket sessions to drain: {}", e);
            }
            executor.stop();
        }

        self.shared.state.store(ServerState::Stopped);
        info!("WebSocket server stopped");
    }

    fn broadcast_data(&self, data: &[u8]) {
        if self.shared.state.load() != ServerState::Running {
            return;
        }
        // Converted once; every session shares the same buffer.
        let message: Utf8Bytes = String::from_utf8_lossy(data).into_owned().into();
        self.shared.registry.broadcast(&message);
    }

    fn is_running(&self) -> bool {
        self.shared.state.load() == ServerState::Running
    }
}

impl Drop for WebSocketServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Upgrade any request into a session. Requests are refused once the
/// server has left `Running`.
async fn accept_session(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(accept): State<AcceptState>,
) -> Response {
    if accept.shared.state.load() != ServerState::Running {
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }

    let registry = &accept.shared.registry;
    let (session, queued) = Session::new(
        registry.next_id(),
        remote,
        registry,
        accept.shutdown.child_token(),
    );
    debug!("Accepted connection {} from {}", session.id(), remote);

    ws.on_failed_upgrade(move |e| warn!("WebSocket upgrade from {} failed: {}", remote, e))
        .on_upgrade(move |socket| session::run(session, queued, socket))
}
