//! Multicast broadcaster on the async reactor.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::engine::{EngineConfig, StreamingServer};
use crate::error::{Error, Result};
use crate::executor::IoExecutor;
use crate::group;
use crate::state::{AtomicState, ServerState};

/// Time allowed for queued datagrams to leave during `stop`.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

struct Running {
    executor: IoExecutor,
    socket: Arc<UdpSocket>,
    group: SocketAddrV4,
    outbox: mpsc::UnboundedSender<Bytes>,
    sender: JoinHandle<()>,
}

/// Multicast broadcaster driven by an [`IoExecutor`].
///
/// Broadcasts are queued to a single sender task, so datagrams leave in the
/// order `broadcast_data` was called regardless of the worker count.
pub struct MulticastServer {
    config: EngineConfig,
    state: AtomicState<ServerState>,
    lifecycle: Mutex<Option<Running>>,
}

impl MulticastServer {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: AtomicState::new(ServerState::Stopped),
            lifecycle: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.state.load()
    }

    fn launch(&self, address: &str, port: u16, thread_count: usize) -> Result<Running> {
        let group = group::parse_group(address, port)?;
        let std_socket = group::sender_socket(group, &self.config)?;
        std_socket.set_nonblocking(true)?;

        let executor = IoExecutor::start("multicast-server", thread_count)?;
        let socket = {
            let _guard = executor.handle().enter();
            Arc::new(UdpSocket::from_std(std_socket)?)
        };

        let (outbox, queued) = mpsc::unbounded_channel();
        let sender = executor.spawn(send_loop(socket.clone(), group, queued));

        Ok(Running {
            executor,
            socket,
            group,
            outbox,
            sender,
        })
    }
}

impl Default for MulticastServer {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl StreamingServer for MulticastServer {
    fn start(&self, address: &str, port: u16, thread_count: usize) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        if !self.state.transition(ServerState::Stopped, ServerState::Starting) {
            warn!("MulticastServer::start called but server is already running");
            return Err(Error::AlreadyRunning);
        }

        info!(
            "Starting multicast server for {}:{} with {} thread(s)",
            address, port, thread_count
        );
        match self.launch(address, port, thread_count) {
            Ok(running) => {
                info!("Multicast server sending to {}", running.group);
                *lifecycle = Some(running);
                self.state.store(ServerState::Running);
                Ok(())
            }
            Err(e) => {
                error!("Failed to start multicast server: {}", e);
                self.state.store(ServerState::Stopped);
                Err(e)
            }
        }
    }

    fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        if !self.state.transition(ServerState::Running, ServerState::Stopping) {
            debug!("MulticastServer::stop called but server is not running");
            return;
        }
        info!("Stopping multicast server...");

        if let Some(running) = lifecycle.take() {
            let Running {
                executor,
                socket,
                group,
                outbox,
                sender,
            } = running;

            // Closing the queue lets the sender drain what is left and exit.
            drop(outbox);
            if let Err(e) = executor.block_on_timeout(DRAIN_GRACE, sender) {
                debug!("Skipping drain of multicast queue: {}", e);
            }

            if let Err(e) = socket.leave_multicast_v4(*group.ip(), self.config.multicast_interface) {
                warn!("Failed to leave multicast group {}: {}", group.ip(), e);
            }
            drop(socket);
            executor.stop();
        }

        self.state.store(ServerState::Stopped);
        info!("Multicast server stopped");
    }

    fn broadcast_data(&self, data: &[u8]) {
        if self.state.load() != ServerState::Running {
            return;
        }
        let lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(running) = lifecycle.as_ref() {
            if running.outbox.send(Bytes::copy_from_slice(data)).is_err() {
                debug!("Multicast sender already gone, dropping frame");
            }
        }
    }

    fn is_running(&self) -> bool {
        self.state.load() == ServerState::Running
    }
}

impl Drop for MulticastServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn send_loop(
    socket: Arc<UdpSocket>,
    group: SocketAddrV4,
    mut queued: mpsc::UnboundedReceiver<Bytes>,
) {
    let target = SocketAddr::V4(group);
    while let Some(frame) = queued.recv().await {
        match socket.send_to(&frame, target).await {
            Ok(sent) if sent < frame.len() => {
                warn!(
                    "{}",
                    Error::PartialSend {
                        expected: frame.len(),
                        sent
                    }
                );
            }
            Ok(sent) => trace!("Sent {} bytes to {}", sent, target),
            Err(e) => error!("Multicast send to {} failed: {}", target, e),
        }
    }
    debug!("Multicast sender loop finished");
}
