//! Multicast broadcaster backed by a [`WorkerPool`].

use std::net::{SocketAddrV4, UdpSocket};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::{debug, error, info, trace, warn};

use super::worker_pool::WorkerPool;
use crate::engine::{EngineConfig, StreamingServer};
use crate::error::{Error, Result};
use crate::group;
use crate::state::{AtomicState, ServerState};

struct Running {
    pool: WorkerPool,
    socket: Arc<UdpSocket>,
    group: SocketAddrV4,
}

/// Multicast broadcaster whose sends are jobs on a [`WorkerPool`].
///
/// With more than one worker, datagrams from consecutive broadcasts may
/// leave out of order.
pub struct PooledMulticastServer {
    config: EngineConfig,
    state: AtomicState<ServerState>,
    lifecycle: Mutex<Option<Running>>,
}

impl PooledMulticastServer {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: AtomicState::new(ServerState::Stopped),
            lifecycle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ServerState {
        self.state.load()
    }

    fn launch(&self, address: &str, port: u16, thread_count: usize) -> Result<Running> {
        let group = group::parse_group(address, port)?;
        let socket = Arc::new(group::sender_socket(group, &self.config)?);
        let pool = WorkerPool::new("multicast-pool", thread_count)?;
        Ok(Running {
            pool,
            socket,
            group,
        })
    }
}

impl Default for PooledMulticastServer {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl StreamingServer for PooledMulticastServer {
    fn start(&self, address: &str, port: u16, thread_count: usize) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        if !self.state.transition(ServerState::Stopped, ServerState::Starting) {
            warn!("PooledMulticastServer::start called but server is already running");
            return Err(Error::AlreadyRunning);
        }

        match self.launch(address, port, thread_count) {
            Ok(running) => {
                info!(
                    "Pooled multicast server sending to {} with {} worker(s)",
                    running.group,
                    running.pool.threads()
                );
                *lifecycle = Some(running);
                self.state.store(ServerState::Running);
                Ok(())
            }
            Err(e) => {
                error!("Failed to start pooled multicast server: {}", e);
                self.state.store(ServerState::Stopped);
                Err(e)
            }
        }
    }

    fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        if !self.state.transition(ServerState::Running, ServerState::Stopping) {
            debug!("PooledMulticastServer::stop called but server is not running");
            return;
        }
        info!("Stopping pooled multicast server...");

        if let Some(mut running) = lifecycle.take() {
            if running.pool.queued() > 0 {
                debug!("Draining {} queued send(s)", running.pool.queued());
            }
            running.pool.shutdown();
            group::leave_group(&running.socket, running.group, self.config.multicast_interface);
        }

        self.state.store(ServerState::Stopped);
        info!("Pooled multicast server stopped");
    }

    fn broadcast_data(&self, data: &[u8]) {
        if self.state.load() != ServerState::Running {
            return;
        }
        let lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        let Some(running) = lifecycle.as_ref() else {
            return;
        };

        let frame = Bytes::copy_from_slice(data);
        let socket = running.socket.clone();
        let target = running.group;
        let queued = running.pool.submit(move || match socket.send_to(&frame, target) {
            Ok(sent) if sent < frame.len() => warn!(
                "{}",
                Error::PartialSend {
                    expected: frame.len(),
                    sent
                }
            ),
            Ok(sent) => trace!("Sent {} bytes to {}", sent, target),
            Err(e) => error!("Multicast send to {} failed: {}", target, e),
        });
        if !queued {
            debug!("Send pool already shut down, dropping frame");
        }
    }

    fn is_running(&self) -> bool {
        self.state.load() == ServerState::Running
    }
}

impl Drop for PooledMulticastServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_rejects_non_multicast() {
        let server = PooledMulticastServer::default();
        assert!(matches!(
            server.start("192.168.1.10", 9090, 2),
            Err(Error::InvalidAddress(_))
        ));
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let server = PooledMulticastServer::default();
        server.stop();
        server.stop();
        server.broadcast_data(b"dropped\n");
        assert!(!server.is_running());
    }

    #[test]
    fn test_start_broadcast_stop_cycle() {
        let server = PooledMulticastServer::default();
        server.start("239.255.0.16", 19216, 3).unwrap();
        assert!(server.is_running());
        assert!(matches!(
            server.start("239.255.0.16", 19216, 3),
            Err(Error::AlreadyRunning)
        ));

        for _ in 0..10 {
            server.broadcast_data(b"002x001##\n");
        }
        server.stop();
        server.stop();
        assert_eq!(server.state(), ServerState::Stopped);

        server.start("239.255.0.16", 19216, 1).unwrap();
        server.stop();
    }
}
