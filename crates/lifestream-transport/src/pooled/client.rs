//! Multicast group member on a dedicated blocking thread.

use std::io::ErrorKind;
use std::net::{SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, error, info, trace, warn};

use crate::engine::{ClientCallbacks, ConnectionCallback, DataCallback, EngineConfig, StreamingClient};
use crate::error::{Error, Result};
use crate::frame::FrameBuffer;
use crate::group;
use crate::state::{AtomicState, ConnectionState};

struct Connection {
    socket: Arc<UdpSocket>,
    group: SocketAddrV4,
    running: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

/// Multicast group member that receives on a dedicated blocking thread.
///
/// The socket's read timeout doubles as the shutdown poll interval.
pub struct PooledMulticastClient {
    config: EngineConfig,
    state: AtomicState<ConnectionState>,
    callbacks: Arc<ClientCallbacks>,
    lifecycle: Mutex<Option<Connection>>,
}

impl PooledMulticastClient {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            state: AtomicState::new(ConnectionState::Disconnected),
            callbacks: Arc::new(ClientCallbacks::default()),
            lifecycle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    fn open(&self, address: &str, port: u16) -> Result<(Connection, Sender<()>)> {
        let group = group::parse_group(address, port)?;
        let socket = group::receiver_socket(group, &self.config)?;
        socket.set_read_timeout(Some(self.config.poll_timeout))?;
        let socket = Arc::new(socket);

        let running = Arc::new(AtomicBool::new(true));
        let (go, started) = bounded(1);
        let receive_loop = ReceiveLoop {
            socket: socket.clone(),
            running: running.clone(),
            callbacks: self.callbacks.clone(),
            frames: FrameBuffer::with_delimiter(self.config.delimiter),
            buffer_size: self.config.recv_buffer_size,
            retry_delay: self.config.poll_timeout,
        };
        let reader = thread::Builder::new()
            .name("multicast-rx".to_string())
            .spawn(move || receive_loop.run(started))?;

        Ok((
            Connection {
                socket,
                group,
                running,
                reader,
            },
            go,
        ))
    }
}

impl Default for PooledMulticastClient {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl StreamingClient for PooledMulticastClient {
    fn connect(&self, address: &str, port: u16) -> Result<()> {
        let go = {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
            if !self
                .state
                .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
            {
                warn!("PooledMulticastClient::connect called while already connected");
                return Err(Error::AlreadyConnected);
            }

            match self.open(address, port) {
                Ok((connection, go)) => {
                    info!("Joined multicast group {}", connection.group);
                    *lifecycle = Some(connection);
                    self.state.store(ConnectionState::Connected);
                    go
                }
                Err(e) => {
                    error!("Failed to join multicast group {}:{}: {}", address, port, e);
                    self.state.store(ConnectionState::Disconnected);
                    return Err(e);
                }
            }
        };

        self.callbacks.connected();
        let _ = go.send(());
        Ok(())
    }

    fn disconnect(&self) {
        // A callback running on the receive thread must not wait for the
        // lock held by a concurrent disconnect that is joining that thread.
        if self.state.load() != ConnectionState::Connected {
            debug!("PooledMulticastClient::disconnect called but client is not connected");
            return;
        }
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        if !self
            .state
            .transition(ConnectionState::Connected, ConnectionState::Closing)
        {
            debug!("PooledMulticastClient already disconnecting");
            return;
        }

        if let Some(connection) = lifecycle.take() {
            connection.running.store(false, Ordering::SeqCst);
            if connection.reader.thread().id() != thread::current().id()
                && connection.reader.join().is_err()
            {
                warn!("Multicast receive thread exited abnormally");
            }
            group::leave_group(&connection.socket, connection.group, self.config.multicast_interface);
            info!("Left multicast group {}", connection.group);
        }

        self.state.store(ConnectionState::Disconnected);
        drop(lifecycle);
        self.callbacks.disconnected();
    }

    fn set_on_connected(&self, callback: ConnectionCallback) {
        self.callbacks.set_on_connected(callback);
    }

    fn set_on_disconnected(&self, callback: ConnectionCallback) {
        self.callbacks.set_on_disconnected(callback);
    }

    fn set_on_data_received(&self, callback: DataCallback) {
        self.callbacks.set_on_data_received(callback);
    }

    fn is_connected(&self) -> bool {
        self.state.load() == ConnectionState::Connected
    }
}

impl Drop for PooledMulticastClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

struct ReceiveLoop {
    socket: Arc<UdpSocket>,
    running: Arc<AtomicBool>,
    callbacks: Arc<ClientCallbacks>,
    frames: FrameBuffer,
    buffer_size: usize,
    retry_delay: Duration,
}

impl ReceiveLoop {
    fn run(mut self, started: Receiver<()>) {
        if started.recv().is_err() {
            return;
        }
        debug!("Multicast receive thread started");

        let mut buffer = vec![0u8; self.buffer_size];
        while self.running.load(Ordering::SeqCst) {
            let (len, from) = match self.socket.recv_from(&mut buffer) {
                Ok(received) => received,
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(e) => {
                    warn!("Multicast receive failed: {}", e);
                    thread::sleep(self.retry_delay);
                    continue;
                }
            };

            trace!("Received {} bytes from {}", len, from);
            for frame in self.frames.reassemble(&buffer[..len]) {
                self.callbacks.data(frame);
            }
        }

        debug!("Multicast receive thread stopped");
    }
}
