//! Multicast group member driven by the async reactor.
//!
//! One receive task per connection reads datagrams, reassembles frames and
//! hands each one to the data callback.

use std::net::SocketAddrV4;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::engine::{ClientCallbacks, ConnectionCallback, DataCallback, EngineConfig, StreamingClient};
use crate::error::{Error, Result};
use crate::executor::IoExecutor;
use crate::frame::FrameBuffer;
use crate::group;
use crate::state::{AtomicState, ConnectionState};

/// Pause after a failed receive before trying again.
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// How long `disconnect` waits for the receive loop to notice cancellation.
const JOIN_GRACE: Duration = Duration::from_secs(1);

struct Connection {
    executor: IoExecutor,
    socket: Arc<UdpSocket>,
    group: SocketAddrV4,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

/// Multicast group member on a single-worker [`IoExecutor`].
pub struct MulticastClient {
    config: EngineConfig,
    state: AtomicState<ConnectionState>,
    callbacks: Arc<ClientCallbacks>,
    lifecycle: Mutex<Option<Connection>>,
}

impl MulticastClient {
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

    fn open(&self, address: &str, port: u16) -> Result<(Connection, oneshot::Sender<()>)> {
        let group = group::parse_group(address, port)?;
        let std_socket = group::receiver_socket(group, &self.config)?;
        std_socket.set_nonblocking(true)?;

        let executor = IoExecutor::start("multicast-client", 1)?;
        let socket = {
            let _guard = executor.handle().enter();
            Arc::new(UdpSocket::from_std(std_socket)?)
        };

        let cancel = executor.shutdown_token();
        let (go, started) = oneshot::channel();
        let reader = executor.spawn(receive_loop(
            socket.clone(),
            cancel.clone(),
            self.callbacks.clone(),
            FrameBuffer::with_delimiter(self.config.delimiter),
            self.config.recv_buffer_size,
            started,
        ));

        let connection = Connection {
            executor,
            socket,
            group,
            cancel,
            reader,
        };
        Ok((connection, go))
    }
}

impl Default for MulticastClient {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl StreamingClient for MulticastClient {
    fn connect(&self, address: &str, port: u16) -> Result<()> {
        let go = {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
            if !self
                .state
                .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
            {
                warn!("MulticastClient::connect called while already connected");
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

        // Frames are released only after the connected callback returns.
        self.callbacks.connected();
        let _ = go.send(());
        Ok(())
    }

    fn disconnect(&self) {
        // A callback running on the receive thread must not wait for the
        // lock held by a concurrent disconnect that is joining that thread.
        if self.state.load() != ConnectionState::Connected {
            debug!("MulticastClient::disconnect called but client is not connected");
            return;
        }
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        if !self
            .state
            .transition(ConnectionState::Connected, ConnectionState::Closing)
        {
            debug!("MulticastClient already disconnecting");
            return;
        }

        if let Some(connection) = lifecycle.take() {
            let Connection {
                executor,
                socket,
                group,
                cancel,
                reader,
            } = connection;

            cancel.cancel();
            if let Err(e) = executor.block_on_timeout(JOIN_GRACE, reader) {
                debug!("Not waiting for multicast receive loop: {}", e);
            }
            if let Err(e) = socket.leave_multicast_v4(*group.ip(), self.config.multicast_interface) {
                warn!("Failed to leave multicast group {}: {}", group.ip(), e);
            }
            drop(socket);
            executor.stop();
            info!("Left multicast group {}", group);
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

impl Drop for MulticastClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    cancel: CancellationToken,
    callbacks: Arc<ClientCallbacks>,
    mut frames: FrameBuffer,
    buffer_size: usize,
    started: oneshot::Receiver<()>,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        go = started => {
            if go.is_err() {
                return;
            }
        }
    }

    let mut buf = vec![0u8; buffer_size];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => {
                    trace!("Received {} bytes from {}", len, from);
                    for frame in frames.reassemble(&buf[..len]) {
                        callbacks.data(frame);
                    }
                }
                Err(e) => {
                    warn!("Multicast receive failed: {}", e);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    if frames.pending() > 0 {
        debug!("Discarding {} bytes of incomplete frame", frames.pending());
    }
    debug!("Multicast receive loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    fn counting_client() -> (Arc<MulticastClient>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let client = Arc::new(MulticastClient::default());
        let connected = Arc::new(AtomicUsize::new(0));
        let disconnected = Arc::new(AtomicUsize::new(0));
        let c = connected.clone();
        client.set_on_connected(Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        let d = disconnected.clone();
        client.set_on_disconnected(Arc::new(move || {
            d.fetch_add(1, Ordering::SeqCst);
        }));
        (client, connected, disconnected)
    }

    #[test]
    fn test_connect_rejects_unicast_address() {
        let client = MulticastClient::default();
        let result = client.connect("10.0.0.1", 9090);
        assert!(matches!(result, Err(Error::InvalidAddress(_))));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_disconnect_without_connect_does_not_fire_callback() {
        let client = MulticastClient::default();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        client.set_on_disconnected(Arc::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));

        client.disconnect();
        client.disconnect();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!client.is_connected());
    }

    #[test]
    fn test_connect_disconnect_cycle() {
        let (client, connected, disconnected) = counting_client();

        client.connect("239.255.0.11", 19211).unwrap();
        assert!(client.is_connected());
        assert_eq!(connected.load(Ordering::SeqCst), 1);
        assert!(matches!(
            client.connect("239.255.0.11", 19211),
            Err(Error::AlreadyConnected)
        ));

        client.disconnect();
        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);

        client.connect("239.255.0.11", 19211).unwrap();
        client.disconnect();
        assert_eq!(connected.load(Ordering::SeqCst), 2);
        assert_eq!(disconnected.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_disconnect_fires_once() {
        let (client, _connected, disconnected) = counting_client();
        client.connect("239.255.0.12", 19212).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let client = client.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    client.disconnect();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(disconnected.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
