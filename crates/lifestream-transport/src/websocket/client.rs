//! WebSocket consumer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::engine::{ClientCallbacks, ConnectionCallback, DataCallback, EngineConfig, StreamingClient};
use crate::error::{Error, Result};
use crate::executor::IoExecutor;
use crate::frame::FrameBuffer;
use crate::state::{AtomicState, ConnectionState};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Upper bound on the closing handshake.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// How long `disconnect` waits for the read loop to return.
const JOIN_GRACE: Duration = Duration::from_secs(1);

struct Connection {
    executor: IoExecutor,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

/// WebSocket consumer. Text and binary messages are both fed through the
/// frame reassembler.
pub struct WebSocketClient {
    config: EngineConfig,
    threads: usize,
    state: Arc<AtomicState<ConnectionState>>,
    callbacks: Arc<ClientCallbacks>,
    lifecycle: Mutex<Option<Connection>>,
}

impl WebSocketClient {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_threads(config, 1)
    }

    /// Client whose executor runs `threads` workers.
    pub fn with_threads(config: EngineConfig, threads: usize) -> Self {
        Self {
            config,
            threads,
            state: Arc::new(AtomicState::new(ConnectionState::Disconnected)),
            callbacks: Arc::new(ClientCallbacks::default()),
            lifecycle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.load()
    }

    fn open(&self, address: &str, port: u16) -> Result<(Connection, oneshot::Sender<()>)> {
        let host = address.trim();
        if host.is_empty() {
            return Err(Error::InvalidAddress("empty host".to_string()));
        }
        let url = if host.contains(':') {
            format!("ws://[{}]:{}/", host, port)
        } else {
            format!("ws://{}:{}/", host, port)
        };

        let executor = IoExecutor::start("websocket-client", self.threads)?;
        let handshake_timeout = self.config.handshake_timeout;
        let (stream, response) =
            executor.block_on_timeout(handshake_timeout, connect_async(url.as_str()))??;
        debug!("Handshake with {} completed: {}", url, response.status());

        let cancel = executor.shutdown_token();
        let (go, started) = oneshot::channel();
        let reader = executor.spawn(read_loop(
            stream,
            cancel.clone(),
            self.state.clone(),
            self.callbacks.clone(),
            FrameBuffer::with_delimiter(self.config.delimiter),
            started,
        ));

        Ok((
            Connection {
                executor,
                cancel,
                reader,
            },
            go,
        ))
    }
}

impl Default for WebSocketClient {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl StreamingClient for WebSocketClient {
    fn connect(&self, address: &str, port: u16) -> Result<()> {
        let go = {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
            if !self
                .state
                .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
            {
                warn!("WebSocketClient::connect called while already connected");
                return Err(Error::AlreadyConnected);
            }
            // Left behind when the peer closed the previous connection.
            if let Some(stale) = lifecycle.take() {
                stale.executor.stop();
            }

            info!("Connecting to ws://{}:{}/", address, port);
            match self.open(address, port) {
                Ok((connection, go)) => {
                    *lifecycle = Some(connection);
                    self.state.store(ConnectionState::Connected);
                    info!("Connected to {}:{}", address, port);
                    go
                }
                Err(e) => {
                    error!("Failed to connect to {}:{}: {}", address, port, e);
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
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        let was_connected = self
            .state
            .transition(ConnectionState::Connected, ConnectionState::Closing);

        match lifecycle.take() {
            Some(connection) => {
                connection.cancel.cancel();
                let joined = connection
                    .executor
                    .block_on_timeout(JOIN_GRACE, connection.reader);
                if let Err(e) = joined {
                    debug!("Not waiting for WebSocket read loop: {}", e);
                }
                connection.executor.stop();
            }
            None if !was_connected => {
                debug!("WebSocketClient::disconnect called but client is not connected");
                return;
            }
            None => {}
        }

        if was_connected {
            self.state.store(ConnectionState::Disconnected);
            drop(lifecycle);
            info!("Disconnected");
            self.callbacks.disconnected();
        }
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

impl Drop for WebSocketClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn read_loop(
    mut stream: WsStream,
    cancel: CancellationToken,
    state: Arc<AtomicState<ConnectionState>>,
    callbacks: Arc<ClientCallbacks>,
    mut frames: FrameBuffer,
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

    let mut deliver = |bytes: &[u8]| {
        for frame in frames.reassemble(bytes) {
            callbacks.data(frame);
        }
    };

    let mut peer_closed = false;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => deliver(text.as_str().as_bytes()),
                Some(Ok(Message::Binary(data))) => deliver(&data[..]),
                Some(Ok(Message::Close(frame))) => {
                    info!("Server closed the connection: {:?}", frame);
                    peer_closed = true;
                    break;
                }
                Some(Ok(_)) => trace!("Ignoring control message"),
                Some(Err(e)) => {
                    error!("WebSocket read failed: {}", e);
                    peer_closed = true;
                    break;
                }
                None => {
                    info!("Connection closed by server");
                    peer_closed = true;
                    break;
                }
            }
        }
    }

    let _ = tokio::time::timeout(CLOSE_GRACE, stream.close(None)).await;

    if peer_closed && state.transition(ConnectionState::Connected, ConnectionState::Disconnected) {
        callbacks.disconnected();
    }
    debug!("WebSocket read loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_connect_refused_leaves_client_disconnected() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = WebSocketClient::default();
        let connected = Arc::new(AtomicUsize::new(0));
        let c = connected.clone();
        client.set_on_connected(Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(client.connect("127.0.0.1", port).is_err());
        assert!(!client.is_connected());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(connected.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_connect_rejects_empty_host() {
        let client = WebSocketClient::default();
        assert!(matches!(
            client.connect("  ", 9090),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_handshake_timeout() {
        // Accepts TCP but never answers the upgrade.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let config = EngineConfig {
            handshake_timeout: Duration::from_millis(200),
            ..EngineConfig::default()
        };
        let client = WebSocketClient::new(config);
        let result = client.connect("127.0.0.1", port);
        assert!(matches!(result, Err(Error::Timeout(_))));
        assert!(!client.is_connected());
        drop(listener);
    }
}
