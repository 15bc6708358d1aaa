//! The two contracts every engine implements, plus their shared plumbing.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::Result;
use crate::frame::{Frame, DEFAULT_DELIMITER};

/// Invoked on connect/disconnect.
pub type ConnectionCallback = Arc<dyn Fn() + Send + Sync>;

/// Invoked once per complete frame, from the engine's receive thread.
pub type DataCallback = Arc<dyn Fn(Frame) + Send + Sync>;

/// Producer side: fan one frame out to every live destination.
pub trait StreamingServer: Send + Sync {
    /// Bind and begin serving. Fails with `AlreadyRunning` if not stopped.
    fn start(&self, address: &str, port: u16, thread_count: usize) -> Result<()>;

    /// Tear everything down. Safe to call repeatedly.
    fn stop(&self);

    /// Send `data` as-is to every destination. No-op unless running.
    fn broadcast_data(&self, data: &[u8]);

    fn is_running(&self) -> bool;
}

/// Consumer side: receive frames from one producer.
pub trait StreamingClient: Send + Sync {
    /// Connect and start receiving. Fails with `AlreadyConnected` if a
    /// connection exists or is being established.
    fn connect(&self, address: &str, port: u16) -> Result<()>;

    /// Close the connection. Safe to call repeatedly; the disconnected
    /// callback fires at most once per connection.
    fn disconnect(&self);

    fn set_on_connected(&self, callback: ConnectionCallback);

    fn set_on_disconnected(&self, callback: ConnectionCallback);

    fn set_on_data_received(&self, callback: DataCallback);

    fn is_connected(&self) -> bool;
}

/// Tunables shared by all engines.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Frame terminator byte.
    pub delimiter: u8,
    /// Upper bound on the WebSocket client handshake.
    pub handshake_timeout: Duration,
    /// Largest datagram a connectionless client can receive in one read.
    pub recv_buffer_size: usize,
    /// Multicast TTL on the sending socket.
    pub multicast_ttl: u32,
    /// Deliver our own multicast datagrams back to local listeners.
    pub multicast_loop: bool,
    /// Interface used to join groups and send multicast traffic.
    pub multicast_interface: Ipv4Addr,
    /// Read timeout of the pooled engine's blocking receive loop.
    pub poll_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            handshake_timeout: Duration::from_secs(30),
            recv_buffer_size: 64 * 1024,
            multicast_ttl: 1,
            multicast_loop: true,
            multicast_interface: Ipv4Addr::UNSPECIFIED,
            poll_timeout: Duration::from_millis(10),
        }
    }
}

/// Callback slots held by every client implementation.
///
/// Callbacks are cloned out of their slot before being invoked so a callback
/// may itself replace a slot.
#[derive(Default)]
pub struct ClientCallbacks {
    on_connected: Mutex<Option<ConnectionCallback>>,
    on_disconnected: Mutex<Option<ConnectionCallback>>,
    on_data: Mutex<Option<DataCallback>>,
}

impl ClientCallbacks {
    pub fn set_on_connected(&self, callback: ConnectionCallback) {
        *self.on_connected.lock().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    pub fn set_on_disconnected(&self, callback: ConnectionCallback) {
        *self.on_disconnected.lock().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    pub fn set_on_data_received(&self, callback: DataCallback) {
        *self.on_data.lock().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    pub fn connected(&self) {
        let callback = self.on_connected.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn disconnected(&self) {
        let callback = self.on_disconnected.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn data(&self, frame: Frame) {
        let callback = self.on_data.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(callback) = callback {
            callback(frame);
        }
    }
}
