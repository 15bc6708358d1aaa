//! Engine selection by name.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::engine::{EngineConfig, StreamingClient, StreamingServer};
use crate::error::{Error, Result};
use crate::multicast::{MulticastClient, MulticastServer};
use crate::pooled::{PooledMulticastClient, PooledMulticastServer};
use crate::websocket::{WebSocketClient, WebSocketServer};

/// Engine family. Client and server must use the same one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EngineKind {
    /// UDP multicast on the async reactor.
    #[default]
    Multicast,
    /// WebSocket sessions over TCP.
    WebSocket,
    /// UDP multicast on plain threads with a worker pool.
    PooledMulticast,
}

impl EngineKind {
    pub const ALL: [EngineKind; 3] = [
        EngineKind::Multicast,
        EngineKind::WebSocket,
        EngineKind::PooledMulticast,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Multicast => "multicast",
            EngineKind::WebSocket => "websocket",
            EngineKind::PooledMulticast => "pooled-multicast",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "multicast" | "udp" => Ok(EngineKind::Multicast),
            "websocket" | "ws" => Ok(EngineKind::WebSocket),
            "pooled-multicast" | "pooled" => Ok(EngineKind::PooledMulticast),
            other => Err(Error::UnknownEngine(other.to_string())),
        }
    }
}

/// Builds matched client/server pairs for one engine family.
#[derive(Debug, Clone)]
pub struct StreamingFactory {
    kind: EngineKind,
    config: EngineConfig,
    client_threads: usize,
}

impl Default for StreamingFactory {
    fn default() -> Self {
        Self::new(EngineKind::default())
    }
}

impl StreamingFactory {
    pub fn new(kind: EngineKind) -> Self {
        Self {
            kind,
            config: EngineConfig::default(),
            client_threads: 1,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Worker threads for clients that run their own executor.
    pub fn with_client_threads(mut self, threads: usize) -> Self {
        self.client_threads = threads;
        self
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn create_client(&self) -> Box<dyn StreamingClient> {
        debug!("Creating {} client", self.kind);
        let config = self.config.clone();
        match self.kind {
            EngineKind::Multicast => Box::new(MulticastClient::new(config)),
            EngineKind::WebSocket => {
                Box::new(WebSocketClient::with_threads(config, self.client_threads))
            }
            EngineKind::PooledMulticast => Box::new(PooledMulticastClient::new(config)),
        }
    }

    pub fn create_server(&self) -> Box<dyn StreamingServer> {
        debug!("Creating {} server", self.kind);
        let config = self.config.clone();
        match self.kind {
            EngineKind::Multicast => Box::new(MulticastServer::new(config)),
            EngineKind::WebSocket => Box::new(WebSocketServer::new()),
            EngineKind::PooledMulticast => Box::new(PooledMulticastServer::new(config)),
        }
    }

    pub fn create_pair(&self) -> (Box<dyn StreamingClient>, Box<dyn StreamingServer>) {
        (self.create_client(), self.create_server())
    }
}
