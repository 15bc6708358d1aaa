//! Lifestream Transport - one producer, many consumers, any wire
//!
//! This crate provides:
//! - Delimiter framing with a reassembler for arbitrarily split input
//! - A UDP multicast engine on the async reactor
//! - A WebSocket engine with a per-session write queue and session registry
//! - A UDP multicast engine on plain threads with an explicit worker pool
//! - A factory that picks a matched client/server pair by name
//!
//! Producer and consumer code only ever see [`StreamingServer`] and
//! [`StreamingClient`], so swapping the engine is a configuration change.
//!
//! # Architecture
//!
//! ```text
//! producer ──broadcast_data──▶ StreamingServer ──▶ wire ──▶ StreamingClient
//!                                  │                             │
//!                     multicast: one datagram          FrameBuffer::reassemble
//!                     websocket: Session::send each            │
//!                                                        on_data_received
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lifestream_transport::{EngineKind, StreamingFactory};
//!
//! let factory = StreamingFactory::new(EngineKind::WebSocket);
//! let server = factory.create_server();
//! server.start("0.0.0.0", 9090, 2)?;
//!
//! let client = factory.create_client();
//! client.set_on_data_received(Arc::new(|frame| println!("{} bytes", frame.len())));
//! client.connect("127.0.0.1", 9090)?;
//!
//! server.broadcast_data(b"hello\n");
//! ```

pub mod engine;
pub mod error;
pub mod executor;
pub mod factory;
pub mod frame;
pub mod group;
pub mod multicast;
pub mod pooled;
pub mod state;
pub mod websocket;

// Re-export main types at crate root
pub use engine::{ConnectionCallback, DataCallback, EngineConfig, StreamingClient, StreamingServer};
pub use error::{Error, Result};
pub use executor::{IoExecutor, KeepAlive, MAX_WORKER_THREADS};
pub use factory::{EngineKind, StreamingFactory};
pub use frame::{encode, Frame, FrameBuffer, DEFAULT_DELIMITER};
pub use multicast::{MulticastClient, MulticastServer};
pub use pooled::{PooledMulticastClient, PooledMulticastServer, WorkerPool};
pub use state::{ConnectionState, ServerState, SessionState};
pub use websocket::{SessionRegistry, WebSocketClient, WebSocketServer};
