//! Connection-oriented engine: one WebSocket session per client.
//!
//! The server keeps a [`SessionRegistry`] of open sessions and fans each
//! broadcast out as one text message per session. Every session has its own
//! outbound queue, so writes to one client never interleave and a slow
//! client does not hold back the others.

mod client;
mod registry;
mod server;
mod session;

pub use client::WebSocketClient;
pub use registry::SessionRegistry;
pub use server::WebSocketServer;
pub use session::{Session, SessionId};
