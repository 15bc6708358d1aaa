//! Connectionless engine on the async reactor.
//!
//! The server sends each broadcast as one UDP datagram to a multicast group;
//! routing does the fan-out, so there is no session registry. The client
//! joins the group and reassembles frames from received datagrams.

mod client;
mod server;

pub use client::MulticastClient;
pub use server::MulticastServer;
