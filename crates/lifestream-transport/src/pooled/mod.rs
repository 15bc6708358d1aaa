//! Connectionless engine on plain threads.
//!
//! Same wire behavior as [`crate::multicast`], but sends run as jobs on a
//! [`WorkerPool`] and the client polls a blocking socket with a short read
//! timeout instead of using the async reactor.

mod client;
mod server;
mod worker_pool;

pub use client::PooledMulticastClient;
pub use server::PooledMulticastServer;
pub use worker_pool::WorkerPool;
