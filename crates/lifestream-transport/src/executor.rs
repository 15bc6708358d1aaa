//! Worker-thread pool driving one shared reactor.
//!
//! Every engine instance owns exactly one [`IoExecutor`]. All of its socket
//! operations are issued on this runtime and complete on whichever worker
//! picked them up. Long-running loops watch a token handed out by the
//! executor's [`KeepAlive`], and [`IoExecutor::stop`] follows a fixed order:
//! release the keep-alive so those loops return, stop the reactor, join the
//! workers.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Upper bound on worker threads per executor.
pub const MAX_WORKER_THREADS: usize = 64;

/// How long `stop` waits for in-flight tasks before abandoning them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Clamp a requested worker count into `1..=MAX_WORKER_THREADS`.
pub fn clamp_threads(requested: usize) -> usize {
    let clamped = requested.clamp(1, MAX_WORKER_THREADS);
    if clamped != requested {
        warn!(
            "Requested {} worker threads, using {} (allowed 1..={})",
            requested, clamped, MAX_WORKER_THREADS
        );
    }
    clamped
}

/// Root of the cancellation tree for loops running on one executor.
///
/// Engines derive their loop tokens from [`KeepAlive::child_token`]; the
/// loops keep running until either their own token or this root is
/// cancelled. Releasing the root is the first step of executor shutdown.
pub struct KeepAlive {
    root: CancellationToken,
}

impl KeepAlive {
    fn new() -> Self {
        Self {
            root: CancellationToken::new(),
        }
    }

    /// Token cancelled when this keep-alive is released.
    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Cancel every token handed out by [`KeepAlive::child_token`].
    pub fn release(&self) {
        self.root.cancel();
    }
}

/// A pool of N worker threads that all drive the same reactor.
pub struct IoExecutor {
    name: String,
    threads: usize,
    handle: Handle,
    runtime: Option<Runtime>,
    keep_alive: KeepAlive,
}

impl IoExecutor {
    /// Launch `threads` workers (clamped to `1..=64`) named `{name}-io`.
    pub fn start(name: &str, threads: usize) -> Result<Self> {
        let threads = clamp_threads(threads);
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name(format!("{name}-io"))
            .enable_all()
            .build()?;

        info!("{} executor started with {} worker thread(s)", name, threads);

        Ok(Self {
            name: name.to_string(),
            threads,
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            keep_alive: KeepAlive::new(),
        })
    }

    /// Number of worker threads driving the reactor.
    pub fn worker_threads(&self) -> usize {
        self.threads
    }

    /// Reactor handle, for entering the runtime from other threads.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Token for a loop that must end when this executor stops.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.keep_alive.child_token()
    }

    /// Submit a task to the worker pool.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Run `future` to completion on the calling thread, inside the reactor.
    ///
    /// Used by `start`/`connect`/`stop` to perform setup and teardown
    /// synchronously. Fails when called from a task already running on some
    /// reactor (for instance a data callback that calls `disconnect`).
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        if Handle::try_current().is_ok() {
            return Err(Error::Runtime("cannot block inside an async context"));
        }
        match self.runtime.as_ref() {
            Some(runtime) => Ok(runtime.block_on(future)),
            None => Err(Error::Runtime("executor already stopped")),
        }
    }

    /// Like [`IoExecutor::block_on`], giving up after `duration`.
    ///
    /// The timer is created on the reactor, so this may be called from any
    /// thread outside a runtime.
    pub fn block_on_timeout<F: Future>(&self, duration: Duration, future: F) -> Result<F::Output> {
        self.block_on(async move { tokio::time::timeout(duration, future).await })?
            .map_err(|_| Error::Timeout(duration))
    }

    /// Release the keep-alive, stop the reactor and join every worker.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.keep_alive.release();
        if let Some(runtime) = self.runtime.take() {
            debug!("Joining {} worker thread(s) of {}", self.threads, self.name);
            if Handle::try_current().is_ok() {
                // Blocking joins are not allowed inside another runtime.
                runtime.shutdown_background();
            } else {
                runtime.shutdown_timeout(SHUTDOWN_GRACE);
            }
            info!("{} executor stopped", self.name);
        }
    }
}

impl Drop for IoExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_clamp_threads() {
        assert_eq!(clamp_threads(0), 1);
        assert_eq!(clamp_threads(4), 4);
        assert_eq!(clamp_threads(1000), MAX_WORKER_THREADS);
    }

    #[test]
    fn test_spawn_and_block_on() {
        let executor = IoExecutor::start("test", 2).unwrap();
        assert_eq!(executor.worker_threads(), 2);

        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let task = executor.spawn(async move {
            c.fetch_add(1, Ordering::SeqCst);
            7
        });

        let result = executor.block_on(task).unwrap().unwrap();
        assert_eq!(result, 7);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        executor.stop();
    }

    #[test]
    fn test_workers_run_on_named_threads() {
        let executor = IoExecutor::start("named", 1).unwrap();
        let task = executor.spawn(async { std::thread::current().name().map(str::to_string) });
        let name = executor.block_on(task).unwrap().unwrap();
        assert_eq!(name.as_deref(), Some("named-io"));
    }

    #[test]
    fn test_block_on_timeout_from_plain_thread() {
        let executor = IoExecutor::start("timer", 1).unwrap();
        let done = executor
            .block_on_timeout(Duration::from_secs(1), async { 3 })
            .unwrap();
        assert_eq!(done, 3);

        let expired = executor.block_on_timeout(
            Duration::from_millis(20),
            std::future::pending::<()>(),
        );
        assert!(matches!(expired, Err(Error::Timeout(_))));
        executor.stop();
    }

    #[test]
    fn test_stop_cancels_shutdown_tokens() {
        let executor = IoExecutor::start("tokens", 1).unwrap();
        let token = executor.shutdown_token();
        let waiter = token.clone();
        let task = executor.spawn(async move { waiter.cancelled().await });

        assert!(!token.is_cancelled());
        executor.stop();
        assert!(token.is_cancelled());
        drop(task);
    }

    #[test]
    fn test_block_on_refused_inside_runtime() {
        let executor = IoExecutor::start("outer", 1).unwrap();
        let inner = IoExecutor::start("inner", 1).unwrap();
        let refused = executor
            .block_on(async move { inner.block_on(async {}).is_err() })
            .unwrap();
        assert!(refused);
    }
}
