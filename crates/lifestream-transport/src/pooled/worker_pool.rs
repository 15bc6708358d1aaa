//! Fixed-size pool of OS threads fed from one job queue.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::executor::clamp_threads;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Worker threads pulling boxed jobs off a shared crossbeam queue.
///
/// Jobs submitted from one thread start in submission order but may finish
/// in any order once there is more than one worker.
pub struct WorkerPool {
    name: String,
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers (clamped to `1..=64`) named `{name}-{i}`.
    pub fn new(name: &str, threads: usize) -> Result<Self> {
        let threads = clamp_threads(threads);
        let (jobs, queue) = unbounded::<Job>();

        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let queue = queue.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, index))
                .spawn(move || work(queue))?;
            workers.push(handle);
        }
        debug!("{} pool started with {} worker(s)", name, threads);

        Ok(Self {
            name: name.to_string(),
            jobs: Some(jobs),
            workers,
        })
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.jobs.as_ref().map_or(0, Sender::len)
    }

    /// Queue a job. Returns false once the pool is shut down.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.jobs {
            Some(jobs) => jobs.send(Box::new(job)).is_ok(),
            None => false,
        }
    }

    /// Stop taking jobs, let the workers drain the queue, then join them.
    pub fn shutdown(&mut self) {
        let Some(jobs) = self.jobs.take() else {
            return;
        };
        drop(jobs);

        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            if worker.thread().id() == current {
                // Shutdown requested by one of our own jobs.
                continue;
            }
            if worker.join().is_err() {
                warn!("{} worker exited abnormally", self.name);
            }
        }
        debug!("{} pool stopped", self.name);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn work(queue: Receiver<Job>) {
    while let Ok(job) = queue.recv() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("Worker job panicked");
        }
    }
}
