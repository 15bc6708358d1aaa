//! Lifestream producer
//!
//! Steps a Game of Life grid at a fixed rate and broadcasts every generation
//! to all connected consumers.

mod config;
mod logging;

use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use lifestream_life::LifeGrid;
use lifestream_transport::{encode, StreamingFactory, StreamingServer};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::config::ServerConfig;

fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    logging::init(&config.log_level, config.log_file.as_deref())?;

    info!("Lifestream server initializing...");
    let shutdown = shutdown_signal()?;

    let factory = StreamingFactory::new(config.engine);
    let server = factory.create_server();
    server
        .start(&config.address, config.port, usize::from(config.threads))
        .with_context(|| {
            format!(
                "failed to start {} server on {}:{}",
                config.engine, config.address, config.port
            )
        })?;
    info!(
        "Serving {} on {}:{}; press Ctrl+C to stop",
        config.engine, config.address, config.port
    );

    let result = run(&config, server.as_ref(), factory.config().delimiter, &shutdown);

    info!("Shutting down server...");
    server.stop();
    info!("Server shutdown complete");
    result
}

/// Channel that yields once on Ctrl+C or SIGTERM.
fn shutdown_signal() -> anyhow::Result<Receiver<()>> {
    let (tx, rx) = bounded(1);
    ctrlc::set_handler(move || {
        info!("Received termination signal, initiating shutdown...");
        let _ = tx.try_send(());
    })
    .context("failed to install signal handler")?;
    Ok(rx)
}

fn run(
    config: &ServerConfig,
    server: &dyn StreamingServer,
    delimiter: u8,
    shutdown: &Receiver<()>,
) -> anyhow::Result<()> {
    let size = config.grid_size;
    let mut grid = LifeGrid::new(size.width, size.height).context("invalid grid size")?;
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    grid.randomize(config.fill_ratio, &mut rng);

    let period = Duration::from_secs(1) / config.fps;
    info!(
        "Game of Life grid size: {}, {} FPS, fill ratio {}",
        size, config.fps, config.fill_ratio
    );

    loop {
        let tick = Instant::now();
        grid.step();
        server.broadcast_data(&encode(&grid.to_payload(), delimiter));
        debug!(
            generation = grid.generation(),
            alive = grid.alive_count(),
            "Broadcast frame"
        );

        match shutdown.recv_timeout(period.saturating_sub(tick.elapsed())) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("Server main loop exited after {} generation(s)", grid.generation());
    Ok(())
}
