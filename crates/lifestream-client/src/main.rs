//! Lifestream consumer
//!
//! Receives Game of Life frames from a producer and redraws the newest one
//! in the terminal at a fixed refresh rate.

mod config;
mod logging;
mod render;

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use lifestream_life::GridFrame;
use lifestream_transport::{StreamingClient, StreamingFactory};
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::render::{FrameSlot, Screen};

fn main() -> anyhow::Result<()> {
    let config = ClientConfig::parse();
    logging::init(&config.log_level, config.log_file.as_deref())?;

    info!("Lifestream client initializing...");
    let shutdown = shutdown_signal()?;

    let factory =
        StreamingFactory::new(config.engine).with_client_threads(usize::from(config.threads));
    let client = factory.create_client();
    let slot = Arc::new(FrameSlot::default());
    register_callbacks(client.as_ref(), &slot);

    info!(
        "Connecting via {} to {}:{}",
        config.engine, config.address, config.port
    );
    client
        .connect(&config.address, config.port)
        .with_context(|| format!("failed to connect to {}:{}", config.address, config.port))?;

    let result = run(&config, &slot, &shutdown);

    info!("Shutting down client...");
    client.disconnect();
    info!("Client shutdown complete");
    result
}

fn shutdown_signal() -> anyhow::Result<Receiver<()>> {
    let (tx, rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("failed to install signal handler")?;
    Ok(rx)
}

fn register_callbacks(client: &dyn StreamingClient, slot: &Arc<FrameSlot>) {
    let s = slot.clone();
    client.set_on_data_received(Arc::new(move |frame| s.store(frame)));

    let s = slot.clone();
    client.set_on_connected(Arc::new(move || {
        info!("Connected to server");
        s.set_connected(true);
    }));

    let s = slot.clone();
    client.set_on_disconnected(Arc::new(move || {
        info!("Disconnected from server");
        s.set_connected(false);
    }));
}

fn run(config: &ClientConfig, slot: &FrameSlot, shutdown: &Receiver<()>) -> anyhow::Result<()> {
    let period = Duration::from_secs(1) / config.fps;
    let mut screen = Screen::new(io::stdout(), usize::from(config.cell_width));
    let mut dimensions = None;

    loop {
        let tick = Instant::now();

        if let Some(frame) = slot.take_fresh() {
            match GridFrame::parse(&frame) {
                Ok(grid) => {
                    if dimensions != Some((grid.width, grid.height)) {
                        info!("Grid size is now {}x{}", grid.width, grid.height);
                        dimensions = Some((grid.width, grid.height));
                    }
                    screen.draw_grid(&grid).context("failed to draw frame")?;
                }
                Err(e) => warn!("Discarding malformed frame: {}", e),
            }
        } else if !slot.has_frame() {
            let status = if slot.is_connected() {
                "Waiting for data from server..."
            } else {
                "Connecting to server..."
            };
            screen.draw_status(status).context("failed to draw status")?;
        }

        match shutdown.recv_timeout(period.saturating_sub(tick.elapsed())) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("Client main loop finished");
    Ok(())
}
