//! Command-line and environment configuration.

use std::path::PathBuf;

use clap::Parser;
use lifestream_transport::EngineKind;

#[derive(Parser, Debug, Clone)]
#[command(name = "lifestream-client", author, version, about = "Watch a live Game of Life stream")]
pub struct ClientConfig {
    /// Transport engine: multicast, websocket or pooled-multicast
    #[arg(long, env = "LIFESTREAM_ENGINE", default_value = "multicast")]
    pub engine: EngineKind,

    /// Multicast group to join, or server host for the websocket engine
    #[arg(short, long, env = "LIFESTREAM_ADDRESS", default_value = "239.255.0.1")]
    pub address: String,

    /// Port to receive on or connect to
    #[arg(short, long, env = "LIFESTREAM_PORT", default_value_t = 9090)]
    pub port: u16,

    /// Worker threads for engines that run their own executor
    #[arg(
        short,
        long,
        env = "LIFESTREAM_THREADS",
        default_value_t = 1,
        value_parser = clap::value_parser!(u16).range(1..=64)
    )]
    pub threads: u16,

    /// Screen refresh rate
    #[arg(
        short,
        long,
        env = "LIFESTREAM_FPS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u32).range(1..=60)
    )]
    pub fps: u32,

    /// Terminal columns drawn per cell
    #[arg(
        short,
        long,
        env = "LIFESTREAM_CELL_WIDTH",
        default_value_t = 2,
        value_parser = clap::value_parser!(u8).range(1..=4)
    )]
    pub cell_width: u8,

    /// Log filter used when RUST_LOG is not set
    #[arg(short, long, env = "LIFESTREAM_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Write logs to this file instead of stderr
    #[arg(long, env = "LIFESTREAM_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::try_parse_from(["lifestream-client"]).unwrap();
        assert_eq!(config.engine, EngineKind::Multicast);
        assert_eq!(config.address, "239.255.0.1");
        assert_eq!(config.port, 9090);
        assert_eq!(config.threads, 1);
        assert_eq!(config.fps, 30);
        assert_eq!(config.cell_width, 2);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_fps_range() {
        assert!(ClientConfig::try_parse_from(["lifestream-client", "--fps", "60"]).is_ok());
        assert!(ClientConfig::try_parse_from(["lifestream-client", "--fps", "0"]).is_err());
        assert!(ClientConfig::try_parse_from(["lifestream-client", "--fps", "61"]).is_err());
    }
}
