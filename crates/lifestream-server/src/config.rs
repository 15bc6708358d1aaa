//! Command-line and environment configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use lifestream_transport::EngineKind;

/// Smallest and largest grid side accepted on the command line.
pub const GRID_SIDE_RANGE: std::ops::RangeInclusive<usize> = 10..=200;

#[derive(Parser, Debug, Clone)]
#[command(name = "lifestream-server", author, version, about = "Broadcast a live Game of Life")]
pub struct ServerConfig {
    /// Transport engine: multicast, websocket or pooled-multicast
    #[arg(long, env = "LIFESTREAM_ENGINE", default_value = "multicast")]
    pub engine: EngineKind,

    /// Multicast group, or listen address for the websocket engine
    #[arg(short, long, env = "LIFESTREAM_ADDRESS", default_value = "239.255.0.1")]
    pub address: String,

    /// Port to send to or listen on
    #[arg(short, long, env = "LIFESTREAM_PORT", default_value_t = 9090)]
    pub port: u16,

    /// Transport worker threads
    #[arg(
        short,
        long,
        env = "LIFESTREAM_THREADS",
        default_value_t = 2,
        value_parser = clap::value_parser!(u16).range(1..=64)
    )]
    pub threads: u16,

    /// Generations broadcast per second
    #[arg(
        long,
        env = "LIFESTREAM_FPS",
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..=30)
    )]
    pub fps: u32,

    /// Grid size as WIDTHxHEIGHT, each side 10..=200
    #[arg(long, env = "LIFESTREAM_GRID_SIZE", default_value = "40x20")]
    pub grid_size: GridSize,

    /// Probability that a cell starts alive
    #[arg(long, env = "LIFESTREAM_FILL_RATIO", default_value_t = 0.3, value_parser = parse_fill_ratio)]
    pub fill_ratio: f64,

    /// Seed for the initial population; random when omitted
    #[arg(long, env = "LIFESTREAM_SEED")]
    pub seed: Option<u64>,

    /// Log filter used when RUST_LOG is not set (e.g. "debug", "lifestream_transport=trace")
    #[arg(long, env = "LIFESTREAM_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Write logs to this file instead of stderr
    #[arg(long, env = "LIFESTREAM_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

/// Grid dimensions parsed from `WIDTHxHEIGHT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSize {
    pub width: usize,
    pub height: usize,
}

impl FromStr for GridSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (width, height) = s
            .trim()
            .split_once(|c: char| c == 'x' || c == 'X')
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
        let side = |value: &str| -> Result<usize, String> {
            let side: usize = value
                .trim()
                .parse()
                .map_err(|_| format!("'{}' is not a number", value))?;
            if !GRID_SIDE_RANGE.contains(&side) {
                return Err(format!(
                    "grid side {} outside {}..={}",
                    side,
                    GRID_SIDE_RANGE.start(),
                    GRID_SIDE_RANGE.end()
                ));
            }
            Ok(side)
        };
        Ok(Self {
            width: side(width)?,
            height: side(height)?,
        })
    }
}

impl fmt::Display for GridSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

fn parse_fill_ratio(s: &str) -> Result<f64, String> {
    let ratio: f64 = s.parse().map_err(|_| format!("'{}' is not a number", s))?;
    if !(0.0..=1.0).contains(&ratio) {
        return Err(format!("fill ratio {} outside 0.0..=1.0", ratio));
    }
    Ok(ratio)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::try_parse_from(["lifestream-server"]).unwrap();
        assert_eq!(config.engine, EngineKind::Multicast);
        assert_eq!(config.address, "239.255.0.1");
        assert_eq!(config.port, 9090);
        assert_eq!(config.threads, 2);
        assert_eq!(config.fps, 1);
        assert_eq!(config.grid_size, GridSize { width: 40, height: 20 });
        assert_eq!(config.fill_ratio, 0.3);
        assert!(config.seed.is_none());
        assert!(config.log_file.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::try_parse_from([
            "lifestream-server",
            "--engine",
            "websocket",
            "--address",
            "0.0.0.0",
            "--threads",
            "8",
            "--fps",
            "30",
            "--grid-size",
            "200x10",
            "--seed",
            "42",
        ])
        .unwrap();
        assert_eq!(config.engine, EngineKind::WebSocket);
        assert_eq!(config.threads, 8);
        assert_eq!(config.fps, 30);
        assert_eq!(config.grid_size.to_string(), "200x10");
        assert_eq!(config.seed, Some(42));
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        for args in [
            ["lifestream-server", "--threads", "0"],
            ["lifestream-server", "--threads", "65"],
            ["lifestream-server", "--fps", "31"],
            ["lifestream-server", "--grid-size", "9x20"],
            ["lifestream-server", "--grid-size", "40by20"],
            ["lifestream-server", "--fill-ratio", "1.5"],
            ["lifestream-server", "--engine", "smoke-signals"],
        ] {
            assert!(ServerConfig::try_parse_from(args).is_err(), "{:?}", args);
        }
    }
}
