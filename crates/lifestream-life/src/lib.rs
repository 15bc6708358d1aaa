//! Lifestream Life
//!
//! Conway's Game of Life on a wrapping grid, plus the text frame used to ship
//! one generation over the wire.
//!
//! # Frame Format
//!
//! ```text
//! ┌─────────┬───┬─────────┬──────────────────────────┬────┐
//! │ width   │ x │ height  │ width*height cells       │ \n │
//! │ 3 digit │   │ 3 digit │ '#' alive, ' ' dead      │    │
//! └─────────┴───┴─────────┴──────────────────────────┴────┘
//! ```
//!
//! Cells are row-major, top row first. The trailing delimiter belongs to the
//! transport and is stripped before [`GridFrame::parse`] sees the payload.

mod error;
mod frame;
mod grid;

pub use error::FrameError;
pub use frame::GridFrame;
pub use grid::LifeGrid;

/// Length of the `WWWxHHH` header.
pub const HEADER_LEN: usize = 7;

/// Largest side the 3-digit header can express.
pub const MAX_SIDE: usize = 999;

/// Glyph of a live cell.
pub const ALIVE: u8 = b'#';

/// Glyph of a dead cell.
pub const DEAD: u8 = b' ';
