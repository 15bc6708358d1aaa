//! Terminal output.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use lifestream_life::GridFrame;
use lifestream_transport::Frame;

const CLEAR: &str = "\x1b[H\x1b[2J";

/// State shared between the transport callbacks and the render loop.
#[derive(Default)]
pub struct FrameSlot {
    latest: Mutex<Option<Frame>>,
    fresh: AtomicBool,
    connected: AtomicBool,
}

impl FrameSlot {
    /// Replace the latest frame; older unrendered frames are dropped.
    pub fn store(&self, frame: Frame) {
        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(frame);
        self.fresh.store(true, Ordering::SeqCst);
    }

    /// The latest frame if it arrived since the last call.
    pub fn take_fresh(&self) -> Option<Frame> {
        if !self.fresh.swap(false, Ordering::SeqCst) {
            return None;
        }
        self.latest.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn has_frame(&self) -> bool {
        self.latest.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Draws grids and status lines onto a writer.
pub struct Screen<W: Write> {
    out: W,
    alive: String,
    dead: String,
}

impl<W: Write> Screen<W> {
    pub fn new(out: W, cell_width: usize) -> Self {
        let cell_width = cell_width.max(1);
        Self {
            out,
            alive: "█".repeat(cell_width),
            dead: " ".repeat(cell_width),
        }
    }

    pub fn draw_grid(&mut self, grid: &GridFrame) -> io::Result<()> {
        let mut buffer = String::with_capacity(grid.height * (grid.width * self.alive.len() + 1));
        buffer.push_str(CLEAR);
        for y in 0..grid.height {
            for x in 0..grid.width {
                buffer.push_str(if grid.is_alive(x, y) { &self.alive } else { &self.dead });
            }
            buffer.push('\n');
        }
        buffer.push_str(&format!(
            "{}x{}  alive: {}\n",
            grid.width,
            grid.height,
            grid.alive_count()
        ));
        self.out.write_all(buffer.as_bytes())?;
        self.out.flush()
    }

    pub fn draw_status(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.out, "{}{}", CLEAR, message)?;
        self.out.flush()
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_reports_each_frame_once() {
        let slot = FrameSlot::default();
        assert!(slot.take_fresh().is_none());
        assert!(!slot.has_frame());

        slot.store(Frame::from_static(b"first"));
        slot.store(Frame::from_static(b"second"));
        assert_eq!(slot.take_fresh().unwrap(), Frame::from_static(b"second"));
        assert!(slot.take_fresh().is_none());
        assert!(slot.has_frame());
    }

    #[test]
    fn test_draw_grid() {
        let grid = GridFrame::parse(b"002x002#  #").unwrap();
        let mut screen = Screen::new(Vec::new(), 1);
        screen.draw_grid(&grid).unwrap();

        let output = String::from_utf8(screen.into_inner()).unwrap();
        let body = output.strip_prefix(CLEAR).unwrap();
        assert_eq!(body, "█ \n █\n2x2  alive: 2\n");
    }

    #[test]
    fn test_cell_width_repeats_glyph() {
        let grid = GridFrame::parse(b"001x001#").unwrap();
        let mut screen = Screen::new(Vec::new(), 3);
        screen.draw_grid(&grid).unwrap();
        let output = String::from_utf8(screen.into_inner()).unwrap();
        assert!(output.contains("███\n"));
    }
}
