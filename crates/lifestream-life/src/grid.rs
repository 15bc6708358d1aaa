//! The simulation itself.

use rand::Rng;

use crate::{FrameError, ALIVE, DEAD, MAX_SIDE};

/// Fixed-size boolean grid whose edges wrap around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifeGrid {
    width: usize,
    height: usize,
    cells: Vec<bool>,
    generation: u64,
}

impl LifeGrid {
    /// All-dead grid. Each side must be in `1..=999`.
    pub fn new(width: usize, height: usize) -> Result<Self, FrameError> {
        if width == 0 || height == 0 || width > MAX_SIDE || height > MAX_SIDE {
            return Err(FrameError::InvalidDimensions {
                width,
                height,
                max: MAX_SIDE,
            });
        }
        Ok(Self {
            width,
            height,
            cells: vec![false; width * height],
            generation: 0,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of `step` calls since creation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_alive(&self, x: usize, y: usize) -> bool {
        self.cells[self.index(x, y)]
    }

    pub fn set(&mut self, x: usize, y: usize, alive: bool) {
        let index = self.index(x, y);
        self.cells[index] = alive;
    }

    pub fn alive_count(&self) -> usize {
        self.cells.iter().filter(|&&alive| alive).count()
    }

    /// Make each cell alive with probability `fill_ratio` (clamped to 0..=1).
    pub fn randomize<R: Rng + ?Sized>(&mut self, fill_ratio: f64, rng: &mut R) {
        let p = fill_ratio.clamp(0.0, 1.0);
        for cell in &mut self.cells {
            *cell = rng.gen_bool(p);
        }
    }

    /// Advance one generation (B3/S23).
    pub fn step(&mut self) {
        let mut next = vec![false; self.cells.len()];
        for y in 0..self.height {
            for x in 0..self.width {
                let neighbors = self.live_neighbors(x, y);
                next[y * self.width + x] = match (self.is_alive(x, y), neighbors) {
                    (true, 2) | (true, 3) => true,
                    (false, 3) => true,
                    _ => false,
                };
            }
        }
        self.cells = next;
        self.generation += 1;
    }

    /// Header and cells, without the delimiter.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(crate::HEADER_LEN + self.cells.len() + 1);
        payload.extend_from_slice(format!("{:03}x{:03}", self.width, self.height).as_bytes());
        payload.extend(self.cells.iter().map(|&alive| if alive { ALIVE } else { DEAD }));
        payload
    }

    /// Complete wire frame: payload plus `\n`.
    pub fn to_frame(&self) -> Vec<u8> {
        let mut frame = self.to_payload();
        frame.push(b'\n');
        frame
    }

    fn index(&self, x: usize, y: usize) -> usize {
        (y % self.height) * self.width + (x % self.width)
    }

    fn live_neighbors(&self, x: usize, y: usize) -> usize {
        let mut count = 0;
        for dy in [self.height - 1, 0, 1] {
            for dx in [self.width - 1, 0, 1] {
                if dx == 0 && dy == 0 {
                    continue;
                }
                if self.is_alive(x + dx, y + dy) {
                    count += 1;
                }
            }
        }
        count
    }
}
