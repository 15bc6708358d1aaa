//! Decoding side of the frame format.

use crate::{FrameError, LifeGrid, ALIVE, DEAD, HEADER_LEN, MAX_SIDE};

/// One received generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridFrame {
    pub width: usize,
    pub height: usize,
    cells: Vec<bool>,
}

impl GridFrame {
    /// Decode a payload. A single trailing `\n` is tolerated.
    pub fn parse(payload: &[u8]) -> Result<Self, FrameError> {
        let payload = payload.strip_suffix(b"\n").unwrap_or(payload);
        if payload.len() < HEADER_LEN {
            return Err(FrameError::TooShort(payload.len()));
        }

        let (header, body) = payload.split_at(HEADER_LEN);
        let (width, height) = parse_header(header)?;

        let expected = width * height;
        if body.len() != expected {
            return Err(FrameError::BodyLength {
                expected,
                actual: body.len(),
            });
        }

        let cells = body
            .iter()
            .enumerate()
            .map(|(index, &byte)| match byte {
                ALIVE => Ok(true),
                DEAD => Ok(false),
                byte => Err(FrameError::InvalidCell { index, byte }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            width,
            height,
            cells,
        })
    }

    pub fn is_alive(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height && self.cells[y * self.width + x]
    }

    pub fn alive_count(&self) -> usize {
        self.cells.iter().filter(|&&alive| alive).count()
    }

    /// Rows as display strings, top first.
    pub fn rows(&self, alive: char, dead: char) -> impl Iterator<Item = String> + '_ {
        self.cells.chunks(self.width).map(move |row| {
            row.iter()
                .map(|&cell| if cell { alive } else { dead })
                .collect()
        })
    }
}

impl From<&LifeGrid> for GridFrame {
    fn from(grid: &LifeGrid) -> Self {
        let mut cells = Vec::with_capacity(grid.width() * grid.height());
        for y in 0..grid.height() {
            for x in 0..grid.width() {
                cells.push(grid.is_alive(x, y));
            }
        }
        Self {
            width: grid.width(),
            height: grid.height(),
            cells,
        }
    }
}

fn parse_header(header: &[u8]) -> Result<(usize, usize), FrameError> {
    let malformed = || FrameError::MalformedHeader(String::from_utf8_lossy(header).into_owned());

    if header[3] != b'x' {
        return Err(malformed());
    }
    let side = |digits: &[u8]| -> Option<usize> {
        if !digits.iter().all(u8::is_ascii_digit) {
            return None;
        }
        std::str::from_utf8(digits).ok()?.parse().ok()
    };
    let width = side(&header[..3]).ok_or_else(malformed)?;
    let height = side(&header[4..]).ok_or_else(malformed)?;

    if width == 0 || height == 0 {
        return Err(FrameError::InvalidDimensions {
            width,
            height,
            max: MAX_SIDE,
        });
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_parse_small_frame() {
        let frame = GridFrame::parse(b"003x002#    #").unwrap();
        assert_eq!((frame.width, frame.height), (3, 2));
        assert!(frame.is_alive(0, 0));
        assert!(frame.is_alive(2, 1));
        assert!(!frame.is_alive(1, 0));
        assert!(!frame.is_alive(9, 9));
        assert_eq!(frame.alive_count(), 2);

        let rows: Vec<String> = frame.rows('#', '.').collect();
        assert_eq!(rows, vec!["#..", "..#"]);
    }

    #[test]
    fn test_parse_tolerates_delimiter() {
        assert!(GridFrame::parse(b"001x001#\n").is_ok());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(GridFrame::parse(b"003x0"), Err(FrameError::TooShort(5)));
        assert!(matches!(
            GridFrame::parse(b"003y002      "),
            Err(FrameError::MalformedHeader(_))
        ));
        assert!(matches!(
            GridFrame::parse(b"0a3x002      "),
            Err(FrameError::MalformedHeader(_))
        ));
        assert_eq!(
            GridFrame::parse(b"003x002###"),
            Err(FrameError::BodyLength {
                expected: 6,
                actual: 3
            })
        );
        assert_eq!(
            GridFrame::parse(b"002x001#*"),
            Err(FrameError::InvalidCell { index: 1, byte: b'*' })
        );
        assert!(matches!(
            GridFrame::parse(b"000x002"),
            Err(FrameError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_parse_grid_payload_of_example_size() {
        let mut grid = LifeGrid::new(20, 10).unwrap();
        grid.randomize(0.3, &mut StdRng::seed_from_u64(1));
        let payload = grid.to_payload();
        assert_eq!(payload.len(), HEADER_LEN + 200);
        assert_eq!(GridFrame::parse(&payload).unwrap(), GridFrame::from(&grid));
    }

    proptest! {
        #[test]
        fn prop_payload_decodes_to_same_grid(
            width in 1usize..40,
            height in 1usize..40,
            seed in any::<u64>(),
            fill in 0.0f64..=1.0,
        ) {
            let mut grid = LifeGrid::new(width, height).unwrap();
            grid.randomize(fill, &mut StdRng::seed_from_u64(seed));
            let decoded = GridFrame::parse(&grid.to_frame()).unwrap();
            prop_assert_eq!(decoded, GridFrame::from(&grid));
        }
    }
}
