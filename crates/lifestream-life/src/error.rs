use thiserror::Error;

/// Errors from building a grid or decoding a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("grid dimensions {width}x{height} out of range (1..={max} per side)")]
    InvalidDimensions {
        width: usize,
        height: usize,
        max: usize,
    },

    #[error("frame too short for header: {0} bytes")]
    TooShort(usize),

    #[error("malformed header: {0:?}")]
    MalformedHeader(String),

    #[error("expected {expected} cells, got {actual}")]
    BodyLength { expected: usize, actual: usize },

    #[error("invalid cell byte 0x{byte:02x} at index {index}")]
    InvalidCell { index: usize, byte: u8 },
}
