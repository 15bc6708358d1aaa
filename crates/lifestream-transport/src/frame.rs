//! Delimiter framing for the byte streams and datagrams carried by every engine.
//!
//! A frame is an opaque payload terminated on the wire by a single delimiter
//! byte. The delimiter never appears inside a payload, so frames carry no
//! length prefix. Receivers push whatever a read returned into a
//! [`FrameBuffer`] and get back every frame that is now complete; a trailing
//! partial frame stays buffered until the rest arrives.
//!
//! ```text
//! read #1: "020x010##  #"        -> []                 (buffered)
//! read #2: "# ##\n020x0"         -> ["020x010##  ## ##"] (tail buffered)
//! read #3: "10   #\n\n"          -> ["020x010   #"]      (empty frame dropped)
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Delimiter used when none is configured.
pub const DEFAULT_DELIMITER: u8 = b'\n';

/// One complete application message, delimiter stripped.
pub type Frame = Bytes;

/// Per-connection accumulator of not-yet-delimited bytes.
///
/// Owned by whichever task or thread reads the socket; it is never shared.
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: BytesMut,
    delimiter: u8,
}

impl FrameBuffer {
    /// Create a buffer splitting on [`DEFAULT_DELIMITER`].
    pub fn new() -> Self {
        Self::with_delimiter(DEFAULT_DELIMITER)
    }

    /// Create a buffer splitting on a custom delimiter byte.
    pub fn with_delimiter(delimiter: u8) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            delimiter,
        }
    }

    /// Append `incoming` and extract every complete frame.
    ///
    /// Empty frames (consecutive delimiters) are dropped. The codec never
    /// fails: bytes without a delimiter simply accumulate.
    pub fn reassemble(&mut self, incoming: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(incoming);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == self.delimiter) {
            let mut chunk = self.buffer.split_to(pos + 1);
            chunk.truncate(pos);
            if !chunk.is_empty() {
                frames.push(chunk.freeze());
            }
        }
        frames
    }

    /// Number of buffered bytes still waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial frame, e.g. when a connection is torn down.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// The byte this buffer splits on.
    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Terminate `payload` with `delimiter`, ready to hand to `broadcast_data`.
pub fn encode(payload: &[u8], delimiter: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    buf.extend_from_slice(payload);
    buf.put_u8(delimiter);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn as_strings(frames: &[Frame]) -> Vec<String> {
        frames
            .iter()
            .map(|f| String::from_utf8_lossy(f).into_owned())
            .collect()
    }

    #[test]
    fn test_single_frame() {
        let mut buf = FrameBuffer::new();
        let frames = buf.reassemble(b"hello\n");
        assert_eq!(as_strings(&frames), vec!["hello"]);
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn test_consecutive_delimiters_yield_no_empty_frames() {
        let mut buf = FrameBuffer::new();
        let frames = buf.reassemble(b"\n\na\n\n\nb\n\n");
        assert_eq!(as_strings(&frames), vec!["a", "b"]);
    }

    #[test]
    fn test_partial_tail_retained() {
        let mut buf = FrameBuffer::new();
        let frames = buf.reassemble(b"first\nsec");
        assert_eq!(as_strings(&frames), vec!["first"]);
        assert_eq!(buf.pending(), 3);

        assert!(buf.reassemble(b"on").is_empty());
        assert_eq!(buf.pending(), 5);

        let frames = buf.reassemble(b"d\nthi");
        assert_eq!(as_strings(&frames), vec!["second"]);
        assert_eq!(buf.pending(), 3);
    }

    #[test]
    fn test_custom_delimiter() {
        let mut buf = FrameBuffer::with_delimiter(0x1e);
        let frames = buf.reassemble(b"a\nb\x1ec\x1e");
        assert_eq!(as_strings(&frames), vec!["a\nb", "c"]);
        assert_eq!(buf.delimiter(), 0x1e);
    }

    #[test]
    fn test_clear_discards_tail() {
        let mut buf = FrameBuffer::new();
        buf.reassemble(b"stale");
        buf.clear();
        let frames = buf.reassemble(b"fresh\n");
        assert_eq!(as_strings(&frames), vec!["fresh"]);
    }

    #[test]
    fn test_encode_appends_delimiter() {
        let encoded = encode(b"020x010", DEFAULT_DELIMITER);
        assert_eq!(&encoded[..], b"020x010\n");

        let mut buf = FrameBuffer::new();
        assert_eq!(as_strings(&buf.reassemble(&encoded)), vec!["020x010"]);
    }

    proptest! {
        #[test]
        fn prop_byte_by_byte_matches_all_at_once(
            payloads in proptest::collection::vec("[a-z# ]{0,16}", 0..12),
            trailing in "[a-z]{0,4}",
        ) {
            let mut input = Vec::new();
            for p in &payloads {
                input.extend_from_slice(p.as_bytes());
                input.push(DEFAULT_DELIMITER);
            }
            input.extend_from_slice(trailing.as_bytes());

            let mut whole = FrameBuffer::new();
            let at_once = whole.reassemble(&input);

            let mut split = FrameBuffer::new();
            let mut one_by_one = Vec::new();
            for b in &input {
                one_by_one.extend(split.reassemble(std::slice::from_ref(b)));
            }

            prop_assert_eq!(&at_once, &one_by_one);
            prop_assert_eq!(whole.pending(), trailing.len());
            prop_assert_eq!(split.pending(), trailing.len());

            let expected: Vec<&str> = payloads.iter().map(String::as_str).filter(|p| !p.is_empty()).collect();
            prop_assert_eq!(as_strings(&at_once), expected);
        }
    }
}
