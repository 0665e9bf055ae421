//! Terminator framing for serial messages.
//!
//! [`TerminatorCodec`] splits a byte stream into messages that end with a
//! configurable terminator sequence. Each frame keeps its terminator, so
//! `"AB\nCD\n"` decodes into `"AB\n"` and `"CD\n"`.

use bytes::{Bytes, BytesMut};
use omega_core::constants::DEFAULT_MESSAGE_TERMINATOR;
use omega_core::{Error, Result};
use tokio_util::codec::Decoder;

/// Largest amount of unterminated data kept before giving up (64 KB).
const DEFAULT_MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Decoder producing terminator-delimited frames.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use omega_hardware::codec::TerminatorCodec;
/// use tokio_util::codec::Decoder;
///
/// let mut codec = TerminatorCodec::new(b"\r\n");
/// let mut buffer = BytesMut::from(&b"OK\r\nERR"[..]);
///
/// assert_eq!(codec.decode(&mut buffer).unwrap().unwrap(), &b"OK\r\n"[..]);
/// assert!(codec.decode(&mut buffer).unwrap().is_none());
/// assert_eq!(&buffer[..], b"ERR");
/// ```
#[derive(Debug, Clone)]
pub struct TerminatorCodec {
    terminator: Vec<u8>,

    /// Offset up to which the buffer is known to hold no terminator.
    scanned: usize,

    max_buffer_size: usize,
}

impl TerminatorCodec {
    /// Create a codec for `terminator`. An empty terminator means `"\n"`.
    pub fn new(terminator: impl AsRef<[u8]>) -> Self {
        let terminator = match terminator.as_ref() {
            [] => DEFAULT_MESSAGE_TERMINATOR.to_vec(),
            terminator => terminator.to_vec(),
        };
        Self {
            terminator,
            scanned: 0,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        }
    }

    /// Limit the amount of unterminated data kept.
    pub fn with_max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }

    /// Terminator in use.
    pub fn terminator(&self) -> &[u8] {
        &self.terminator
    }
}

impl Default for TerminatorCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGE_TERMINATOR)
    }
}

impl Decoder for TerminatorCodec {
    type Item = Bytes;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let width = self.terminator.len();
        // Back up so a terminator split across chunks is still found.
        let start = self.scanned.min(src.len()).saturating_sub(width - 1);

        let found = src[start..]
            .windows(width)
            .position(|window| window == self.terminator.as_slice());

        match found {
            Some(offset) => {
                self.scanned = 0;
                Ok(Some(src.split_to(start + offset + width).freeze()))
            }
            None if src.len() > self.max_buffer_size => {
                let size = src.len();
                src.clear();
                self.scanned = 0;
                Err(Error::invalid_data(format!(
                    "Unterminated serial data exceeds {} bytes ({size} buffered)",
                    self.max_buffer_size
                )))
            }
            None => {
                self.scanned = src.len();
                Ok(None)
            }
        }
    }
}
