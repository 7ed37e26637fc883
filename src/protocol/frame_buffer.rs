//! Frame decoder for length-prefixed byte streams.
//!
//! Over stream transports each frame is preceded by a 3-byte big-endian
//! length. The decoder implements a small state machine:
//! - `WaitingForLength`: Need at least 3 bytes
//! - `WaitingForFrame`: Length parsed, need N more frame bytes
//!
//! # Example
//!
//! ```
//! use rsocket_core::protocol::{BufferPool, FrameDecoder, RequestNFrame, Frame};
//!
//! let pool = BufferPool::new();
//! let frame: Frame = RequestNFrame::encode(&pool, 1, 10).unwrap().into();
//! let bytes = frame.to_vec();
//!
//! let mut wire = vec![0, 0, bytes.len() as u8];
//! wire.extend_from_slice(&bytes);
//!
//! let mut decoder = FrameDecoder::new(pool);
//! let frames = decoder.push(&wire).unwrap();
//! assert_eq!(frames.len(), 1);
//! ```

use bytes::BytesMut;

use super::buffer_pool::BufferPool;
use super::wire_format::{FrameHeader, HEADER_SIZE};
use super::Frame;
use crate::error::{Error, Result};

/// Size of the frame length prefix.
pub const FRAME_LENGTH_SIZE: usize = 3;

/// Largest frame length the 24-bit prefix can express.
pub const MAX_FRAME_LENGTH: usize = 0xFF_FFFF;

/// Configuration for a [`FrameDecoder`].
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Maximum accepted frame length (header + body).
    pub max_frame_length: usize,
    /// Initial capacity of the accumulation buffer.
    pub initial_capacity: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_frame_length: MAX_FRAME_LENGTH,
            initial_capacity: 64 * 1024,
        }
    }
}

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for the 3-byte length prefix.
    WaitingForLength,
    /// Prefix parsed, waiting for `length` frame bytes.
    WaitingForFrame { length: usize },
}

/// Accumulates incoming bytes and yields complete frames.
pub struct FrameDecoder {
    buffer: BytesMut,
    state: State,
    pool: BufferPool,
    max_frame_length: usize,
    /// Frames decoded ahead of an error, handed out by the next push.
    decoded: Vec<Frame>,
}

impl FrameDecoder {
    /// Create a decoder with default settings, storing bodies in `pool`.
    pub fn new(pool: BufferPool) -> Self {
        Self::with_config(pool, DecoderConfig::default())
    }

    /// Create a decoder with custom settings.
    pub fn with_config(pool: BufferPool, config: DecoderConfig) -> Self {
        Self {
            buffer: BytesMut::with_capacity(config.initial_capacity),
            state: State::WaitingForLength,
            pool,
            max_frame_length: config.max_frame_length.min(MAX_FRAME_LENGTH),
            decoded: Vec::new(),
        }
    }

    /// Push data and extract all complete frames.
    ///
    /// Partial data is buffered for the next push.
    ///
    /// # Errors
    ///
    /// Returns `Protocol` if a length prefix is out of range, or any codec
    /// error from decoding a complete frame. Decoding stops at the first
    /// error; frames decoded before it in the same push are kept and
    /// returned first by the next push (`push(&[])` retrieves them).
    ///
    /// A frame rejected by the codec is consumed whole, so the stream stays
    /// aligned. A bad length prefix leaves it unaligned; the decoder should
    /// then be [`clear`](Self::clear)ed or discarded.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = std::mem::take(&mut self.decoded);
        loop {
            match self.try_extract_one() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => return Ok(frames),
                Err(e) => {
                    self.decoded = frames;
                    return Err(e);
                }
            }
        }
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.state {
                State::WaitingForLength => {
                    if self.buffer.len() < FRAME_LENGTH_SIZE {
                        return Ok(None);
                    }
                    let prefix = self.buffer.split_to(FRAME_LENGTH_SIZE);
                    let length = u32::from_be_bytes([0, prefix[0], prefix[1], prefix[2]]) as usize;

                    if length < HEADER_SIZE {
                        return Err(Error::Protocol(format!(
                            "Frame length {length} is shorter than the header"
                        )));
                    }
                    if length > self.max_frame_length {
                        return Err(Error::Protocol(format!(
                            "Frame length {} exceeds maximum {}",
                            length, self.max_frame_length
                        )));
                    }
                    self.state = State::WaitingForFrame { length };
                }

                State::WaitingForFrame { length } => {
                    if self.buffer.len() < length {
                        return Ok(None);
                    }
                    let raw = self.buffer.split_to(length);
                    self.state = State::WaitingForLength;

                    let header = FrameHeader::decode(&raw)?;
                    let mut body = self.pool.acquire(length - HEADER_SIZE);
                    body.write_bytes(&raw[HEADER_SIZE..]);
                    return Frame::from_parts(header, body).map(Some);
                }
            }
        }
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of frames decoded ahead of an error and not yet returned.
    pub fn pending_frames(&self) -> usize {
        self.decoded.len()
    }

    /// Clear the buffer, drop pending frames and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.decoded.clear();
        self.state = State::WaitingForLength;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForFrame { .. } => "WaitingForFrame",
        }
    }
}

/// Prefix `frame` with its 3-byte length.
///
/// # Errors
///
/// Returns `Protocol` if the frame is longer than [`MAX_FRAME_LENGTH`].
pub fn length_prefixed(frame: &Frame) -> Result<Vec<u8>> {
    let len = frame.len();
    if len > MAX_FRAME_LENGTH {
        return Err(Error::Protocol(format!(
            "Frame length {len} exceeds maximum {MAX_FRAME_LENGTH}"
        )));
    }
    let mut out = Vec::with_capacity(FRAME_LENGTH_SIZE + len);
    out.extend_from_slice(&(len as u32).to_be_bytes()[1..]);
    out.extend_from_slice(&frame.to_vec());
    Ok(out)
}
