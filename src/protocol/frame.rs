//! Frame enum and decode registry.
//!
//! [`Frame`] is the closed set of frames this crate understands. Decoding
//! reads the shared [`FrameHeader`] and dispatches on its type tag; every
//! other protocol frame type is reported as [`Error::UnknownFrameType`] so
//! the caller can drop it or hand it to another layer.
//!
//! # Example
//!
//! ```
//! use rsocket_core::protocol::{BufferPool, Frame, FrameFlags, RequestFrame, RequestKind};
//!
//! let pool = BufferPool::new();
//! let frame: Frame = RequestFrame::encode(
//!     &pool, RequestKind::Channel, 1, 8, b"ping", b"", FrameFlags::empty(),
//! ).unwrap().into();
//!
//! let bytes = frame.to_vec();
//! let decoded = Frame::decode(&pool, &bytes).unwrap();
//! assert_eq!(decoded.stream_id(), 1);
//! ```

use std::fmt;

use super::buffer_pool::{BufferPool, PooledBuf};
use super::request::{RequestFrame, RequestNFrame};
use super::wire_format::{FrameHeader, FrameType, HEADER_SIZE};
use crate::error::{Error, Result};

/// A decoded or ready-to-send frame.
#[derive(Debug)]
pub enum Frame {
    /// REQUEST_STREAM
    RequestStream(RequestFrame),
    /// REQUEST_CHANNEL
    RequestChannel(RequestFrame),
    /// REQUEST_N
    RequestN(RequestNFrame),
}

impl Frame {
    /// Decode a complete frame (header + body) copying the body into `pool`.
    pub fn decode(pool: &BufferPool, bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::decode(bytes)?;
        let body_bytes = &bytes[HEADER_SIZE..];
        // Reject unknown types before touching the pool.
        Self::check_supported(header.frame_type())?;
        let mut body = pool.acquire(body_bytes.len());
        body.write_bytes(body_bytes);
        Self::from_parts(header, body)
    }

    /// Build a frame from an already-decoded header and its body.
    pub fn from_parts(header: FrameHeader, body: PooledBuf) -> Result<Self> {
        let frame = match header.frame_type() {
            FrameType::RequestStream => Frame::RequestStream(RequestFrame::decode(header, body)?),
            FrameType::RequestChannel => {
                Frame::RequestChannel(RequestFrame::decode(header, body)?)
            }
            FrameType::RequestN => Frame::RequestN(RequestNFrame::decode(header, body)?),
            other => return Err(Error::UnknownFrameType(other.as_u8())),
        };
        Ok(frame)
    }

    fn check_supported(frame_type: FrameType) -> Result<()> {
        match frame_type {
            FrameType::RequestStream | FrameType::RequestChannel | FrameType::RequestN => Ok(()),
            other => Err(Error::UnknownFrameType(other.as_u8())),
        }
    }

    /// Shared header.
    pub fn header(&self) -> &FrameHeader {
        match self {
            Frame::RequestStream(f) | Frame::RequestChannel(f) => f.header(),
            Frame::RequestN(f) => f.header(),
        }
    }

    /// Stream id.
    #[inline]
    pub fn stream_id(&self) -> u32 {
        self.header().stream_id()
    }

    /// Frame type.
    #[inline]
    pub fn frame_type(&self) -> FrameType {
        self.header().frame_type()
    }

    /// Body bytes (without header).
    pub fn body(&self) -> &[u8] {
        match self {
            Frame::RequestStream(f) | Frame::RequestChannel(f) => f.body(),
            Frame::RequestN(f) => f.body(),
        }
    }

    /// Encoded length (header + body).
    #[inline]
    pub fn len(&self) -> usize {
        HEADER_SIZE + self.body().len()
    }

    /// Frames always carry a header, so never empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Write header and body into `buf`.
    pub fn encode_into(&self, buf: &mut PooledBuf) {
        buf.write_bytes(&self.header().encode());
        buf.write_bytes(self.body());
    }

    /// Contiguous encoded bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.header().encode());
        out.extend_from_slice(self.body());
        out
    }

    /// Split into header and body buffer.
    pub fn into_parts(self) -> (FrameHeader, PooledBuf) {
        match self {
            Frame::RequestStream(f) | Frame::RequestChannel(f) => f.into_parts(),
            Frame::RequestN(f) => f.into_parts(),
        }
    }

    /// Hand the body buffer back to its pool.
    pub fn release(self) {
        drop(self.into_parts());
    }
}

impl From<RequestFrame> for Frame {
    fn from(frame: RequestFrame) -> Self {
        match frame.kind() {
            super::RequestKind::Stream => Frame::RequestStream(frame),
            super::RequestKind::Channel => Frame::RequestChannel(frame),
        }
    }
}

impl From<RequestNFrame> for Frame {
    fn from(frame: RequestNFrame) -> Self {
        Frame::RequestN(frame)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::RequestStream(frame) | Frame::RequestChannel(frame) => fmt::Display::fmt(frame, f),
            Frame::RequestN(frame) => fmt::Display::fmt(frame, f),
        }
    }
}
