//! Flow-controlled request frames and REQUEST_N.
//!
//! REQUEST_STREAM and REQUEST_CHANNEL share one body layout:
//! ```text
//! ┌─────────────────┬──────────────┬──────────┬───────────┐
//! │ InitialRequestN │ Metadata Len │ Metadata │ Data      │
//! │ uint32 BE       │ uint24 BE    │ variable │ remainder │
//! └─────────────────┴──────────────┴──────────┴───────────┘
//!                   └── present iff METADATA flag ──┘
//! ```
//!
//! Both are handled by [`RequestFrame`], parametrised by [`RequestKind`].

use std::fmt;

use bytes::Bytes;

use super::buffer_pool::{BufferPool, PooledBuf};
use super::wire_format::{
    FrameFlags, FrameHeader, FrameType, MAX_METADATA_LEN, MAX_REQUEST_N,
};
use crate::error::{Error, Result};
use crate::payload::Payload;

/// Size of the InitialRequestN / RequestN field.
pub const REQUEST_N_SIZE: usize = 4;

/// Size of the metadata length prefix.
pub const METADATA_LEN_SIZE: usize = 3;

/// Which flow-controlled request a [`RequestFrame`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// REQUEST_STREAM
    Stream,
    /// REQUEST_CHANNEL
    Channel,
}

impl RequestKind {
    /// Frame type tag for this kind.
    #[inline]
    pub fn frame_type(self) -> FrameType {
        match self {
            RequestKind::Stream => FrameType::RequestStream,
            RequestKind::Channel => FrameType::RequestChannel,
        }
    }

    fn label(self) -> &'static str {
        match self {
            RequestKind::Stream => "FrameRequestStream",
            RequestKind::Channel => "FrameRequestChannel",
        }
    }
}

fn check_request_n(n: u32) -> Result<()> {
    if n > MAX_REQUEST_N {
        return Err(Error::RequestNOutOfRange(u64::from(n)));
    }
    Ok(())
}

/// A REQUEST_STREAM or REQUEST_CHANNEL frame.
///
/// # Example
///
/// ```
/// use rsocket_core::protocol::{BufferPool, FrameFlags, RequestFrame, RequestKind};
///
/// let pool = BufferPool::new();
/// let frame = RequestFrame::encode(
///     &pool, RequestKind::Stream, 5, 100, b"hello", b"meta", FrameFlags::empty(),
/// ).unwrap();
///
/// assert_eq!(frame.initial_request_n(), 100);
/// assert_eq!(frame.metadata(), Some(&b"meta"[..]));
/// assert_eq!(frame.data(), b"hello");
/// ```
pub struct RequestFrame {
    kind: RequestKind,
    header: FrameHeader,
    body: PooledBuf,
}

impl RequestFrame {
    /// Encode a new request frame into a buffer from `pool`.
    ///
    /// Sets [`FrameFlags::METADATA`] iff `metadata` is non-empty. Fails
    /// before touching any buffer if `initial_request_n` exceeds
    /// `0x7FFF_FFFF` or `metadata` does not fit a 24-bit length.
    pub fn encode(
        pool: &BufferPool,
        kind: RequestKind,
        stream_id: u32,
        initial_request_n: u32,
        data: &[u8],
        metadata: &[u8],
        flags: FrameFlags,
    ) -> Result<Self> {
        check_request_n(initial_request_n)?;
        if metadata.len() > MAX_METADATA_LEN {
            return Err(Error::MetadataTooLarge(metadata.len()));
        }

        let mut flags = flags - FrameFlags::METADATA;
        let mut capacity = REQUEST_N_SIZE + data.len();
        if !metadata.is_empty() {
            capacity += METADATA_LEN_SIZE + metadata.len();
        }

        let mut body = pool.acquire(capacity);
        body.write_bytes(&[0u8; REQUEST_N_SIZE]);
        body.put_u32_at(0, initial_request_n);
        if !metadata.is_empty() {
            flags |= FrameFlags::METADATA;
            body.write_u24(metadata.len())?;
            body.write_bytes(metadata);
        }
        if !data.is_empty() {
            body.write_bytes(data);
        }

        Ok(Self {
            kind,
            header: FrameHeader::new(stream_id, kind.frame_type(), flags),
            body,
        })
    }

    /// Encode a frame carrying `payload`.
    pub fn from_payload(
        pool: &BufferPool,
        kind: RequestKind,
        stream_id: u32,
        initial_request_n: u32,
        payload: &Payload,
        flags: FrameFlags,
    ) -> Result<Self> {
        Self::encode(
            pool,
            kind,
            stream_id,
            initial_request_n,
            payload.data(),
            payload.metadata().unwrap_or_default(),
            flags,
        )
    }

    /// Wrap a received body and validate it.
    pub fn decode(header: FrameHeader, body: PooledBuf) -> Result<Self> {
        let kind = match header.frame_type() {
            FrameType::RequestStream => RequestKind::Stream,
            FrameType::RequestChannel => RequestKind::Channel,
            other => return Err(Error::UnknownFrameType(other.as_u8())),
        };
        let frame = Self { kind, header, body };
        frame.validate()?;
        Ok(frame)
    }

    /// Check the body against the minimum length and the metadata prefix.
    pub fn validate(&self) -> Result<()> {
        let len = self.body.len();
        let incomplete = Error::IncompleteFrame {
            frame_type: self.header.frame_type(),
            len,
        };
        if len < REQUEST_N_SIZE {
            return Err(incomplete);
        }
        if self.header.has_metadata() {
            match self.metadata_len() {
                Some(meta_len) if REQUEST_N_SIZE + METADATA_LEN_SIZE + meta_len <= len => {}
                _ => return Err(incomplete),
            }
        }
        Ok(())
    }

    /// Request kind (stream or channel).
    #[inline]
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Frame header.
    #[inline]
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Stream id.
    #[inline]
    pub fn stream_id(&self) -> u32 {
        self.header.stream_id()
    }

    /// Raw body bytes.
    #[inline]
    pub fn body(&self) -> &[u8] {
        self.body.bytes()
    }

    /// Number of items the requester is willing to receive.
    pub fn initial_request_n(&self) -> u32 {
        let b = self.body.bytes();
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }

    fn metadata_len(&self) -> Option<usize> {
        let b = self.body.bytes().get(REQUEST_N_SIZE..REQUEST_N_SIZE + METADATA_LEN_SIZE)?;
        Some(u32::from_be_bytes([0, b[0], b[1], b[2]]) as usize)
    }

    /// Metadata bytes; `None` unless the METADATA flag is set.
    pub fn metadata(&self) -> Option<&[u8]> {
        if !self.header.has_metadata() {
            return None;
        }
        let start = REQUEST_N_SIZE + METADATA_LEN_SIZE;
        let len = self.metadata_len()?;
        self.body.bytes().get(start..start + len)
    }

    /// Data bytes following the request N field and any metadata.
    pub fn data(&self) -> &[u8] {
        let body = self.body.bytes();
        let start = match self.metadata() {
            Some(meta) => REQUEST_N_SIZE + METADATA_LEN_SIZE + meta.len(),
            None => REQUEST_N_SIZE,
        };
        body.get(start..).unwrap_or_default()
    }

    /// Copy data and metadata into a standalone [`Payload`].
    pub fn to_payload(&self) -> Payload {
        Payload::new(
            Bytes::copy_from_slice(self.data()),
            self.metadata().map(Bytes::copy_from_slice),
        )
    }

    /// Set or clear the COMPLETE flag (meaningful for REQUEST_CHANNEL).
    pub fn set_complete(&mut self, complete: bool) {
        let mut flags = self.header.flags();
        flags.set(FrameFlags::COMPLETE, complete);
        self.header = self.header.with_flags(flags);
    }

    /// Split into header and body buffer.
    pub fn into_parts(self) -> (FrameHeader, PooledBuf) {
        (self.header, self.body)
    }
}

impl fmt::Display for RequestFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{{{},data={},metadata={},initialRequestN={}}}",
            self.kind.label(),
            self.header,
            String::from_utf8_lossy(self.data()),
            String::from_utf8_lossy(self.metadata().unwrap_or_default()),
            self.initial_request_n()
        )
    }
}

impl fmt::Debug for RequestFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestFrame")
            .field("kind", &self.kind)
            .field("header", &self.header)
            .field("initial_request_n", &self.initial_request_n())
            .field("metadata_len", &self.metadata().map(<[u8]>::len))
            .field("data_len", &self.data().len())
            .finish()
    }
}

/// A REQUEST_N frame: additional demand for an existing stream.
pub struct RequestNFrame {
    header: FrameHeader,
    body: PooledBuf,
}

impl RequestNFrame {
    /// Encode a REQUEST_N frame. `n` must be in `1..=0x7FFF_FFFF`.
    pub fn encode(pool: &BufferPool, stream_id: u32, n: u32) -> Result<Self> {
        if n == 0 {
            return Err(Error::RequestNOutOfRange(0));
        }
        check_request_n(n)?;
        let mut body = pool.acquire(REQUEST_N_SIZE);
        body.write_u32(n);
        Ok(Self {
            header: FrameHeader::new(stream_id, FrameType::RequestN, FrameFlags::empty()),
            body,
        })
    }

    /// Wrap a received body and validate it.
    pub fn decode(header: FrameHeader, body: PooledBuf) -> Result<Self> {
        if header.frame_type() != FrameType::RequestN {
            return Err(Error::UnknownFrameType(header.frame_type().as_u8()));
        }
        if body.len() < REQUEST_N_SIZE {
            return Err(Error::IncompleteFrame {
                frame_type: FrameType::RequestN,
                len: body.len(),
            });
        }
        if body.len() > REQUEST_N_SIZE {
            return Err(Error::Protocol(format!(
                "REQUEST_N body is {} bytes, expected {REQUEST_N_SIZE}",
                body.len()
            )));
        }
        Ok(Self { header, body })
    }

    /// Frame header.
    #[inline]
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Stream id.
    #[inline]
    pub fn stream_id(&self) -> u32 {
        self.header.stream_id()
    }

    /// Requested amount.
    pub fn request_n(&self) -> u32 {
        let b = self.body.bytes();
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }

    /// Raw body bytes.
    #[inline]
    pub fn body(&self) -> &[u8] {
        self.body.bytes()
    }

    /// Split into header and body buffer.
    pub fn into_parts(self) -> (FrameHeader, PooledBuf) {
        (self.header, self.body)
    }
}

impl fmt::Display for RequestNFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameRequestN{{{},n={}}}", self.header, self.request_n())
    }
}

impl fmt::Debug for RequestNFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestNFrame")
            .field("header", &self.header)
            .field("n", &self.request_n())
            .finish()
    }
}
