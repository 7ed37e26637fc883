//! Wire format encoding and decoding.
//!
//! Implements the 6-byte frame header:
//! ```text
//! ┌───────────────────────┬────────────┬──────────┐
//! │ Stream ID             │ Frame Type │ Flags    │
//! │ 31 bits (top bit = 0) │ 6 bits     │ 10 bits  │
//! │ uint32 BE             │      uint16 BE        │
//! └───────────────────────┴────────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use std::fmt;

use bitflags::bitflags;

use crate::error::{Error, Result};

/// Header size in bytes (fixed, exactly 6).
pub const HEADER_SIZE: usize = 6;

/// Largest stream id representable in 31 bits.
pub const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Largest request N value; by protocol convention it also means "unbounded".
pub const MAX_REQUEST_N: u32 = 0x7FFF_FFFF;

/// Largest metadata length that fits the 24-bit length prefix.
pub const MAX_METADATA_LEN: usize = 0xFF_FFFF;

/// Stream id reserved for connection-level frames.
pub const CONNECTION_STREAM_ID: u32 = 0;

const FLAGS_MASK: u16 = 0x03FF;
const FRAME_TYPE_SHIFT: u16 = 10;

bitflags! {
    /// Frame flags (10 bits).
    ///
    /// Build the set before creating a frame:
    ///
    /// ```
    /// use rsocket_core::protocol::FrameFlags;
    ///
    /// let flags = FrameFlags::COMPLETE | FrameFlags::FOLLOWS;
    /// assert_eq!(flags.bits(), 0b00_1100_0000);
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FrameFlags: u16 {
        /// PAYLOAD frame carries a value.
        const NEXT = 1 << 5;
        /// Stream completed (REQUEST_CHANNEL, PAYLOAD).
        const COMPLETE = 1 << 6;
        /// More fragments follow.
        const FOLLOWS = 1 << 7;
        /// Metadata length + metadata are present.
        const METADATA = 1 << 8;
        /// Frame may be ignored if not understood.
        const IGNORE = 1 << 9;
    }
}

impl FrameFlags {
    /// Create flags from the raw 10-bit field. Unknown bits are preserved.
    #[must_use]
    pub const fn from_wire(raw: u16) -> Self {
        Self::from_bits_retain(raw & FLAGS_MASK)
    }

    /// Raw 10-bit wire value.
    #[must_use]
    pub const fn to_wire(self) -> u16 {
        self.bits() & FLAGS_MASK
    }
}

impl Default for FrameFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Frame type tags (6 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Setup = 0x01,
    Lease = 0x02,
    Keepalive = 0x03,
    RequestResponse = 0x04,
    RequestFnf = 0x05,
    RequestStream = 0x06,
    RequestChannel = 0x07,
    RequestN = 0x08,
    Cancel = 0x09,
    Payload = 0x0A,
    Error = 0x0B,
    MetadataPush = 0x0C,
    Resume = 0x0D,
    ResumeOk = 0x0E,
    Ext = 0x3F,
}

impl FrameType {
    /// Parse a 6-bit type tag.
    pub fn from_u8(tag: u8) -> Result<Self> {
        let frame_type = match tag {
            0x01 => Self::Setup,
            0x02 => Self::Lease,
            0x03 => Self::Keepalive,
            0x04 => Self::RequestResponse,
            0x05 => Self::RequestFnf,
            0x06 => Self::RequestStream,
            0x07 => Self::RequestChannel,
            0x08 => Self::RequestN,
            0x09 => Self::Cancel,
            0x0A => Self::Payload,
            0x0B => Self::Error,
            0x0C => Self::MetadataPush,
            0x0D => Self::Resume,
            0x0E => Self::ResumeOk,
            0x3F => Self::Ext,
            other => return Err(Error::UnknownFrameType(other)),
        };
        Ok(frame_type)
    }

    /// Raw tag value.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    fn name(self) -> &'static str {
        match self {
            Self::Setup => "SETUP",
            Self::Lease => "LEASE",
            Self::Keepalive => "KEEPALIVE",
            Self::RequestResponse => "REQUEST_RESPONSE",
            Self::RequestFnf => "REQUEST_FNF",
            Self::RequestStream => "REQUEST_STREAM",
            Self::RequestChannel => "REQUEST_CHANNEL",
            Self::RequestN => "REQUEST_N",
            Self::Cancel => "CANCEL",
            Self::Payload => "PAYLOAD",
            Self::Error => "ERROR",
            Self::MetadataPush => "METADATA_PUSH",
            Self::Resume => "RESUME",
            Self::ResumeOk => "RESUME_OK",
            Self::Ext => "EXT",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    stream_id: u32,
    frame_type: FrameType,
    flags: FrameFlags,
}

impl FrameHeader {
    /// Create a new header. The stream id's top bit is cleared.
    pub fn new(stream_id: u32, frame_type: FrameType, flags: FrameFlags) -> Self {
        Self {
            stream_id: stream_id & MAX_STREAM_ID,
            frame_type,
            flags: FrameFlags::from_wire(flags.bits()),
        }
    }

    /// Stream identifier (0 = connection level).
    #[inline]
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Frame type tag.
    #[inline]
    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    /// Flag set.
    #[inline]
    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(&self, flag: FrameFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Check if the metadata flag is set.
    #[inline]
    pub fn has_metadata(&self) -> bool {
        self.has_flag(FrameFlags::METADATA)
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// ```
    /// use rsocket_core::protocol::{FrameFlags, FrameHeader, FrameType};
    ///
    /// let header = FrameHeader::new(5, FrameType::RequestStream, FrameFlags::METADATA);
    /// assert_eq!(header.encode(), [0, 0, 0, 5, 0x19, 0x00]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (6 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        let type_and_flags =
            (u16::from(self.frame_type.as_u8()) << FRAME_TYPE_SHIFT) | self.flags.to_wire();
        buf[0..4].copy_from_slice(&(self.stream_id & MAX_STREAM_ID).to_be_bytes());
        buf[4..6].copy_from_slice(&type_and_flags.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// The reserved top bit of the stream id is ignored.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::MalformedHeader {
                available: buf.len(),
            });
        }
        let stream_id = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) & MAX_STREAM_ID;
        let type_and_flags = u16::from_be_bytes([buf[4], buf[5]]);
        let frame_type = FrameType::from_u8((type_and_flags >> FRAME_TYPE_SHIFT) as u8)?;
        Ok(Self {
            stream_id,
            frame_type,
            flags: FrameFlags::from_wire(type_and_flags),
        })
    }

    pub(crate) fn with_flags(mut self, flags: FrameFlags) -> Self {
        self.flags = FrameFlags::from_wire(flags.bits());
        self
    }
}

impl fmt::Display for FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FrameHeader{{id={},type={},flags=0x{:03X}}}",
            self.stream_id,
            self.frame_type,
            self.flags.to_wire()
        )
    }
}
