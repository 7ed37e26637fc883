//! Protocol module - wire format, pooled buffers, and frame types.
//!
//! This module implements the binary framing for flow-controlled requests:
//! - 6-byte header encoding/decoding
//! - Size-classed buffer pool backing frame bodies
//! - REQUEST_STREAM / REQUEST_CHANNEL / REQUEST_N codecs
//! - Length-prefixed decoder for stream transports

mod buffer_pool;
mod frame;
mod frame_buffer;
mod request;
mod wire_format;

pub use buffer_pool::{
    BufferPool, PoolConfig, PoolStats, PooledBuf, DEFAULT_MAX_RETAINED_PER_CLASS,
    MAX_CLASS_SIZE, MIN_CLASS_SIZE,
};
pub use frame::Frame;
pub use frame_buffer::{
    length_prefixed, DecoderConfig, FrameDecoder, FRAME_LENGTH_SIZE, MAX_FRAME_LENGTH,
};
pub use request::{RequestFrame, RequestKind, RequestNFrame, METADATA_LEN_SIZE, REQUEST_N_SIZE};
pub use wire_format::{
    FrameFlags, FrameHeader, FrameType, CONNECTION_STREAM_ID, HEADER_SIZE, MAX_METADATA_LEN,
    MAX_REQUEST_N, MAX_STREAM_ID,
};
