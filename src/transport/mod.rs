//! Transport module - frame I/O over byte streams.
//!
//! Socket ownership stays with the caller. This module provides:
//! - [`FrameDecoder`] for the read half (3-byte length-prefixed frames)
//! - A dedicated writer task for the write half

mod writer;

pub use crate::protocol::{DecoderConfig, FrameDecoder};
pub use writer::{
    spawn_writer_task, FrameSender, OutboundFrame, WriterConfig, DEFAULT_BACKPRESSURE_TIMEOUT,
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_PENDING_FRAMES,
};
