//! Error types for rsocket-core.

use thiserror::Error;

use crate::protocol::FrameType;

/// Boxed cause carried by [`Error::Producer`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for codec, reactive core, and transport adapters.
#[derive(Debug, Error)]
pub enum Error {
    /// Fewer than 6 bytes were available for a frame header.
    #[error("Malformed header: need 6 bytes, got {available}")]
    MalformedHeader {
        /// Bytes that were available.
        available: usize,
    },

    /// Frame body is shorter than the minimum for its type.
    #[error("Incomplete {frame_type} frame: body length {len}")]
    IncompleteFrame {
        /// Type of the offending frame.
        frame_type: FrameType,
        /// Body length that was seen.
        len: usize,
    },

    /// Type tag not recognized by the codec registry.
    #[error("Unknown frame type: 0x{0:02X}")]
    UnknownFrameType(u8),

    /// Request N value outside `1..=0x7FFF_FFFF`.
    #[error("Request N {0} is outside the protocol range")]
    RequestNOutOfRange(u64),

    /// Metadata does not fit a 24-bit length prefix.
    #[error("Metadata length {0} exceeds 24-bit limit")]
    MetadataTooLarge(usize),

    /// Reactive contract violation (e.g. `request(0)`).
    #[error("Contract violation: {0}")]
    ContractViolation(&'static str),

    /// Failure raised by a producer, delivered as a terminal signal.
    #[error("Producer error: {0}")]
    Producer(#[source] BoxError),

    /// The pipeline was cancelled before producing a terminal value.
    #[error("Cancelled")]
    Cancelled,

    /// Scheduler no longer accepts tasks.
    #[error("Scheduler is shut down")]
    SchedulerShutdown,

    /// A tokio runtime was required but none is running on this thread.
    #[error("No tokio runtime in the current context")]
    NoRuntime,

    /// Protocol error on the byte stream (oversized frame, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error from the transport adapters.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Writer task has gone away.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - too many frames pending on the writer.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

impl Error {
    /// Wrap an arbitrary cause as a producer error.
    ///
    /// ```
    /// use rsocket_core::Error;
    ///
    /// let err = Error::producer("boom");
    /// assert_eq!(err.to_string(), "Producer error: boom");
    /// ```
    pub fn producer(cause: impl Into<BoxError>) -> Self {
        Error::Producer(cause.into())
    }

    /// Best-effort copy, used when one error value feeds many activations.
    ///
    /// Variants that hold foreign error values keep their kind and message
    /// but not their source chain.
    pub fn replicate(&self) -> Self {
        match self {
            Error::MalformedHeader { available } => Error::MalformedHeader {
                available: *available,
            },
            Error::IncompleteFrame { frame_type, len } => Error::IncompleteFrame {
                frame_type: *frame_type,
                len: *len,
            },
            Error::UnknownFrameType(tag) => Error::UnknownFrameType(*tag),
            Error::RequestNOutOfRange(n) => Error::RequestNOutOfRange(*n),
            Error::MetadataTooLarge(len) => Error::MetadataTooLarge(*len),
            Error::ContractViolation(msg) => Error::ContractViolation(msg),
            Error::Producer(cause) => Error::Producer(cause.to_string().into()),
            Error::Cancelled => Error::Cancelled,
            Error::SchedulerShutdown => Error::SchedulerShutdown,
            Error::NoRuntime => Error::NoRuntime,
            Error::Protocol(msg) => Error::Protocol(msg.clone()),
            Error::Io(e) => Error::Io(std::io::Error::new(e.kind(), e.to_string())),
            Error::MsgPackEncode(e) => {
                Error::MsgPackEncode(rmp_serde::encode::Error::Syntax(e.to_string()))
            }
            Error::MsgPackDecode(e) => {
                Error::MsgPackDecode(rmp_serde::decode::Error::Syntax(e.to_string()))
            }
            Error::Json(e) => Error::Json(<serde_json::Error as serde::de::Error>::custom(e)),
            Error::ConnectionClosed => Error::ConnectionClosed,
            Error::BackpressureTimeout => Error::BackpressureTimeout,
        }
    }

    /// True for errors produced by the frame codec.
    pub fn is_codec_error(&self) -> bool {
        matches!(
            self,
            Error::MalformedHeader { .. }
                | Error::IncompleteFrame { .. }
                | Error::UnknownFrameType(_)
                | Error::RequestNOutOfRange(_)
                | Error::MetadataTooLarge(_)
        )
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
