//! # rsocket-core
//!
//! Frame codec and reactive execution core for a binary, multiplexed,
//! backpressure-aware streaming protocol (RSocket).
//!
//! ## Architecture
//!
//! - **Frame codec** ([`protocol`]): 6-byte header, REQUEST_STREAM /
//!   REQUEST_CHANNEL / REQUEST_N bodies, pooled buffers
//! - **Reactive core** ([`rx`]): `Mono` / `Flux` pipelines driven by
//!   `request(n)` credits on pluggable schedulers
//! - **Credit bridge** ([`bridge`]): subscription credits to and from wire
//!   request counts
//! - **Transport adapters** ([`transport`]): length-prefixed framing over any
//!   `AsyncRead` / `AsyncWrite`
//!
//! ## Example
//!
//! ```
//! use rsocket_core::bridge::request_frame;
//! use rsocket_core::protocol::{BufferPool, Frame, RequestKind};
//! use rsocket_core::rx::Flux;
//! use rsocket_core::Payload;
//!
//! let pool = BufferPool::new();
//! let payload = Payload::from_data("hello").with_metadata("meta");
//! let frame: Frame = request_frame(&pool, RequestKind::Stream, 5, 100, &payload)
//!     .unwrap()
//!     .into();
//!
//! let decoded = Frame::decode(&pool, &frame.to_vec()).unwrap();
//! assert_eq!(decoded.stream_id(), 5);
//!
//! let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
//! let s = seen.clone();
//! Flux::just(vec![1, 2])
//!     .do_on_next(move |_, v| s.lock().unwrap().push(*v))
//!     .subscribe();
//! assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
//! ```

pub mod bridge;
pub mod codec;
pub mod error;
pub mod protocol;
pub mod rx;
pub mod transport;

mod payload;

pub use error::{Error, Result};
pub use payload::Payload;
