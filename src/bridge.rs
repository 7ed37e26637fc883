//! Credit bridge between subscriptions and wire demand.
//!
//! In-process demand is a `u64` credit count where [`UNBOUNDED`] means "no
//! limit". On the wire, demand is a positive 31-bit `InitialRequestN` or
//! REQUEST_N value and `0x7FFF_FFFF` plays the role of "no limit".
//!
//! # Usage
//!
//! Outbound, a requester turns its current credits into the first request
//! frame and every later `request(n)` into a REQUEST_N frame. Inbound, a
//! responder feeds each received frame to [`apply_inbound`] so the producer
//! serving that stream sees the peer's demand.

use tracing::trace;

use crate::error::{Error, Result};
use crate::payload::Payload;
use crate::protocol::{
    BufferPool, Frame, FrameFlags, RequestFrame, RequestKind, RequestNFrame, MAX_REQUEST_N,
};
use crate::rx::{Subscription, UNBOUNDED};

/// Convert subscription credits to a wire request count.
///
/// Saturates at `0x7FFF_FFFF`, so [`UNBOUNDED`] maps to the protocol's
/// unbounded value.
///
/// ```
/// use rsocket_core::bridge::credits_to_request_n;
/// use rsocket_core::rx::UNBOUNDED;
///
/// assert_eq!(credits_to_request_n(16), 16);
/// assert_eq!(credits_to_request_n(UNBOUNDED), 0x7FFF_FFFF);
/// ```
#[inline]
pub fn credits_to_request_n(credits: u64) -> u32 {
    if credits >= u64::from(MAX_REQUEST_N) {
        MAX_REQUEST_N
    } else {
        credits as u32
    }
}

/// Convert a wire request count back to subscription credits.
///
/// `0x7FFF_FFFF` becomes [`UNBOUNDED`].
#[inline]
pub fn request_n_to_credits(n: u32) -> u64 {
    if n >= MAX_REQUEST_N {
        UNBOUNDED
    } else {
        u64::from(n)
    }
}

/// Build the opening request frame of a stream carrying `credits` as its
/// `InitialRequestN`.
///
/// # Errors
///
/// `RequestNOutOfRange` if `credits` is zero, plus any encode error.
pub fn request_frame(
    pool: &BufferPool,
    kind: RequestKind,
    stream_id: u32,
    credits: u64,
    payload: &Payload,
) -> Result<RequestFrame> {
    if credits == 0 {
        return Err(Error::RequestNOutOfRange(0));
    }
    RequestFrame::from_payload(
        pool,
        kind,
        stream_id,
        credits_to_request_n(credits),
        payload,
        FrameFlags::empty(),
    )
}

/// Build the REQUEST_N frame for additional `credits` on `stream_id`.
///
/// # Errors
///
/// `RequestNOutOfRange` if `credits` is zero.
pub fn request_n_frame(pool: &BufferPool, stream_id: u32, credits: u64) -> Result<RequestNFrame> {
    RequestNFrame::encode(pool, stream_id, credits_to_request_n(credits))
}

/// Apply the demand carried by an inbound frame to `subscription`.
///
/// REQUEST_STREAM / REQUEST_CHANNEL contribute their `InitialRequestN`,
/// REQUEST_N its `RequestN`. A wire value of `0x7FFF_FFFF` switches the
/// subscription to unbounded demand.
///
/// # Errors
///
/// `RequestNOutOfRange` if the frame carries zero.
pub fn apply_inbound(subscription: &Subscription, frame: &Frame) -> Result<()> {
    let n = match frame {
        Frame::RequestStream(f) | Frame::RequestChannel(f) => f.initial_request_n(),
        Frame::RequestN(f) => f.request_n(),
    };
    if n == 0 {
        return Err(Error::RequestNOutOfRange(0));
    }

    trace!(stream_id = frame.stream_id(), n, "Inbound demand");
    match request_n_to_credits(n) {
        UNBOUNDED => subscription.request_unbounded(),
        credits => subscription.request(credits)?,
    }
    Ok(())
}
