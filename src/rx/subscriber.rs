//! Consumer side of a reactive pipeline.

use tracing::{debug, warn};

use super::subscription::Subscription;
use crate::error::Error;

/// Receives the signals of one activation.
///
/// All callbacks for one activation are serialized; they never run
/// concurrently with each other. After `on_complete`, `on_error` or
/// `on_cancel` nothing else is called.
pub trait Subscriber<T>: Send + 'static {
    /// Called once before any other signal. Requests unbounded demand unless
    /// overridden.
    fn on_subscribe(&mut self, subscription: &Subscription) {
        subscription.request_unbounded();
    }

    /// An element.
    fn on_next(&mut self, subscription: &Subscription, value: T) {
        let _ = (subscription, value);
    }

    /// Successful end of stream.
    fn on_complete(&mut self) {}

    /// Failed end of stream.
    fn on_error(&mut self, error: Error) {
        warn!(error = %error, "Unhandled stream error");
    }

    /// The subscription was cancelled.
    fn on_cancel(&mut self) {}
}

/// Subscriber that only requests unbounded demand; pipelines observe
/// signals through their hooks.
#[derive(Debug, Default, Clone, Copy)]
pub struct HookSubscriber;

impl<T: Send + 'static> Subscriber<T> for HookSubscriber {
    fn on_error(&mut self, error: Error) {
        debug!(error = %error, "Stream failed");
    }
}
