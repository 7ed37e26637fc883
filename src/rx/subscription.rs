//! Subscription: demand accounting and cancellation for one activation.
//!
//! Credits live in an `AtomicU64`. [`UNBOUNDED`] (`u64::MAX`) is sticky and
//! never decremented. Producers that want to block until demand arrives park
//! on a condvar that `request` and `cancel` notify.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::error::{Error, Result};

/// Credit value meaning "no limit".
pub const UNBOUNDED: u64 = u64::MAX;

pub(crate) type RequestHook = Arc<dyn Fn(u64) + Send + Sync>;

/// Activation-side reactions to demand and cancellation.
pub(crate) trait SubscriptionHandler: Send + Sync {
    /// Called after credits were added.
    fn on_demand(self: Arc<Self>) {}

    /// Called once, on the first `cancel`.
    fn on_cancel(self: Arc<Self>);
}

/// Handle through which a consumer controls one activation.
///
/// Cloning yields another handle to the same subscription. All methods may
/// be called from any thread.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<Inner>,
}

struct Inner {
    credits: AtomicU64,
    cancelled: AtomicBool,
    terminated: AtomicBool,
    demand_lock: Mutex<()>,
    demand_cv: Condvar,
    request_hooks: Vec<RequestHook>,
    handler: Mutex<Option<Arc<dyn SubscriptionHandler>>>,
}

impl Subscription {
    pub(crate) fn new(request_hooks: Vec<RequestHook>) -> Self {
        Self {
            inner: Arc::new(Inner {
                credits: AtomicU64::new(0),
                cancelled: AtomicBool::new(false),
                terminated: AtomicBool::new(false),
                demand_lock: Mutex::new(()),
                demand_cv: Condvar::new(),
                request_hooks,
                handler: Mutex::new(None),
            }),
        }
    }

    /// Attach the activation. The link is dropped again on termination or
    /// cancellation.
    pub(crate) fn bind(&self, handler: Arc<dyn SubscriptionHandler>) {
        if !self.is_finished() {
            *self.inner.handler.lock() = Some(handler);
        }
    }

    fn handler(&self) -> Option<Arc<dyn SubscriptionHandler>> {
        self.inner.handler.lock().clone()
    }

    /// Add `n` credits.
    ///
    /// Credits saturate instead of wrapping. Requests after the stream has
    /// terminated or been cancelled are accepted and ignored.
    ///
    /// # Errors
    ///
    /// `ContractViolation` if `n == 0`.
    pub fn request(&self, n: u64) -> Result<()> {
        if n == 0 {
            return Err(Error::ContractViolation("request(n) requires n >= 1"));
        }
        self.add_credits(n);
        Ok(())
    }

    /// Switch to unbounded demand.
    pub fn request_unbounded(&self) {
        self.add_credits(UNBOUNDED);
    }

    fn add_credits(&self, n: u64) {
        if self.is_finished() {
            trace!(n, "Request after termination ignored");
            return;
        }

        for hook in &self.inner.request_hooks {
            hook(n);
        }

        // `fetch_update` only fails when the closure returns None.
        let _ = self
            .inner
            .credits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(if current == UNBOUNDED {
                    UNBOUNDED
                } else {
                    current.saturating_add(n)
                })
            });

        self.notify_waiters();
        if let Some(handler) = self.handler() {
            handler.on_demand();
        }
    }

    /// Cancel the activation. Idempotent.
    ///
    /// If the stream has not terminated yet, a terminal `Cancel` is delivered.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        trace!("Subscription cancelled");
        self.notify_waiters();
        let handler = self.inner.handler.lock().take();
        if let Some(handler) = handler {
            handler.on_cancel();
        }
    }

    /// Whether `cancel` has been called.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Whether a terminal signal has been delivered.
    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::Acquire)
    }

    /// Cancelled or terminated.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.is_cancelled() || self.is_terminated()
    }

    /// Outstanding credits ([`UNBOUNDED`] when unlimited).
    #[inline]
    pub fn requested(&self) -> u64 {
        self.inner.credits.load(Ordering::Acquire)
    }

    /// Whether demand is unlimited.
    #[inline]
    pub fn is_unbounded(&self) -> bool {
        self.requested() == UNBOUNDED
    }

    /// Block until credits are positive or the subscription is finished.
    ///
    /// Returns `true` when there is demand to emit against.
    pub fn wait_demand(&self) -> bool {
        self.wait_demand_inner(None)
    }

    /// Like [`wait_demand`](Self::wait_demand) but gives up after `timeout`.
    pub fn wait_demand_timeout(&self, timeout: Duration) -> bool {
        self.wait_demand_inner(Some(timeout))
    }

    fn wait_demand_inner(&self, timeout: Option<Duration>) -> bool {
        let mut guard = self.inner.demand_lock.lock();
        loop {
            if self.is_finished() {
                return false;
            }
            if self.requested() > 0 {
                return true;
            }
            match timeout {
                Some(timeout) => {
                    if self.inner.demand_cv.wait_for(&mut guard, timeout).timed_out() {
                        return !self.is_finished() && self.requested() > 0;
                    }
                }
                None => self.inner.demand_cv.wait(&mut guard),
            }
        }
    }

    /// Take one credit for an emitted element.
    pub(crate) fn consume_one(&self) {
        let _ = self
            .inner
            .credits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(if current == UNBOUNDED {
                    UNBOUNDED
                } else {
                    current.saturating_sub(1)
                })
            });
    }

    pub(crate) fn mark_terminated(&self) {
        self.inner.terminated.store(true, Ordering::Release);
        drop(self.inner.handler.lock().take());
        self.notify_waiters();
    }

    fn notify_waiters(&self) {
        let _guard = self.inner.demand_lock.lock();
        self.inner.demand_cv.notify_all();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("requested", &self.requested())
            .field("cancelled", &self.is_cancelled())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
