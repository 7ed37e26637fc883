//! Mono: a pipeline that yields at most one value.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use rsocket_core::rx::Mono;
//!
//! let seen = Arc::new(AtomicU32::new(0));
//! let s = seen.clone();
//! Mono::just(42u32)
//!     .do_on_success(move |v| s.store(*v, Ordering::SeqCst))
//!     .subscribe();
//! assert_eq!(seen.load(Ordering::SeqCst), 42);
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::debug;

use super::emitter::{Emitter, Hooks};
use super::scheduler::{ImmediateScheduler, Scheduler};
use super::signal::{Signal, SignalType};
use super::subscriber::{HookSubscriber, Subscriber};
use super::subscription::Subscription;
use crate::error::{Error, Result};

type MonoProducer<T> = Arc<dyn Fn(MonoSink<T>) + Send + Sync>;

/// Single-value pipeline description.
///
/// Building is cheap and side-effect free; each `subscribe` starts an
/// independent activation.
pub struct Mono<T: Send + 'static> {
    producer: MonoProducer<T>,
    hooks: Hooks<T>,
    scheduler: Arc<dyn Scheduler>,
}

impl<T: Send + 'static> Clone for Mono<T> {
    fn clone(&self) -> Self {
        Self {
            producer: self.producer.clone(),
            hooks: self.hooks.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<T: Send + 'static> Mono<T> {
    /// Pipeline whose value comes from `producer`.
    ///
    /// The producer runs once per subscription on the configured scheduler.
    pub fn create<F>(producer: F) -> Self
    where
        F: Fn(MonoSink<T>) + Send + Sync + 'static,
    {
        Self {
            producer: Arc::new(producer),
            hooks: Hooks::default(),
            scheduler: Arc::new(ImmediateScheduler),
        }
    }

    /// Pipeline that succeeds with a clone of `value`.
    pub fn just(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::create(move |sink| sink.success(value.clone()))
    }

    /// Pipeline that fails with `error`.
    pub fn error(error: Error) -> Self {
        Self::create(move |sink| sink.error(error.replicate()))
    }

    /// Pipeline that completes without a value.
    pub fn empty() -> Self {
        Self::create(|sink| sink.complete())
    }

    /// Run the producer on `scheduler`.
    pub fn subscribe_on(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Observe the subscription before the producer starts.
    pub fn do_on_subscribe<F>(mut self, f: F) -> Self
    where
        F: Fn(&Subscription) + Send + Sync + 'static,
    {
        self.hooks.on_subscribe.push(Arc::new(f));
        self
    }

    /// Observe the value.
    pub fn do_on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.hooks.on_next.push(Arc::new(move |_: &Subscription, v: &T| f(v)));
        self
    }

    /// Observe a failure.
    pub fn do_on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.hooks.on_error.push(Arc::new(f));
        self
    }

    /// Observe completion, with or without a value.
    pub fn do_on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.on_complete.push(Arc::new(f));
        self
    }

    /// Observe cancellation.
    pub fn do_on_cancel<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.on_cancel.push(Arc::new(f));
        self
    }

    /// Observe each `request(n)`.
    pub fn do_on_request<F>(mut self, f: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.hooks.on_request.push(Arc::new(f));
        self
    }

    /// Run `f` once after whichever terminal signal ends the activation.
    pub fn do_finally<F>(mut self, f: F) -> Self
    where
        F: Fn(SignalType) + Send + Sync + 'static,
    {
        self.hooks.on_finally.push(Arc::new(f));
        self
    }

    /// Activate; outcomes are observed through hooks.
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_with(HookSubscriber)
    }

    /// Activate, delivering to `subscriber`.
    ///
    /// A successful value arrives as `on_next` immediately followed by
    /// `on_complete`.
    pub fn subscribe_with<S>(&self, subscriber: S) -> Subscription
    where
        S: Subscriber<T>,
    {
        let emitter = Emitter::activate(
            self.hooks.clone(),
            Box::new(subscriber),
            self.scheduler.clone(),
        );
        let producer = self.producer.clone();
        emitter.start(move |emitter| producer(MonoSink::new(emitter)));
        emitter.subscription().clone()
    }

    /// Subscribe and wait for the outcome.
    ///
    /// Yields `Ok(Some(v))` on success, `Ok(None)` when empty, `Err(e)` on
    /// failure and `Err(Cancelled)` if the subscription is cancelled.
    /// Dropping the future cancels the subscription.
    pub async fn resolve(&self) -> Result<Option<T>> {
        let (tx, rx) = oneshot::channel();
        let subscription = self.subscribe_with(ResolveSubscriber {
            value: None,
            tx: Some(tx),
        });
        let _guard = CancelOnDrop(subscription);
        rx.await.unwrap_or(Err(Error::Cancelled))
    }
}

impl<T: Send + 'static> fmt::Debug for Mono<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mono").finish_non_exhaustive()
    }
}

/// Producer-side handle of a [`Mono`] activation.
///
/// The first of `success`, `error` or `complete` wins; later calls are
/// logged and ignored. Dropping the sink without signalling completes the
/// activation empty.
pub struct MonoSink<T: Send + 'static> {
    emitter: Arc<Emitter<T>>,
}

impl<T: Send + 'static> MonoSink<T> {
    fn new(emitter: Arc<Emitter<T>>) -> Self {
        Self { emitter }
    }

    /// Succeed with `value`.
    pub fn success(&self, value: T) {
        self.emitter.success(value);
    }

    /// Fail with `error`.
    pub fn error(&self, error: Error) {
        self.emitter.terminate(Signal::Error(error));
    }

    /// Complete without a value.
    pub fn complete(&self) {
        self.emitter.terminate(Signal::Complete);
    }

    /// Whether the consumer has cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.emitter.subscription().is_cancelled()
    }
}

impl<T: Send + 'static> Drop for MonoSink<T> {
    fn drop(&mut self) {
        // A panicking producer is reported by the activation itself.
        if std::thread::panicking() || self.emitter.is_producer_done() {
            return;
        }
        debug!("MonoSink dropped without a signal, completing empty");
        self.emitter.terminate(Signal::Complete);
    }
}

struct ResolveSubscriber<T> {
    value: Option<T>,
    tx: Option<oneshot::Sender<Result<Option<T>>>>,
}

impl<T> ResolveSubscriber<T> {
    fn resolve(&mut self, outcome: Result<Option<T>>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(outcome);
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for ResolveSubscriber<T> {
    fn on_next(&mut self, _: &Subscription, value: T) {
        self.value = Some(value);
    }

    fn on_complete(&mut self) {
        let value = self.value.take();
        self.resolve(Ok(value));
    }

    fn on_error(&mut self, error: Error) {
        self.resolve(Err(error));
    }

    fn on_cancel(&mut self) {
        self.resolve(Err(Error::Cancelled));
    }
}

/// Cancels a still-running subscription when dropped.
pub(crate) struct CancelOnDrop(pub(crate) Subscription);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if !self.0.is_terminated() {
            self.0.cancel();
        }
    }
}
