//! Per-activation signal pipeline shared by [`Mono`](super::Mono) and
//! [`Flux`](super::Flux).
//!
//! Producers push signals into an unbounded channel. Whoever raises the
//! work-in-progress counter from zero becomes the single drainer: it pulls
//! signals, runs hooks, and calls the subscriber until the channel is empty
//! and no other thread signalled in the meantime. Cancellation is checked
//! before every dequeue, so once the drainer has seen it only the terminal
//! `Cancel` is delivered.
//!
//! ```text
//! producer ──emit──► mpsc ──drain──► hooks ──► Subscriber
//!                      ▲
//! request/cancel ──────┘ (wake drainer / pump source)
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{error, trace, warn};

use super::scheduler::{panic_message, Scheduler, Task};
use super::signal::{Signal, SignalType};
use super::subscriber::Subscriber;
use super::subscription::{RequestHook, Subscription, SubscriptionHandler};
use crate::error::Error;

pub(crate) type SubscribeHook = Arc<dyn Fn(&Subscription) + Send + Sync>;
pub(crate) type NextHook<T> = Arc<dyn Fn(&Subscription, &T) + Send + Sync>;
pub(crate) type ErrorHook = Arc<dyn Fn(&Error) + Send + Sync>;
pub(crate) type UnitHook = Arc<dyn Fn() + Send + Sync>;
pub(crate) type FinallyHook = Arc<dyn Fn(SignalType) + Send + Sync>;

/// Side-effect hooks of a pipeline, each list in declaration order.
pub(crate) struct Hooks<T> {
    pub(crate) on_subscribe: Vec<SubscribeHook>,
    pub(crate) on_next: Vec<NextHook<T>>,
    pub(crate) on_complete: Vec<UnitHook>,
    pub(crate) on_error: Vec<ErrorHook>,
    pub(crate) on_cancel: Vec<UnitHook>,
    pub(crate) on_request: Vec<RequestHook>,
    pub(crate) on_finally: Vec<FinallyHook>,
}

impl<T> Default for Hooks<T> {
    fn default() -> Self {
        Self {
            on_subscribe: Vec::new(),
            on_next: Vec::new(),
            on_complete: Vec::new(),
            on_error: Vec::new(),
            on_cancel: Vec::new(),
            on_request: Vec::new(),
            on_finally: Vec::new(),
        }
    }
}

impl<T> Clone for Hooks<T> {
    fn clone(&self) -> Self {
        Self {
            on_subscribe: self.on_subscribe.clone(),
            on_next: self.on_next.clone(),
            on_complete: self.on_complete.clone(),
            on_error: self.on_error.clone(),
            on_cancel: self.on_cancel.clone(),
            on_request: self.on_request.clone(),
            on_finally: self.on_finally.clone(),
        }
    }
}

/// What travels through the channel.
enum Emission<T> {
    Signal(Signal<T>),
    /// Element and completion delivered as one step, for single-value
    /// sources.
    Success(T),
}

/// Pull-based source: the iterator is advanced only against demand.
pub(crate) type PullSource<T> = Box<dyn Iterator<Item = T> + Send>;

struct Delivery<T: Send + 'static> {
    rx: mpsc::UnboundedReceiver<Emission<T>>,
    subscriber: Box<dyn Subscriber<T>>,
}

/// One activation of a pipeline.
pub(crate) struct Emitter<T: Send + 'static> {
    tx: mpsc::UnboundedSender<Emission<T>>,
    delivery: Mutex<Delivery<T>>,
    wip: AtomicUsize,
    delivered_terminal: AtomicBool,
    producer_done: AtomicBool,
    subscription: Subscription,
    hooks: Hooks<T>,
    scheduler: Arc<dyn Scheduler>,
    pull: Mutex<Option<std::iter::Peekable<PullSource<T>>>>,
    pull_wip: AtomicUsize,
    pulling: AtomicBool,
}

impl<T: Send + 'static> Emitter<T> {
    /// Create the activation and run `on_subscribe` on the calling thread.
    ///
    /// Signals raised while `on_subscribe` runs are queued and delivered
    /// right after it returns.
    pub(crate) fn activate(
        hooks: Hooks<T>,
        subscriber: Box<dyn Subscriber<T>>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = Subscription::new(hooks.on_request.clone());
        let emitter = Arc::new(Self {
            tx,
            delivery: Mutex::new(Delivery { rx, subscriber }),
            // Held by the activating thread until on_subscribe returns.
            wip: AtomicUsize::new(1),
            delivered_terminal: AtomicBool::new(false),
            producer_done: AtomicBool::new(false),
            subscription,
            hooks,
            scheduler,
            pull: Mutex::new(None),
            pull_wip: AtomicUsize::new(0),
            pulling: AtomicBool::new(false),
        });
        emitter.subscription.bind(emitter.clone());

        {
            let mut delivery = emitter.delivery.lock();
            let sub = &emitter.subscription;
            let result = catch_unwind(AssertUnwindSafe(|| {
                for hook in &emitter.hooks.on_subscribe {
                    hook(sub);
                }
                delivery.subscriber.on_subscribe(sub);
            }));
            if let Err(payload) = result {
                error!(panic = %panic_message(&*payload), "on_subscribe panicked");
                sub.cancel();
            }
        }
        emitter.drain_loop();
        emitter
    }

    pub(crate) fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Run `producer` on the scheduler.
    pub(crate) fn start<F>(self: &Arc<Self>, producer: F)
    where
        F: FnOnce(Arc<Self>) + Send + 'static,
    {
        let emitter = self.clone();
        let task: Task = Box::new(move || {
            if emitter.subscription.is_finished() {
                return;
            }
            let sink_side = emitter.clone();
            if let Err(payload) = catch_unwind(AssertUnwindSafe(move || producer(sink_side))) {
                let message = panic_message(&*payload);
                error!(panic = %message, "Producer panicked");
                emitter.terminate(Signal::Error(Error::producer(format!(
                    "producer panicked: {message}"
                ))));
            }
        });
        self.submit(task);
    }

    /// Emit from `source` whenever there is demand.
    pub(crate) fn start_pull(self: &Arc<Self>, source: PullSource<T>) {
        *self.pull.lock() = Some(source.peekable());
        self.pulling.store(true, Ordering::Release);
        self.schedule_pump();
    }

    fn schedule_pump(self: &Arc<Self>) {
        let emitter = self.clone();
        self.submit(Box::new(move || emitter.pump()));
    }

    fn submit(&self, task: Task) {
        if let Err(e) = self.scheduler.submit(task) {
            warn!(error = %e, "Scheduler rejected producer");
            self.terminate(Signal::Error(e));
        }
    }

    /// Whether the producer side already signalled a terminal.
    pub(crate) fn is_producer_done(&self) -> bool {
        self.producer_done.load(Ordering::Acquire)
    }

    /// Emit one element. Returns `false` if it was dropped.
    pub(crate) fn next(&self, value: T) -> bool {
        if self.is_producer_done() {
            warn!("Element emitted after terminal signal, dropped");
            return false;
        }
        if self.subscription.is_finished() {
            return false;
        }
        self.subscription.consume_one();
        self.push(Emission::Signal(Signal::Next(value)));
        true
    }

    /// Emit an element and completion as one terminal step.
    pub(crate) fn success(&self, value: T) -> bool {
        if self.producer_done.swap(true, Ordering::AcqRel) {
            warn!("Duplicate terminal signal ignored");
            return false;
        }
        self.subscription.consume_one();
        self.push(Emission::Success(value));
        true
    }

    /// Emit `Complete` or `Error`. The first terminal wins.
    pub(crate) fn terminate(&self, signal: Signal<T>) -> bool {
        debug_assert!(signal.is_terminal());
        if self.producer_done.swap(true, Ordering::AcqRel) {
            warn!(
                signal = %signal.signal_type(),
                "Duplicate terminal signal ignored"
            );
            return false;
        }
        self.push(Emission::Signal(signal));
        true
    }

    fn push(&self, emission: Emission<T>) {
        // The receiver lives as long as `self`.
        let _ = self.tx.send(emission);
        self.drain();
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        self.drain_loop();
    }

    /// Deliver queued signals; the caller must own the WIP counter.
    fn drain_loop(&self) {
        let mut missed = 1;
        loop {
            {
                let mut delivery = self.delivery.lock();
                loop {
                    if self.delivered_terminal.load(Ordering::Acquire) {
                        while delivery.rx.try_recv().is_ok() {}
                        break;
                    }
                    if self.subscription.is_cancelled() {
                        self.deliver_cancel(&mut delivery);
                        continue;
                    }
                    match delivery.rx.try_recv() {
                        Ok(emission) => self.deliver(&mut delivery, emission),
                        Err(_) => break,
                    }
                }
            }
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }

    fn deliver(&self, delivery: &mut Delivery<T>, emission: Emission<T>) {
        let sub = &self.subscription;
        match emission {
            Emission::Signal(Signal::Next(value)) => {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    for hook in &self.hooks.on_next {
                        hook(sub, &value);
                    }
                    delivery.subscriber.on_next(sub, value);
                }));
                if let Err(payload) = result {
                    error!(panic = %panic_message(&*payload), "on_next panicked, cancelling");
                    sub.cancel();
                }
            }
            Emission::Success(value) => {
                self.finish();
                self.guard_terminal(|| {
                    for hook in &self.hooks.on_next {
                        hook(sub, &value);
                    }
                    delivery.subscriber.on_next(sub, value);
                    for hook in &self.hooks.on_complete {
                        hook();
                    }
                    delivery.subscriber.on_complete();
                });
                self.run_finally(SignalType::Complete);
            }
            Emission::Signal(Signal::Complete) => {
                self.finish();
                self.guard_terminal(|| {
                    for hook in &self.hooks.on_complete {
                        hook();
                    }
                    delivery.subscriber.on_complete();
                });
                self.run_finally(SignalType::Complete);
            }
            Emission::Signal(Signal::Error(e)) => {
                self.finish();
                self.guard_terminal(|| {
                    for hook in &self.hooks.on_error {
                        hook(&e);
                    }
                    delivery.subscriber.on_error(e);
                });
                self.run_finally(SignalType::Error);
            }
            Emission::Signal(Signal::Cancel) => self.deliver_cancel(delivery),
        }
    }

    fn deliver_cancel(&self, delivery: &mut Delivery<T>) {
        trace!("Delivering cancel");
        self.finish();
        self.guard_terminal(|| {
            for hook in &self.hooks.on_cancel {
                hook();
            }
            delivery.subscriber.on_cancel();
        });
        self.run_finally(SignalType::Cancel);
    }

    // The pull source is released by the pump once it sees the finished
    // subscription; the pump may hold its lock while delivering.
    fn finish(&self) {
        self.delivered_terminal.store(true, Ordering::Release);
        self.subscription.mark_terminated();
    }

    fn guard_terminal(&self, f: impl FnOnce()) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
            error!(panic = %panic_message(&*payload), "Terminal callback panicked");
        }
    }

    fn run_finally(&self, signal: SignalType) {
        for hook in &self.hooks.on_finally {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| hook(signal))) {
                error!(panic = %panic_message(&*payload), "do_finally hook panicked");
            }
        }
    }

    /// Advance the pull source while demand lasts.
    fn pump(&self) {
        if self.pull_wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            self.pump_ready();
            missed = self.pull_wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                break;
            }
        }
    }

    fn pump_ready(&self) {
        let mut guard = self.pull.lock();
        loop {
            let Some(source) = guard.as_mut() else {
                return;
            };
            if self.subscription.is_finished() || self.is_producer_done() {
                *guard = None;
                return;
            }

            let exhausted = match catch_unwind(AssertUnwindSafe(|| source.peek().is_none())) {
                Ok(exhausted) => exhausted,
                Err(payload) => {
                    *guard = None;
                    drop(guard);
                    self.source_panicked(&*payload);
                    return;
                }
            };
            if exhausted {
                *guard = None;
                drop(guard);
                self.terminate(Signal::Complete);
                return;
            }
            if self.subscription.requested() == 0 {
                return;
            }

            // peek() already produced the element.
            if let Some(value) = source.next() {
                self.next(value);
            }
        }
    }

    fn source_panicked(&self, payload: &(dyn std::any::Any + Send)) {
        let message = panic_message(payload);
        error!(panic = %message, "Source iterator panicked");
        self.terminate(Signal::Error(Error::producer(format!(
            "producer panicked: {message}"
        ))));
    }
}

impl<T: Send + 'static> SubscriptionHandler for Emitter<T> {
    fn on_demand(self: Arc<Self>) {
        if self.pulling.load(Ordering::Acquire) {
            self.schedule_pump();
        }
    }

    fn on_cancel(self: Arc<Self>) {
        self.drain();
    }
}
