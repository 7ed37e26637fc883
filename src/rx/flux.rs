//! Flux: a pipeline that yields zero or more values under demand.
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use rsocket_core::rx::Flux;
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let s = seen.clone();
//! Flux::from_iter(1..=3)
//!     .do_on_next(move |_, v| s.lock().unwrap().push(*v))
//!     .subscribe();
//! assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use super::emitter::{Emitter, Hooks, PullSource};
use super::mono::CancelOnDrop;
use super::scheduler::{ImmediateScheduler, Scheduler};
use super::signal::{Signal, SignalType};
use super::subscriber::{HookSubscriber, Subscriber};
use super::subscription::Subscription;
use crate::error::{Error, Result};

enum Source<T: Send + 'static> {
    /// Push-style producer driving a [`FluxSink`].
    Create(Arc<dyn Fn(FluxSink<T>) + Send + Sync>),
    /// Demand-driven source; a fresh iterator per subscription.
    Pull(Arc<dyn Fn() -> PullSource<T> + Send + Sync>),
}

impl<T: Send + 'static> Clone for Source<T> {
    fn clone(&self) -> Self {
        match self {
            Source::Create(f) => Source::Create(f.clone()),
            Source::Pull(f) => Source::Pull(f.clone()),
        }
    }
}

/// Multi-value pipeline description.
///
/// Building is cheap and side-effect free; each `subscribe` starts an
/// independent activation.
pub struct Flux<T: Send + 'static> {
    source: Source<T>,
    hooks: Hooks<T>,
    scheduler: Arc<dyn Scheduler>,
}

impl<T: Send + 'static> Clone for Flux<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            hooks: self.hooks.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Pipeline driven by `producer`.
    ///
    /// The producer may emit regardless of demand; use
    /// [`FluxSink::wait_demand`] to respect it. Blocking on demand from an
    /// [`ImmediateScheduler`] blocks the subscribing thread, so such
    /// producers belong on a worker scheduler.
    pub fn create<F>(producer: F) -> Self
    where
        F: Fn(FluxSink<T>) + Send + Sync + 'static,
    {
        Self {
            source: Source::Create(Arc::new(producer)),
            hooks: Hooks::default(),
            scheduler: Arc::new(ImmediateScheduler),
        }
    }

    /// Demand-driven pipeline over clones of `values`.
    pub fn just(values: Vec<T>) -> Self
    where
        T: Clone + Sync,
    {
        Self::from_iter(values)
    }

    /// Demand-driven pipeline over `iter`; each subscription iterates a
    /// clone.
    #[allow(clippy::should_implement_trait)]
    pub fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        Self {
            source: Source::Pull(Arc::new(move || {
                Box::new(iter.clone().into_iter()) as PullSource<T>
            })),
            hooks: Hooks::default(),
            scheduler: Arc::new(ImmediateScheduler),
        }
    }

    /// Pipeline that fails with `error` without emitting.
    pub fn error(error: Error) -> Self {
        Self::create(move |sink| sink.error(error.replicate()))
    }

    /// Pipeline that completes without emitting.
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

    /// Observe each element. The subscription is passed so the hook can
    /// request more.
    pub fn do_on_next<F>(mut self, f: F) -> Self
    where
        F: Fn(&Subscription, &T) + Send + Sync + 'static,
    {
        self.hooks.on_next.push(Arc::new(f));
        self
    }

    /// Observe successful completion.
    pub fn do_on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.on_complete.push(Arc::new(f));
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

    /// Activate with unbounded demand; elements are observed through hooks.
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_with(HookSubscriber)
    }

    /// Activate, delivering to `subscriber`, whose `on_subscribe` decides
    /// the initial demand.
    pub fn subscribe_with<S>(&self, subscriber: S) -> Subscription
    where
        S: Subscriber<T>,
    {
        let emitter = Emitter::activate(
            self.hooks.clone(),
            Box::new(subscriber),
            self.scheduler.clone(),
        );
        match &self.source {
            Source::Create(producer) => {
                let producer = producer.clone();
                emitter.start(move |emitter| producer(FluxSink::new(emitter)));
            }
            Source::Pull(factory) => emitter.start_pull(factory()),
        }
        emitter.subscription().clone()
    }

    /// Subscribe with unbounded demand and gather every element.
    ///
    /// Fails with the stream's error, or `Cancelled` if cancelled.
    /// Dropping the future cancels the subscription.
    pub async fn collect(&self) -> Result<Vec<T>> {
        let (tx, rx) = oneshot::channel();
        let subscription = self.subscribe_with(CollectSubscriber {
            items: Vec::new(),
            tx: Some(tx),
        });
        let _guard = CancelOnDrop(subscription);
        rx.await.unwrap_or(Err(Error::Cancelled))
    }
}

impl<T: Send + 'static> fmt::Debug for Flux<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match self.source {
            Source::Create(_) => "create",
            Source::Pull(_) => "pull",
        };
        f.debug_struct("Flux")
            .field("source", &source)
            .finish_non_exhaustive()
    }
}

/// Producer-side handle of a [`Flux`] activation.
///
/// `complete` and `error` are terminal and mutually exclusive; the first
/// wins and anything after it is logged and dropped. Dropping the sink
/// without a terminal completes the activation.
pub struct FluxSink<T: Send + 'static> {
    emitter: Arc<Emitter<T>>,
}

impl<T: Send + 'static> FluxSink<T> {
    fn new(emitter: Arc<Emitter<T>>) -> Self {
        Self { emitter }
    }

    /// Emit an element. Returns `false` if it was dropped because the
    /// activation is finished.
    pub fn next(&self, value: T) -> bool {
        self.emitter.next(value)
    }

    /// Complete successfully.
    pub fn complete(&self) {
        self.emitter.terminate(Signal::Complete);
    }

    /// Fail with `error`.
    pub fn error(&self, error: Error) {
        self.emitter.terminate(Signal::Error(error));
    }

    /// Outstanding credits.
    pub fn requested(&self) -> u64 {
        self.emitter.subscription().requested()
    }

    /// Whether the consumer has cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.emitter.subscription().is_cancelled()
    }

    /// Block until there is demand. Returns `false` once cancelled or
    /// terminated.
    pub fn wait_demand(&self) -> bool {
        self.emitter.subscription().wait_demand()
    }

    /// Like [`wait_demand`](Self::wait_demand) with an upper bound.
    pub fn wait_demand_timeout(&self, timeout: Duration) -> bool {
        self.emitter.subscription().wait_demand_timeout(timeout)
    }
}

impl<T: Send + 'static> Drop for FluxSink<T> {
    fn drop(&mut self) {
        if std::thread::panicking() || self.emitter.is_producer_done() {
            return;
        }
        debug!("FluxSink dropped without a terminal, completing");
        self.emitter.terminate(Signal::Complete);
    }
}

struct CollectSubscriber<T> {
    items: Vec<T>,
    tx: Option<oneshot::Sender<Result<Vec<T>>>>,
}

impl<T> CollectSubscriber<T> {
    fn resolve(&mut self, outcome: Result<Vec<T>>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(outcome);
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for CollectSubscriber<T> {
    fn on_next(&mut self, _: &Subscription, value: T) {
        self.items.push(value);
    }

    fn on_complete(&mut self) {
        let items = std::mem::take(&mut self.items);
        self.resolve(Ok(items));
    }

    fn on_error(&mut self, error: Error) {
        self.resolve(Err(error));
    }

    fn on_cancel(&mut self) {
        self.resolve(Err(Error::Cancelled));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rx::scheduler::{ElasticScheduler, SchedulerConfig};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(String) + Clone) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |entry| sink.lock().push(entry))
    }

    #[test]
    fn test_create_order_and_single_finally() {
        let (log, record) = recorder();
        let (r1, r2, r3) = (record.clone(), record.clone(), record);

        Flux::create(|sink| {
            sink.next(1);
            sink.next(2);
            sink.complete();
        })
        .do_on_next(move |_, v| r1(format!("next:{v}")))
        .do_on_complete(move || r2("complete".into()))
        .do_finally(move |sig| r3(format!("finally:{sig}")))
        .subscribe();

        assert_eq!(
            *log.lock(),
            vec!["next:1", "next:2", "complete", "finally:Complete"]
        );
    }

    #[test]
    fn test_terminal_is_exclusive() {
        let (log, record) = recorder();
        let (r1, r2) = (record.clone(), record);

        Flux::create(|sink| {
            sink.next(1u8);
            sink.error(Error::producer("first"));
            sink.complete();
            assert!(!sink.next(2));
        })
        .do_on_error(move |e| r1(e.to_string()))
        .do_on_complete(move || r2("complete".into()))
        .subscribe();

        assert_eq!(*log.lock(), vec!["Producer error: first"]);
    }

    #[test]
    fn test_from_iter_is_demand_driven() {
        struct OneAtATime {
            seen: Arc<Mutex<Vec<u32>>>,
            subscription: Option<Subscription>,
        }
        impl Subscriber<u32> for OneAtATime {
            fn on_subscribe(&mut self, subscription: &Subscription) {
                subscription.request(2).unwrap();
                self.subscription = Some(subscription.clone());
            }
            fn on_next(&mut self, _: &Subscription, value: u32) {
                self.seen.lock().push(value);
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let subscription = Flux::from_iter(vec![10, 20, 30, 40]).subscribe_with(OneAtATime {
            seen: seen.clone(),
            subscription: None,
        });

        assert_eq!(*seen.lock(), vec![10, 20]);
        assert_eq!(subscription.requested(), 0);

        subscription.request(1).unwrap();
        assert_eq!(*seen.lock(), vec![10, 20, 30]);
        assert!(!subscription.is_terminated());

        subscription.request(10).unwrap();
        assert_eq!(*seen.lock(), vec![10, 20, 30, 40]);
        assert!(subscription.is_terminated());
    }

    #[test]
    fn test_do_on_next_can_request_more() {
        struct Trickle;
        impl Subscriber<u32> for Trickle {
            fn on_subscribe(&mut self, subscription: &Subscription) {
                subscription.request(1).unwrap();
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        Flux::just(vec![1, 2, 3, 4, 5])
            .do_on_next(move |sub, _| {
                c.fetch_add(1, Ordering::SeqCst);
                sub.request(1).unwrap();
            })
            .subscribe_with(Trickle);

        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_cancel_from_hook_stops_stream() {
        let (log, record) = recorder();
        let (r1, r2, r3) = (record.clone(), record.clone(), record);

        Flux::from_iter(1..=100)
            .do_on_next(move |sub, v| {
                r1(format!("next:{v}"));
                if *v == 2 {
                    sub.cancel();
                }
            })
            .do_on_cancel(move || r2("cancel".into()))
            .do_finally(move |sig| r3(format!("finally:{sig}")))
            .subscribe();

        assert_eq!(
            *log.lock(),
            vec!["next:1", "next:2", "cancel", "finally:Cancel"]
        );
    }

    #[test]
    fn test_iterator_panic_becomes_error() {
        let (log, record) = recorder();
        let iter = (1..=3).map(|v| if v == 2 { panic!("bad element") } else { v });

        Flux::from_iter(iter)
            .do_on_next(move |_, v| record(format!("next:{v}")))
            .do_on_error({
                let log = log.clone();
                move |e| log.lock().push(format!("error:{e}"))
            })
            .subscribe();

        let log = log.lock();
        assert_eq!(log[0], "next:1");
        assert!(log[1].starts_with("error:") && log[1].contains("bad element"));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_empty_and_error() {
        let (log, record) = recorder();
        let (r1, r2) = (record.clone(), record);

        Flux::<u8>::empty()
            .do_finally(move |sig| r1(format!("empty:{sig}")))
            .subscribe();
        Flux::<u8>::error(Error::Protocol("nope".into()))
            .do_finally(move |sig| r2(format!("error:{sig}")))
            .subscribe();

        assert_eq!(*log.lock(), vec!["empty:Complete", "error:Error"]);
    }

    #[test]
    fn test_sink_observes_subscription() {
        struct CancelAfterSecond;
        impl Subscriber<u32> for CancelAfterSecond {
            fn on_subscribe(&mut self, subscription: &Subscription) {
                subscription.request(2).unwrap();
            }
            fn on_next(&mut self, subscription: &Subscription, value: u32) {
                if value == 1 {
                    subscription.cancel();
                }
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        Flux::create(move |sink| {
            s.lock().push((sink.requested(), sink.is_cancelled()));
            sink.next(0);
            s.lock().push((sink.requested(), sink.is_cancelled()));
            sink.next(1);
            s.lock().push((sink.requested(), sink.is_cancelled()));
        })
        .subscribe_with(CancelAfterSecond);

        assert_eq!(*seen.lock(), vec![(2, false), (1, false), (0, true)]);
    }

    #[test]
    fn test_wait_demand_on_worker() {
        let scheduler = Arc::new(ElasticScheduler::new(SchedulerConfig::default()));
        let (done_tx, done_rx) = std::sync::mpsc::channel();

        struct Manual(Arc<Mutex<Option<Subscription>>>);
        impl Subscriber<u32> for Manual {
            fn on_subscribe(&mut self, subscription: &Subscription) {
                *self.0.lock() = Some(subscription.clone());
            }
        }

        let slot = Arc::new(Mutex::new(None));
        let subscription = Flux::create(|sink| {
            let mut i = 0;
            while i < 3 && sink.wait_demand() {
                sink.next(i);
                i += 1;
            }
            sink.complete();
        })
        .do_on_next(move |_, v| {
            let _ = done_tx.send(*v);
        })
        .subscribe_on(scheduler.clone())
        .subscribe_with(Manual(slot.clone()));

        assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());
        subscription.request(3).unwrap();
        let got: Vec<u32> = (0..3)
            .map(|_| done_rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(got, vec![0, 1, 2]);
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn test_collect() {
        let items = Flux::just(vec!["a", "b", "c"]).collect().await.unwrap();
        assert_eq!(items, vec!["a", "b", "c"]);

        let err = Flux::<u8>::error(Error::ConnectionClosed).collect().await;
        assert!(matches!(err, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_collect_on_elastic() {
        let scheduler = Arc::new(ElasticScheduler::new(SchedulerConfig::default()));
        let items = Flux::from_iter(0..100u32)
            .subscribe_on(scheduler.clone())
            .collect()
            .await
            .unwrap();
        assert_eq!(items, (0..100).collect::<Vec<_>>());
        scheduler.shutdown();
    }
}
