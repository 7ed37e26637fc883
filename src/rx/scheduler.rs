//! Execution contexts for producers.
//!
//! - [`ImmediateScheduler`] - runs the task on the calling thread
//! - [`ElasticScheduler`] - grows a pool of OS threads on demand and retires
//!   idle ones
//! - [`TokioScheduler`] - hands tasks to a tokio runtime's blocking pool
//!
//! Schedulers are values; callers construct one and pass it to
//! `subscribe_on`.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace};

use crate::error::{Error, Result};

/// Unit of work accepted by a [`Scheduler`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// An execution context.
pub trait Scheduler: Send + Sync {
    /// Arrange for `task` to run. Never waits for it to finish.
    ///
    /// # Errors
    ///
    /// `SchedulerShutdown` if the scheduler no longer accepts work.
    fn submit(&self, task: Task) -> Result<()>;
}

/// Runs every task inline on the submitting thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    fn submit(&self, task: Task) -> Result<()> {
        task();
        Ok(())
    }
}

/// Default maximum worker threads.
pub const DEFAULT_MAX_WORKERS: usize = 256;

/// Default idle time before a worker exits.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for an [`ElasticScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
    /// Upper bound on live workers.
    pub max_workers: usize,
    /// How long an idle worker waits for work before exiting.
    pub idle_timeout: Duration,
    /// Worker stack size; the platform default when `None`.
    pub stack_size: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "rx-elastic".to_string(),
            max_workers: DEFAULT_MAX_WORKERS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            stack_size: None,
        }
    }
}

impl SchedulerConfig {
    /// Set the thread name prefix.
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the worker ceiling (at least 1).
    pub fn max_workers(mut self, max: usize) -> Self {
        self.max_workers = max.max(1);
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the worker stack size in bytes.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

/// Snapshot of an [`ElasticScheduler`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Live worker threads.
    pub workers: usize,
    /// Workers waiting for a task.
    pub idle: usize,
    /// Tasks queued but not started.
    pub pending: usize,
}

/// Worker pool that spawns threads as load requires.
///
/// A task is queued and an idle worker woken; when none is idle and the
/// ceiling has not been reached, a new worker is spawned with the task as
/// its first job. Cloning shares the pool.
#[derive(Clone)]
pub struct ElasticScheduler {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    work_available: Condvar,
    config: SchedulerConfig,
}

#[derive(Default)]
struct State {
    tasks: VecDeque<Task>,
    workers: usize,
    idle: usize,
    next_id: usize,
    shutdown: bool,
}

impl ElasticScheduler {
    /// Create a pool; no threads are started until work arrives.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                work_available: Condvar::new(),
                config,
            }),
        }
    }

    /// Stop accepting tasks. Queued tasks still run; workers then exit.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        debug!(pending = state.tasks.len(), "Elastic scheduler shutting down");
        drop(state);
        self.shared.work_available.notify_all();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    /// Current worker and queue counts.
    pub fn stats(&self) -> SchedulerStats {
        let state = self.shared.state.lock();
        SchedulerStats {
            workers: state.workers,
            idle: state.idle,
            pending: state.tasks.len(),
        }
    }

    fn spawn_worker(&self, id: usize, first: Task) -> Result<()> {
        let shared = self.shared.clone();
        let config = &self.shared.config;
        let mut builder =
            thread::Builder::new().name(format!("{}-{}", config.thread_name_prefix, id));
        if let Some(bytes) = config.stack_size {
            builder = builder.stack_size(bytes);
        }
        builder
            .spawn(move || {
                run_task(first);
                worker_loop(shared);
            })
            .map(|_| ())
            .map_err(Error::Io)
    }
}

impl Default for ElasticScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Scheduler for ElasticScheduler {
    fn submit(&self, task: Task) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(Error::SchedulerShutdown);
        }

        // Idle workers already waiting will pick it up.
        if state.idle > state.tasks.len() || state.workers >= self.shared.config.max_workers {
            state.tasks.push_back(task);
            drop(state);
            self.shared.work_available.notify_one();
            return Ok(());
        }

        state.workers += 1;
        let id = state.next_id;
        state.next_id += 1;
        drop(state);

        // The task never enters the shared queue, so a failed spawn drops
        // only this caller's task.
        if let Err(e) = self.spawn_worker(id, task) {
            self.shared.state.lock().workers -= 1;
            error!(error = %e, "Failed to spawn scheduler worker");
            return Err(e);
        }
        trace!(worker = id, "Spawned scheduler worker");
        Ok(())
    }
}

impl fmt::Debug for ElasticScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElasticScheduler")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}

fn worker_loop(shared: Arc<Shared>) {
    let mut state = shared.state.lock();
    loop {
        if let Some(task) = state.tasks.pop_front() {
            drop(state);
            run_task(task);
            state = shared.state.lock();
            continue;
        }

        if state.shutdown {
            break;
        }

        state.idle += 1;
        let timed_out = shared
            .work_available
            .wait_for(&mut state, shared.config.idle_timeout)
            .timed_out();
        state.idle -= 1;

        if timed_out && state.tasks.is_empty() {
            trace!("Scheduler worker idle, exiting");
            break;
        }
    }
    state.workers -= 1;
}

fn run_task(task: Task) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
        error!(panic = %panic_message(&*payload), "Scheduled task panicked");
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "<non-string panic>".to_string()
    }
}

/// Runs tasks on a tokio runtime's blocking pool.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioScheduler {
    /// Use the given runtime.
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime of the calling context.
    ///
    /// # Errors
    ///
    /// `NoRuntime` when called outside a tokio runtime.
    pub fn current() -> Result<Self> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|_| Error::NoRuntime)
    }
}

impl Scheduler for TokioScheduler {
    fn submit(&self, task: Task) -> Result<()> {
        // spawn_blocking already isolates panics in the returned JoinHandle.
        drop(self.handle.spawn_blocking(task));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Instant;

    fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        check()
    }

    #[test]
    fn test_immediate_runs_inline() {
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        ImmediateScheduler
            .submit(Box::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_config_builder() {
        let config = SchedulerConfig::default()
            .thread_name_prefix("io")
            .max_workers(0)
            .idle_timeout(Duration::from_millis(5));
        assert_eq!(config.thread_name_prefix, "io");
        assert_eq!(config.max_workers, 1);
        assert_eq!(config.idle_timeout, Duration::from_millis(5));
    }

    #[test]
    fn test_elastic_runs_task_on_named_thread() {
        let scheduler = ElasticScheduler::new(SchedulerConfig::default().thread_name_prefix("t"));
        let (tx, rx) = mpsc::channel();
        scheduler
            .submit(Box::new(move || {
                let name = thread::current().name().map(str::to_string);
                let _ = tx.send(name);
            }))
            .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("t-0"));
    }

    #[test]
    fn test_elastic_liveness_beyond_ceiling() {
        let max = 4;
        let scheduler = ElasticScheduler::new(SchedulerConfig::default().max_workers(max));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..max * 2 {
            let done = done.clone();
            scheduler
                .submit(Box::new(move || {
                    thread::sleep(Duration::from_millis(10));
                    done.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        assert!(scheduler.stats().workers <= max);
        assert!(wait_until(Duration::from_secs(5), || done.load(Ordering::SeqCst)
            == max * 2));
    }

    #[test]
    fn test_elastic_survives_panicking_task() {
        let scheduler = ElasticScheduler::new(SchedulerConfig::default().max_workers(1));
        scheduler.submit(Box::new(|| panic!("boom"))).unwrap();

        let (tx, rx) = mpsc::channel();
        scheduler
            .submit(Box::new(move || {
                let _ = tx.send(());
            }))
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_elastic_idle_workers_retire() {
        let scheduler = ElasticScheduler::new(
            SchedulerConfig::default().idle_timeout(Duration::from_millis(20)),
        );
        scheduler.submit(Box::new(|| {})).unwrap();

        assert!(wait_until(Duration::from_secs(5), || scheduler.stats().workers == 0));
    }

    #[test]
    fn test_elastic_reuses_idle_worker() {
        let scheduler = ElasticScheduler::default();
        let (tx, rx) = mpsc::channel();

        let first = tx.clone();
        scheduler
            .submit(Box::new(move || {
                let _ = first.send(());
            }))
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(wait_until(Duration::from_secs(5), || scheduler.stats().idle == 1));

        scheduler
            .submit(Box::new(move || {
                let _ = tx.send(());
            }))
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(scheduler.stats().workers, 1);
    }

    struct DropFlag(Arc<AtomicUsize>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_failed_spawn_keeps_other_tasks() {
        // Larger than any address space, so thread creation fails.
        let scheduler = ElasticScheduler::new(SchedulerConfig::default().stack_size(1 << 50));

        let queued_dropped = Arc::new(AtomicUsize::new(0));
        let flag = DropFlag(queued_dropped.clone());
        scheduler
            .shared
            .state
            .lock()
            .tasks
            .push_back(Box::new(move || drop(flag)));

        let own_dropped = Arc::new(AtomicUsize::new(0));
        let own = DropFlag(own_dropped.clone());
        let result = scheduler.submit(Box::new(move || drop(own)));

        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(own_dropped.load(Ordering::SeqCst), 1);
        assert_eq!(queued_dropped.load(Ordering::SeqCst), 0);
        assert_eq!(
            scheduler.stats(),
            SchedulerStats {
                workers: 0,
                idle: 0,
                pending: 1
            }
        );
    }

    #[test]
    fn test_elastic_shutdown_rejects_and_drains() {
        let scheduler = ElasticScheduler::new(SchedulerConfig::default().max_workers(1));
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = done.clone();
            scheduler
                .submit(Box::new(move || {
                    thread::sleep(Duration::from_millis(5));
                    done.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        scheduler.shutdown();
        assert!(scheduler.is_shutdown());
        assert!(matches!(
            scheduler.submit(Box::new(|| {})),
            Err(Error::SchedulerShutdown)
        ));
        assert!(wait_until(Duration::from_secs(5), || done.load(Ordering::SeqCst) == 3));
        assert!(wait_until(Duration::from_secs(5), || scheduler.stats().workers == 0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tokio_scheduler() {
        let scheduler = TokioScheduler::current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        scheduler
            .submit(Box::new(move || {
                let _ = tx.send(42);
            }))
            .unwrap();
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[test]
    fn test_tokio_scheduler_outside_runtime() {
        assert!(matches!(TokioScheduler::current(), Err(Error::NoRuntime)));
    }
}
