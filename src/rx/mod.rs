//! Reactive core - demand-driven single and multi-value pipelines.
//!
//! This module provides:
//! - [`Mono`] / [`Flux`] pipeline builders with side-effect hooks
//! - [`Subscription`] for demand (`request(n)`) and cancellation
//! - [`Scheduler`] implementations that run producers
//!
//! Every `subscribe` starts an independent activation. Signals are delivered
//! in emission order, with at most one terminal per activation.

mod emitter;
mod flux;
mod mono;
mod scheduler;
mod signal;
mod subscriber;
mod subscription;

pub use flux::{Flux, FluxSink};
pub use mono::{Mono, MonoSink};
pub use scheduler::{
    ElasticScheduler, ImmediateScheduler, Scheduler, SchedulerConfig, SchedulerStats, Task,
    TokioScheduler, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_WORKERS,
};
pub use signal::{Signal, SignalType};
pub use subscriber::{HookSubscriber, Subscriber};
pub use subscription::{Subscription, UNBOUNDED};
