//! Scheduler core for the Drover task queue.
//!
//! This crate wires the storage adapters from `drover-types` into a running
//! queue: a handler registry, two queueing strategies (a process-local priority
//! queue and a database-driven shared queue), the execution runner with retry
//! handling, a fixed worker pool and the scheduler that ties them together.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod handler;
pub mod health;
pub mod memory_store;
pub mod opts;
pub mod pool;
pub mod prelude;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod scheduler;

pub use handler::{TaskContext, TaskHandler};
pub use health::TaskHealth;
pub use memory_store::MemoryTaskStore;
pub use opts::{SchedulerOpts, local_mode_tag};
pub use queue::{LocalQueue, SharedQueue, TaskQueue};
pub use registry::{HandlerFactory, HandlerResolver, PluginHandlers, TaskRegistry};
pub use scheduler::{Scheduler, SchedulerBuilder, TaskSchedulerBuilder};

// vim: ts=4
