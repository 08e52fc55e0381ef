//! Concurrent execution of course pipelines.
//!
//! ```text
//!            ┌──────────────────────────┐
//!            │ Mutex<VecDeque<Course>>  │  pending courses, FIFO
//!            └────────────┬─────────────┘
//!                         │ pop_front
//!         ┌───────────────┼───────────────┐
//!         ▼               ▼               ▼
//!    ┌─────────┐     ┌─────────┐     ┌─────────┐
//!    │ Worker 0│     │ Worker 1│     │ Worker N│   CourseRunner::run
//!    └────┬────┘     └────┬────┘     └────┬────┘
//!         └───────────────┼───────────────┘
//!                         ▼
//!              Mutex<PoolStats> + EventBus
//! ```
//!
//! Workers check the [`ShutdownController`](crate::shutdown::ShutdownController)
//! before every pop, so a graceful stop lets claimed courses finish and
//! leaves the rest queued.

pub mod worker_pool;

pub use worker_pool::{PoolStats, WorkerPool, WorkerPoolConfig};
