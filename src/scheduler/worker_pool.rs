//! Bounded worker pool over a shared FIFO of courses.
//!
//! `run` spawns exactly `concurrency` workers. Each worker loops:
//!
//! 1. stop if a shutdown was requested
//! 2. pop the next course, stop if the queue is empty
//! 3. run the course pipeline to the end
//! 4. record the result and publish `worker:complete` or `worker:error`
//!
//! A course a worker has popped is always finished: shutdown only stops
//! further pops. Pipeline errors and panics become failed results; one bad
//! course never takes the pool down.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::course::Course;
use crate::events::{EventBus, ForgeEvent};
use crate::pipeline::{CourseRunner, PipelineResult};
use crate::shutdown::ShutdownController;

/// Configuration for the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of workers; values below 1 are treated as 1.
    pub concurrency: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { concurrency: 3 }
    }
}

impl WorkerPoolConfig {
    pub fn new(concurrency: usize) -> Self {
        Self { concurrency }
    }

    /// Effective number of workers.
    pub fn workers(&self) -> usize {
        self.concurrency.max(1)
    }
}

/// Course counts for one pool run.
///
/// `completed + failed + skipped + remaining == total` at every update;
/// `remaining` is only non-zero at the end when a shutdown left courses in
/// the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    /// Courses that ended `complete` or `no_work`.
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Pending courses not finished yet.
    pub remaining: usize,
}

impl PoolStats {
    /// Courses the pool ran, successfully or not.
    pub fn processed(&self) -> usize {
        self.completed + self.failed
    }

    pub fn is_balanced(&self) -> bool {
        self.completed + self.failed + self.skipped + self.remaining == self.total
    }

    fn record(&mut self, result: &PipelineResult) {
        if result.is_success() {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        self.remaining = self.remaining.saturating_sub(1);
    }
}

/// Worker pool running course pipelines.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    runner: Arc<dyn CourseRunner>,
    shutdown: Arc<ShutdownController>,
    bus: Option<Arc<EventBus>>,
    stats: Arc<Mutex<PoolStats>>,
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        runner: Arc<dyn CourseRunner>,
        shutdown: Arc<ShutdownController>,
    ) -> Self {
        Self {
            config,
            runner,
            shutdown,
            bus: None,
            stats: Arc::new(Mutex::new(PoolStats::default())),
        }
    }

    /// Publishes pool and worker events on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Snapshot of the current statistics.
    pub fn stats(&self) -> PoolStats {
        *lock(&self.stats)
    }

    /// Runs every pending course and returns their results in completion
    /// order. Skipped courses only count toward the stats.
    pub async fn run(&self, courses: Vec<Course>) -> Vec<PipelineResult> {
        let total = courses.len();
        let (pending, skipped): (Vec<Course>, Vec<Course>) =
            courses.into_iter().partition(Course::is_pending);

        *lock(&self.stats) = PoolStats {
            total,
            skipped: skipped.len(),
            remaining: pending.len(),
            ..PoolStats::default()
        };

        let workers = self.config.workers();
        info!(
            total,
            pending = pending.len(),
            skipped = skipped.len(),
            concurrency = workers,
            "Starting worker pool"
        );
        publish(
            &self.bus,
            ForgeEvent::PoolStarted {
                total,
                pending: pending.len(),
                concurrency: workers,
            },
        );

        let queue = Arc::new(Mutex::new(VecDeque::from(pending)));
        let results = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: Arc::clone(&queue),
                    runner: Arc::clone(&self.runner),
                    shutdown: Arc::clone(&self.shutdown),
                    bus: self.bus.clone(),
                    stats: Arc::clone(&self.stats),
                    results: Arc::clone(&results),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        for (id, joined) in join_all(handles).await.into_iter().enumerate() {
            if let Err(e) = joined {
                error!(worker_id = id, error = %e, "Worker task aborted");
            }
        }

        let stats = self.stats();
        if stats.remaining > 0 {
            warn!(remaining = stats.remaining, "Stopped with courses still queued");
        }
        publish(&self.bus, ForgeEvent::PoolFinished { stats });

        let mut results = lock(&results);
        std::mem::take(&mut *results)
    }
}

/// One worker loop; owns shared handles only.
struct Worker {
    id: usize,
    queue: Arc<Mutex<VecDeque<Course>>>,
    runner: Arc<dyn CourseRunner>,
    shutdown: Arc<ShutdownController>,
    bus: Option<Arc<EventBus>>,
    stats: Arc<Mutex<PoolStats>>,
    results: Arc<Mutex<Vec<PipelineResult>>>,
}

impl Worker {
    async fn run(self) {
        debug!(worker_id = self.id, "Worker started");

        loop {
            if self.shutdown.is_shutting_down() {
                info!(worker_id = self.id, "Shutdown requested, worker stopping");
                break;
            }

            // The guard is dropped before the pipeline runs.
            let next = lock(&self.queue).pop_front();
            let Some(course) = next else {
                break;
            };

            self.process(course).await;
        }

        publish(&self.bus, ForgeEvent::WorkerStopped { worker_id: self.id });
    }

    async fn process(&self, course: Course) {
        publish(
            &self.bus,
            ForgeEvent::WorkerStarted {
                worker_id: self.id,
                course: course.name.clone(),
            },
        );

        let start = Instant::now();
        let outcome = AssertUnwindSafe(self.runner.run(self.id, &course))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(worker_id = self.id, course = %course.name, error = %e, "Course pipeline failed");
                PipelineResult::failed(&course.name, &course.path, e.to_string(), start.elapsed())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(worker_id = self.id, course = %course.name, panic = %message, "Course pipeline panicked");
                PipelineResult::failed(
                    &course.name,
                    &course.path,
                    format!("pipeline panicked: {message}"),
                    start.elapsed(),
                )
            }
        };

        let stats = {
            let mut stats = lock(&self.stats);
            stats.record(&result);
            *stats
        };

        let event = if result.is_success() {
            ForgeEvent::WorkerComplete {
                worker_id: self.id,
                course: course.name.clone(),
                status: result.status,
                stats,
            }
        } else {
            ForgeEvent::WorkerError {
                worker_id: self.id,
                course: course.name.clone(),
                error: if result.errors.is_empty() {
                    "all sub-tasks failed".to_string()
                } else {
                    result.errors.join("; ")
                },
                stats,
            }
        };
        publish(&self.bus, event);

        lock(&self.results).push(result);
    }
}

fn publish(bus: &Option<Arc<EventBus>>, event: ForgeEvent) {
    if let Some(bus) = bus {
        bus.publish(event);
    }
}

// A panicking course must not poison the pool's shared state for the others.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
