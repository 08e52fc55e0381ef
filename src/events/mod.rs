//! Lifecycle event bus.
//!
//! Producers (scanner, worker pool, pipeline, signal handler) publish
//! [`ForgeEvent`]s; any number of listeners observe them. Delivery is
//! synchronous, on the publisher's own task, in subscription order:
//!
//! ```text
//!  scanner ─┐                       ┌─> ConsoleListener (tracing)
//!  pool    ─┼─> EventBus::publish ──┼─> ErrorLog (jsonl)
//!  signals ─┘                       └─> ...
//! ```
//!
//! A listener that fails or panics is logged and skipped; the remaining
//! listeners still receive the event and the publisher never sees the
//! failure. There is no buffering: late subscribers miss earlier events.

mod console;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::pipeline::{PipelineStatus, SubtaskStatus};
use crate::scheduler::PoolStats;

pub use console::ConsoleListener;

/// Stage of a course pipeline, reported as it is entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum CoursePhase {
    Discovery,
    ArchitectureExtraction { subtask: String },
    Generation { subtask: String },
    ChunkGeneration {
        subtask: String,
        index: usize,
        total: usize,
    },
    Finalizing,
}

impl std::fmt::Display for CoursePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoursePhase::Discovery => write!(f, "discovery"),
            CoursePhase::ArchitectureExtraction { subtask } => {
                write!(f, "architecture extraction ({subtask})")
            }
            CoursePhase::Generation { subtask } => write!(f, "generation ({subtask})"),
            CoursePhase::ChunkGeneration {
                subtask,
                index,
                total,
            } => write!(f, "generation ({subtask}, chunk {}/{})", index + 1, total),
            CoursePhase::Finalizing => write!(f, "finalizing"),
        }
    }
}

/// Every event the orchestrator emits.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ForgeEvent {
    ScanStarted {
        root: PathBuf,
        recursive: bool,
    },
    ScanCompleted {
        total: usize,
        pending: usize,
        skipped: usize,
        cleaned: usize,
    },
    PoolStarted {
        total: usize,
        pending: usize,
        concurrency: usize,
    },
    WorkerStarted {
        worker_id: usize,
        course: String,
    },
    CourseProgress {
        worker_id: usize,
        course: String,
        phase: CoursePhase,
    },
    SubtaskFinished {
        worker_id: usize,
        course: String,
        subtask: String,
        status: SubtaskStatus,
        produced_files: usize,
        errors: Vec<String>,
    },
    WorkerComplete {
        worker_id: usize,
        course: String,
        status: PipelineStatus,
        stats: PoolStats,
    },
    WorkerError {
        worker_id: usize,
        course: String,
        error: String,
        stats: PoolStats,
    },
    WorkerStopped {
        worker_id: usize,
    },
    PoolFinished {
        stats: PoolStats,
    },
    ShutdownRequested,
    ForceExit,
}

impl ForgeEvent {
    /// Short, stable name of the event variant.
    pub fn name(&self) -> &'static str {
        match self {
            ForgeEvent::ScanStarted { .. } => "scan:started",
            ForgeEvent::ScanCompleted { .. } => "scan:completed",
            ForgeEvent::PoolStarted { .. } => "pool:started",
            ForgeEvent::WorkerStarted { .. } => "worker:started",
            ForgeEvent::CourseProgress { .. } => "worker:progress",
            ForgeEvent::SubtaskFinished { .. } => "worker:subtask",
            ForgeEvent::WorkerComplete { .. } => "worker:complete",
            ForgeEvent::WorkerError { .. } => "worker:error",
            ForgeEvent::WorkerStopped { .. } => "worker:stopped",
            ForgeEvent::PoolFinished { .. } => "pool:finished",
            ForgeEvent::ShutdownRequested => "shutdown:requested",
            ForgeEvent::ForceExit => "shutdown:force",
        }
    }
}

/// Error returned by a listener that could not handle an event.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("{0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Observer of [`ForgeEvent`]s.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &ForgeEvent) -> Result<(), ListenerError>;
}

impl<F> EventListener for F
where
    F: Fn(&ForgeEvent) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_event(&self, event: &ForgeEvent) -> Result<(), ListenerError> {
        self(event)
    }
}

type ListenerEntry = (u64, Arc<dyn EventListener>);

/// Synchronous publish/subscribe hub.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<ListenerEntry>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Creates an empty bus behind an `Arc`, ready to be shared.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a listener. It receives every event published from now on
    /// until the returned [`Subscription`] is unsubscribed.
    pub fn subscribe(self: &Arc<Self>, listener: Arc<dyn EventListener>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, listener));

        Subscription {
            id,
            bus: Arc::downgrade(self),
        }
    }

    /// Delivers `event` to every current listener, in subscription order.
    pub fn publish(&self, event: ForgeEvent) {
        // Snapshot so listeners may (un)subscribe while being notified.
        let snapshot: Vec<ListenerEntry> = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for (id, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(listener_id = id, event = event.name(), error = %e, "Event listener failed");
                }
                Err(_) => {
                    error!(listener_id = id, event = event.name(), "Event listener panicked");
                }
            }
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn remove(&self, id: u64) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|(entry_id, _)| *entry_id != id);
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<EventBus>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, Arc<dyn EventListener>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener = Arc::new(move |event: &ForgeEvent| -> Result<(), ListenerError> {
            sink.lock().unwrap().push(event.name());
            Ok(())
        });
        (seen, listener)
    }

    #[test]
    fn test_publish_reaches_all_listeners_in_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            bus.subscribe(Arc::new(move |_: &ForgeEvent| -> Result<(), ListenerError> {
                order.lock().unwrap().push(tag);
                Ok(())
            }));
        }

        bus.publish(ForgeEvent::ShutdownRequested);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_failing_listener_does_not_block_delivery() {
        let bus = EventBus::new();
        bus.subscribe(Arc::new(|_: &ForgeEvent| -> Result<(), ListenerError> {
            Err(ListenerError::Failed("listener broke".to_string()))
        }));
        let (seen, listener) = recorder();
        bus.subscribe(listener);

        bus.publish(ForgeEvent::ForceExit);
        assert_eq!(*seen.lock().unwrap(), vec!["shutdown:force"]);
    }

    #[test]
    fn test_panicking_listener_does_not_block_delivery() {
        let bus = EventBus::new();
        bus.subscribe(Arc::new(|_: &ForgeEvent| -> Result<(), ListenerError> {
            panic!("listener exploded")
        }));
        let (seen, listener) = recorder();
        bus.subscribe(listener);

        bus.publish(ForgeEvent::ShutdownRequested);
        bus.publish(ForgeEvent::ForceExit);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["shutdown:requested", "shutdown:force"]
        );
    }

    #[test]
    fn test_late_subscriber_sees_no_replay() {
        let bus = EventBus::new();
        bus.publish(ForgeEvent::ShutdownRequested);

        let (seen, listener) = recorder();
        bus.subscribe(listener);
        assert!(seen.lock().unwrap().is_empty());

        bus.publish(ForgeEvent::ForceExit);
        assert_eq!(*seen.lock().unwrap(), vec!["shutdown:force"]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (seen, listener) = recorder();
        let subscription = bus.subscribe(listener);
        assert_eq!(bus.listener_count(), 1);

        subscription.unsubscribe();
        assert_eq!(bus.listener_count(), 0);

        bus.publish(ForgeEvent::ShutdownRequested);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_course_phase_display() {
        let phase = CoursePhase::ChunkGeneration {
            subtask: "module-1".to_string(),
            index: 0,
            total: 3,
        };
        assert_eq!(phase.to_string(), "generation (module-1, chunk 1/3)");
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ForgeEvent::WorkerStarted {
            worker_id: 2,
            course: "rust-101".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "worker_started");
        assert_eq!(json["worker_id"], 2);
    }
}
