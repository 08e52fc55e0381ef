//! Event listener that turns lifecycle events into log lines.

use tracing::{debug, info, warn};

use super::{EventListener, ForgeEvent, ListenerError};

/// Logs every event through `tracing`.
///
/// Worker progress is logged at debug level; everything else at info, and
/// worker errors at warn.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleListener;

impl ConsoleListener {
    pub fn new() -> Self {
        Self
    }
}

impl EventListener for ConsoleListener {
    fn on_event(&self, event: &ForgeEvent) -> Result<(), ListenerError> {
        match event {
            ForgeEvent::ScanStarted { root, recursive } => {
                info!(root = %root.display(), recursive, "Scanning for courses");
            }
            ForgeEvent::ScanCompleted {
                total,
                pending,
                skipped,
                cleaned,
            } => {
                info!(total, pending, skipped, cleaned, "Scan complete");
            }
            ForgeEvent::PoolStarted {
                total,
                pending,
                concurrency,
            } => {
                info!(total, pending, concurrency, "Worker pool started");
            }
            ForgeEvent::WorkerStarted { worker_id, course } => {
                info!(worker_id, course = %course, "Course started");
            }
            ForgeEvent::CourseProgress {
                worker_id,
                course,
                phase,
            } => {
                debug!(worker_id, course = %course, phase = %phase, "Course progress");
            }
            ForgeEvent::SubtaskFinished {
                worker_id,
                course,
                subtask,
                status,
                produced_files,
                errors,
            } => {
                if errors.is_empty() {
                    info!(worker_id, course = %course, subtask = %subtask, status = %status, produced_files, "Sub-task finished");
                } else {
                    warn!(
                        worker_id,
                        course = %course,
                        subtask = %subtask,
                        status = %status,
                        produced_files,
                        errors = errors.len(),
                        first_error = %errors[0],
                        "Sub-task finished with errors"
                    );
                }
            }
            ForgeEvent::WorkerComplete {
                worker_id,
                course,
                status,
                stats,
            } => {
                info!(
                    worker_id,
                    course = %course,
                    status = %status,
                    completed = stats.completed,
                    failed = stats.failed,
                    remaining = stats.remaining,
                    "Course finished"
                );
            }
            ForgeEvent::WorkerError {
                worker_id,
                course,
                error,
                stats,
            } => {
                warn!(
                    worker_id,
                    course = %course,
                    error = %error,
                    failed = stats.failed,
                    remaining = stats.remaining,
                    "Course failed"
                );
            }
            ForgeEvent::WorkerStopped { worker_id } => {
                debug!(worker_id, "Worker stopped");
            }
            ForgeEvent::PoolFinished { stats } => {
                info!(
                    total = stats.total,
                    completed = stats.completed,
                    failed = stats.failed,
                    skipped = stats.skipped,
                    remaining = stats.remaining,
                    "Worker pool finished"
                );
            }
            ForgeEvent::ShutdownRequested => {
                warn!("Shutdown requested: finishing active courses, press Ctrl+C again to force exit");
            }
            ForgeEvent::ForceExit => {
                warn!("Forced exit requested: abandoning in-flight courses");
            }
        }
        Ok(())
    }
}
