//! Run reporting: the append-only error log and the final summary.

use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::runtime::RuntimeFlavor;
use uuid::Uuid;

use crate::course::Course;
use crate::events::{EventListener, ForgeEvent, ListenerError};
use crate::pipeline::{PipelineResult, PipelineStatus, SubtaskStatus};
use crate::scheduler::PoolStats;

/// One line of the error log.
#[derive(Debug, Serialize)]
struct ErrorRecord<'a> {
    run_id: Uuid,
    timestamp: DateTime<Utc>,
    /// `course` for a failed course, `subtask` for a failed or partial
    /// sub-task.
    scope: &'static str,
    worker_id: usize,
    course: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subtask: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<SubtaskStatus>,
    errors: Vec<&'a str>,
}

/// Event listener appending failures to a JSONL file.
///
/// The file is opened on the first failure, so clean runs leave nothing
/// behind. Records from earlier runs are never rewritten; the run id tells
/// them apart.
pub struct ErrorLog {
    path: PathBuf,
    run_id: Uuid,
    file: Mutex<Option<File>>,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>, run_id: Uuid) -> Self {
        Self {
            path: path.into(),
            run_id,
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Listeners run synchronously on the publishing task, so on a
    /// multi-threaded runtime the write is moved off the async worker.
    fn append(&self, record: &ErrorRecord<'_>) -> Result<(), ListenerError> {
        let line = serde_json::to_string(record)?;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.write_line(&line))
            }
            _ => self.write_line(&line),
        }
    }

    fn write_line(&self, line: &str) -> Result<(), ListenerError> {
        let mut guard = self
            .file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if guard.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            *guard = Some(file);
        }

        if let Some(file) = guard.as_mut() {
            writeln!(file, "{line}")?;
            file.flush()?;
        }
        Ok(())
    }
}

impl EventListener for ErrorLog {
    fn on_event(&self, event: &ForgeEvent) -> Result<(), ListenerError> {
        match event {
            ForgeEvent::WorkerError {
                worker_id,
                course,
                error,
                ..
            } => self.append(&ErrorRecord {
                run_id: self.run_id,
                timestamp: Utc::now(),
                scope: "course",
                worker_id: *worker_id,
                course: course.as_str(),
                subtask: None,
                status: None,
                errors: vec![error.as_str()],
            }),
            ForgeEvent::SubtaskFinished {
                worker_id,
                course,
                subtask,
                status,
                errors,
                ..
            } if *status == SubtaskStatus::Failed || !errors.is_empty() => {
                self.append(&ErrorRecord {
                    run_id: self.run_id,
                    timestamp: Utc::now(),
                    scope: "subtask",
                    worker_id: *worker_id,
                    course: course.as_str(),
                    subtask: Some(subtask.as_str()),
                    status: Some(*status),
                    errors: errors.iter().map(String::as_str).collect(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Per-course line of the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct CourseSummary {
    pub course: String,
    pub path: PathBuf,
    pub status: PipelineStatus,
    pub artifacts: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl From<&PipelineResult> for CourseSummary {
    fn from(result: &PipelineResult) -> Self {
        Self {
            course: result.course.clone(),
            path: result.path.clone(),
            status: result.status,
            artifacts: result.artifacts.len(),
            errors: result.errors.clone(),
            duration_ms: result.duration.as_millis() as u64,
        }
    }
}

/// Final report of one `run`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub input: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stats: PoolStats,
    /// True when a shutdown left courses unprocessed.
    pub interrupted: bool,
    pub courses: Vec<CourseSummary>,
    /// Names of courses skipped as already complete.
    pub skipped: Vec<String>,
}

impl RunSummary {
    pub fn new(
        run_id: Uuid,
        input: impl Into<PathBuf>,
        started_at: DateTime<Utc>,
        stats: PoolStats,
        results: &[PipelineResult],
        scanned: &[Course],
    ) -> Self {
        Self {
            run_id,
            input: input.into(),
            started_at,
            finished_at: Utc::now(),
            stats,
            interrupted: stats.remaining > 0,
            courses: results.iter().map(CourseSummary::from).collect(),
            skipped: scanned
                .iter()
                .filter(|c| !c.is_pending())
                .map(|c| c.name.clone())
                .collect(),
        }
    }

    /// Human-readable rendering for the terminal.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let elapsed = (self.finished_at - self.started_at).num_seconds();

        let _ = writeln!(out, "Run {} finished in {}s", self.run_id, elapsed);
        let _ = writeln!(
            out,
            "  total: {}  completed: {}  failed: {}  skipped: {}  remaining: {}",
            self.stats.total,
            self.stats.completed,
            self.stats.failed,
            self.stats.skipped,
            self.stats.remaining
        );

        if !self.courses.is_empty() {
            out.push('\n');
            for course in &self.courses {
                let _ = writeln!(
                    out,
                    "  [{:<8}] {} ({} files, {:.1}s)",
                    course.status.to_string(),
                    course.course,
                    course.artifacts,
                    course.duration_ms as f64 / 1000.0
                );
                for error in &course.errors {
                    let _ = writeln!(out, "             - {error}");
                }
            }
        }

        if self.interrupted {
            let _ = writeln!(
                out,
                "\nInterrupted: {} course(s) not started; run again to resume.",
                self.stats.remaining
            );
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::CourseState;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_error_log_records_failures_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("logs/errors.jsonl");
        let run_id = Uuid::new_v4();
        let log = ErrorLog::new(&path, run_id);

        log.on_event(&ForgeEvent::ShutdownRequested).unwrap();
        log.on_event(&ForgeEvent::SubtaskFinished {
            worker_id: 0,
            course: "rust-101".to_string(),
            subtask: "m1".to_string(),
            status: SubtaskStatus::Success,
            produced_files: 2,
            errors: vec![],
        })
        .unwrap();
        assert!(!path.exists());

        log.on_event(&ForgeEvent::SubtaskFinished {
            worker_id: 1,
            course: "rust-101".to_string(),
            subtask: "m2".to_string(),
            status: SubtaskStatus::Failed,
            produced_files: 0,
            errors: vec!["agent timed out".to_string()],
        })
        .unwrap();
        log.on_event(&ForgeEvent::WorkerError {
            worker_id: 1,
            course: "go-201".to_string(),
            error: "Discovery failed: quota".to_string(),
            stats: PoolStats::default(),
        })
        .unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["scope"], "subtask");
        assert_eq!(lines[0]["subtask"], "m2");
        assert_eq!(lines[0]["status"], "failed");
        assert_eq!(lines[0]["run_id"], run_id.to_string());
        assert_eq!(lines[1]["scope"], "course");
        assert_eq!(lines[1]["errors"][0], "Discovery failed: quota");
        assert!(lines[1].get("subtask").is_none());
    }

    #[test]
    fn test_error_log_appends_across_runs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("errors.jsonl");
        let event = ForgeEvent::WorkerError {
            worker_id: 0,
            course: "c".to_string(),
            error: "boom".to_string(),
            stats: PoolStats::default(),
        };

        ErrorLog::new(&path, Uuid::new_v4()).on_event(&event).unwrap();
        ErrorLog::new(&path, Uuid::new_v4()).on_event(&event).unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_ne!(lines[0]["run_id"], lines[1]["run_id"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_error_log_inside_multi_thread_runtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("errors.jsonl");
        let log = Arc::new(ErrorLog::new(&path, Uuid::new_v4()));

        let handles: Vec<_> = (0..4)
            .map(|worker_id| {
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    log.on_event(&ForgeEvent::WorkerError {
                        worker_id,
                        course: format!("c{worker_id}"),
                        error: "boom".to_string(),
                        stats: PoolStats::default(),
                    })
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|l| l["scope"] == "course"));
    }

    #[tokio::test]
    async fn test_error_log_inside_current_thread_runtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("errors.jsonl");
        ErrorLog::new(&path, Uuid::new_v4())
            .on_event(&ForgeEvent::WorkerError {
                worker_id: 0,
                course: "c".to_string(),
                error: "boom".to_string(),
                stats: PoolStats::default(),
            })
            .unwrap();
        assert_eq!(read_lines(&path).len(), 1);
    }

    #[test]
    fn test_run_summary() {
        let results = vec![
            PipelineResult {
                course: "a".to_string(),
                path: PathBuf::from("/c/a"),
                status: PipelineStatus::Complete,
                artifacts: vec!["output/x.md".to_string()],
                errors: vec![],
                subtasks: vec![],
                duration: Duration::from_millis(1500),
            },
            PipelineResult::failed("b", "/c/b", "quota", Duration::from_millis(10)),
        ];
        let scanned = vec![
            Course::new("/c/a", vec![], false, CourseState::Pending),
            Course::new("/c/b", vec![], false, CourseState::Pending),
            Course::new("/c/done", vec![], false, CourseState::Skipped),
            Course::new("/c/later", vec![], false, CourseState::Pending),
        ];
        let stats = PoolStats {
            total: 4,
            completed: 1,
            failed: 1,
            skipped: 1,
            remaining: 1,
        };

        let summary = RunSummary::new(Uuid::new_v4(), "/c", Utc::now(), stats, &results, &scanned);
        assert!(summary.interrupted);
        assert_eq!(summary.skipped, vec!["done"]);
        assert_eq!(summary.courses[0].artifacts, 1);
        assert_eq!(summary.courses[0].duration_ms, 1500);

        let text = summary.render_text();
        assert!(text.contains("completed: 1"));
        assert!(text.contains("[complete] a (1 files, 1.5s)"));
        assert!(text.contains("- quota"));
        assert!(text.contains("Interrupted: 1 course(s)"));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["stats"]["remaining"], 1);
        assert_eq!(json["courses"][1]["status"], "failed");
    }
}
