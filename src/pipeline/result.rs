//! Outcome types for a course pipeline run.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Final status of one course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// At least one sub-task produced material.
    Complete,
    /// Discovery found nothing worth generating.
    NoWork,
    /// Every attempted sub-task failed, or the pipeline itself errored.
    Failed,
}

impl PipelineStatus {
    /// True for statuses counted as `completed` in pool stats.
    pub fn is_success(&self) -> bool {
        !matches!(self, PipelineStatus::Failed)
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStatus::Complete => write!(f, "complete"),
            PipelineStatus::NoWork => write!(f, "no_work"),
            PipelineStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Status of one discovered sub-task, persisted in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    #[default]
    NotStarted,
    Success,
    Partial,
    Failed,
}

impl SubtaskStatus {
    /// Parses a status string from agent output, case-insensitively.
    /// Unknown values map to `NotStarted`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "success" | "succeeded" | "done" | "complete" | "completed" => SubtaskStatus::Success,
            "partial" => SubtaskStatus::Partial,
            "failed" | "failure" | "error" => SubtaskStatus::Failed,
            _ => SubtaskStatus::NotStarted,
        }
    }

    /// Finished sub-tasks are not regenerated on resume. A partial result
    /// stays partial.
    pub fn is_finished(&self) -> bool {
        matches!(self, SubtaskStatus::Success | SubtaskStatus::Partial)
    }

    /// Status from what a generation attempt produced.
    pub fn from_attempt(produced_files: usize, errors: usize) -> Self {
        match (produced_files > 0, errors > 0) {
            (true, false) => SubtaskStatus::Success,
            (true, true) => SubtaskStatus::Partial,
            (false, _) => SubtaskStatus::Failed,
        }
    }
}

impl std::fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubtaskStatus::NotStarted => write!(f, "not_started"),
            SubtaskStatus::Success => write!(f, "success"),
            SubtaskStatus::Partial => write!(f, "partial"),
            SubtaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What one sub-task attempt produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubtaskReport {
    pub id: String,
    pub status: SubtaskStatus,
    /// Number of chunks used; 1 for single-call generation.
    pub chunks: usize,
    /// Files written, relative to the course directory.
    pub produced_files: Vec<String>,
    pub errors: Vec<String>,
}

/// Outcome of one course.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    /// Course display name.
    pub course: String,
    pub path: PathBuf,
    pub status: PipelineStatus,
    /// Files produced by this run, relative to the course directory.
    pub artifacts: Vec<String>,
    pub errors: Vec<String>,
    pub subtasks: Vec<SubtaskReport>,
    pub duration: Duration,
}

impl PipelineResult {
    /// A failed result for a course whose pipeline could not run to the end.
    pub fn failed(
        course: impl Into<String>,
        path: impl Into<PathBuf>,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            course: course.into(),
            path: path.into(),
            status: PipelineStatus::Failed,
            artifacts: Vec::new(),
            errors: vec![error.into()],
            subtasks: Vec::new(),
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtask_status_from_attempt() {
        assert_eq!(SubtaskStatus::from_attempt(3, 0), SubtaskStatus::Success);
        assert_eq!(SubtaskStatus::from_attempt(1, 2), SubtaskStatus::Partial);
        assert_eq!(SubtaskStatus::from_attempt(0, 0), SubtaskStatus::Failed);
        assert_eq!(SubtaskStatus::from_attempt(0, 1), SubtaskStatus::Failed);
    }

    #[test]
    fn test_subtask_status_lenient_parse() {
        assert_eq!(SubtaskStatus::parse_lenient("Not Started"), SubtaskStatus::NotStarted);
        assert_eq!(SubtaskStatus::parse_lenient("completed"), SubtaskStatus::Success);
        assert_eq!(SubtaskStatus::parse_lenient("PARTIAL"), SubtaskStatus::Partial);
        assert_eq!(SubtaskStatus::parse_lenient("error"), SubtaskStatus::Failed);
        assert_eq!(SubtaskStatus::parse_lenient("queued"), SubtaskStatus::NotStarted);
    }

    #[test]
    fn test_finished_statuses() {
        assert!(SubtaskStatus::Success.is_finished());
        assert!(SubtaskStatus::Partial.is_finished());
        assert!(!SubtaskStatus::Failed.is_finished());
        assert!(!SubtaskStatus::NotStarted.is_finished());
    }

    #[test]
    fn test_pipeline_status_serialization() {
        assert_eq!(
            serde_json::to_string(&PipelineStatus::NoWork).unwrap(),
            "\"no_work\""
        );
        assert!(PipelineStatus::NoWork.is_success());
        assert!(!PipelineStatus::Failed.is_success());
    }

    #[test]
    fn test_failed_result() {
        let result = PipelineResult::failed("c", "/c", "boom", Duration::from_millis(5));
        assert_eq!(result.status, PipelineStatus::Failed);
        assert_eq!(result.errors, vec!["boom".to_string()]);
        assert!(!result.is_success());
    }
}
