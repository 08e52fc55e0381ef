//! Course state classification.
//!
//! | marker                 | output  | state   | cleanup |
//! |------------------------|---------|---------|---------|
//! | absent                 | absent  | pending | no      |
//! | absent                 | present | skipped | no      |
//! | complete               | present | skipped | no      |
//! | complete               | absent  | pending | no      |
//! | started / corrupt      | any     | pending | yes     |
//!
//! A complete marker without output means discovery succeeded but generation
//! did not; the pipeline resumes from the stored manifest.

use std::path::Path;

use tokio::fs;
use tracing::info;
use walkdir::WalkDir;

use super::marker::{read_marker, MarkerRead};
use super::{CoursePaths, CourseState};
use crate::error::StateError;

/// Result of classifying one course directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub state: CourseState,
    /// The previous attempt was abandoned; its partial output must go.
    pub requires_cleanup: bool,
}

impl Classification {
    pub fn pending() -> Self {
        Self {
            state: CourseState::Pending,
            requires_cleanup: false,
        }
    }

    pub fn skipped() -> Self {
        Self {
            state: CourseState::Skipped,
            requires_cleanup: false,
        }
    }

    pub fn retry() -> Self {
        Self {
            state: CourseState::Pending,
            requires_cleanup: true,
        }
    }
}

/// Pure decision table over an already-read marker and output probe.
pub fn decide(marker: &MarkerRead, output_present: bool) -> Classification {
    match marker {
        MarkerRead::Absent if output_present => Classification::skipped(),
        MarkerRead::Absent => Classification::pending(),
        MarkerRead::Valid(m) if m.is_complete() => {
            if output_present {
                Classification::skipped()
            } else {
                Classification::pending()
            }
        }
        MarkerRead::Valid(_) | MarkerRead::Corrupt(_) => Classification::retry(),
    }
}

/// Classifies the course rooted at `course_path`.
pub async fn classify(course_path: &Path) -> Result<Classification, StateError> {
    let paths = CoursePaths::new(course_path);
    let marker = read_marker(&paths).await?;
    Ok(decide(&marker, output_present(&paths)))
}

/// Classifies and, when required, removes the stale output directory so the
/// course can be re-queued cleanly.
pub async fn prepare(course_path: &Path) -> Result<Classification, StateError> {
    let classification = classify(course_path).await?;
    if classification.requires_cleanup {
        let paths = CoursePaths::new(course_path);
        if remove_output(&paths).await? {
            info!(course = %course_path.display(), "Removed partial output from abandoned attempt");
        }
    }
    Ok(classification)
}

/// True when the output directory exists and holds at least one file.
pub fn output_present(paths: &CoursePaths) -> bool {
    let output = paths.output_dir();
    if !output.is_dir() {
        return false;
    }
    WalkDir::new(&output)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| e.file_type().is_file())
}

/// Deletes the output directory. Returns whether anything was removed.
pub async fn remove_output(paths: &CoursePaths) -> Result<bool, StateError> {
    let output = paths.output_dir();
    match fs::remove_dir_all(&output).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(StateError::Cleanup {
            path: output,
            source,
        }),
    }
}
