//! Courses (work units) and their on-disk layout.
//!
//! A course is a directory of transcripts. Everything course-forge persists
//! for it lives beside the transcripts:
//!
//! ```text
//! <course>/
//!   01 - intro.srt ...          source material
//!   .forge/status.json          persisted marker
//!   .forge/manifest.json        discovery artifact
//!   .forge/architecture/*.json  per-subtask architecture specs
//!   output/                     generated course material
//! ```

pub mod marker;
pub mod scanner;
pub mod state;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use marker::{CourseMarker, MarkerRead, MarkerStatus};
pub use scanner::{natural_cmp, CourseScanner, ScanOptions, ScanReport};
pub use state::{classify, prepare, Classification};

/// Directory holding course-forge's bookkeeping files.
pub const STATE_DIR: &str = ".forge";
/// Directory receiving generated material.
pub const OUTPUT_DIR: &str = "output";

const MARKER_FILE: &str = "status.json";
const MANIFEST_FILE: &str = "manifest.json";
const ARCHITECTURE_DIR: &str = "architecture";

/// Whether a course still needs work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseState {
    Pending,
    Skipped,
}

impl std::fmt::Display for CourseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CourseState::Pending => write!(f, "pending"),
            CourseState::Skipped => write!(f, "skipped"),
        }
    }
}

/// One course to process end to end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    /// Course directory; the identity of the course.
    pub path: PathBuf,
    /// Display name (the directory name).
    pub name: String,
    /// Transcript paths relative to `path`, in natural order.
    pub source_material: Vec<String>,
    /// True when transcripts are grouped into section subdirectories.
    pub has_subgroups: bool,
    pub state: CourseState,
}

impl Course {
    pub fn new(
        path: impl Into<PathBuf>,
        source_material: Vec<String>,
        has_subgroups: bool,
        state: CourseState,
    ) -> Self {
        let path = path.into();
        let name = display_name(&path);
        Self {
            path,
            name,
            source_material,
            has_subgroups,
            state,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == CourseState::Pending
    }

    pub fn paths(&self) -> CoursePaths {
        CoursePaths::new(&self.path)
    }
}

/// Resolves the persisted-state locations of one course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoursePaths {
    root: PathBuf,
}

impl CoursePaths {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn marker(&self) -> PathBuf {
        self.state_dir().join(MARKER_FILE)
    }

    pub fn manifest(&self) -> PathBuf {
        self.state_dir().join(MANIFEST_FILE)
    }

    pub fn architecture_dir(&self) -> PathBuf {
        self.state_dir().join(ARCHITECTURE_DIR)
    }

    /// Architecture spec file for one sub-task.
    pub fn architecture(&self, subtask_id: &str) -> PathBuf {
        self.architecture_dir()
            .join(format!("{}.json", sanitize_file_stem(subtask_id)))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(OUTPUT_DIR)
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Maps an arbitrary id onto a safe file stem.
pub fn sanitize_file_stem(id: &str) -> String {
    let stem: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "unnamed".to_string()
    } else {
        stem
    }
}
