//! Persisted per-course status marker.
//!
//! The marker is a small JSON record written at `.forge/status.json`:
//!
//! ```json
//! {"status": "started", "started_at": "2026-01-01T10:00:00Z", "completed_at": null}
//! ```
//!
//! `status` is `started` while discovery runs and `complete` once discovery
//! succeeded (`completed` is accepted on read). Any other value, or a file
//! that does not parse, is reported as [`MarkerRead::Corrupt`].

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::CoursePaths;
use crate::error::StateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerStatus {
    Started,
    #[serde(alias = "completed")]
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseMarker {
    pub status: MarkerStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl CourseMarker {
    pub fn started() -> Self {
        Self {
            status: MarkerStatus::Started,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == MarkerStatus::Complete
    }
}

/// Outcome of reading a marker file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerRead {
    Absent,
    Valid(CourseMarker),
    /// Present but unreadable; carries the parse error.
    Corrupt(String),
}

/// Reads the marker of a course. Only unexpected IO failures are errors;
/// a missing file is `Absent` and a malformed one is `Corrupt`.
pub async fn read_marker(paths: &CoursePaths) -> Result<MarkerRead, StateError> {
    let path = paths.marker();
    let content = match fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(MarkerRead::Absent),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            return Ok(MarkerRead::Corrupt(e.to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    Ok(match serde_json::from_str::<CourseMarker>(&content) {
        Ok(marker) => MarkerRead::Valid(marker),
        Err(e) => MarkerRead::Corrupt(e.to_string()),
    })
}

/// Writes a fresh `started` marker, replacing whatever was there.
pub async fn mark_started(paths: &CoursePaths) -> Result<CourseMarker, StateError> {
    let marker = CourseMarker::started();
    write_marker(paths, &marker).await?;
    Ok(marker)
}

/// Flips the marker to `complete`, keeping the original start time when it
/// can be read.
pub async fn mark_complete(paths: &CoursePaths) -> Result<CourseMarker, StateError> {
    let mut marker = match read_marker(paths).await? {
        MarkerRead::Valid(marker) => marker,
        MarkerRead::Absent | MarkerRead::Corrupt(_) => CourseMarker::started(),
    };
    marker.status = MarkerStatus::Complete;
    write_marker(paths, &marker).await?;
    Ok(marker)
}

/// Stamps `completed_at` once the whole pipeline finished.
pub async fn stamp_completed(paths: &CoursePaths) -> Result<CourseMarker, StateError> {
    let mut marker = match read_marker(paths).await? {
        MarkerRead::Valid(marker) => marker,
        MarkerRead::Absent | MarkerRead::Corrupt(_) => CourseMarker::started(),
    };
    marker.status = MarkerStatus::Complete;
    marker.completed_at = Some(Utc::now());
    write_marker(paths, &marker).await?;
    Ok(marker)
}

async fn write_marker(paths: &CoursePaths, marker: &CourseMarker) -> Result<(), StateError> {
    let json = serde_json::to_string_pretty(marker)?;
    write_atomic(&paths.marker(), json.as_bytes()).await
}

/// Writes through a sibling temp file and a rename so readers never observe
/// a half-written file.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StateError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_marker_is_absent() {
        let dir = TempDir::new().unwrap();
        let paths = CoursePaths::new(dir.path());
        assert_eq!(read_marker(&paths).await.unwrap(), MarkerRead::Absent);
    }

    #[tokio::test]
    async fn test_marker_lifecycle() {
        let dir = TempDir::new().unwrap();
        let paths = CoursePaths::new(dir.path());

        let started = mark_started(&paths).await.unwrap();
        assert_eq!(started.status, MarkerStatus::Started);

        let complete = mark_complete(&paths).await.unwrap();
        assert!(complete.is_complete());
        assert_eq!(complete.started_at, started.started_at);
        assert!(complete.completed_at.is_none());

        let stamped = stamp_completed(&paths).await.unwrap();
        assert!(stamped.completed_at.is_some());

        match read_marker(&paths).await.unwrap() {
            MarkerRead::Valid(marker) => assert_eq!(marker, stamped),
            other => panic!("expected valid marker, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_completed_alias_is_accepted() {
        let dir = TempDir::new().unwrap();
        let paths = CoursePaths::new(dir.path());
        std::fs::create_dir_all(paths.state_dir()).unwrap();
        std::fs::write(
            paths.marker(),
            r#"{"status":"completed","started_at":"2026-01-01T10:00:00Z","completed_at":null}"#,
        )
        .unwrap();

        match read_marker(&paths).await.unwrap() {
            MarkerRead::Valid(marker) => assert!(marker.is_complete()),
            other => panic!("expected valid marker, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_garbage_and_unknown_status_are_corrupt() {
        let dir = TempDir::new().unwrap();
        let paths = CoursePaths::new(dir.path());
        std::fs::create_dir_all(paths.state_dir()).unwrap();

        std::fs::write(paths.marker(), "{not json").unwrap();
        assert!(matches!(
            read_marker(&paths).await.unwrap(),
            MarkerRead::Corrupt(_)
        ));

        std::fs::write(
            paths.marker(),
            r#"{"status":"exploded","started_at":"2026-01-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert!(matches!(
            read_marker(&paths).await.unwrap(),
            MarkerRead::Corrupt(_)
        ));
    }
}
