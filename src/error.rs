//! Error types for course-forge operations.
//!
//! Defines error types for the major subsystems:
//! - External agent (collaborator) invocation
//! - Course scanning
//! - Persisted course state (markers, cleanup)
//! - Per-course pipeline execution

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::chunking::ChunkError;

/// Errors that can occur while invoking the generation agent.
///
/// These cover transport-level failures only. An agent that ran to
/// completion but reported a failure is a `CollaboratorOutcome::Error`,
/// not one of these.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Failed to spawn agent '{command}': {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("Failed to write prompt to agent: {0}")]
    PromptWrite(String),

    #[error("Agent timed out after {0:?}")]
    Timeout(Duration),

    #[error("Agent process error: {0}")]
    Process(String),

    #[error("Working directory does not exist: {0}")]
    MissingWorkingDir(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while scanning for courses.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Input path does not exist: {0}")]
    NotFound(PathBuf),

    #[error("Input path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("No transcript files found in '{0}'")]
    NoSourceMaterial(PathBuf),

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Failed to classify course '{path}': {source}")]
    Classify {
        path: PathBuf,
        #[source]
        source: StateError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while reading or writing persisted course state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to remove stale output '{path}': {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that abort a single course pipeline.
///
/// Sub-task failures never surface here; they are recorded on the
/// sub-task and folded into the course result.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("Agent error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Course state error: {0}")]
    State(#[from] StateError),

    #[error("Chunk planning failed: {0}")]
    Chunking(#[from] ChunkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
