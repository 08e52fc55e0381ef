//! Boundary to the external generation agent.
//!
//! The agent is an opaque request/response service: it gets a prompt, a
//! working directory and a set of allowed capabilities, runs for a while,
//! and ends with either free-form text (plus whatever files it wrote under
//! the working directory) or an error reason.

mod cli;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;

pub use cli::{normalize_agent_output, CliCollaborator};

/// Tool capabilities an agent call may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    Read,
    Write,
    Edit,
    Glob,
    Grep,
}

impl Capability {
    /// Tool name passed on the agent's allow-list.
    pub fn tool_name(&self) -> &'static str {
        match self {
            Capability::Read => "Read",
            Capability::Write => "Write",
            Capability::Edit => "Edit",
            Capability::Glob => "Glob",
            Capability::Grep => "Grep",
        }
    }

    /// Capabilities for calls that inspect sources and write one artifact.
    pub fn discovery() -> Vec<Capability> {
        vec![
            Capability::Read,
            Capability::Glob,
            Capability::Grep,
            Capability::Write,
        ]
    }

    /// Capabilities for calls that generate course material.
    pub fn generation() -> Vec<Capability> {
        vec![
            Capability::Read,
            Capability::Glob,
            Capability::Grep,
            Capability::Write,
            Capability::Edit,
        ]
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tool_name())
    }
}

/// One agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollaboratorRequest {
    pub prompt: String,
    pub working_dir: PathBuf,
    pub capabilities: Vec<Capability>,
}

impl CollaboratorRequest {
    pub fn new(prompt: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            working_dir: working_dir.into(),
            capabilities: Capability::generation(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Terminal result of an agent call that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorOutcome {
    Success { text: String },
    Error { reason: String },
}

impl CollaboratorOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CollaboratorOutcome::Success { .. })
    }

    /// Result text of a successful call.
    pub fn text(&self) -> Option<&str> {
        match self {
            CollaboratorOutcome::Success { text } => Some(text),
            CollaboratorOutcome::Error { .. } => None,
        }
    }
}

/// Anything that can run agent requests.
#[async_trait]
pub trait Collaborator: Send + Sync {
    async fn invoke(
        &self,
        request: CollaboratorRequest,
    ) -> Result<CollaboratorOutcome, CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_sets() {
        assert!(!Capability::discovery().contains(&Capability::Edit));
        assert!(Capability::generation().contains(&Capability::Edit));
        assert_eq!(Capability::Grep.to_string(), "Grep");
    }

    #[test]
    fn test_outcome_accessors() {
        let ok = CollaboratorOutcome::Success {
            text: "done".to_string(),
        };
        assert!(ok.is_success());
        assert_eq!(ok.text(), Some("done"));

        let err = CollaboratorOutcome::Error {
            reason: "quota".to_string(),
        };
        assert!(!err.is_success());
        assert_eq!(err.text(), None);
    }

    #[test]
    fn test_request_builder() {
        let request = CollaboratorRequest::new("hi", "/tmp")
            .with_capabilities(vec![Capability::Read]);
        assert_eq!(request.capabilities, vec![Capability::Read]);
        assert_eq!(request.working_dir, PathBuf::from("/tmp"));
    }
}
