//! course-forge: agent-driven course material generation.
//!
//! Scans directories of transcripts, classifies each course from its
//! persisted markers, and drives an external agent through discovery and
//! generation on a bounded worker pool with graceful shutdown.

pub mod chunking;
pub mod cli;
pub mod collaborator;
pub mod config;
pub mod course;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod prompts;
pub mod report;
pub mod scheduler;
pub mod shutdown;
pub mod utils;

pub use chunking::{Chunk, ChunkError, ChunkPlanner};
pub use collaborator::{
    CliCollaborator, Collaborator, CollaboratorOutcome, CollaboratorRequest,
};
pub use config::{ConfigError, ForgeConfig};
pub use course::{Course, CoursePaths, CourseState};
pub use error::{CollaboratorError, PipelineError, ScanError, StateError};
pub use events::{EventBus, EventListener, ForgeEvent};
pub use pipeline::{CoursePipeline, CourseRunner, PipelineResult, PipelineStatus};
pub use scheduler::{PoolStats, WorkerPool, WorkerPoolConfig};
pub use shutdown::{ShutdownController, ShutdownPhase};
