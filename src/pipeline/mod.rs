//! Per-course generation pipeline.
//!
//! One course runs through:
//!
//! ```text
//! Discovery ──> no work ──────────────────────────────────────> NoWork
//!     │
//!     └──> for each unfinished sub-task:
//!            small: Generation (one call)
//!            large: ArchitectureExtraction ──> chunk 1 ──> ... ──> chunk N
//!          ──> Finalizing ──> Complete | Failed
//! ```
//!
//! The manifest is persisted after discovery and again after every sub-task,
//! so an interrupted course resumes with the sub-tasks it has not finished.
//! What a call produced is read off the output directory, not the agent's
//! reply; the reply is only a fallback.

pub mod architecture;
pub mod manifest;
pub mod result;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunking::ChunkPlanner;
use crate::collaborator::{Capability, Collaborator, CollaboratorOutcome, CollaboratorRequest};
use crate::course::marker::{mark_complete, mark_started, read_marker, stamp_completed};
use crate::course::state::output_present;
use crate::course::{Course, CoursePaths, MarkerRead};
use crate::error::PipelineError;
use crate::events::{CoursePhase, EventBus, ForgeEvent};
use crate::prompts::{
    build_architecture_prompt, build_chunk_prompt, build_discovery_prompt, build_generation_prompt,
};

pub use architecture::{ArchitectureSpec, PlannedFile};
pub use manifest::{Manifest, ManifestItem};
pub use result::{PipelineResult, PipelineStatus, SubtaskReport, SubtaskStatus};

/// Runs one course to completion.
///
/// Implemented by [`CoursePipeline`]; the worker pool only depends on this
/// trait so tests can drive it with scripted runners.
#[async_trait]
pub trait CourseRunner: Send + Sync {
    async fn run(&self, worker_id: usize, course: &Course) -> Result<PipelineResult, PipelineError>;
}

/// Sizing knobs of the generation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Fresh transcripts per chunk.
    pub window_size: usize,
    /// Transcripts repeated from the previous chunk.
    pub overlap_size: usize,
    /// Sub-tasks with more source refs than this are chunked.
    pub large_task_threshold: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            window_size: 10,
            overlap_size: 2,
            large_task_threshold: 15,
        }
    }
}

impl PipelineSettings {
    pub fn with_window(mut self, window_size: usize, overlap_size: usize) -> Self {
        self.window_size = window_size;
        self.overlap_size = overlap_size;
        self
    }

    pub fn with_large_task_threshold(mut self, threshold: usize) -> Self {
        self.large_task_threshold = threshold;
        self
    }
}

/// The pipeline driving agent calls for one course.
pub struct CoursePipeline {
    collaborator: Arc<dyn Collaborator>,
    settings: PipelineSettings,
    bus: Option<Arc<EventBus>>,
}

/// Files an agent call touched, plus its failure if it had one.
struct Attempt {
    produced: Vec<String>,
    error: Option<String>,
}

impl CoursePipeline {
    pub fn new(collaborator: Arc<dyn Collaborator>, settings: PipelineSettings) -> Self {
        Self {
            collaborator,
            settings,
            bus: None,
        }
    }

    /// Publishes progress events on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Loads the persisted manifest, or runs discovery and persists its
    /// result. The marker is `started` while discovery runs and `complete`
    /// once a manifest exists.
    async fn discover(&self, course: &Course, paths: &CoursePaths) -> Result<Manifest, PipelineError> {
        if let Some(manifest) = Manifest::load(paths).await? {
            debug!(course = %course.name, items = manifest.items.len(), "Reusing discovery manifest");
            // A crash right after the agent wrote the manifest leaves the
            // marker at `started`.
            let complete =
                matches!(read_marker(paths).await?, MarkerRead::Valid(marker) if marker.is_complete());
            if !complete {
                mark_complete(paths).await?;
            }
            return Ok(manifest);
        }

        mark_started(paths).await?;

        let request = CollaboratorRequest::new(build_discovery_prompt(course), &course.path)
            .with_capabilities(Capability::discovery());
        let (reply, failure) = match self.collaborator.invoke(request).await {
            Ok(CollaboratorOutcome::Success { text }) => (Some(text), None),
            Ok(CollaboratorOutcome::Error { reason }) => (None, Some(reason)),
            Err(e) => (None, Some(e.to_string())),
        };

        // The agent is asked to write the manifest itself; its reply is the
        // fallback.
        let manifest = match Manifest::load(paths).await? {
            Some(manifest) => manifest,
            None => match (reply, failure) {
                (Some(text), _) => Manifest::from_response(&text)
                    .map_err(|e| PipelineError::Discovery(e.to_string()))?,
                (None, Some(reason)) => return Err(PipelineError::Discovery(reason)),
                (None, None) => {
                    return Err(PipelineError::Discovery("agent returned nothing".to_string()))
                }
            },
        };

        manifest.save(paths).await?;
        mark_complete(paths).await?;

        info!(
            course = %course.name,
            has_work = manifest.declares_work(),
            items = manifest.items.len(),
            skipped = manifest.skipped.len(),
            "Discovery complete"
        );
        Ok(manifest)
    }

    async fn generate_single(
        &self,
        worker_id: usize,
        course: &Course,
        item: &ManifestItem,
    ) -> SubtaskReport {
        self.progress(
            worker_id,
            course,
            CoursePhase::Generation {
                subtask: item.id.clone(),
            },
        );

        let attempt = self
            .attempt(course, build_generation_prompt(course, item), Capability::generation())
            .await;
        let errors: Vec<String> = attempt.error.into_iter().collect();

        SubtaskReport {
            id: item.id.clone(),
            status: SubtaskStatus::from_attempt(attempt.produced.len(), errors.len()),
            chunks: 1,
            produced_files: attempt.produced,
            errors,
        }
    }

    async fn generate_chunked(
        &self,
        worker_id: usize,
        course: &Course,
        item: &ManifestItem,
    ) -> Result<SubtaskReport, PipelineError> {
        let paths = course.paths();
        let mut errors = Vec::new();

        let architecture = match ArchitectureSpec::load(&paths, &item.id).await? {
            Some(spec) => {
                debug!(course = %course.name, subtask = %item.id, "Reusing architecture spec");
                spec
            }
            None => {
                self.progress(
                    worker_id,
                    course,
                    CoursePhase::ArchitectureExtraction {
                        subtask: item.id.clone(),
                    },
                );
                let spec = self.extract_architecture(course, &paths, item).await?;
                if spec.is_empty() {
                    errors.push("architecture extraction produced nothing".to_string());
                } else {
                    spec.save(&paths).await?;
                }
                spec
            }
        };

        let planner = ChunkPlanner::new(self.settings.window_size, self.settings.overlap_size)?;
        let chunks = planner.plan(&item.source_refs);
        let mut produced: Vec<String> = Vec::new();

        for chunk in &chunks {
            self.progress(
                worker_id,
                course,
                CoursePhase::ChunkGeneration {
                    subtask: item.id.clone(),
                    index: chunk.index,
                    total: chunk.total,
                },
            );

            let prompt = build_chunk_prompt(course, item, &architecture, chunk, &produced);
            let attempt = self
                .attempt(course, prompt, Capability::generation())
                .await;

            for file in attempt.produced {
                if !produced.contains(&file) {
                    produced.push(file);
                }
            }
            if let Some(error) = attempt.error {
                warn!(
                    course = %course.name,
                    subtask = %item.id,
                    chunk = chunk.index + 1,
                    total = chunk.total,
                    error = %error,
                    "Chunk generation failed"
                );
                errors.push(format!("chunk {}/{}: {}", chunk.index + 1, chunk.total, error));
            }
        }

        Ok(SubtaskReport {
            id: item.id.clone(),
            status: SubtaskStatus::from_attempt(produced.len(), errors.len()),
            chunks: chunks.len(),
            produced_files: produced,
            errors,
        })
    }

    async fn extract_architecture(
        &self,
        course: &Course,
        paths: &CoursePaths,
        item: &ManifestItem,
    ) -> Result<ArchitectureSpec, PipelineError> {
        let request = CollaboratorRequest::new(build_architecture_prompt(course, item), &course.path)
            .with_capabilities(Capability::discovery());
        let reply = match self.collaborator.invoke(request).await {
            Ok(CollaboratorOutcome::Success { text }) => Some(text),
            Ok(CollaboratorOutcome::Error { reason }) => {
                warn!(course = %course.name, subtask = %item.id, error = %reason, "Architecture extraction failed");
                None
            }
            Err(e) => {
                warn!(course = %course.name, subtask = %item.id, error = %e, "Architecture extraction failed");
                None
            }
        };

        if let Some(spec) = ArchitectureSpec::load(paths, &item.id).await? {
            return Ok(spec);
        }
        Ok(reply
            .map(|text| ArchitectureSpec::from_response(&item.id, &text))
            .unwrap_or_else(|| ArchitectureSpec::empty(&item.id)))
    }

    /// Runs one generation call and works out which files it produced.
    async fn attempt(&self, course: &Course, prompt: String, capabilities: Vec<Capability>) -> Attempt {
        let output_dir = course.paths().output_dir();
        let before = snapshot_output(&output_dir).await;

        let request = CollaboratorRequest::new(prompt, &course.path).with_capabilities(capabilities);
        let (reply, error) = match self.collaborator.invoke(request).await {
            Ok(CollaboratorOutcome::Success { text }) => (Some(text), None),
            Ok(CollaboratorOutcome::Error { reason }) => (None, Some(reason)),
            Err(e) => (None, Some(e.to_string())),
        };

        let after = snapshot_output(&output_dir).await;
        let mut produced = changed_files(&course.path, &before, &after);
        if produced.is_empty() {
            if let Some(text) = &reply {
                produced = files_named_in(&course.path, &output_dir, text);
            }
        }

        Attempt { produced, error }
    }

    fn progress(&self, worker_id: usize, course: &Course, phase: CoursePhase) {
        self.publish(ForgeEvent::CourseProgress {
            worker_id,
            course: course.name.clone(),
            phase,
        });
    }

    fn publish(&self, event: ForgeEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }
}

#[async_trait]
impl CourseRunner for CoursePipeline {
    async fn run(&self, worker_id: usize, course: &Course) -> Result<PipelineResult, PipelineError> {
        let start = Instant::now();
        let paths = course.paths();

        self.progress(worker_id, course, CoursePhase::Discovery);
        let mut manifest = self.discover(course, &paths).await?;

        if !manifest.declares_work() {
            info!(
                course = %course.name,
                reason = manifest.reason.as_deref().unwrap_or("none given"),
                "No work discovered"
            );
            stamp_completed(&paths).await?;
            return Ok(PipelineResult {
                course: course.name.clone(),
                path: course.path.clone(),
                status: PipelineStatus::NoWork,
                artifacts: Vec::new(),
                errors: Vec::new(),
                subtasks: Vec::new(),
                duration: start.elapsed(),
            });
        }

        // Output removed since (cleanup of an abandoned attempt, or by hand)
        // takes every finished sub-task's material with it.
        if !output_present(&paths) {
            let mut reset = 0;
            for item in manifest.items.iter_mut().filter(|i| i.status.is_finished()) {
                item.status = SubtaskStatus::NotStarted;
                reset += 1;
            }
            if reset > 0 {
                info!(course = %course.name, reset, "Output missing, regenerating finished sub-tasks");
                manifest.save(&paths).await?;
            }
        }

        let todo: Vec<(usize, ManifestItem)> = manifest
            .unfinished()
            .map(|(index, item)| (index, item.clone()))
            .collect();

        let mut reports = Vec::with_capacity(todo.len());
        for (index, item) in todo {
            let report = if item.source_refs.len() > self.settings.large_task_threshold {
                match self.generate_chunked(worker_id, course, &item).await {
                    Ok(report) => report,
                    Err(e) => {
                        warn!(course = %course.name, subtask = %item.id, error = %e, "Chunked generation aborted");
                        SubtaskReport {
                            id: item.id.clone(),
                            status: SubtaskStatus::Failed,
                            chunks: 0,
                            produced_files: Vec::new(),
                            errors: vec![e.to_string()],
                        }
                    }
                }
            } else {
                self.generate_single(worker_id, course, &item).await
            };

            manifest.set_status(index, report.status);
            manifest.save(&paths).await?;

            self.publish(ForgeEvent::SubtaskFinished {
                worker_id,
                course: course.name.clone(),
                subtask: report.id.clone(),
                status: report.status,
                produced_files: report.produced_files.len(),
                errors: report.errors.clone(),
            });
            reports.push(report);
        }

        self.progress(worker_id, course, CoursePhase::Finalizing);

        let all_failed =
            !reports.is_empty() && reports.iter().all(|r| r.status == SubtaskStatus::Failed);
        let status = if all_failed {
            PipelineStatus::Failed
        } else {
            PipelineStatus::Complete
        };

        if status == PipelineStatus::Complete {
            stamp_completed(&paths).await?;
        }

        let artifacts = reports
            .iter()
            .flat_map(|r| r.produced_files.iter().cloned())
            .collect();
        let errors = reports
            .iter()
            .flat_map(|r| r.errors.iter().map(move |e| format!("{}: {}", r.id, e)))
            .collect();

        Ok(PipelineResult {
            course: course.name.clone(),
            path: course.path.clone(),
            status,
            artifacts,
            errors,
            subtasks: reports,
            duration: start.elapsed(),
        })
    }
}

type Snapshot = HashMap<PathBuf, Option<SystemTime>>;

async fn snapshot_output(output_dir: &Path) -> Snapshot {
    let dir = output_dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        WalkDir::new(&dir)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let modified = e.metadata().ok().and_then(|m| m.modified().ok());
                (e.into_path(), modified)
            })
            .collect()
    })
    .await
    .unwrap_or_default()
}

/// New or modified files, relative to the course directory, sorted.
fn changed_files(course_dir: &Path, before: &Snapshot, after: &Snapshot) -> Vec<String> {
    let mut changed: Vec<String> = after
        .iter()
        .filter(|(path, modified)| before.get(*path) != Some(*modified))
        .filter_map(|(path, _)| relative(course_dir, path))
        .collect();
    changed.sort();
    changed
}

/// Existing output files mentioned line by line in an agent reply.
fn files_named_in(course_dir: &Path, output_dir: &Path, text: &str) -> Vec<String> {
    let mut found = Vec::new();
    for line in text.lines() {
        let candidate = line
            .trim()
            .trim_start_matches(['-', '*'])
            .trim()
            .trim_matches('`');
        if candidate.is_empty() {
            continue;
        }
        let path = course_dir.join(candidate);
        if path.starts_with(output_dir) && !candidate.contains("..") && path.is_file() {
            if let Some(rel) = relative(course_dir, &path) {
                if !found.contains(&rel) {
                    found.push(rel);
                }
            }
        }
    }
    found
}

fn relative(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    Some(
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
    )
}
