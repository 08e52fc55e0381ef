//! End-to-end runs over a temporary course tree with an offline agent.
//!
//! The agent answers discovery with one sub-task per course covering every
//! transcript, answers architecture prompts with a small outline, and writes
//! one markdown file per generation call.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use course_forge::course::marker::{read_marker, MarkerRead};
use course_forge::course::{CourseScanner, ScanOptions};
use course_forge::pipeline::{Manifest, PipelineSettings, SubtaskStatus};
use course_forge::{
    Collaborator, CollaboratorError, CollaboratorOutcome, CollaboratorRequest, Course,
    CoursePipeline, CourseState, EventBus, ForgeEvent, PipelineStatus, PoolStats,
    ShutdownController, WorkerPool, WorkerPoolConfig,
};
use tempfile::TempDir;

#[derive(Default)]
struct OfflineAgent {
    calls: Mutex<HashMap<PathBuf, Vec<&'static str>>>,
    /// Course directory names whose discovery call fails.
    broken: Mutex<Vec<String>>,
}

impl OfflineAgent {
    fn breaking(names: &[&str]) -> Arc<Self> {
        let agent = Self::default();
        *agent.broken.lock().unwrap() = names.iter().map(|n| n.to_string()).collect();
        Arc::new(agent)
    }

    fn repair(&self) {
        self.broken.lock().unwrap().clear();
    }

    fn calls_for(&self, course: &Path) -> Vec<&'static str> {
        self.calls
            .lock()
            .unwrap()
            .get(course)
            .cloned()
            .unwrap_or_default()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().map(Vec::len).sum()
    }

    fn record(&self, dir: &Path, kind: &'static str) {
        self.calls
            .lock()
            .unwrap()
            .entry(dir.to_path_buf())
            .or_default()
            .push(kind);
    }
}

fn transcripts_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".srt"))
        .collect();
    names.sort();
    names
}

#[async_trait]
impl Collaborator for OfflineAgent {
    async fn invoke(
        &self,
        request: CollaboratorRequest,
    ) -> Result<CollaboratorOutcome, CollaboratorError> {
        let dir = request.working_dir.clone();
        let name = dir.file_name().unwrap().to_string_lossy().into_owned();

        if request.prompt.starts_with("You are planning") {
            self.record(&dir, "discovery");
            if self.broken.lock().unwrap().contains(&name) {
                return Ok(CollaboratorOutcome::Error {
                    reason: "rate limited".to_string(),
                });
            }
            let manifest = serde_json::json!({
                "has_work": true,
                "items": [{
                    "id": "all",
                    "sourceRefs": transcripts_in(&dir),
                    "sizeClass": "standard",
                    "status": "not_started"
                }],
                "skipped": [],
                "reason": null
            });
            return Ok(CollaboratorOutcome::Success {
                text: format!("```json\n{manifest}\n```"),
            });
        }

        if request.prompt.starts_with("You are preparing") {
            self.record(&dir, "architecture");
            return Ok(CollaboratorOutcome::Success {
                text: r#"{"summary": "Everything", "outline": ["Start", "Finish"]}"#.to_string(),
            });
        }

        self.record(&dir, "generation");
        let index = self.calls_for(&dir).len();
        let output = dir.join("output/all");
        std::fs::create_dir_all(&output).unwrap();
        std::fs::write(output.join(format!("part-{index}.md")), "# Part\n").unwrap();
        Ok(CollaboratorOutcome::Success {
            text: "done".to_string(),
        })
    }
}

fn make_course(root: &Path, name: &str, transcripts: usize) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    for i in 1..=transcripts {
        std::fs::write(
            dir.join(format!("{i:02}.srt")),
            "1\n00:00:01,000 --> 00:00:02,000\nhello\n",
        )
        .unwrap();
    }
    dir
}

async fn scan(root: &Path) -> Vec<Course> {
    CourseScanner::new(ScanOptions {
        recursive: true,
        scan_concurrency: 4,
        read_only: false,
    })
    .scan(root)
    .await
    .unwrap()
    .courses
}

async fn run_pool(
    agent: Arc<OfflineAgent>,
    courses: Vec<Course>,
    settings: PipelineSettings,
) -> (PoolStats, Vec<course_forge::PipelineResult>) {
    let pipeline = CoursePipeline::new(agent, settings);
    let pool = WorkerPool::new(
        WorkerPoolConfig::new(2),
        Arc::new(pipeline),
        ShutdownController::new(),
    );
    let results = pool.run(courses).await;
    (pool.stats(), results)
}

async fn assert_complete(course: &Path) {
    match read_marker(&course_forge::CoursePaths::new(course))
        .await
        .unwrap()
    {
        MarkerRead::Valid(marker) => {
            assert!(marker.is_complete(), "{} not complete", course.display());
            assert!(marker.completed_at.is_some());
        }
        other => panic!("unexpected marker for {}: {other:?}", course.display()),
    }
}

#[tokio::test]
async fn test_five_courses_then_rescan_skips_all() {
    let root = TempDir::new().unwrap();
    let dirs: Vec<PathBuf> = (1..=5)
        .map(|i| make_course(root.path(), &format!("course-{i}"), 3))
        .collect();
    let agent = Arc::new(OfflineAgent::default());

    let courses = scan(root.path()).await;
    assert_eq!(courses.len(), 5);
    assert!(courses.iter().all(Course::is_pending));

    let (stats, results) = run_pool(agent.clone(), courses, PipelineSettings::default()).await;
    assert_eq!(
        stats,
        PoolStats {
            total: 5,
            completed: 5,
            failed: 0,
            skipped: 0,
            remaining: 0,
        }
    );
    assert!(stats.is_balanced());
    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.status == PipelineStatus::Complete));

    for dir in &dirs {
        assert_complete(dir).await;
        assert_eq!(agent.calls_for(dir), vec!["discovery", "generation"]);
        assert!(dir.join("output/all").is_dir());
    }

    let calls_before = agent.total_calls();
    let rescanned = scan(root.path()).await;
    assert!(rescanned.iter().all(|c| c.state == CourseState::Skipped));

    let (stats, results) = run_pool(agent.clone(), rescanned, PipelineSettings::default()).await;
    assert_eq!(stats.skipped, 5);
    assert_eq!(stats.completed, 0);
    assert!(results.is_empty());
    assert_eq!(agent.total_calls(), calls_before);
}

#[tokio::test]
async fn test_failed_course_is_retried_on_next_run() {
    let root = TempDir::new().unwrap();
    let good = make_course(root.path(), "a-good", 2);
    let flaky = make_course(root.path(), "b-flaky", 2);
    let agent = OfflineAgent::breaking(&["b-flaky"]);

    let (stats, results) =
        run_pool(agent.clone(), scan(root.path()).await, PipelineSettings::default()).await;
    assert_eq!((stats.completed, stats.failed), (1, 1));
    let failed = results
        .iter()
        .find(|r| r.status == PipelineStatus::Failed)
        .unwrap();
    assert_eq!(failed.course, "b-flaky");
    assert!(!failed.errors.is_empty());

    let rescanned = scan(root.path()).await;
    let states: Vec<(String, CourseState)> =
        rescanned.iter().map(|c| (c.name.clone(), c.state)).collect();
    assert_eq!(
        states,
        vec![
            ("a-good".to_string(), CourseState::Skipped),
            ("b-flaky".to_string(), CourseState::Pending),
        ]
    );

    agent.repair();
    let (stats, _) = run_pool(agent.clone(), rescanned, PipelineSettings::default()).await;
    assert_eq!((stats.completed, stats.skipped, stats.failed), (1, 1, 0));
    assert_complete(&flaky).await;
    assert_eq!(agent.calls_for(&good), vec!["discovery", "generation"]);
    assert_eq!(
        agent.calls_for(&flaky),
        vec!["discovery", "discovery", "generation"]
    );
}

#[tokio::test]
async fn test_large_subtask_is_generated_in_chunks() {
    let root = TempDir::new().unwrap();
    let dir = make_course(root.path(), "long-course", 23);
    let agent = Arc::new(OfflineAgent::default());

    let settings = PipelineSettings::default()
        .with_window(10, 2)
        .with_large_task_threshold(15);
    let (stats, results) = run_pool(agent.clone(), scan(root.path()).await, settings).await;

    assert_eq!(stats.completed, 1);
    let result = &results[0];
    assert_eq!(result.status, PipelineStatus::Complete);
    assert_eq!(result.subtasks.len(), 1);
    assert_eq!(result.subtasks[0].chunks, 2);
    assert_eq!(result.subtasks[0].status, SubtaskStatus::Success);
    assert_eq!(result.artifacts.len(), 2);

    assert_eq!(
        agent.calls_for(&dir),
        vec!["discovery", "architecture", "generation", "generation"]
    );
    let paths = course_forge::CoursePaths::new(&dir);
    assert!(paths.architecture("all").exists());
    let manifest = Manifest::load(&paths).await.unwrap().unwrap();
    assert_eq!(manifest.items[0].status, SubtaskStatus::Success);
    assert_eq!(manifest.items[0].source_refs.len(), 23);
}

#[tokio::test]
async fn test_events_cover_whole_run() {
    let root = TempDir::new().unwrap();
    make_course(root.path(), "only", 1);
    let bus = EventBus::new();
    let names = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&names);
    bus.subscribe(Arc::new(
        move |e: &ForgeEvent| -> Result<(), course_forge::events::ListenerError> {
            sink.lock().unwrap().push(e.name());
            Ok(())
        },
    ));

    let courses = CourseScanner::new(ScanOptions {
        recursive: true,
        ..ScanOptions::default()
    })
    .with_event_bus(Arc::clone(&bus))
    .scan(root.path())
    .await
    .unwrap()
    .courses;

    let agent = Arc::new(OfflineAgent::default());
    let pipeline =
        CoursePipeline::new(agent, PipelineSettings::default()).with_event_bus(Arc::clone(&bus));
    let pool = WorkerPool::new(
        WorkerPoolConfig::new(1),
        Arc::new(pipeline),
        ShutdownController::new(),
    )
    .with_event_bus(Arc::clone(&bus));
    pool.run(courses).await;

    let names = names.lock().unwrap().clone();
    assert_eq!(names.first(), Some(&"scan:started"));
    assert_eq!(names.last(), Some(&"pool:finished"));
    for expected in [
        "scan:completed",
        "pool:started",
        "worker:started",
        "worker:progress",
        "worker:subtask",
        "worker:complete",
        "worker:stopped",
    ] {
        assert!(names.contains(&expected), "missing {expected}: {names:?}");
    }
}
