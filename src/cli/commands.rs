//! CLI command definitions for course-forge.
//!
//! `run` scans the input, classifies every course and drives the pending ones
//! through the pipeline on a bounded worker pool. `status` performs the same
//! classification without touching anything.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::collaborator::Collaborator;
use crate::config::ForgeConfig;
use crate::course::scanner::{CourseScanner, ScanOptions};
use crate::course::{Course, CourseState};
use crate::events::{ConsoleListener, EventBus};
use crate::pipeline::CoursePipeline;
use crate::report::{ErrorLog, RunSummary};
use crate::scheduler::WorkerPool;
use crate::shutdown::{install_signal_handler, ShutdownController};

/// Orchestrates agent-driven generation of course material.
#[derive(Parser)]
#[command(name = "course-forge")]
#[command(about = "Generate course material from transcripts with a coding agent")]
#[command(version)]
#[command(
    long_about = "course-forge discovers courses (directories of transcripts), classifies them as pending or already complete, and drives an external agent through discovery and generation for each pending course.\n\nProgress is persisted under <course>/.forge so interrupted runs resume where they stopped.\n\nExample usage:\n  course-forge run ./courses --recursive --concurrency 4"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Process every pending course below INPUT.
    Run(RunArgs),

    /// Show which courses are pending and which are already complete.
    #[command(alias = "st")]
    Status(StatusArgs),
}

/// Arguments for `course-forge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// A course directory, or a directory of courses with --recursive.
    pub input: PathBuf,

    /// Treat INPUT as a tree of courses instead of a single course.
    #[arg(short, long)]
    pub recursive: bool,

    /// Number of courses processed in parallel.
    #[arg(short = 'c', long)]
    pub concurrency: Option<usize>,

    /// Number of courses classified in parallel during the scan.
    #[arg(long)]
    pub scan_concurrency: Option<usize>,

    /// YAML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Classify and print the plan without invoking the agent.
    #[arg(long)]
    pub dry_run: bool,

    /// Output the run summary as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `course-forge status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// A course directory, or a directory of courses with --recursive.
    pub input: PathBuf,

    /// Treat INPUT as a tree of courses instead of a single course.
    #[arg(short, long)]
    pub recursive: bool,

    /// Output the table as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
///
/// Per-course failures are reported in the summary and do not make this
/// return an error; only startup problems (bad config, unreadable input) do.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_courses_command(args).await,
        Commands::Status(args) => run_status_command(args).await,
    }
}

// ============================================================================
// Run
// ============================================================================

fn build_config(args: &RunArgs) -> anyhow::Result<ForgeConfig> {
    let mut config = ForgeConfig::load(args.config.as_deref())?;
    if let Some(concurrency) = args.concurrency {
        config = config.with_concurrency(concurrency);
    }
    if let Some(concurrency) = args.scan_concurrency {
        config = config.with_scan_concurrency(concurrency);
    }
    config.validate()?;
    Ok(config)
}

async fn run_courses_command(args: RunArgs) -> anyhow::Result<()> {
    let config = build_config(&args)?;
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();

    let bus = EventBus::new();
    bus.subscribe(Arc::new(ConsoleListener::new()));
    let error_log = Arc::new(ErrorLog::new(&config.error_log, run_id));
    bus.subscribe(error_log.clone());

    let mut scan_options = config.scan_options(args.recursive);
    scan_options.read_only = args.dry_run;
    let report = CourseScanner::new(scan_options)
        .with_event_bus(Arc::clone(&bus))
        .scan(&args.input)
        .await
        .with_context(|| format!("Failed to scan {}", args.input.display()))?;

    if args.dry_run {
        return print_status(&args.input, &report.courses, args.json);
    }

    let collaborator: Arc<dyn Collaborator> = Arc::new(config.collaborator());
    info!(
        run_id = %run_id,
        agent = %config.agent_command,
        concurrency = config.concurrency,
        courses = report.courses.len(),
        "Starting run"
    );

    let shutdown = ShutdownController::new();
    let signal_task =
        install_signal_handler(Arc::clone(&shutdown), Arc::clone(&bus), config.shutdown_grace);

    let pipeline = CoursePipeline::new(collaborator, config.pipeline_settings())
        .with_event_bus(Arc::clone(&bus));
    let pool = WorkerPool::new(config.pool_config(), Arc::new(pipeline), shutdown)
        .with_event_bus(Arc::clone(&bus));

    let results = pool.run(report.courses.clone()).await;
    signal_task.abort();

    let summary = RunSummary::new(
        run_id,
        &args.input,
        started_at,
        pool.stats(),
        &results,
        &report.courses,
    );

    if args.json {
        let json_output = serde_json::to_string_pretty(&summary)
            .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
        println!("{}", json_output);
    } else {
        print!("{}", summary.render_text());
        if summary.stats.failed > 0 {
            println!("\nFailures were appended to {}", error_log.path().display());
        }
    }

    if summary.stats.failed > 0 {
        warn!(failed = summary.stats.failed, "Run finished with failed courses");
    }
    Ok(())
}

// ============================================================================
// Status
// ============================================================================

/// One row of the status table.
#[derive(Debug, Serialize)]
struct StatusRow<'a> {
    name: &'a str,
    path: &'a Path,
    state: CourseState,
    transcripts: usize,
    has_subgroups: bool,
}

#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    input: &'a Path,
    total: usize,
    pending: usize,
    skipped: usize,
    courses: Vec<StatusRow<'a>>,
}

impl<'a> StatusReport<'a> {
    fn new(input: &'a Path, courses: &'a [Course]) -> Self {
        let pending = courses.iter().filter(|c| c.is_pending()).count();
        Self {
            input,
            total: courses.len(),
            pending,
            skipped: courses.len() - pending,
            courses: courses
                .iter()
                .map(|c| StatusRow {
                    name: &c.name,
                    path: &c.path,
                    state: c.state,
                    transcripts: c.source_material.len(),
                    has_subgroups: c.has_subgroups,
                })
                .collect(),
        }
    }

    fn render_text(&self) -> String {
        let width = self
            .courses
            .iter()
            .map(|row| row.name.len())
            .max()
            .unwrap_or(0)
            .max("COURSE".len());

        let mut out = format!("{:<8}  {:<width$}  TRANSCRIPTS\n", "STATE", "COURSE");
        for row in &self.courses {
            let grouped = if row.has_subgroups { " (sections)" } else { "" };
            out.push_str(&format!(
                "{:<8}  {:<width$}  {}{}\n",
                row.state.to_string(),
                row.name,
                row.transcripts,
                grouped
            ));
        }
        out.push_str(&format!(
            "\n{} course(s): {} pending, {} skipped\n",
            self.total, self.pending, self.skipped
        ));
        out
    }
}

fn print_status(input: &Path, courses: &[Course], json: bool) -> anyhow::Result<()> {
    let report = StatusReport::new(input, courses);
    if json {
        let json_output = serde_json::to_string_pretty(&report)
            .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
        println!("{}", json_output);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

async fn run_status_command(args: StatusArgs) -> anyhow::Result<()> {
    let options = ScanOptions {
        recursive: args.recursive,
        read_only: true,
        ..ScanOptions::default()
    };
    let report = CourseScanner::new(options)
        .scan(&args.input)
        .await
        .with_context(|| format!("Failed to scan {}", args.input.display()))?;

    print_status(&args.input, &report.courses, args.json)
}
