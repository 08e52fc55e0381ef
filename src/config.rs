//! Run configuration.
//!
//! Values are layered, later layers winning:
//!
//! 1. built-in defaults
//! 2. an optional YAML file (`--config forge.yaml`)
//! 3. `FORGE_*` environment variables
//! 4. command-line flags
//!
//! ```yaml
//! concurrency: 4
//! window_size: 12
//! overlap_size: 2
//! agent_command: claude
//! agent_args: ["-p", "--output-format", "json"]
//! agent_timeout_secs: 2400
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::collaborator::CliCollaborator;
use crate::course::ScanOptions;
use crate::pipeline::PipelineSettings;
use crate::scheduler::WorkerPoolConfig;
use crate::shutdown::DEFAULT_FORCE_EXIT_GRACE;

/// Errors that can occur while building the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// The configuration file could not be parsed.
    #[error("Invalid config file '{path}': {message}")]
    InvalidFile { path: PathBuf, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a run needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct ForgeConfig {
    // Scheduling
    /// Courses processed concurrently.
    pub concurrency: usize,
    /// Courses classified concurrently while scanning.
    pub scan_concurrency: usize,

    // Chunking
    /// Fresh transcripts per chunk.
    pub window_size: usize,
    /// Transcripts carried over from the previous chunk.
    pub overlap_size: usize,
    /// Sub-tasks with more transcripts than this are generated in chunks.
    pub large_task_threshold: usize,

    // Agent
    /// Agent executable.
    pub agent_command: String,
    /// Arguments passed before the tool allow-list.
    pub agent_args: Vec<String>,
    /// Flag carrying the tool allow-list; `None` omits it.
    pub allowed_tools_flag: Option<String>,
    /// Upper bound for one agent call.
    pub agent_timeout: Duration,

    // Shutdown and reporting
    /// Delay between a forced-exit request and process exit.
    pub shutdown_grace: Duration,
    /// Append-only JSONL error log.
    pub error_log: PathBuf,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            scan_concurrency: 8,

            window_size: 10,
            overlap_size: 2,
            large_task_threshold: 15,

            agent_command: "claude".to_string(),
            agent_args: vec![
                "-p".to_string(),
                "--output-format".to_string(),
                "json".to_string(),
            ],
            allowed_tools_flag: Some("--allowedTools".to_string()),
            agent_timeout: Duration::from_secs(1800), // 30 minutes

            shutdown_grace: DEFAULT_FORCE_EXIT_GRACE,
            error_log: PathBuf::from("course-forge-errors.jsonl"),
        }
    }
}

/// YAML file layout; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    concurrency: Option<usize>,
    scan_concurrency: Option<usize>,
    window_size: Option<usize>,
    overlap_size: Option<usize>,
    large_task_threshold: Option<usize>,
    agent_command: Option<String>,
    agent_args: Option<Vec<String>>,
    allowed_tools_flag: Option<String>,
    agent_timeout_secs: Option<u64>,
    shutdown_grace_ms: Option<u64>,
    error_log: Option<PathBuf>,
}

impl ForgeConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, then `file` if given, then the environment. The result is
    /// not validated yet so command-line overrides can still be applied.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `FORGE_CONCURRENCY`: Courses processed concurrently (default: 3)
    /// - `FORGE_SCAN_CONCURRENCY`: Courses classified concurrently (default: 8)
    /// - `FORGE_WINDOW_SIZE`: Transcripts per chunk (default: 10)
    /// - `FORGE_OVERLAP_SIZE`: Transcripts repeated between chunks (default: 2)
    /// - `FORGE_LARGE_TASK_THRESHOLD`: Chunking threshold (default: 15)
    /// - `FORGE_AGENT_COMMAND`: Agent executable (default: claude)
    /// - `FORGE_AGENT_ARGS`: Whitespace-separated agent arguments
    /// - `FORGE_ALLOWED_TOOLS_FLAG`: Allow-list flag, empty to disable
    /// - `FORGE_AGENT_TIMEOUT_SECS`: Agent call timeout (default: 1800)
    /// - `FORGE_SHUTDOWN_GRACE_MS`: Forced-exit grace delay (default: 500)
    /// - `FORGE_ERROR_LOG`: Error log path (default: course-forge-errors.jsonl)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a YAML configuration file over the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let file: ConfigFile =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::InvalidFile {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let mut config = Self::default();
        config.apply_file(file);
        Ok(config)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(v) = file.concurrency {
            self.concurrency = v;
        }
        if let Some(v) = file.scan_concurrency {
            self.scan_concurrency = v;
        }
        if let Some(v) = file.window_size {
            self.window_size = v;
        }
        if let Some(v) = file.overlap_size {
            self.overlap_size = v;
        }
        if let Some(v) = file.large_task_threshold {
            self.large_task_threshold = v;
        }
        if let Some(v) = file.agent_command {
            self.agent_command = v;
        }
        if let Some(v) = file.agent_args {
            self.agent_args = v;
        }
        if let Some(v) = file.allowed_tools_flag {
            self.allowed_tools_flag = non_empty(v);
        }
        if let Some(secs) = file.agent_timeout_secs {
            self.agent_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = file.shutdown_grace_ms {
            self.shutdown_grace = Duration::from_millis(ms);
        }
        if let Some(v) = file.error_log {
            self.error_log = v;
        }
    }

    fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        // Scheduling
        if let Some(val) = get("FORGE_CONCURRENCY") {
            self.concurrency = parse_env_value(&val, "FORGE_CONCURRENCY")?;
        }

        if let Some(val) = get("FORGE_SCAN_CONCURRENCY") {
            self.scan_concurrency = parse_env_value(&val, "FORGE_SCAN_CONCURRENCY")?;
        }

        // Chunking
        if let Some(val) = get("FORGE_WINDOW_SIZE") {
            self.window_size = parse_env_value(&val, "FORGE_WINDOW_SIZE")?;
        }

        if let Some(val) = get("FORGE_OVERLAP_SIZE") {
            self.overlap_size = parse_env_value(&val, "FORGE_OVERLAP_SIZE")?;
        }

        if let Some(val) = get("FORGE_LARGE_TASK_THRESHOLD") {
            self.large_task_threshold = parse_env_value(&val, "FORGE_LARGE_TASK_THRESHOLD")?;
        }

        // Agent
        if let Some(val) = get("FORGE_AGENT_COMMAND") {
            self.agent_command = val;
        }

        if let Some(val) = get("FORGE_AGENT_ARGS") {
            self.agent_args = val.split_whitespace().map(str::to_string).collect();
        }

        if let Some(val) = get("FORGE_ALLOWED_TOOLS_FLAG") {
            self.allowed_tools_flag = non_empty(val);
        }

        if let Some(val) = get("FORGE_AGENT_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "FORGE_AGENT_TIMEOUT_SECS")?;
            self.agent_timeout = Duration::from_secs(secs);
        }

        // Shutdown and reporting
        if let Some(val) = get("FORGE_SHUTDOWN_GRACE_MS") {
            let ms: u64 = parse_env_value(&val, "FORGE_SHUTDOWN_GRACE_MS")?;
            self.shutdown_grace = Duration::from_millis(ms);
        }

        if let Some(val) = get("FORGE_ERROR_LOG") {
            self.error_log = PathBuf::from(val);
        }

        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "concurrency must be greater than 0".to_string(),
            ));
        }

        if self.scan_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "scan_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.window_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "window_size must be greater than 0".to_string(),
            ));
        }

        if self.overlap_size >= self.window_size {
            return Err(ConfigError::ValidationFailed(format!(
                "overlap_size ({}) must be smaller than window_size ({})",
                self.overlap_size, self.window_size
            )));
        }

        if self.large_task_threshold == 0 {
            return Err(ConfigError::ValidationFailed(
                "large_task_threshold must be greater than 0".to_string(),
            ));
        }

        if self.agent_command.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "agent_command cannot be empty".to_string(),
            ));
        }

        if self.agent_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "agent_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set course concurrency.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Builder method to set scan concurrency.
    pub fn with_scan_concurrency(mut self, concurrency: usize) -> Self {
        self.scan_concurrency = concurrency;
        self
    }

    /// Builder method to set the chunk window and overlap.
    pub fn with_window(mut self, window_size: usize, overlap_size: usize) -> Self {
        self.window_size = window_size;
        self.overlap_size = overlap_size;
        self
    }

    /// Builder method to set the chunking threshold.
    pub fn with_large_task_threshold(mut self, threshold: usize) -> Self {
        self.large_task_threshold = threshold;
        self
    }

    /// Builder method to set the agent command and its arguments.
    pub fn with_agent(mut self, command: impl Into<String>, args: Vec<String>) -> Self {
        self.agent_command = command.into();
        self.agent_args = args;
        self
    }

    /// Builder method to set the agent timeout.
    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    /// Builder method to set the error log path.
    pub fn with_error_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.error_log = path.into();
        self
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings::default()
            .with_window(self.window_size, self.overlap_size)
            .with_large_task_threshold(self.large_task_threshold)
    }

    pub fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(self.concurrency)
    }

    pub fn scan_options(&self, recursive: bool) -> ScanOptions {
        ScanOptions {
            recursive,
            scan_concurrency: self.scan_concurrency,
            read_only: false,
        }
    }

    /// The agent adapter described by this configuration.
    pub fn collaborator(&self) -> CliCollaborator {
        CliCollaborator::new(&self.agent_command)
            .with_args(self.agent_args.clone())
            .with_allowed_tools_flag(self.allowed_tools_flag.clone())
            .with_timeout(self.agent_timeout)
    }
}

/// Parse an environment variable value into the target type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
