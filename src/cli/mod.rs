//! Command-line interface for course-forge.
//!
//! Provides the `run` and `status` commands.

mod commands;

pub use commands::{parse_cli, run, run_with_cli};
