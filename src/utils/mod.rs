//! Shared utility functions for course-forge.
//!
//! Currently holds JSON extraction from free-form agent responses.

pub mod json_extraction;

pub use json_extraction::{extract_json_value, find_matching_brace, JsonExtractionError};
