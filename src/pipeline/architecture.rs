//! Architecture spec for large sub-tasks.
//!
//! Before a large sub-task is generated in chunks, one agent call skims all
//! of its transcripts and fixes the structure every chunk follows. The result
//! is persisted under `.forge/architecture/` so a resumed run reuses it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;
use tracing::warn;

use crate::course::marker::write_atomic;
use crate::course::CoursePaths;
use crate::error::StateError;
use crate::utils::extract_json_value;

/// A file the architecture plans to produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedFile {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

/// Normalized architecture spec of one sub-task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchitectureSpec {
    pub subtask: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub outline: Vec<String>,
    #[serde(default)]
    pub files: Vec<PlannedFile>,
    #[serde(default)]
    pub conventions: Vec<String>,
}

impl ArchitectureSpec {
    pub fn empty(subtask: impl Into<String>) -> Self {
        Self {
            subtask: subtask.into(),
            summary: String::new(),
            outline: Vec::new(),
            files: Vec::new(),
            conventions: Vec::new(),
        }
    }

    /// Decodes a spec from an agent reply.
    ///
    /// JSON anywhere in the reply is decoded leniently. A reply with no JSON
    /// at all is kept verbatim as the summary, since prose still guides the
    /// chunk calls.
    pub fn from_response(subtask: &str, text: &str) -> Self {
        match extract_json_value(text) {
            Ok(value) => Self::from_value(subtask, &value),
            Err(_) => {
                let mut spec = Self::empty(subtask);
                spec.summary = text.trim().to_string();
                spec
            }
        }
    }

    /// Decodes a spec from arbitrary JSON, filling defaults.
    pub fn from_value(subtask: &str, value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::empty(subtask);
        };

        let summary = first_of(obj, &["summary", "overview", "description"])
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        let outline = first_of(obj, &["outline", "sections", "structure"])
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| named(v, &["title", "name", "heading"]))
                    .collect()
            })
            .unwrap_or_default();

        let files = first_of(obj, &["files", "planned_files", "plannedFiles"])
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(decode_file).collect())
            .unwrap_or_default();

        let conventions = first_of(obj, &["conventions", "rules", "notes"])
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| named(v, &["rule", "text"]))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            subtask: subtask.to_string(),
            summary,
            outline,
            files,
            conventions,
        }
    }

    /// True when the architecture carries nothing a chunk call could use.
    pub fn is_empty(&self) -> bool {
        self.summary.is_empty()
            && self.outline.is_empty()
            && self.files.is_empty()
            && self.conventions.is_empty()
    }

    /// Loads the persisted spec of `subtask`, if there is a usable one.
    pub async fn load(paths: &CoursePaths, subtask: &str) -> Result<Option<Self>, StateError> {
        let path = paths.architecture(subtask);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<Value>(&content) {
            Ok(value) => {
                let spec = Self::from_value(subtask, &value);
                Ok((!spec.is_empty()).then_some(spec))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable architecture spec");
                Ok(None)
            }
        }
    }

    pub async fn save(&self, paths: &CoursePaths) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(&paths.architecture(&self.subtask), json.as_bytes()).await
    }
}

fn decode_file(value: &Value) -> Option<PlannedFile> {
    match value {
        Value::String(s) => Some(PlannedFile {
            path: s.clone(),
            purpose: None,
        }),
        Value::Object(obj) => {
            let path = first_of(obj, &["path", "file", "name"])
                .and_then(Value::as_str)?
                .to_string();
            let purpose = first_of(obj, &["purpose", "description", "content"])
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(PlannedFile { path, purpose })
        }
        _ => None,
    }
}

fn named(value: &Value, keys: &[&str]) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => first_of(obj, keys)
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn first_of<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}
